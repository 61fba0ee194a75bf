//! Mock implementations for testing.
//!
//! - [`MockHttpClient`] - HTTP client serving scripted response bodies

pub mod http;

pub use http::{MockHttpClient, MockResponse, RecordedRequest};
