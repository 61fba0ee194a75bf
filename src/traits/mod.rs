//! Trait abstractions for dependency injection and testability.
//!
//! # Traits
//!
//! - [`HttpClient`] - streaming HTTP POST used to start an import run

pub mod http;

pub use http::{ByteStream, Headers, HttpClient, HttpError};
