//! Bulk contact import progress consumer for the networking CRM.
//!
//! Starts a server-side contact import and exposes its progress as a
//! cancelable, pull-based sequence of [`ProgressEvent`]s.
//!
//! # Example
//!
//! ```ignore
//! use crm_import::{ImportClient, ImportConfig};
//!
//! let client = ImportClient::new(ImportConfig::from_env());
//! let mut run = client.start().await;
//! while let Some(event) = run.next_event().await? {
//!     println!("{:?} {}/{}", event.status, event.processed, event.total);
//! }
//! ```

pub mod adapters;
pub mod config;
pub mod decoder;
pub mod error;
pub mod import;
pub mod progress;
pub mod tracker;
pub mod traits;
pub mod transport;

pub use config::ImportConfig;
pub use error::ImportError;
pub use import::{ImportClient, ImportEventStream, ImportRun};
pub use progress::{ContactStatus, CurrentContact, ImportStatus, ProgressEvent};
pub use tracker::{drive, ImportFailure, ImportOutcome, ImportPhase, ImportTracker};
