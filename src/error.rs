//! Failures of the import consumer itself.
//!
//! Two channels report problems to the caller and they must not be mixed:
//!
//! | Channel | Meaning | Shown to the user as |
//! |---------|---------|----------------------|
//! | terminal `error` [`ProgressEvent`](crate::progress::ProgressEvent) | the server says the import failed | the server's message |
//! | `Err(ImportError)` from the run | the client lost the stream | a generic retry prompt |
//!
//! Startup failures (bad status, no body, refused connection) travel on the
//! first channel. Only failures after the body opened use this type.

use std::time::Duration;
use thiserror::Error;

use crate::traits::HttpError;

/// Error raised by a run after its body stream has opened.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ImportError {
    /// Reading the response body failed
    #[error("Import stream failed: {0}")]
    Transport(#[from] HttpError),

    /// No bytes arrived within the caller's idle timeout
    #[error("No import progress received for {idle:?}")]
    IdleTimeout { idle: Duration },
}

impl ImportError {
    /// Check if starting a new run is a reasonable reaction.
    pub fn is_retryable(&self) -> bool {
        match self {
            ImportError::Transport(HttpError::InvalidUrl(_)) => false,
            ImportError::Transport(_) => true,
            ImportError::IdleTimeout { .. } => true,
        }
    }

    /// Get a user-friendly error message.
    pub fn user_message(&self) -> String {
        match self {
            ImportError::Transport(_) => {
                "Lost connection to the server during the import. Please try again.".to_string()
            }
            ImportError::IdleTimeout { idle } => format!(
                "The import stopped reporting progress for {:?}. Please try again.",
                idle
            ),
        }
    }

    /// Short code for logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            ImportError::Transport(_) => "IMPORT_TRANSPORT",
            ImportError::IdleTimeout { .. } => "IMPORT_IDLE_TIMEOUT",
        }
    }
}
