//! Progress events reported by the bulk contact import.
//!
//! The server writes one `data: <json>` line per update. Every other line
//! (keep-alive comments, blank separators, `event:` fields) carries no
//! payload and is ignored.

use serde::{Deserialize, Deserializer, Serialize};

/// Prefix marking a line that carries a progress payload.
pub const DATA_PREFIX: &str = "data: ";

/// Lifecycle status of an import run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Started,
    Progress,
    Completed,
    Error,
}

impl ImportStatus {
    /// `completed` and `error` end the run.
    pub fn is_terminal(self) -> bool {
        matches!(self, ImportStatus::Completed | ImportStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ImportStatus::Started => "started",
            ImportStatus::Progress => "progress",
            ImportStatus::Completed => "completed",
            ImportStatus::Error => "error",
        }
    }
}

/// What happened to the contact currently being imported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactStatus {
    Processing,
    Created,
    Skipped,
}

/// The individual record a `progress` event is reporting on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentContact {
    pub name: String,
    pub status: ContactStatus,
}

/// One update from the import, as yielded to the caller.
///
/// Counters are absent or `null` on most statuses and default to 0. The layer
/// does not check `processed <= total`; values are passed through as received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub status: ImportStatus,
    #[serde(default, deserialize_with = "count_or_zero")]
    pub total: u64,
    #[serde(default, deserialize_with = "count_or_zero")]
    pub processed: u64,
    #[serde(default, deserialize_with = "count_or_zero")]
    pub created: u64,
    #[serde(default, deserialize_with = "count_or_zero")]
    pub skipped: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_contact: Option<CurrentContact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Read a counter, treating an explicit `null` like a missing field.
fn count_or_zero<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.unwrap_or_default())
}

impl ProgressEvent {
    /// Event with the given status and every optional field empty.
    pub fn new(status: ImportStatus) -> Self {
        Self {
            status,
            total: 0,
            processed: 0,
            created: 0,
            skipped: 0,
            current_contact: None,
            error: None,
        }
    }

    /// Terminal `error` event carrying a message for the user.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::new(ImportStatus::Error)
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Share of records processed, 0 to 100.
    ///
    /// `None` while the total is unknown. Clamped if the server over-reports.
    pub fn percent(&self) -> Option<u8> {
        if self.total == 0 {
            return None;
        }
        let percent = self.processed.saturating_mul(100) / self.total;
        Some(percent.min(100) as u8)
    }
}

/// Interpret one complete line of the progress stream.
///
/// Returns `None` for lines without the data prefix and for payloads that do
/// not decode. A bad payload is logged and dropped so the run can continue.
pub fn parse_progress_line(line: &str) -> Option<ProgressEvent> {
    let payload = line.strip_prefix(DATA_PREFIX)?;

    match serde_json::from_str::<ProgressEvent>(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!(error = %e, payload, "Dropping malformed import progress frame");
            None
        }
    }
}
