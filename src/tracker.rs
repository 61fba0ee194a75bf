//! View state for an import progress dialog.
//!
//! [`ImportTracker`] folds the events of one run into what a progress dialog
//! renders: phase, counters, a short log of recent contacts and timing. It
//! keeps server-reported failures apart from lost-connection failures, since
//! the two are presented differently.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::Duration;

use crate::error::ImportError;
use crate::import::ImportRun;
use crate::progress::{ContactStatus, ImportStatus, ProgressEvent};

/// Default number of recent contacts kept for display.
pub const DEFAULT_RECENT_CAPACITY: usize = 50;

/// Where the import stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportPhase {
    Idle,
    Running,
    Completed,
    Failed,
}

/// Why an import did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportFailure {
    /// The server reported the failure; show its message
    Server(String),
    /// The client lost the stream; show a generic retry prompt
    Transport(String),
    /// The body ended before any terminal status arrived
    Interrupted,
}

impl ImportFailure {
    pub fn message(&self) -> &str {
        match self {
            ImportFailure::Server(msg) | ImportFailure::Transport(msg) => msg.as_str(),
            ImportFailure::Interrupted => "The import ended unexpectedly. Please try again.",
        }
    }
}

/// One line of the recent-contacts log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactActivity {
    pub name: String,
    pub status: ContactStatus,
    pub at: DateTime<Utc>,
}

/// Final tally of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOutcome {
    pub total: u64,
    pub processed: u64,
    pub created: u64,
    pub skipped: u64,
    pub failure: Option<ImportFailure>,
}

impl ImportOutcome {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Accumulated state of one import run.
#[derive(Debug, Clone)]
pub struct ImportTracker {
    phase: ImportPhase,
    total: u64,
    processed: u64,
    created: u64,
    skipped: u64,
    recent: VecDeque<ContactActivity>,
    capacity: usize,
    failure: Option<ImportFailure>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl Default for ImportTracker {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_RECENT_CAPACITY)
    }
}

impl ImportTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker keeping at most `capacity` recent contacts (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            phase: ImportPhase::Idle,
            total: 0,
            processed: 0,
            created: 0,
            skipped: 0,
            recent: VecDeque::with_capacity(capacity),
            capacity,
            failure: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Fold one event into the state.
    ///
    /// Events arriving after the tracker reached a final phase are ignored.
    pub fn apply(&mut self, event: &ProgressEvent) {
        if self.is_finished() {
            tracing::debug!(status = event.status.as_str(), "Ignoring event after import finished");
            return;
        }
        if self.phase == ImportPhase::Idle {
            self.phase = ImportPhase::Running;
            self.started_at = Some(Utc::now());
        }

        match event.status {
            ImportStatus::Started => {}
            ImportStatus::Progress => {
                self.take_counts(event);
                if let Some(contact) = &event.current_contact {
                    self.push_recent(ContactActivity {
                        name: contact.name.clone(),
                        status: contact.status,
                        at: Utc::now(),
                    });
                }
            }
            ImportStatus::Completed => {
                // Counts on `completed` are optional; keep the last ones otherwise.
                if event.total > 0 || event.processed > 0 || event.created > 0 || event.skipped > 0
                {
                    self.take_counts(event);
                }
                self.finish(ImportPhase::Completed, None);
            }
            ImportStatus::Error => {
                let message = event
                    .error
                    .clone()
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| "The import failed.".to_string());
                self.finish(ImportPhase::Failed, Some(ImportFailure::Server(message)));
            }
        }
    }

    /// Mark the run failed because the stream broke.
    pub fn record_transport_failure(&mut self, err: &ImportError) {
        if self.is_finished() {
            return;
        }
        self.finish(
            ImportPhase::Failed,
            Some(ImportFailure::Transport(err.user_message())),
        );
    }

    /// Mark the run failed because the body ended without a terminal status.
    pub fn record_interrupted(&mut self) {
        if self.is_finished() {
            return;
        }
        self.finish(ImportPhase::Failed, Some(ImportFailure::Interrupted));
    }

    pub fn phase(&self) -> ImportPhase {
        self.phase
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.phase, ImportPhase::Completed | ImportPhase::Failed)
    }

    pub fn failure(&self) -> Option<&ImportFailure> {
        self.failure.as_ref()
    }

    /// Most recent contacts, oldest first.
    pub fn recent(&self) -> impl Iterator<Item = &ContactActivity> {
        self.recent.iter()
    }

    /// Share processed, 0 to 100; `None` until a total is known.
    pub fn percent(&self) -> Option<u8> {
        if self.total == 0 {
            return None;
        }
        Some((self.processed.saturating_mul(100) / self.total).min(100) as u8)
    }

    /// Time since the first event; frozen once finished.
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        let started = self.started_at?;
        let end = self.finished_at.unwrap_or_else(Utc::now);
        Some(end - started)
    }

    /// Snapshot of counters and failure.
    pub fn outcome(&self) -> ImportOutcome {
        ImportOutcome {
            total: self.total,
            processed: self.processed,
            created: self.created,
            skipped: self.skipped,
            failure: self.failure.clone(),
        }
    }

    fn take_counts(&mut self, event: &ProgressEvent) {
        self.total = event.total;
        self.processed = event.processed;
        self.created = event.created;
        self.skipped = event.skipped;
    }

    fn push_recent(&mut self, activity: ContactActivity) {
        if self.recent.len() == self.capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(activity);
    }

    fn finish(&mut self, phase: ImportPhase, failure: Option<ImportFailure>) {
        self.phase = phase;
        self.failure = failure;
        let now = Utc::now();
        self.started_at.get_or_insert(now);
        self.finished_at = Some(now);
    }
}

/// Pull `run` to its end, feeding every event into `tracker`.
///
/// Each pull may wait at most `idle` for bytes. Transport failures and
/// idle timeouts are recorded on the tracker and also returned.
pub async fn drive(
    run: &mut ImportRun,
    tracker: &mut ImportTracker,
    idle: Duration,
) -> Result<ImportOutcome, ImportError> {
    loop {
        match run.next_event_timeout(idle).await {
            Ok(Some(event)) => tracker.apply(&event),
            Ok(None) => break,
            Err(e) => {
                tracker.record_transport_failure(&e);
                return Err(e);
            }
        }
    }
    if !tracker.is_finished() {
        tracker.record_interrupted();
    }
    Ok(tracker.outcome())
}
