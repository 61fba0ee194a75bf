//! Shared fixtures for integration tests.

use crm_import::{ImportClient, ImportConfig, ImportRun, ProgressEvent};
use wiremock::MockServer;

/// Import endpoint path used by every mock server.
pub const IMPORT_PATH: &str = "/api/contacts/import/stream";

/// Join progress payloads into a wire transcript, one `data:` line each.
pub fn transcript(payloads: &[&str]) -> String {
    payloads
        .iter()
        .map(|p| format!("data: {}\n", p))
        .collect()
}

/// Client pointed at the mock server.
pub fn client_for(server: &MockServer) -> ImportClient {
    ImportClient::new(
        ImportConfig::default()
            .with_base_url(server.uri())
            .with_import_path(IMPORT_PATH)
            .with_auth_token("test-token"),
    )
}

/// Pull every event out of a run, panicking on transport failure.
pub async fn collect(run: &mut ImportRun) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Some(event) = run.next_event().await.expect("transport failure") {
        events.push(event);
    }
    events
}
