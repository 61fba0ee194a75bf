//! Bulk contact import client.
//!
//! [`ImportClient::start`] issues the one request of a run and hands back an
//! [`ImportRun`], a pull-based sequence of [`ProgressEvent`]s. Each pull reads
//! at most as many chunks as it takes to complete the next significant line,
//! so the network is read at the pace the caller asks for events.
//!
//! A run ends at the first of:
//! - a `completed` or `error` event (yielded, then nothing more)
//! - the body ending (any unterminated tail is discarded)
//! - a read failure (returned as `Err`, then nothing more)
//! - the caller calling [`ImportRun::close`] or dropping the run
//!
//! The body stream is released on every one of those paths.

use futures_util::stream::{self, Stream};
use serde_json::Value;
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;
use uuid::Uuid;

use crate::adapters::ReqwestHttpClient;
use crate::config::ImportConfig;
use crate::decoder::LineDecoder;
use crate::error::ImportError;
use crate::progress::{parse_progress_line, ProgressEvent};
use crate::traits::{Headers, HttpClient, HttpError};
use crate::transport::BodyReader;

/// A run adapted into a `Stream`.
pub type ImportEventStream =
    Pin<Box<dyn Stream<Item = Result<ProgressEvent, ImportError>> + Send>>;

/// Client that starts import runs against the CRM API.
pub struct ImportClient<C: HttpClient = ReqwestHttpClient> {
    http: C,
    config: ImportConfig,
}

impl ImportClient<ReqwestHttpClient> {
    /// Create a client backed by reqwest.
    pub fn new(config: ImportConfig) -> Self {
        Self::with_http_client(ReqwestHttpClient::new(), config)
    }
}

impl<C: HttpClient> ImportClient<C> {
    /// Create a client over any [`HttpClient`].
    pub fn with_http_client(http: C, config: ImportConfig) -> Self {
        Self { http, config }
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// Start a new import run.
    ///
    /// Issues exactly one request and never retries. If the request fails,
    /// the returned run yields a single `error` event and ends without ever
    /// opening a body. Calling this again starts an independent run.
    pub async fn start(&self) -> ImportRun {
        let run_id = Uuid::new_v4();
        let url = self.config.import_url();
        tracing::info!(run_id = %run_id, url = %url, "Starting contact import");

        match self.http.post_stream(&url, "{}", &self.request_headers()).await {
            Ok(body) => ImportRun::streaming(run_id, BodyReader::new(body)),
            Err(e) => {
                let message = startup_failure_message(&e);
                tracing::warn!(run_id = %run_id, error = %e, "Import request failed");
                ImportRun::failed_to_start(run_id, ProgressEvent::failed(message))
            }
        }
    }

    /// Start a run and adapt it into a `Stream`.
    pub async fn stream(&self) -> ImportEventStream {
        Box::pin(self.start().await.into_stream())
    }

    fn request_headers(&self) -> Headers {
        let mut headers = Headers::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.insert("Accept".to_string(), "text/event-stream".to_string());
        if let Some(token) = &self.config.auth_token {
            headers.insert("Authorization".to_string(), format!("Bearer {}", token));
        }
        headers
    }
}

/// Message for the synthetic `error` event of a run that never opened.
fn startup_failure_message(err: &HttpError) -> String {
    match err {
        HttpError::ServerError { status, message } => server_error_message(message)
            .unwrap_or_else(|| format!("Import failed (HTTP {})", status)),
        HttpError::NoBody => "No response body".to_string(),
        other => format!("Import request failed: {}", other),
    }
}

/// Pull `error` (or `message`) out of a JSON error body.
fn server_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["error", "message"]
        .iter()
        .filter_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|msg| !msg.is_empty())
        .map(str::to_string)
}

/// One execution of the import progress consumer.
///
/// Owns its decode buffer and body exclusively. Not restartable: once it has
/// ended, every pull returns `Ok(None)`.
#[derive(Debug)]
pub struct ImportRun {
    run_id: Uuid,
    reader: Option<BodyReader>,
    decoder: LineDecoder,
    lines: VecDeque<String>,
    startup_failure: Option<ProgressEvent>,
    finished: bool,
}

impl ImportRun {
    fn streaming(run_id: Uuid, reader: BodyReader) -> Self {
        Self {
            run_id,
            reader: Some(reader),
            decoder: LineDecoder::new(),
            lines: VecDeque::new(),
            startup_failure: None,
            finished: false,
        }
    }

    fn failed_to_start(run_id: Uuid, event: ProgressEvent) -> Self {
        Self {
            run_id,
            reader: None,
            decoder: LineDecoder::new(),
            lines: VecDeque::new(),
            startup_failure: Some(event),
            finished: false,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Pull the next event.
    ///
    /// - `Ok(Some(event))` - the next update; if terminal, the run has ended
    /// - `Ok(None)` - the run has ended
    /// - `Err(_)` - the body failed mid-read; the run has ended
    ///
    /// Cancel-safe: dropping the returned future while it waits for bytes
    /// loses nothing, and the run can be pulled again or closed.
    pub async fn next_event(&mut self) -> Result<Option<ProgressEvent>, ImportError> {
        self.pull(None).await
    }

    /// Pull the next event, giving up if the body stays silent too long.
    ///
    /// `idle` bounds each wait for a chunk, not the whole pull: keep-alive
    /// lines and partial frames count as activity. On timeout the run is
    /// closed and `ImportError::IdleTimeout` returned.
    pub async fn next_event_timeout(
        &mut self,
        idle: Duration,
    ) -> Result<Option<ProgressEvent>, ImportError> {
        self.pull(Some(idle)).await
    }

    async fn pull(
        &mut self,
        idle: Option<Duration>,
    ) -> Result<Option<ProgressEvent>, ImportError> {
        loop {
            if self.finished {
                return Ok(None);
            }

            if let Some(event) = self.startup_failure.take() {
                self.finish("request failed");
                return Ok(Some(event));
            }

            while let Some(line) = self.lines.pop_front() {
                let Some(event) = parse_progress_line(&line) else {
                    continue;
                };
                if event.is_terminal() {
                    tracing::info!(
                        run_id = %self.run_id,
                        status = event.status.as_str(),
                        processed = event.processed,
                        total = event.total,
                        "Import reached terminal status"
                    );
                    self.finish("terminal status");
                }
                return Ok(Some(event));
            }

            let read = match self.reader.as_mut() {
                Some(reader) => match idle {
                    Some(idle) => tokio::time::timeout(idle, reader.next_chunk())
                        .await
                        .map_err(|_| idle),
                    None => Ok(reader.next_chunk().await),
                },
                None => {
                    self.finish("no body");
                    return Ok(None);
                }
            };

            let chunk = match read {
                Ok(chunk) => chunk,
                Err(idle) => {
                    tracing::warn!(
                        run_id = %self.run_id,
                        idle_ms = idle.as_millis() as u64,
                        "Import stream went silent"
                    );
                    self.finish("idle timeout");
                    return Err(ImportError::IdleTimeout { idle });
                }
            };

            match chunk {
                Some(Ok(chunk)) => {
                    let lines = self.decoder.push(&chunk);
                    tracing::trace!(
                        run_id = %self.run_id,
                        bytes = chunk.len(),
                        lines = lines.len(),
                        "Decoded import chunk"
                    );
                    self.lines.extend(lines);
                }
                Some(Err(e)) => {
                    tracing::warn!(run_id = %self.run_id, error = %e, "Import stream read failed");
                    self.finish("read failed");
                    return Err(ImportError::Transport(e));
                }
                None => {
                    if let Some(rest) = std::mem::take(&mut self.decoder).finish() {
                        tracing::debug!(
                            run_id = %self.run_id,
                            discarded_bytes = rest.len(),
                            "Discarding unterminated tail of import stream"
                        );
                    }
                    tracing::warn!(
                        run_id = %self.run_id,
                        "Import stream ended without a terminal status"
                    );
                    self.finish("body ended");
                    return Ok(None);
                }
            }
        }
    }

    /// Stop the run early. Idempotent; dropping the run does the same.
    pub fn close(&mut self) {
        self.finish("closed by caller");
    }

    /// Adapt into a `Stream` that ends with the run.
    pub fn into_stream(self) -> impl Stream<Item = Result<ProgressEvent, ImportError>> + Send {
        stream::unfold(self, |mut run| async move {
            match run.next_event().await {
                Ok(Some(event)) => Some((Ok(event), run)),
                Ok(None) => None,
                Err(e) => Some((Err(e), run)),
            }
        })
    }

    fn finish(&mut self, reason: &'static str) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.lines.clear();
        if let Some(mut reader) = self.reader.take() {
            reader.release();
        }
        tracing::debug!(run_id = %self.run_id, reason, "Import run finished");
    }
}

impl Drop for ImportRun {
    fn drop(&mut self) {
        self.finish("dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::{MockHttpClient, MockResponse};
    use crate::progress::{ContactStatus, ImportStatus};
    use crate::traits::ByteStream;
    use bytes::Bytes;
    use futures_util::StreamExt;

    const URL: &str = "http://crm.test/api/contacts/import/stream";

    fn client_with(response: MockResponse) -> (MockHttpClient, ImportClient<MockHttpClient>) {
        let http = MockHttpClient::new();
        http.set_response(URL, response);
        let config = ImportConfig::default().with_base_url("http://crm.test");
        (http.clone(), ImportClient::with_http_client(http, config))
    }

    async fn collect(run: &mut ImportRun) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Some(event) = run.next_event().await.unwrap() {
            events.push(event);
        }
        events
    }

    fn progress(total: u64, processed: u64) -> ProgressEvent {
        ProgressEvent {
            total,
            processed,
            ..ProgressEvent::new(ImportStatus::Progress)
        }
    }

    fn completed(total: u64, processed: u64) -> ProgressEvent {
        ProgressEvent {
            status: ImportStatus::Completed,
            ..progress(total, processed)
        }
    }

    const TRANSCRIPT: &str = concat!(
        ": connected\n",
        "data: {\"status\":\"started\"}\n",
        "\n",
        "data: {\"status\":\"progress\",\"total\":3,\"processed\":1,\"created\":1,\"currentContact\":{\"name\":\"Zoë Ångström\",\"status\":\"created\"}}\n",
        "data: {\"status\":\"progress\",\"total\":3,\"processed\":2,\"created\":1,\"skipped\":1,\"currentContact\":{\"name\":\"李小龙\",\"status\":\"skipped\"}}\n",
        "data: {\"status\":\"completed\",\"total\":3,\"processed\":3,\"created\":2,\"skipped\":1}\n",
    );

    #[tokio::test]
    async fn test_request_shape() {
        let http = MockHttpClient::new();
        http.set_default_response(MockResponse::Stream(vec![]));
        let config = ImportConfig::default()
            .with_base_url("http://crm.test/")
            .with_auth_token("tok-1");
        let client = ImportClient::with_http_client(http.clone(), config);

        let mut run = client.start().await;
        assert_eq!(run.next_event().await.unwrap(), None);

        let requests = http.get_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].url, URL);
        assert_eq!(requests[0].body.as_deref(), Some("{}"));
        assert_eq!(requests[0].headers["Accept"], "text/event-stream");
        assert_eq!(requests[0].headers["Authorization"], "Bearer tok-1");
    }

    #[tokio::test]
    async fn test_full_transcript() {
        let (http, client) = client_with(MockResponse::split_at(TRANSCRIPT, &[]));
        let mut run = client.start().await;
        let events = collect(&mut run).await;

        let statuses: Vec<_> = events.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![
                ImportStatus::Started,
                ImportStatus::Progress,
                ImportStatus::Progress,
                ImportStatus::Completed,
            ]
        );
        let contact = events[1].current_contact.as_ref().unwrap();
        assert_eq!(contact.name, "Zoë Ångström");
        assert_eq!(contact.status, ContactStatus::Created);
        assert_eq!(events[3].created, 2);
        assert!(run.is_finished());
        assert_eq!(http.release_count(), 1);
    }

    #[tokio::test]
    async fn test_any_chunking_yields_same_events() {
        let (_, client) = client_with(MockResponse::split_at(TRANSCRIPT, &[]));
        let expected = collect(&mut client.start().await).await;
        assert_eq!(expected.len(), 4);

        let len = TRANSCRIPT.len();
        for first in (0..len).step_by(7) {
            for second in (first..len).step_by(13) {
                let (_, client) =
                    client_with(MockResponse::split_at(TRANSCRIPT, &[first, second]));
                let events = collect(&mut client.start().await).await;
                assert_eq!(events, expected, "split at {} and {}", first, second);
            }
        }

        // Byte-at-a-time splits every multi-byte character.
        let offsets: Vec<usize> = (1..len).collect();
        let (_, client) = client_with(MockResponse::split_at(TRANSCRIPT, &offsets));
        assert_eq!(collect(&mut client.start().await).await, expected);
    }

    #[tokio::test]
    async fn test_nothing_after_terminal_event() {
        let transcript = concat!(
            "data: {\"status\":\"error\",\"error\":\"LinkedIn session expired\"}\n",
            "data: {\"status\":\"progress\",\"total\":9,\"processed\":9}\n",
            "data: {\"status\":\"completed\"}\n",
        );
        let (http, client) = client_with(MockResponse::split_at(transcript, &[]));
        let mut run = client.start().await;

        let first = run.next_event().await.unwrap().unwrap();
        assert_eq!(first, ProgressEvent::failed("LinkedIn session expired"));
        assert_eq!(http.release_count(), 1);

        assert_eq!(run.next_event().await.unwrap(), None);
        assert_eq!(run.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stops_reading_after_terminal_event() {
        let (http, client) = client_with(MockResponse::StreamPending(vec![
            Bytes::from("data: {\"status\":\"completed\"}\n"),
            Bytes::from("data: {\"status\":\"progress\"}\n"),
        ]));
        let mut run = client.start().await;

        assert_eq!(
            run.next_event().await.unwrap(),
            Some(ProgressEvent::new(ImportStatus::Completed))
        );
        // A pending body would hang here if the run kept reading.
        assert_eq!(run.next_event().await.unwrap(), None);
        assert_eq!(http.chunks_read(), 1);
        assert_eq!(http.release_count(), 1);
    }

    #[tokio::test]
    async fn test_bad_lines_do_not_change_valid_events() {
        let clean = concat!(
            "data: {\"status\":\"progress\",\"total\":2,\"processed\":1}\n",
            "data: {\"status\":\"completed\",\"total\":2,\"processed\":2}\n",
        );
        let noisy = concat!(
            "garbage without prefix\n",
            "data: {\"status\":\"progress\",\"total\":2,\"processed\":1}\n",
            "data: {not valid json}\n",
            "data: {\"status\":\"unknown\"}\n",
            "event: progress\n",
            "data: {\"status\":\"completed\",\"total\":2,\"processed\":2}\n",
        );

        let (_, client) = client_with(MockResponse::split_at(clean, &[]));
        let expected = collect(&mut client.start().await).await;

        let (_, client) = client_with(MockResponse::split_at(noisy, &[30, 61, 90]));
        let events = collect(&mut client.start().await).await;

        assert_eq!(events, expected);
        assert_eq!(events, vec![progress(2, 1), completed(2, 2)]);
    }

    #[tokio::test]
    async fn test_startup_status_error_with_json_message() {
        let (http, client) = client_with(MockResponse::Error(HttpError::ServerError {
            status: 503,
            message: r#"{"error":"rate limited"}"#.to_string(),
        }));
        let mut run = client.start().await;

        assert_eq!(
            collect(&mut run).await,
            vec![ProgressEvent::failed("rate limited")]
        );
        assert_eq!(http.get_requests().len(), 1);
        assert_eq!(http.release_count(), 0);
    }

    #[tokio::test]
    async fn test_startup_status_error_fallback_message() {
        let (_, client) = client_with(MockResponse::Error(HttpError::ServerError {
            status: 500,
            message: "<html>Internal Server Error</html>".to_string(),
        }));
        let events = collect(&mut client.start().await).await;
        assert_eq!(events, vec![ProgressEvent::failed("Import failed (HTTP 500)")]);
    }

    #[tokio::test]
    async fn test_startup_no_body() {
        let (_, client) = client_with(MockResponse::Error(HttpError::NoBody));
        let events = collect(&mut client.start().await).await;
        assert_eq!(events, vec![ProgressEvent::failed("No response body")]);
    }

    #[tokio::test]
    async fn test_startup_connection_failure_is_an_event() {
        let (_, client) = client_with(MockResponse::Error(HttpError::ConnectionFailed(
            "refused".to_string(),
        )));
        let mut run = client.start().await;
        let event = run.next_event().await.unwrap().unwrap();
        assert_eq!(event.status, ImportStatus::Error);
        assert_eq!(
            event.error.as_deref(),
            Some("Import request failed: Connection failed: refused")
        );
        assert_eq!(run.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_mid_stream_failure_is_an_error_not_an_event() {
        let (http, client) = client_with(MockResponse::StreamThenError(
            vec![Bytes::from(
                "data: {\"status\":\"progress\",\"total\":5,\"processed\":1}\ndata: {\"sta",
            )],
            HttpError::Io("connection reset".to_string()),
        ));
        let mut run = client.start().await;

        assert_eq!(run.next_event().await.unwrap(), Some(progress(5, 1)));
        let err = run.next_event().await.unwrap_err();
        assert_eq!(
            err,
            ImportError::Transport(HttpError::Io("connection reset".to_string()))
        );
        assert_eq!(http.release_count(), 1);
        assert_eq!(run.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_body_end_without_terminal_discards_tail() {
        let (http, client) = client_with(MockResponse::Stream(vec![Bytes::from(
            "data: {\"status\":\"progress\",\"total\":5,\"processed\":1}\ndata: {\"status\":\"completed\"}",
        )]));
        let mut run = client.start().await;

        assert_eq!(collect(&mut run).await, vec![progress(5, 1)]);
        assert!(run.is_finished());
        assert_eq!(http.release_count(), 1);
    }

    #[tokio::test]
    async fn test_release_once_on_completion() {
        let (http, client) = client_with(MockResponse::split_at(TRANSCRIPT, &[40]));
        let mut run = client.start().await;
        collect(&mut run).await;
        run.close();
        drop(run);
        assert_eq!(http.release_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_after_first_event_releases_and_stops() {
        let (http, client) = client_with(MockResponse::Stream(vec![
            Bytes::from("data: {\"status\":\"progress\",\"total\":3,\"processed\":1}\n"),
            Bytes::from("data: {\"status\":\"progress\",\"total\":3,\"processed\":2}\n"),
            Bytes::from("data: {\"status\":\"completed\"}\n"),
        ]));
        let mut run = client.start().await;

        assert_eq!(run.next_event().await.unwrap(), Some(progress(3, 1)));
        run.close();

        assert_eq!(http.release_count(), 1);
        assert_eq!(http.chunks_read(), 1);
        assert_eq!(run.next_event().await.unwrap(), None);

        drop(run);
        assert_eq!(http.release_count(), 1);
    }

    #[tokio::test]
    async fn test_dropping_run_releases_body() {
        let (http, client) = client_with(MockResponse::StreamPending(vec![Bytes::from(
            "data: {\"status\":\"started\"}\n",
        )]));
        let mut run = client.start().await;
        assert!(run.next_event().await.unwrap().is_some());
        assert_eq!(http.release_count(), 0);

        drop(run);
        assert_eq!(http.release_count(), 1);
    }

    #[tokio::test]
    async fn test_idle_timeout_closes_run() {
        let (http, client) = client_with(MockResponse::StreamPending(vec![]));
        let mut run = client.start().await;

        let err = run
            .next_event_timeout(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ImportError::IdleTimeout {
                idle: Duration::from_millis(20)
            }
        );
        assert!(run.is_finished());
        assert_eq!(http.release_count(), 1);
    }

    /// Body yielding one chunk per line, each after `interval`.
    fn paced(lines: Vec<&'static str>, interval: Duration) -> ByteStream {
        Box::pin(stream::unfold(lines.into_iter(), move |mut lines| async move {
            let line = lines.next()?;
            tokio::time::sleep(interval).await;
            Some((Ok::<_, HttpError>(Bytes::from(line)), lines))
        }))
    }

    #[tokio::test]
    async fn test_keepalives_keep_slow_run_alive() {
        let mut lines = vec![": keep-alive\n"; 8];
        lines.push("data: {\"status\":");
        lines.push("\"completed\"}\n");
        let body = paced(lines, Duration::from_millis(20));
        let mut run = ImportRun::streaming(Uuid::new_v4(), BodyReader::new(body));

        // The whole pull takes ~200ms, but no single gap exceeds 20ms.
        let event = run
            .next_event_timeout(Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(event, Some(ProgressEvent::new(ImportStatus::Completed)));
        assert!(run.is_finished());
    }

    #[tokio::test]
    async fn test_null_counters_keep_terminal_event() {
        let transcript = concat!(
            "data: {\"status\":\"progress\",\"total\":2,\"processed\":1,\"skipped\":null}\n",
            "data: {\"status\":\"completed\",\"total\":2,\"processed\":2,\"skipped\":null}\n",
        );
        let (_, client) = client_with(MockResponse::split_at(transcript, &[]));
        let mut run = client.start().await;

        assert_eq!(
            collect(&mut run).await,
            vec![progress(2, 1), completed(2, 2)]
        );
    }

    #[tokio::test]
    async fn test_each_start_is_an_independent_run() {
        let (http, client) = client_with(MockResponse::Stream(vec![Bytes::from(
            "data: {\"status\":\"progress\",\"total\":1,\"processed\":0}\ndata: {\"stat",
        )]));

        let mut first = client.start().await;
        let mut second = client.start().await;
        assert_ne!(first.run_id(), second.run_id());

        // The partial line left in the first run must not leak into the second.
        assert_eq!(collect(&mut first).await, vec![progress(1, 0)]);
        assert_eq!(collect(&mut second).await, vec![progress(1, 0)]);
        assert_eq!(http.get_requests().len(), 2);
        assert_eq!(http.release_count(), 2);
    }

    #[tokio::test]
    async fn test_into_stream() {
        let (http, client) = client_with(MockResponse::split_at(TRANSCRIPT, &[17, 99]));
        let events: Vec<_> = client.stream().await.collect().await;

        assert_eq!(events.len(), 4);
        assert!(events.iter().all(|e| e.is_ok()));
        assert_eq!(http.release_count(), 1);
    }

    #[tokio::test]
    async fn test_into_stream_ends_after_transport_error() {
        let (_, client) = client_with(MockResponse::StreamThenError(
            vec![],
            HttpError::Io("reset".to_string()),
        ));
        let events: Vec<_> = client.stream().await.collect().await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_err());
    }

    #[test]
    fn test_server_error_message() {
        assert_eq!(
            server_error_message(r#"{"error":"rate limited"}"#),
            Some("rate limited".to_string())
        );
        assert_eq!(
            server_error_message(r#"{"message":"Forbidden"}"#),
            Some("Forbidden".to_string())
        );
        assert_eq!(
            server_error_message(r#"{"error":"","message":"fallback"}"#),
            Some("fallback".to_string())
        );
        assert_eq!(server_error_message(r#"{"error":{"code":1}}"#), None);
        assert_eq!(server_error_message("not json"), None);
        assert_eq!(server_error_message(""), None);
    }
}
