//! Mock HTTP client for testing.
//!
//! Serves scripted response bodies chunk by chunk, records every request,
//! and counts how many body streams were read from and released.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use crate::traits::{ByteStream, Headers, HttpClient, HttpError};

/// A recorded HTTP request for verification in tests.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// HTTP method
    pub method: String,
    /// Request URL
    pub url: String,
    /// Request headers
    pub headers: Headers,
    /// Request body
    pub body: Option<String>,
}

/// Configuration for a mock response.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Fail the request itself (status error, no body, connection failure)
    Error(HttpError),
    /// Serve these chunks, then end the body
    Stream(Vec<Bytes>),
    /// Serve these chunks, then fail the read with the given error
    StreamThenError(Vec<Bytes>, HttpError),
    /// Serve these chunks, then never produce another item
    StreamPending(Vec<Bytes>),
}

impl MockResponse {
    /// Serve the given text split into chunks at the given byte offsets.
    ///
    /// Offsets may fall inside a multi-byte character.
    pub fn split_at(transcript: &str, offsets: &[usize]) -> Self {
        let bytes = transcript.as_bytes();
        let mut chunks = Vec::new();
        let mut start = 0;
        for &offset in offsets {
            let end = offset.min(bytes.len());
            if end > start {
                chunks.push(Bytes::copy_from_slice(&bytes[start..end]));
                start = end;
            }
        }
        if start < bytes.len() {
            chunks.push(Bytes::copy_from_slice(&bytes[start..]));
        }
        MockResponse::Stream(chunks)
    }
}

/// Counters shared between the client and every stream it hands out.
#[derive(Debug, Default)]
struct StreamCounters {
    chunks_read: AtomicUsize,
    releases: AtomicUsize,
}

/// Body stream handed out by [`MockHttpClient`].
struct TrackedStream {
    chunks: std::vec::IntoIter<Bytes>,
    tail: Tail,
    counters: Arc<StreamCounters>,
}

enum Tail {
    End,
    Error(Option<HttpError>),
    Pending,
}

impl Stream for TrackedStream {
    type Item = Result<Bytes, HttpError>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(chunk) = self.chunks.next() {
            self.counters.chunks_read.fetch_add(1, Ordering::SeqCst);
            return Poll::Ready(Some(Ok(chunk)));
        }
        match &mut self.tail {
            Tail::End => Poll::Ready(None),
            Tail::Error(err) => Poll::Ready(err.take().map(Err)),
            // Never woken: the consumer is expected to give up on its own.
            Tail::Pending => Poll::Pending,
        }
    }
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        self.counters.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Mock HTTP client for testing.
///
/// # Example
///
/// ```ignore
/// use crm_import::adapters::mock::{MockHttpClient, MockResponse};
///
/// let client = MockHttpClient::new();
/// client.set_default_response(MockResponse::Stream(vec![
///     Bytes::from("data: {\"status\":\"completed\"}\n"),
/// ]));
///
/// // ... run an import ...
///
/// assert_eq!(client.get_requests().len(), 1);
/// assert_eq!(client.release_count(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct MockHttpClient {
    /// Configured responses by URL pattern
    responses: Arc<Mutex<HashMap<String, MockResponse>>>,
    /// Default response when no specific match
    default_response: Arc<Mutex<Option<MockResponse>>>,
    /// Recorded requests for verification
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    counters: Arc<StreamCounters>,
}

impl MockHttpClient {
    /// Create a new mock HTTP client.
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(HashMap::new())),
            default_response: Arc::new(Mutex::new(None)),
            requests: Arc::new(Mutex::new(Vec::new())),
            counters: Arc::new(StreamCounters::default()),
        }
    }

    /// Set a response for a specific URL (exact or prefix match).
    pub fn set_response(&self, url: &str, response: MockResponse) {
        let mut responses = self.responses.lock().unwrap();
        responses.insert(url.to_string(), response);
    }

    /// Set a default response for URLs without specific matches.
    pub fn set_default_response(&self, response: MockResponse) {
        let mut default = self.default_response.lock().unwrap();
        *default = Some(response);
    }

    /// Get all recorded requests.
    pub fn get_requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of body streams that have been dropped.
    pub fn release_count(&self) -> usize {
        self.counters.releases.load(Ordering::SeqCst)
    }

    /// Number of chunks pulled out of body streams so far.
    pub fn chunks_read(&self) -> usize {
        self.counters.chunks_read.load(Ordering::SeqCst)
    }

    fn record_request(&self, method: &str, url: &str, headers: &Headers, body: Option<String>) {
        let mut requests = self.requests.lock().unwrap();
        requests.push(RecordedRequest {
            method: method.to_string(),
            url: url.to_string(),
            headers: headers.clone(),
            body,
        });
    }

    fn get_response(&self, url: &str) -> Option<MockResponse> {
        let responses = self.responses.lock().unwrap();

        if let Some(response) = responses.get(url) {
            return Some(response.clone());
        }

        for (pattern, response) in responses.iter() {
            if url.starts_with(pattern) {
                return Some(response.clone());
            }
        }

        let default = self.default_response.lock().unwrap();
        default.clone()
    }

    fn tracked(&self, chunks: Vec<Bytes>, tail: Tail) -> ByteStream {
        Box::pin(TrackedStream {
            chunks: chunks.into_iter(),
            tail,
            counters: Arc::clone(&self.counters),
        })
    }
}

impl Default for MockHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn post_stream(
        &self,
        url: &str,
        body: &str,
        headers: &Headers,
    ) -> Result<ByteStream, HttpError> {
        self.record_request("POST", url, headers, Some(body.to_string()));

        match self.get_response(url) {
            Some(MockResponse::Error(err)) => Err(err),
            Some(MockResponse::Stream(chunks)) => Ok(self.tracked(chunks, Tail::End)),
            Some(MockResponse::StreamThenError(chunks, err)) => {
                Ok(self.tracked(chunks, Tail::Error(Some(err))))
            }
            Some(MockResponse::StreamPending(chunks)) => Ok(self.tracked(chunks, Tail::Pending)),
            None => Err(HttpError::Other(format!("No mock response for URL: {}", url))),
        }
    }
}
