//! Ownership of an open import response body.
//!
//! [`BodyReader`] is the one place the byte stream lives during a run. It is
//! released exactly once: explicitly by the run when it finishes, or by
//! `Drop` when the caller abandons the run part-way.

use bytes::Bytes;
use futures_util::StreamExt;

use crate::traits::{ByteStream, HttpError};

/// Exclusive handle on a response body stream.
pub struct BodyReader {
    stream: Option<ByteStream>,
    chunks: usize,
    bytes: usize,
}

impl BodyReader {
    /// Take ownership of an open body.
    pub fn new(stream: ByteStream) -> Self {
        Self {
            stream: Some(stream),
            chunks: 0,
            bytes: 0,
        }
    }

    /// Wait for the next chunk.
    ///
    /// Returns `None` once the body has ended or the reader was released.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, HttpError>> {
        let stream = self.stream.as_mut()?;
        let item = stream.next().await;
        if let Some(Ok(chunk)) = &item {
            self.chunks += 1;
            self.bytes += chunk.len();
        }
        item
    }

    /// Whether the body is still held.
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Drop the body stream and with it the connection. Idempotent.
    pub fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!(
                chunks = self.chunks,
                bytes = self.bytes,
                "Released import response body"
            );
        }
    }
}

impl Drop for BodyReader {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for BodyReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyReader")
            .field("open", &self.is_open())
            .field("chunks", &self.chunks)
            .field("bytes", &self.bytes)
            .finish()
    }
}
