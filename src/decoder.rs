//! Newline framing over an arbitrarily chunked byte stream.
//!
//! Network reads split the body wherever they like: in the middle of a line
//! or in the middle of a multi-byte character. [`LineDecoder`] turns those
//! chunks back into complete lines, in arrival order, and never hands out a
//! line that has not seen its terminating `\n`.

/// Incremental UTF-8 decoder plus line splitter.
///
/// Holds two pieces of carry-over between chunks:
/// - `pending_bytes`: the start of a UTF-8 sequence whose remaining bytes
///   have not arrived yet (at most three bytes)
/// - `carry`: decoded text after the last newline seen so far
#[derive(Debug, Default)]
pub struct LineDecoder {
    pending_bytes: Vec<u8>,
    carry: String,
}

impl LineDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every line it completed.
    ///
    /// Returned lines have their `\n` (and a preceding `\r`, if any) removed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.decode_into_carry(chunk);

        let Some(last_newline) = self.carry.rfind('\n') else {
            return Vec::new();
        };

        let rest = self.carry.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.carry, rest);

        complete
            .split_terminator('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
            .collect()
    }

    /// Bytes and text held back waiting for more input.
    pub fn buffered_len(&self) -> usize {
        self.pending_bytes.len() + self.carry.len()
    }

    /// End of input: give back whatever never saw a newline.
    ///
    /// The remainder is not a frame. Callers log it and drop it.
    pub fn finish(mut self) -> Option<String> {
        if !self.pending_bytes.is_empty() {
            let tail = String::from_utf8_lossy(&self.pending_bytes).into_owned();
            self.carry.push_str(&tail);
        }
        if self.carry.is_empty() {
            None
        } else {
            Some(self.carry)
        }
    }

    fn decode_into_carry(&mut self, chunk: &[u8]) {
        let owned;
        let mut input: &[u8] = if self.pending_bytes.is_empty() {
            chunk
        } else {
            self.pending_bytes.extend_from_slice(chunk);
            owned = std::mem::take(&mut self.pending_bytes);
            &owned
        };

        loop {
            match std::str::from_utf8(input) {
                Ok(text) => {
                    self.carry.push_str(text);
                    return;
                }
                Err(err) => {
                    let (valid, after_valid) = input.split_at(err.valid_up_to());
                    if let Ok(text) = std::str::from_utf8(valid) {
                        self.carry.push_str(text);
                    }
                    match err.error_len() {
                        Some(bad) => {
                            self.carry.push(char::REPLACEMENT_CHARACTER);
                            input = &after_valid[bad..];
                        }
                        None => {
                            // Truncated sequence at the end of the chunk.
                            self.pending_bytes.extend_from_slice(after_valid);
                            return;
                        }
                    }
                }
            }
        }
    }
}
