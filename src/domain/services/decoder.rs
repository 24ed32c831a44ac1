#[cfg(test)]
#[path = "decoder_test.rs"]
mod tests;

use serde_json::Map;
use serde_json::Value;

pub const DELIMITER_LEN: usize = 8;

/// Largest preamble buffered while looking for the delimiter. Past this the
/// bytes are treated as body text.
pub const PREAMBLE_CAP: usize = 32 * 1024;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecodedChunk {
    pub text: String,
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DecoderMode {
    /// Only whitespace seen so far.
    Detecting,
    /// First byte was `{`, waiting for the delimiter.
    Preamble,
    Body,
}

/// Incremental UTF-8 decoder that carries incomplete trailing sequences over
/// to the next chunk.
#[derive(Debug, Default)]
struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut text = String::new();
        let mut consumed = 0;
        loop {
            match std::str::from_utf8(&self.pending[consumed..]) {
                Ok(valid) => {
                    text.push_str(valid);
                    consumed = self.pending.len();
                    break;
                }
                Err(err) => {
                    let valid_up_to = consumed + err.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(
                        &self.pending[consumed..valid_up_to],
                    ));
                    match err.error_len() {
                        Some(invalid_len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            consumed = valid_up_to + invalid_len;
                        }
                        None => {
                            consumed = valid_up_to;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..consumed);
        return text;
    }

    fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).to_string();
        self.pending.clear();
        return text;
    }
}

/// Splits one response body into an optional metadata object and body text.
///
/// The format is detected from the first non-whitespace byte: `{` means a
/// JSON preamble terminated by eight zero bytes, anything else is plain text
/// from the very first byte.
#[derive(Debug)]
pub struct StreamDecoder {
    mode: DecoderMode,
    buffer: Vec<u8>,
    utf8: Utf8Carry,
}

impl Default for StreamDecoder {
    fn default() -> StreamDecoder {
        return StreamDecoder::new();
    }
}

impl StreamDecoder {
    pub fn new() -> StreamDecoder {
        return StreamDecoder {
            mode: DecoderMode::Detecting,
            buffer: vec![],
            utf8: Utf8Carry::default(),
        };
    }

    pub fn body_started(&self) -> bool {
        return self.mode == DecoderMode::Body;
    }

    pub fn decode(&mut self, chunk: &[u8]) -> DecodedChunk {
        if chunk.is_empty() {
            return DecodedChunk::default();
        }

        match self.mode {
            DecoderMode::Body => {
                return DecodedChunk {
                    text: self.utf8.decode(chunk),
                    metadata: None,
                };
            }
            DecoderMode::Detecting => {
                // Everything buffered so far is whitespace, so only the new
                // chunk needs scanning.
                let first = chunk.iter().copied().find(|byte| {
                    return !byte.is_ascii_whitespace();
                });
                self.buffer.extend_from_slice(chunk);
                match first {
                    None => {
                        if self.buffer.len() >= PREAMBLE_CAP {
                            tracing::warn!(
                                buffered = self.buffer.len(),
                                "only whitespace within cap, treating stream as text"
                            );
                            return self.start_body_with_buffer();
                        }
                        return DecodedChunk::default();
                    }
                    Some(b'{') => {
                        self.mode = DecoderMode::Preamble;
                        return self.scan_preamble(0);
                    }
                    Some(_) => {
                        tracing::debug!("stream body is plain text");
                        return self.start_body_with_buffer();
                    }
                }
            }
            DecoderMode::Preamble => {
                // The delimiter may straddle the previous chunk boundary.
                let from = self.buffer.len().saturating_sub(DELIMITER_LEN - 1);
                self.buffer.extend_from_slice(chunk);
                return self.scan_preamble(from);
            }
        }
    }

    /// Flushes whatever is still buffered once the stream has ended.
    pub fn finish(&mut self) -> DecodedChunk {
        let mut text = String::new();
        if self.mode != DecoderMode::Body && !self.buffer.is_empty() {
            tracing::debug!(
                buffered = self.buffer.len(),
                "stream ended before the preamble delimiter, treating it as text"
            );
            text.push_str(&self.start_body_with_buffer().text);
        }
        text.push_str(&self.utf8.finish());

        return DecodedChunk {
            text,
            metadata: None,
        };
    }

    fn scan_preamble(&mut self, from: usize) -> DecodedChunk {
        let found = self.buffer[from..]
            .windows(DELIMITER_LEN)
            .position(|window| {
                return window.iter().all(|byte| return *byte == 0);
            })
            .map(|pos| {
                return pos + from;
            });

        if let Some(pos) = found {
            let metadata = parse_metadata(&self.buffer[..pos]);
            let body = self.buffer.split_off(pos + DELIMITER_LEN);
            self.buffer.clear();
            self.mode = DecoderMode::Body;

            return DecodedChunk {
                text: self.utf8.decode(&body),
                metadata,
            };
        }

        if self.buffer.len() >= PREAMBLE_CAP {
            tracing::warn!(
                buffered = self.buffer.len(),
                "no preamble delimiter within cap, treating stream as text"
            );
            return self.start_body_with_buffer();
        }

        return DecodedChunk::default();
    }

    fn start_body_with_buffer(&mut self) -> DecodedChunk {
        self.mode = DecoderMode::Body;
        let buffered = std::mem::take(&mut self.buffer);

        return DecodedChunk {
            text: self.utf8.decode(&buffered),
            metadata: None,
        };
    }
}

fn parse_metadata(bytes: &[u8]) -> Option<Map<String, Value>> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => {
            return Some(map);
        }
        Ok(other) => {
            tracing::debug!(kind = ?other, "stream metadata is not an object, dropping it");
            return None;
        }
        Err(err) => {
            tracing::debug!(error = ?err, "stream metadata is not valid JSON, dropping it");
            return None;
        }
    }
}
