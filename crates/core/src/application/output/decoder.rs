// Byte-to-line framing for subprocess output

use std::borrow::Cow;

/// Streaming UTF-8 decoder.
///
/// Bytes of a multi-byte character split across chunk boundaries are held back
/// until the rest arrives; invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8StreamDecoder {
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `pending + bytes` as forms complete characters
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(invalid) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + invalid);
                        }
                        None => {
                            // Incomplete trailing sequence: wait for more bytes
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Flush whatever is left at end of stream
    pub fn finish(&mut self) -> String {
        let rest = match String::from_utf8_lossy(&self.pending) {
            Cow::Borrowed(s) => s.to_string(),
            Cow::Owned(s) => s,
        };
        self.pending.clear();
        rest
    }
}

/// Splits a decoded byte stream into complete, non-blank lines.
///
/// The trailing partial line is carried over to the next chunk and flushed by
/// [`LineFramer::finish`].
#[derive(Debug, Default)]
pub struct LineFramer {
    decoder: Utf8StreamDecoder,
    buffer: String,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.push_str(&self.decoder.decode(bytes));

        let Some(last_newline) = self.buffer.rfind('\n') else {
            return Vec::new();
        };
        let rest = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, rest);

        complete.split('\n').filter_map(normalize_line).collect()
    }

    pub fn finish(&mut self) -> Option<String> {
        let tail = self.decoder.finish();
        self.buffer.push_str(&tail);
        let line = std::mem::take(&mut self.buffer);
        normalize_line(&line)
    }
}

fn normalize_line(line: &str) -> Option<String> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.trim().is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}
