use serde::de::DeserializeOwned;
use std::marker::PhantomData;

/// Incremental server-sent-events decoder.
///
/// - Buffers bytes until a full line is available
/// - Joins `data:` lines of one block and parses the block as `T` when a blank line ends it
/// - Frames that are not valid JSON for `T` (heartbeats, `[DONE]`, unknown shapes) are skipped
///
/// Call [`SseDecoder::finish`] once the byte stream ends to flush a trailing block that was
/// never terminated by a blank line.
pub struct SseDecoder<T> {
    buf: Vec<u8>,
    data: String,
    has_data: bool,
    _event: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> SseDecoder<T> {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            data: String::new(),
            has_data: false,
            _event: PhantomData,
        }
    }

    /// Feed one network read and collect every event it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<T> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        // Consume whole lines from `start`, then shift the remainder down once.
        let buf = std::mem::take(&mut self.buf);
        let mut start = 0;
        while let Some(len) = buf[start..].iter().position(|&b| b == b'\n') {
            let mut line = &buf[start..start + len];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            self.line(line, &mut out);
            start += len + 1;
        }
        self.buf = buf;
        self.buf.drain(..start);

        out
    }

    /// Flush whatever is still buffered at end of stream.
    pub fn finish(mut self) -> Vec<T> {
        let mut out = Vec::new();
        if !self.buf.is_empty() {
            let mut line = std::mem::take(&mut self.buf);
            if line.ends_with(b"\r") {
                line.pop();
            }
            self.line(&line, &mut out);
        }
        self.end_block(&mut out);
        out
    }

    fn line(&mut self, line: &[u8], out: &mut Vec<T>) {
        if line.is_empty() {
            self.end_block(out);
            return;
        }

        let Ok(s) = std::str::from_utf8(line) else {
            tracing::trace!(len = line.len(), "skipping SSE line that is not valid UTF-8");
            return;
        };

        if let Some(rest) = s.strip_prefix("data:") {
            // Optional single leading space.
            let rest = rest.strip_prefix(' ').unwrap_or(rest);
            if self.has_data {
                self.data.push('\n');
            }
            self.data.push_str(rest);
            self.has_data = true;
        }
        // event:, id:, retry: and comments carry nothing we use.
    }

    fn end_block(&mut self, out: &mut Vec<T>) {
        if !self.has_data {
            return;
        }
        self.has_data = false;
        let data = std::mem::take(&mut self.data);
        let data = data.trim();
        if data.is_empty() {
            return;
        }

        match serde_json::from_str::<T>(data) {
            Ok(event) => out.push(event),
            Err(e) => tracing::trace!(error = %e, frame = data, "skipping undecodable SSE frame"),
        }
    }
}

impl<T: DeserializeOwned> Default for SseDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}
