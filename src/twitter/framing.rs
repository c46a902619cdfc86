use std::time::Duration;

use anyhow::{anyhow, bail};
use futures_util::{Stream, StreamExt, stream};
use serde_json::Value;

use crate::event::Event;

use super::source::EventStream;

/// Longest record accepted before a line break must appear.
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Splits a chunked body into newline-delimited records.
///
/// Partial lines are buffered until their terminator arrives, up to
/// `max_line` bytes. Blank lines (the server's keep-alives) are skipped.
#[derive(Debug)]
pub struct LineFramer {
    buf: Vec<u8>,
    /// Bytes of `buf` already known to hold no line break
    scanned: usize,
    max_line: usize,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::with_limit(MAX_LINE_BYTES)
    }
}

impl LineFramer {
    pub fn with_limit(max_line: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            max_line,
        }
    }

    /// Buffers `chunk`. Fails once the unterminated tail outgrows the
    /// limit; the buffer is discarded.
    pub fn extend(&mut self, chunk: &[u8]) -> anyhow::Result<()> {
        self.buf.extend_from_slice(chunk);
        if self.buf.len() > self.max_line && !self.buf[self.scanned..].contains(&b'\n') {
            self.buf.clear();
            self.scanned = 0;
            bail!("stream message exceeds {} bytes without a line break", self.max_line);
        }
        Ok(())
    }

    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        loop {
            let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') else {
                self.scanned = self.buf.len();
                return None;
            };
            let end = self.scanned + offset;
            self.scanned = 0;
            let mut line: Vec<u8> = self.buf.drain(..=end).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Some(line);
        }
    }
}

/// Decodes one record.
///
/// A `disconnect` notice from the server is surfaced as an error so the
/// worker treats it like any other dropped connection.
pub fn decode_line(line: &[u8]) -> anyhow::Result<Event> {
    let value: Value = serde_json::from_slice(line)
        .map_err(|e| anyhow!("undecodable stream message: {e}"))?;

    if let Some(notice) = value.get("disconnect") {
        let reason = notice
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("no reason given");
        return Err(anyhow!("server sent disconnect notice: {reason}"));
    }

    Ok(Event::new(value))
}

/// Turns a raw byte-chunk stream into an [`EventStream`].
///
/// No chunk within `stall_timeout` (keep-alives included) is reported as
/// an error.
pub fn decode_stream<S, B, E>(chunks: S, stall_timeout: Duration) -> EventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let state = (Box::pin(chunks), LineFramer::default());

    stream::unfold(state, move |(mut chunks, mut framer)| async move {
        loop {
            if let Some(line) = framer.next_line() {
                return Some((decode_line(&line), (chunks, framer)));
            }

            match tokio::time::timeout(stall_timeout, chunks.next()).await {
                Ok(Some(Ok(bytes))) => {
                    if let Err(e) = framer.extend(bytes.as_ref()) {
                        return Some((Err(e), (chunks, framer)));
                    }
                }
                Ok(Some(Err(e))) => {
                    return Some((Err(anyhow::Error::new(e)), (chunks, framer)));
                }
                Ok(None) => return None,
                Err(_) => {
                    let err = anyhow!("stream stalled: no data for {}s", stall_timeout.as_secs());
                    return Some((Err(err), (chunks, framer)));
                }
            }
        }
    })
    .boxed()
}
