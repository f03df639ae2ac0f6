//! Incremental line splitting for streamed backend bodies.
//!
//! Network chunks do not respect line boundaries: one chunk may carry several
//! lines, or half of one. `LineSplitter` buffers the tail of each chunk until
//! its newline arrives, and `lines` lifts that over a byte stream.

use std::collections::VecDeque;
use std::pin::Pin;

use futures_util::{Stream, StreamExt};

/// Splits a byte sequence fed in arbitrary chunks into `\n`-terminated lines.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buf: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk, returning every line it completed (without terminators).
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.buf[start..].iter().position(|b| *b == b'\n') {
            let end = start + pos;
            lines.push(decode_line(&self.buf[start..end]));
            start = end + 1;
        }
        self.buf.drain(..start);
        lines
    }

    /// Flush a trailing line that never received its newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let line = decode_line(&self.buf);
        self.buf.clear();
        Some(line)
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

struct LineState<S> {
    inner: Pin<Box<S>>,
    splitter: LineSplitter,
    pending: VecDeque<String>,
    finished: bool,
}

/// Turn a stream of byte chunks into a lazy stream of lines.
///
/// The sequence ends when the source ends. A source error is yielded once and
/// then the sequence ends too; nothing is buffered beyond the current partial line.
pub fn lines<S, B, E>(source: S) -> impl Stream<Item = Result<String, E>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    let state = LineState {
        inner: Box::pin(source),
        splitter: LineSplitter::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(line) = state.pending.pop_front() {
                return Some((Ok(line), state));
            }
            if state.finished {
                return None;
            }
            match state.inner.next().await {
                Some(Ok(chunk)) => {
                    state.pending.extend(state.splitter.push(chunk.as_ref()));
                }
                Some(Err(e)) => {
                    state.finished = true;
                    state.pending.clear();
                    return Some((Err(e), state));
                }
                None => {
                    state.finished = true;
                    if let Some(tail) = state.splitter.finish() {
                        state.pending.push_back(tail);
                    }
                }
            }
        }
    })
}
