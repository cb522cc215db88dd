//! Server-sent event framing for the chat stream
//!
//! Turns the raw response body into [`StreamEvent`]s:
//! - Line buffering across chunk boundaries (`\n` or `\r\n`)
//! - `data:` lines accumulate into a frame, a blank line dispatches it
//! - Comments and non-data fields are ignored
//! - `[END]` and empty frames are swallowed
//! - Body close maps to [`StreamEvent::End`], body failure to one [`StreamEvent::Error`]

use super::{ApiError, StreamEvent};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::collections::VecDeque;

/// Payload the backend sends to mark end of content. Not a terminal signal.
pub const END_SENTINEL: &str = "[END]";

/// Longest line the decoder buffers before giving up on the stream
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Incremental SSE frame decoder
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
    /// Bytes of `buffer` already searched for a newline
    scanned: usize,
    /// Data of the frame being assembled, `None` until a `data:` line arrives
    data: Option<String>,
}

impl FrameDecoder {
    /// Feed a chunk and append every frame payload it completes to `frames`,
    /// in order.
    ///
    /// Frames completed before a failure are still appended.
    ///
    /// # Errors
    ///
    /// Fails with a decode error on invalid UTF-8 or a line longer than
    /// [`MAX_LINE_BYTES`].
    pub fn push(&mut self, chunk: &[u8], frames: &mut Vec<String>) -> Result<(), ApiError> {
        self.buffer.extend_from_slice(chunk);

        loop {
            let unscanned = &self.buffer[self.scanned..];
            let Some(offset) = unscanned.iter().position(|&b| b == b'\n') else {
                self.scanned = self.buffer.len();
                break;
            };
            let newline_pos = self.scanned + offset;
            self.scanned = 0;

            let mut line_bytes = self.buffer.split_to(newline_pos + 1);
            line_bytes.truncate(line_bytes.len() - 1);
            if line_bytes.last() == Some(&b'\r') {
                line_bytes.truncate(line_bytes.len() - 1);
            }
            check_line_len(line_bytes.len())?;

            let line = decode_line(&line_bytes)?;
            if let Some(frame) = self.process_line(line) {
                frames.push(frame);
            }
        }

        check_line_len(self.buffer.len())
    }

    /// Flush at end of body: an unterminated last line and any pending frame
    /// are dispatched.
    ///
    /// # Errors
    ///
    /// Fails with a decode error if the trailing line is not valid UTF-8.
    pub fn finish(&mut self) -> Result<Option<String>, ApiError> {
        if !self.buffer.is_empty() {
            let rest = self.buffer.split();
            self.scanned = 0;
            let line = decode_line(&rest)?;
            if let Some(frame) = self.process_line(line.trim_end_matches('\r')) {
                return Ok(Some(frame));
            }
        }
        Ok(self.data.take())
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.data.take();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        if field == "data" {
            match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            }
        }
        None
    }
}

fn check_line_len(len: usize) -> Result<(), ApiError> {
    if len > MAX_LINE_BYTES {
        return Err(ApiError::decode(format!(
            "Event stream line exceeds {MAX_LINE_BYTES} bytes"
        )));
    }
    Ok(())
}

fn decode_line(bytes: &[u8]) -> Result<&str, ApiError> {
    std::str::from_utf8(bytes)
        .map_err(|e| ApiError::decode(format!("Invalid UTF-8 in event stream: {e}")))
}

/// Map a dispatched frame payload to an event; no-op frames yield `None`.
#[must_use]
pub fn frame_to_event(payload: String) -> Option<StreamEvent> {
    if payload.is_empty() {
        tracing::trace!("Skipping empty frame");
        return None;
    }
    if payload == END_SENTINEL {
        tracing::debug!("Skipping end-of-content sentinel");
        return None;
    }
    Some(StreamEvent::Data(payload))
}

struct PumpState<S> {
    body: S,
    decoder: FrameDecoder,
    pending: VecDeque<StreamEvent>,
    finished: bool,
}

impl<S> PumpState<S> {
    fn queue_frames(&mut self, frames: impl IntoIterator<Item = String>) {
        self.pending
            .extend(frames.into_iter().filter_map(frame_to_event));
    }

    fn fail(&mut self, error: ApiError) {
        self.pending.push_back(StreamEvent::Error(error));
        self.finished = true;
    }
}

/// Convert a response body into a finite event stream.
///
/// Exactly one terminal event ends the stream; frames decoded before a
/// failure are still delivered ahead of the `Error`.
pub fn event_stream<S>(body: S) -> impl Stream<Item = StreamEvent> + Send
where
    S: Stream<Item = Result<Bytes, ApiError>> + Send + Unpin + 'static,
{
    let state = PumpState {
        body,
        decoder: FrameDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((event, state));
            }
            if state.finished {
                return None;
            }

            match state.body.next().await {
                Some(Ok(chunk)) => {
                    let mut frames = Vec::new();
                    let pushed = state.decoder.push(&chunk, &mut frames);
                    state.queue_frames(frames);
                    if let Err(e) = pushed {
                        tracing::warn!(error = %e, "Event stream decode error");
                        state.fail(e);
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Event stream read error");
                    state.fail(e);
                }
                None => {
                    match state.decoder.finish() {
                        Ok(frame) => {
                            state.queue_frames(frame);
                            state.pending.push_back(StreamEvent::End);
                        }
                        Err(e) => state.pending.push_back(StreamEvent::Error(e)),
                    }
                    state.finished = true;
                }
            }
        }
    })
}
