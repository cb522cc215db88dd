//! Events produced by a chat stream

use super::ApiError;

/// One protocol-level event of an open chat stream.
///
/// A stream yields any number of `Data` events followed by exactly one of
/// `End` or `Error`, unless it is cancelled first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A non-empty text delta, in transport arrival order
    Data(String),
    /// The transport closed normally
    End,
    /// The transport failed; nothing follows
    Error(ApiError),
}

impl StreamEvent {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::End | StreamEvent::Error(_))
    }
}
