//! Reply state

/// Per-send reply state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReplyState {
    /// No reply in flight
    #[default]
    Idle,

    /// Reply in flight; the accumulated text lives in the in-flight message.
    /// `received` counts the bytes appended so far.
    Streaming { received: usize },
}

impl ReplyState {
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        matches!(self, ReplyState::Streaming { .. })
    }
}
