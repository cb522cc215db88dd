//! Transcript edits produced by state transitions

/// Companion message shown in place of a reply whose stream failed
pub const FALLBACK_REPLY: &str = "I glitched for a moment there. Can we try that again? 💛";

/// Edits to apply to the transcript after a transition, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEdit {
    /// Append the user's message
    AppendUser { text: String },

    /// Append an empty in-flight companion message
    OpenReply,

    /// Append a delta to the in-flight message
    AppendReply { delta: String },

    /// Mark the in-flight message final
    FinalizeReply,

    /// Remove the in-flight message
    DiscardReply,

    /// Append the fixed fallback companion message
    AppendFallback,
}
