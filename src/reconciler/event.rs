//! Inputs to the reply state machine

use crate::api::StreamEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The user sent `text`; a reply is about to stream
    Begin { text: String },
    /// An event from the open chat stream
    Stream(StreamEvent),
}

impl From<StreamEvent> for Event {
    fn from(event: StreamEvent) -> Self {
        Event::Stream(event)
    }
}
