//! Chat stream wire events.
//!
//! One JSON object per logical message. A stream is a strictly ordered
//! sequence of `status`/`token` events, at most one `plan` event, then a
//! single terminal `done` or `error`. Nothing follows the terminal event.

use serde::{Deserialize, Serialize};

use crate::plan::model::Plan;

/// A single event in the chat response stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChatEvent {
    /// Progress note shown while the model works.
    Status { message: String },
    /// A chunk of the conversational reply.
    Token { content: String },
    /// The parsed plan, emitted at most once and only before `done`.
    Plan {
        plan: Plan,
        #[serde(rename = "shouldCreatePlan")]
        should_create_plan: bool,
    },
    /// Terminal success marker.
    Done,
    /// Terminal failure marker; no further events follow.
    Error { error: String },
}

impl ChatEvent {
    /// Whether this event terminates the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }
}
