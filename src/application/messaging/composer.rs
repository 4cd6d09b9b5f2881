//! Reply composer - Builds outgoing room messages

use crate::domain::entities::{ExecutionResult, FailureKind, OutgoingMessage};

/// Sent instead of the real reply when someone in the room is not cleared
pub const REFUSAL: &str =
    "I'm sorry, but not everyone in this room has clearance, so I'm not going to respond.";

#[derive(Debug, Clone, Copy, Default)]
pub struct ReplyComposer;

impl ReplyComposer {
    pub fn new() -> Self {
        Self
    }

    /// Echo replies are plain text
    pub fn compose_text(&self, text: impl Into<String>) -> OutgoingMessage {
        OutgoingMessage::plain(text)
    }

    pub fn compose_result(&self, result: &ExecutionResult) -> OutgoingMessage {
        match result {
            ExecutionResult::Success(output) => {
                OutgoingMessage::with_html(output.clone(), format!("<pre>{}</pre>", escape_html(output)))
            }
            ExecutionResult::Failure { kind: FailureKind::NonZeroExit, detail } => {
                OutgoingMessage::plain(format!("command failed: {}", detail))
            }
            ExecutionResult::Failure { kind: FailureKind::Timeout, detail } => {
                OutgoingMessage::plain(format!("command timed out: {}", detail))
            }
        }
    }

    /// Last step before send: swap in the refusal when the room is not cleared.
    pub fn apply_room_gate(&self, message: OutgoingMessage, allowed: bool) -> OutgoingMessage {
        if allowed {
            message
        } else {
            OutgoingMessage::plain(REFUSAL)
        }
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            c => escaped.push(c),
        }
    }
    escaped
}
