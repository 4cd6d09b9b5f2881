use super::{Identity, RoomId};

/// Message type of an `m.room.message` event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageType {
    Text,
    Notice,
    Emote,
    Other(String),
}

impl MessageType {
    pub fn parse(msgtype: &str) -> Self {
        match msgtype {
            "m.text" => MessageType::Text,
            "m.notice" => MessageType::Notice,
            "m.emote" => MessageType::Emote,
            other => MessageType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MessageType::Text => "m.text",
            MessageType::Notice => "m.notice",
            MessageType::Emote => "m.emote",
            MessageType::Other(s) => s,
        }
    }
}

/// What happened in the room
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Message { msgtype: MessageType, body: String },
    /// The bot was invited; `sender` on the event is the inviter when known.
    Invite,
    /// The bot left or was removed; `sender` is whoever caused it when known.
    Leave,
}

/// A single inbound room notification, built per transport delivery and
/// discarded once handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomEvent {
    pub sender: Identity,
    pub room: RoomId,
    pub kind: EventKind,
}

impl RoomEvent {
    pub fn message(
        sender: impl Into<Identity>,
        room: impl Into<RoomId>,
        msgtype: MessageType,
        body: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            room: room.into(),
            kind: EventKind::Message {
                msgtype,
                body: body.into(),
            },
        }
    }

    /// Shorthand for an `m.text` message
    pub fn text(sender: impl Into<Identity>, room: impl Into<RoomId>, body: impl Into<String>) -> Self {
        Self::message(sender, room, MessageType::Text, body)
    }

    pub fn invite(inviter: impl Into<Identity>, room: impl Into<RoomId>) -> Self {
        Self {
            sender: inviter.into(),
            room: room.into(),
            kind: EventKind::Invite,
        }
    }

    pub fn leave(sender: impl Into<Identity>, room: impl Into<RoomId>) -> Self {
        Self {
            sender: sender.into(),
            room: room.into(),
            kind: EventKind::Leave,
        }
    }
}
