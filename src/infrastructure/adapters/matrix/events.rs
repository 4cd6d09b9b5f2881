//! Wire shapes of Matrix events and their translation into room events

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::domain::entities::{Identity, MessageType, RoomEvent, RoomId};

/// A client-server or application-service event. Batches carry events as
/// raw JSON and go through [`decode_events`], so an event that does not fit
/// this shape is dropped on its own.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub sender: Option<String>,
    /// Older application-service pushes name the sender `user_id`
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub state_key: Option<String>,
    #[serde(default)]
    pub content: Value,
}

impl RawEvent {
    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref().or(self.user_id.as_deref())
    }

    fn content_str(&self, key: &str) -> Option<&str> {
        self.content.get(key).and_then(Value::as_str)
    }

    fn membership(&self) -> Option<&str> {
        self.content_str("membership")
    }

    fn targets(&self, user: &Identity) -> bool {
        self.state_key.as_deref() == Some(user.as_str())
    }

    /// `m.room.message` with a string msgtype and body
    pub fn to_message(&self, room: &RoomId) -> Option<RoomEvent> {
        if self.kind != "m.room.message" {
            return None;
        }
        let sender = self.sender()?;
        let msgtype = self.content_str("msgtype")?;
        let body = self.content_str("body")?;
        Some(RoomEvent::message(sender, room.clone(), MessageType::parse(msgtype), body))
    }

    /// Member event inviting `user`
    pub fn to_invite(&self, room: &RoomId, user: &Identity) -> Option<RoomEvent> {
        if self.kind == "m.room.member" && self.targets(user) && self.membership() == Some("invite") {
            return Some(RoomEvent::invite(self.sender()?, room.clone()));
        }
        None
    }

    /// Translate a pushed application-service event. The room comes from the
    /// event itself.
    pub fn into_room_event(self, user: &Identity) -> Option<RoomEvent> {
        let room = RoomId::new(self.room_id.clone()?);
        self.to_message(&room).or_else(|| self.to_invite(&room, user))
    }
}

/// Decode each event on its own, logging and dropping the ones that do not
/// fit `RawEvent`
pub fn decode_events(values: Vec<Value>) -> Vec<RawEvent> {
    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<RawEvent>(value) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!("Skipping malformed event: {}", e);
                None
            }
        })
        .collect()
}

#[derive(Debug, Default, Deserialize)]
pub struct SyncResponse {
    pub next_batch: String,
    #[serde(default)]
    pub rooms: SyncRooms,
}

#[derive(Debug, Default, Deserialize)]
pub struct SyncRooms {
    #[serde(default)]
    pub join: BTreeMap<String, JoinedRoom>,
    #[serde(default)]
    pub invite: BTreeMap<String, InvitedRoom>,
    #[serde(default)]
    pub leave: BTreeMap<String, LeftRoom>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Timeline {
    #[serde(default)]
    pub events: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct JoinedRoom {
    #[serde(default)]
    pub timeline: Timeline,
}

#[derive(Debug, Default, Deserialize)]
pub struct InviteState {
    #[serde(default)]
    pub events: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InvitedRoom {
    #[serde(default)]
    pub invite_state: InviteState,
}

#[derive(Debug, Default, Deserialize)]
pub struct LeftRoom {
    #[serde(default)]
    pub timeline: Timeline,
}

impl SyncResponse {
    /// Flatten into room events: joined-room messages first (timeline order
    /// per room), then invites, then leaves.
    pub fn into_events(self, user: &Identity) -> Vec<RoomEvent> {
        let mut events = Vec::new();

        for (room_id, joined) in self.rooms.join {
            let room = RoomId::new(room_id);
            let timeline = decode_events(joined.timeline.events);
            events.extend(timeline.iter().filter_map(|e| e.to_message(&room)));
        }

        for (room_id, invited) in self.rooms.invite {
            let room = RoomId::new(room_id);
            let state = decode_events(invited.invite_state.events);
            match inviter(&state, user) {
                Some(sender) => events.push(RoomEvent::invite(sender, room)),
                None => tracing::debug!("Invite to {} without a known inviter", room),
            }
        }

        for (room_id, left) in self.rooms.leave {
            let room = RoomId::new(room_id);
            let timeline = decode_events(left.timeline.events);
            let remover = timeline
                .iter()
                .filter(|e| e.kind == "m.room.member" && e.targets(user))
                .filter_map(|e| e.sender())
                .last();
            if let Some(sender) = remover {
                events.push(RoomEvent::leave(sender, room));
            }
        }

        events
    }
}

/// The join-rules event's sender is taken as the inviter; failing that, the
/// sender of the member event that invited us.
fn inviter<'a>(state: &'a [RawEvent], user: &Identity) -> Option<&'a str> {
    state
        .iter()
        .find(|e| e.kind == "m.room.join_rules")
        .and_then(RawEvent::sender)
        .or_else(|| {
            state
                .iter()
                .find(|e| e.kind == "m.room.member" && e.targets(user) && e.membership() == Some("invite"))
                .and_then(RawEvent::sender)
        })
}
