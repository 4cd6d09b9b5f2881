use std::time::Duration;

use async_trait::async_trait;

use crate::application::errors::TransportError;
use crate::domain::entities::{Identity, OutgoingMessage, RoomEvent, RoomId};

/// Transport trait - abstraction over the chat homeserver connection
#[async_trait]
pub trait Transport: Send + Sync {
    /// Authenticate and return the identity the session belongs to
    async fn login(&self) -> Result<Identity, TransportError>;

    /// Rooms the bot is currently joined to
    async fn joined_rooms(&self) -> Result<Vec<RoomId>, TransportError>;

    /// Join a room (idempotent on the homeserver side)
    async fn join_room(&self, room: &RoomId) -> Result<RoomId, TransportError>;

    /// Current joined membership of a room
    async fn joined_members(&self, room: &RoomId) -> Result<Vec<Identity>, TransportError>;

    /// Send a message, returning the event id
    async fn send_message(&self, room: &RoomId, message: &OutgoingMessage) -> Result<String, TransportError>;

    /// End the session (best-effort)
    async fn logout(&self) -> Result<(), TransportError>;
}

/// One long-poll worth of events
#[derive(Debug, Clone, Default)]
pub struct SyncBatch {
    pub next_batch: String,
    pub events: Vec<RoomEvent>,
}

/// Event source used by the polling deployment
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Position token for "now", so history before startup is not replayed
    async fn initial_token(&self) -> Result<String, TransportError>;

    /// Block up to `timeout` waiting for events after `since`
    async fn poll(&self, since: &str, timeout: Duration) -> Result<SyncBatch, TransportError>;
}
