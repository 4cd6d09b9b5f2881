use async_trait::async_trait;

use crate::domain::entities::{EventKind, RoomEvent};

/// Callbacks invoked for each inbound room notification.
///
/// Implementations must tolerate being called from several tasks at once
/// (the webhook deployment handles requests in parallel).
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_message(&self, event: RoomEvent);

    async fn on_invite(&self, event: RoomEvent);

    async fn on_leave(&self, event: RoomEvent);

    /// Route an event to the callback for its kind
    async fn dispatch(&self, event: RoomEvent) {
        match event.kind {
            EventKind::Message { .. } => self.on_message(event).await,
            EventKind::Invite => self.on_invite(event).await,
            EventKind::Leave => self.on_leave(event).await,
        }
    }
}
