//! Polling deployment: connection state machine and listener loop
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> ShuttingDown -> Stopped
//!                     ^              |
//!                     +--- error ----+
//! ```
//!
//! A listener task long-polls the event source and forwards events over a
//! channel; the supervisor consumes that channel and hands events to the
//! handler one at a time, in delivery order. Shutdown is observed at poll
//! boundaries, so its latency is bounded by the poll interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::application::errors::TransportError;
use crate::domain::entities::RoomEvent;
use crate::domain::traits::{EventHandler, EventSource, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    ShuttingDown,
    Stopped,
}

/// What the listener task forwards to the supervisor
#[derive(Debug)]
pub enum ListenerEvent {
    Room(RoomEvent),
    Failed(TransportError),
}

#[derive(Debug, Clone, Copy)]
pub struct SupervisorSettings {
    /// Long-poll timeout of each sync request
    pub poll_interval: Duration,
    /// Delay between login attempts
    pub retry_delay: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5000),
            retry_delay: Duration::from_secs(5),
        }
    }
}

enum ListenExit {
    Shutdown,
    Failed(TransportError),
}

pub struct PollingSupervisor<T, H> {
    transport: Arc<T>,
    handler: Arc<H>,
    settings: SupervisorSettings,
    state: watch::Sender<ConnectionState>,
    shutdown: watch::Receiver<bool>,
}

impl<T, H> PollingSupervisor<T, H>
where
    T: Transport + EventSource + 'static,
    H: EventHandler + 'static,
{
    pub fn new(
        transport: Arc<T>,
        handler: Arc<H>,
        settings: SupervisorSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            handler,
            settings,
            state,
            shutdown,
        }
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Run until shutdown is requested, reconnecting on every transport failure
    pub async fn run(mut self) {
        loop {
            if self.shutdown_requested() {
                break;
            }
            self.set_state(ConnectionState::Connecting);
            if !self.connect().await {
                break;
            }
            self.set_state(ConnectionState::Connected);
            self.join_known_rooms().await;

            match self.listen().await {
                ListenExit::Shutdown => break,
                ListenExit::Failed(e) => {
                    if e.is_transient() {
                        tracing::warn!("Listener failed, reconnecting: {}", e);
                    } else {
                        tracing::error!("Listener failed, logging in again: {}", e);
                    }
                    self.close_session(&e).await;
                }
            }
        }

        self.set_state(ConnectionState::ShuttingDown);
        tracing::info!("Logging out");
        if let Err(e) = self.transport.logout().await {
            tracing::warn!("Logout failed: {}", e);
        }
        self.set_state(ConnectionState::Stopped);
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!("Connection state {:?} -> {:?}", previous, next);
        }
    }

    /// Log in, retrying after a fixed delay. Returns false if shutdown was
    /// requested before a login succeeded.
    async fn connect(&mut self) -> bool {
        loop {
            match self.transport.login().await {
                Ok(user) => {
                    tracing::info!("Connected as {}", user);
                    return true;
                }
                Err(e) => {
                    if self.shutdown_requested() {
                        return false;
                    }
                    tracing::warn!(
                        "Connection failed, retrying in {:?}... ({})",
                        self.settings.retry_delay,
                        e
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.settings.retry_delay) => {}
                        changed = self.shutdown.changed() => {
                            // sender gone: nobody can ask us to stop, keep the pace
                            if changed.is_err() {
                                tokio::time::sleep(self.settings.retry_delay).await;
                            }
                        }
                    }
                    if self.shutdown_requested() {
                        return false;
                    }
                }
            }
        }
    }

    /// Best-effort logout of the session that just failed, so the next login
    /// does not leave it open on the homeserver. A rejected token has nothing
    /// left to close.
    async fn close_session(&self, cause: &TransportError) {
        if matches!(cause, TransportError::Auth(_)) {
            return;
        }
        if let Err(e) = self.transport.logout().await {
            tracing::debug!("Logout of the failed session did not complete: {}", e);
        }
    }

    async fn join_known_rooms(&self) {
        let rooms = match self.transport.joined_rooms().await {
            Ok(rooms) => rooms,
            Err(e) => {
                tracing::error!("Failed to list joined rooms: {}", e);
                return;
            }
        };
        for room in rooms {
            tracing::info!("Joining {}", room);
            if let Err(e) = self.transport.join_room(&room).await {
                tracing::error!("Failed to join {}: {}", room, e);
            }
        }
    }

    async fn listen(&self) -> ListenExit {
        let since = match self.transport.initial_token().await {
            Ok(token) => token,
            Err(e) => return ListenExit::Failed(e),
        };

        let (tx, mut rx) = mpsc::channel(64);
        let listener = tokio::spawn(listen_loop(
            self.transport.clone(),
            since,
            self.settings.poll_interval,
            tx,
            self.shutdown.clone(),
        ));

        let mut exit = ListenExit::Shutdown;
        while let Some(event) = rx.recv().await {
            match event {
                ListenerEvent::Room(event) => self.handler.dispatch(event).await,
                ListenerEvent::Failed(e) => {
                    exit = ListenExit::Failed(e);
                    break;
                }
            }
        }
        drop(rx);
        if let Err(e) = listener.await {
            tracing::error!("Listener task panicked: {}", e);
        }
        exit
    }
}

/// Long-poll until shutdown or the first transport failure. Dropping `tx`
/// on return closes the channel.
async fn listen_loop<S: EventSource>(
    source: Arc<S>,
    mut since: String,
    poll_interval: Duration,
    tx: mpsc::Sender<ListenerEvent>,
    shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        match source.poll(&since, poll_interval).await {
            Ok(batch) => {
                since = batch.next_batch;
                for event in batch.events {
                    if tx.send(ListenerEvent::Room(event)).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                let _ = tx.send(ListenerEvent::Failed(e)).await;
                return;
            }
        }
    }
}
