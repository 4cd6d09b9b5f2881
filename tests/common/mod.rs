//! Shared test doubles

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;

use ledger_relay::application::errors::TransportError;
use ledger_relay::domain::entities::{Identity, OutgoingMessage, RoomEvent, RoomId};
use ledger_relay::domain::traits::{EventHandler, EventSource, SyncBatch, Transport};

pub const BOT: &str = "@ledger:example.com";
pub const ALICE: &str = "@alice:example.com";
pub const MALLORY: &str = "@mallory:example.com";
pub const ROOM: &str = "!books:example.com";

static INIT: Once = Once::new();

pub fn ensure_init() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// In-memory homeserver
pub struct MockTransport {
    pub user: Identity,
    pub members: Mutex<HashMap<RoomId, Vec<Identity>>>,
    pub known_rooms: Mutex<Vec<RoomId>>,
    pub sent: Mutex<Vec<(RoomId, OutgoingMessage)>>,
    pub joined: Mutex<Vec<RoomId>>,
    pub batches: Mutex<VecDeque<Result<SyncBatch, TransportError>>>,
    /// Number of login attempts that fail before one succeeds
    pub login_failures: AtomicUsize,
    pub login_attempts: AtomicUsize,
    pub logouts: AtomicUsize,
    pub polls: AtomicUsize,
    pub fail_sends: AtomicBool,
    pub fail_members: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            user: Identity::new(BOT),
            members: Mutex::new(HashMap::new()),
            known_rooms: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            joined: Mutex::new(Vec::new()),
            batches: Mutex::new(VecDeque::new()),
            login_failures: AtomicUsize::new(0),
            login_attempts: AtomicUsize::new(0),
            logouts: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            fail_sends: AtomicBool::new(false),
            fail_members: AtomicBool::new(false),
        }
    }

    pub fn with_members(self, room: &str, members: &[&str]) -> Self {
        self.members
            .lock()
            .unwrap()
            .insert(RoomId::new(room), members.iter().map(|m| Identity::new(*m)).collect());
        self
    }

    pub fn with_known_rooms(self, rooms: &[&str]) -> Self {
        *self.known_rooms.lock().unwrap() = rooms.iter().map(|r| RoomId::new(*r)).collect();
        self
    }

    pub fn push_batch(&self, events: Vec<RoomEvent>) {
        let mut batches = self.batches.lock().unwrap();
        let next_batch = format!("s{}", batches.len() + 1);
        batches.push_back(Ok(SyncBatch { next_batch, events }));
    }

    pub fn push_failure(&self, error: TransportError) {
        self.batches.lock().unwrap().push_back(Err(error));
    }

    pub fn sent(&self) -> Vec<(RoomId, OutgoingMessage)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn joined(&self) -> Vec<RoomId> {
        self.joined.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn login(&self) -> Result<Identity, TransportError> {
        let attempt = self.login_attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.login_failures.load(Ordering::SeqCst) {
            return Err(TransportError::Connection("connection refused".to_string()));
        }
        Ok(self.user.clone())
    }

    async fn joined_rooms(&self) -> Result<Vec<RoomId>, TransportError> {
        Ok(self.known_rooms.lock().unwrap().clone())
    }

    async fn join_room(&self, room: &RoomId) -> Result<RoomId, TransportError> {
        self.joined.lock().unwrap().push(room.clone());
        Ok(room.clone())
    }

    async fn joined_members(&self, room: &RoomId) -> Result<Vec<Identity>, TransportError> {
        if self.fail_members.load(Ordering::SeqCst) {
            return Err(TransportError::Http {
                status: 403,
                errcode: "M_FORBIDDEN".to_string(),
                message: "not in room".to_string(),
            });
        }
        Ok(self.members.lock().unwrap().get(room).cloned().unwrap_or_default())
    }

    async fn send_message(&self, room: &RoomId, message: &OutgoingMessage) -> Result<String, TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Connection("send failed".to_string()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((room.clone(), message.clone()));
        Ok(format!("$event{}", sent.len()))
    }

    async fn logout(&self) -> Result<(), TransportError> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl EventSource for MockTransport {
    async fn initial_token(&self) -> Result<String, TransportError> {
        Ok("s0".to_string())
    }

    async fn poll(&self, since: &str, timeout: Duration) -> Result<SyncBatch, TransportError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let next = self.batches.lock().unwrap().pop_front();
        match next {
            Some(batch) => batch,
            None => {
                tokio::time::sleep(timeout.min(Duration::from_millis(20))).await;
                Ok(SyncBatch {
                    next_batch: since.to_string(),
                    events: Vec::new(),
                })
            }
        }
    }
}

/// Records every event it is handed
#[derive(Default)]
pub struct RecordingHandler {
    pub events: Mutex<Vec<RoomEvent>>,
}

impl RecordingHandler {
    pub fn events(&self) -> Vec<RoomEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn on_message(&self, event: RoomEvent) {
        self.events.lock().unwrap().push(event);
    }

    async fn on_invite(&self, event: RoomEvent) {
        self.events.lock().unwrap().push(event);
    }

    async fn on_leave(&self, event: RoomEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Poll `condition` every 10ms until it holds or `limit` elapses
pub async fn wait_until(limit: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
