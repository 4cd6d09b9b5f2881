//! Relay - drives parse, authorize, execute and reply for each room event
//!
//! The relay holds no mutable state; one instance is shared by every worker
//! or request handler.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::authorizer::Authorizer;
use super::executor::Executor;
use crate::application::messaging::{CommandParser, ReplyComposer};
use crate::domain::entities::{Command, EventKind, ExecutionResult, Identity, MessageType, OutgoingMessage, RoomEvent, RoomId};
use crate::domain::traits::{EventHandler, Transport};

/// Who may trigger a command at all.
///
/// `RoomGateOnly` lets anyone in a room run `!sh` and `!ledger`; only the
/// visibility of the reply is gated on room membership. `RequireAllowed`
/// additionally discards commands from senders outside the allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SenderPolicy {
    #[default]
    RoomGateOnly,
    RequireAllowed,
}

pub struct Relay<T: Transport> {
    transport: Arc<T>,
    bot: Identity,
    authorizer: Authorizer,
    parser: CommandParser,
    executor: Executor,
    composer: ReplyComposer,
    sender_policy: SenderPolicy,
    join_before_reply: bool,
}

impl<T: Transport> Relay<T> {
    pub fn new(transport: Arc<T>, bot: Identity, authorizer: Authorizer, executor: Executor) -> Self {
        Self {
            transport,
            bot,
            authorizer,
            parser: CommandParser::new(),
            executor,
            composer: ReplyComposer::new(),
            sender_policy: SenderPolicy::default(),
            join_before_reply: false,
        }
    }

    pub fn with_sender_policy(mut self, policy: SenderPolicy) -> Self {
        self.sender_policy = policy;
        self
    }

    /// Join the room before replying. Application-service users are not
    /// necessarily members of rooms they receive events for.
    pub fn with_join_before_reply(mut self, join: bool) -> Self {
        self.join_before_reply = join;
        self
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn bot(&self) -> &Identity {
        &self.bot
    }

    pub fn authorizer(&self) -> &Authorizer {
        &self.authorizer
    }

    /// Turn an event into a command. Own messages, non-text messages and
    /// non-message events always yield `Command::None`.
    pub fn classify(&self, event: &RoomEvent) -> Command {
        if event.sender == self.bot {
            return Command::None;
        }
        let EventKind::Message { msgtype: MessageType::Text, body } = &event.kind else {
            return Command::None;
        };

        let command = self.parser.parse(body);
        if command.is_none() {
            return command;
        }
        if self.sender_policy == SenderPolicy::RequireAllowed && !self.authorizer.is_allowed(&event.sender) {
            tracing::warn!("Ignoring !{} from {} in {}: sender not allowed", command.name(), event.sender, event.room);
            return Command::None;
        }
        command
    }

    /// Build the reply for a command, before the room gate
    pub async fn respond(&self, command: &Command, room: &RoomId) -> Option<OutgoingMessage> {
        match command {
            Command::Echo(text) => {
                tracing::info!("Echoing message '{}' to room {}", text, room);
                Some(self.composer.compose_text(text.clone()))
            }
            Command::Shell(line) | Command::LedgerShell(line) => {
                tracing::info!("Running '{}' for room {}", line, room);
                let result = self.executor.run(line).await;
                if let ExecutionResult::Failure { kind, detail } = &result {
                    tracing::warn!("Command {}: {}", kind, detail);
                }
                Some(self.composer.compose_result(&result))
            }
            Command::None => None,
        }
    }

    /// True iff every joined member of the room is allowed. A failed
    /// membership lookup closes the gate.
    pub async fn room_cleared(&self, room: &RoomId) -> bool {
        match self.transport.joined_members(room).await {
            Ok(members) => {
                tracing::debug!("Room {} has {} joined members", room, members.len());
                self.authorizer.all_room_members_allowed(&members)
            }
            Err(e) => {
                tracing::error!("Failed to fetch members of {}: {}", room, e);
                false
            }
        }
    }

    /// Everything except the send: classify, execute, compose, gate.
    pub async fn prepare_reply(&self, event: &RoomEvent) -> Option<OutgoingMessage> {
        let command = self.classify(event);
        let reply = self.respond(&command, &event.room).await?;
        if reply.body.is_empty() {
            tracing::debug!("Nothing to say in {}", event.room);
            return None;
        }

        if self.join_before_reply {
            if let Err(e) = self.transport.join_room(&event.room).await {
                tracing::warn!("Failed to join {} before replying: {}", event.room, e);
            }
        }

        let allowed = self.room_cleared(&event.room).await;
        Some(self.composer.apply_room_gate(reply, allowed))
    }

    /// Send without retrying; a failed send drops the reply.
    pub async fn safe_send(&self, room: &RoomId, message: &OutgoingMessage) {
        match self.transport.send_message(room, message).await {
            Ok(event_id) => tracing::debug!("Sent {} to {}", event_id, room),
            Err(e) => tracing::error!("Failed to send message to {}: {}", room, e),
        }
    }
}

#[async_trait]
impl<T: Transport> EventHandler for Relay<T> {
    async fn on_message(&self, event: RoomEvent) {
        tracing::debug!("Message in {} from {}", event.room, event.sender);
        if let Some(reply) = self.prepare_reply(&event).await {
            self.safe_send(&event.room, &reply).await;
        }
    }

    async fn on_invite(&self, event: RoomEvent) {
        tracing::info!("Invited to {} by {}", event.room, event.sender);
        if !self.authorizer.is_allowed(&event.sender) {
            tracing::info!("No whitelist match, ignoring invite from {}", event.sender);
            return;
        }
        match self.transport.join_room(&event.room).await {
            Ok(room) => tracing::info!("Joined {}", room),
            Err(e) => tracing::error!("Failed to join {}: {}", event.room, e),
        }
    }

    async fn on_leave(&self, event: RoomEvent) {
        tracing::info!("Kicked from {} by {}", event.room, event.sender);
    }
}
