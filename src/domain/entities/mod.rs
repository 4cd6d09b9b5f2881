//! Domain entities - Core business objects with no external dependencies

pub mod identity;
pub mod event;
pub mod command;
pub mod reply;

pub use identity::{Identity, RoomId};
pub use event::{RoomEvent, EventKind, MessageType};
pub use command::Command;
pub use reply::{ExecutionResult, FailureKind, OutgoingMessage};
