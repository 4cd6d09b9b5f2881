//! Domain traits - Abstractions for infrastructure implementations

pub mod transport;
pub mod handler;

pub use transport::{EventSource, SyncBatch, Transport};
pub use handler::EventHandler;
