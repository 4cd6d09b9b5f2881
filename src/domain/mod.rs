//! Domain layer - Core business objects with no external dependencies
//! 
//! This layer contains:
//! - Entities: Identities, room events, commands, replies
//! - Traits: Abstractions for infrastructure (Transport, EventSource, EventHandler)

pub mod entities;
pub mod traits;
