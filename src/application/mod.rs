//! Application layer - Use cases and business logic
//! 
//! This layer contains:
//! - Errors: Transport, configuration and relay errors
//! - Messaging: Command parsing and reply composition
//! - Services: Authorization, execution, the relay and the polling supervisor

pub mod errors;
pub mod services;
pub mod messaging;
