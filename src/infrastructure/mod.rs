//! Infrastructure layer - External concerns
//! 
//! This layer contains:
//! - Config: Configuration loading
//! - Adapters: Matrix client-server API and the application-service webhook

pub mod config;
pub mod adapters;
