//! Platform integrations

pub mod matrix;
pub mod appservice;

pub use matrix::MatrixClient;
