//! Matrix command relay: runs whitelisted `!echo`, `!sh` and `!ledger`
//! commands and answers in the originating room.

pub mod domain;
pub mod application;
pub mod infrastructure;
