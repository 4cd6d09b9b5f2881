//! Application services - Business logic orchestration

pub mod authorizer;
pub mod executor;
pub mod relay;
pub mod supervisor;

pub use authorizer::{AllowList, Authorizer};
pub use executor::Executor;
pub use relay::{Relay, SenderPolicy};
pub use supervisor::{ConnectionState, ListenerEvent, PollingSupervisor, SupervisorSettings};
