//! Message handling - Command parsing and reply composition

pub mod composer;
pub mod parser;

pub use composer::{ReplyComposer, REFUSAL};
pub use parser::CommandParser;
