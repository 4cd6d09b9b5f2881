//! Command parser - Classifies message bodies into commands

use crate::domain::entities::Command;

const ECHO_PREFIX: &str = "!echo ";
const SHELL_PREFIX: &str = "!sh ";
const LEDGER_PREFIX: &str = "!ledger ";

/// Classifies `m.text` bodies by prefix.
///
/// Matching is case- and whitespace-sensitive and the first matching prefix
/// wins. An empty argument is passed through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandParser;

impl CommandParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, body: &str) -> Command {
        if let Some(text) = body.strip_prefix(ECHO_PREFIX) {
            return Command::Echo(text.to_string());
        }
        if let Some(line) = body.strip_prefix(SHELL_PREFIX) {
            return Command::Shell(line.to_string());
        }
        if let Some(args) = body.strip_prefix(LEDGER_PREFIX) {
            // keep the executable name, drop the bang
            return Command::LedgerShell(format!("{}{}", &LEDGER_PREFIX[1..], args));
        }
        Command::None
    }
}
