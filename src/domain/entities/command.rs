/// A bot command classified from a message body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `!echo <text>`: reply with the text as-is
    Echo(String),
    /// `!sh <command>`: run the command through `/bin/sh -c`
    Shell(String),
    /// `!ledger <args>`: run `ledger <args>` through `/bin/sh -c`
    LedgerShell(String),
    None,
}

impl Command {
    /// The shell command line to execute, if this command runs one
    pub fn shell_line(&self) -> Option<&str> {
        match self {
            Command::Shell(line) | Command::LedgerShell(line) => Some(line),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Echo(_) => "echo",
            Command::Shell(_) => "sh",
            Command::LedgerShell(_) => "ledger",
            Command::None => "none",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Command::None)
    }
}
