use std::fmt;

/// Why a shell command did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    NonZeroExit,
    Timeout,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::NonZeroExit => write!(f, "non-zero exit"),
            FailureKind::Timeout => write!(f, "timeout"),
        }
    }
}

/// Outcome of one executor run. Every run yields exactly one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    Success(String),
    Failure { kind: FailureKind, detail: String },
}

impl ExecutionResult {
    pub fn failure(kind: FailureKind, detail: impl Into<String>) -> Self {
        ExecutionResult::Failure {
            kind,
            detail: detail.into(),
        }
    }
}

/// Message about to be sent to a room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub body: String,
    pub html: Option<String>,
}

impl OutgoingMessage {
    pub fn plain(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            html: None,
        }
    }

    pub fn with_html(body: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            html: Some(html.into()),
        }
    }
}
