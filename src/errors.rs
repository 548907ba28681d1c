use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Malformed address or parameters. Fatal to the single call.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ValidationError {
    message: String,
    path: Option<String>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }
}

/// Raised when an `apply` cannot re-capture the state it is about to overwrite.
///
/// Plain captures never raise this; they return `CaptureResult::unsupported`.
#[derive(Debug, Error)]
#[error("current state cannot be captured: {reason}")]
pub struct UnsupportedStateError {
    reason: String,
}

impl UnsupportedStateError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

#[derive(Debug, Error)]
#[error("restore rejected: {reason}")]
pub struct RestoreIntegrityError {
    reason: String,
}

impl RestoreIntegrityError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortStage {
    BeforeEnqueue,
    BeforeStart,
}

impl fmt::Display for AbortStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortStage::BeforeEnqueue => f.write_str("before enqueue"),
            AbortStage::BeforeStart => f.write_str("before start"),
        }
    }
}

#[derive(Debug, Error)]
#[error("operation '{op_id}' aborted {stage}")]
pub struct AbortError {
    op_id: String,
    stage: AbortStage,
}

impl AbortError {
    pub fn new(op_id: impl Into<String>, stage: AbortStage) -> Self {
        Self {
            op_id: op_id.into(),
            stage,
        }
    }

    pub fn op_id(&self) -> &str {
        &self.op_id
    }

    pub fn stage(&self) -> AbortStage {
        self.stage
    }
}

/// A host round trip failed. Surfaced to the immediate caller, never retried here.
#[derive(Debug, Error)]
#[error("host request failed ({code}): {message}")]
pub struct TransientHostError {
    code: String,
    message: String,
}

impl TransientHostError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Error)]
#[error(
    "workbook '{workbook_id}' is at revision {actual}, expected {expected}; re-read before writing"
)]
pub struct StaleRevisionError {
    workbook_id: String,
    expected: u64,
    actual: u64,
}

impl StaleRevisionError {
    pub fn new(workbook_id: impl Into<String>, expected: u64, actual: u64) -> Self {
        Self {
            workbook_id: workbook_id.into(),
            expected,
            actual,
        }
    }

    pub fn expected(&self) -> u64 {
        self.expected
    }

    pub fn actual(&self) -> u64 {
        self.actual
    }
}

pub fn is_abort(error: &anyhow::Error) -> bool {
    error.is::<AbortError>()
}
