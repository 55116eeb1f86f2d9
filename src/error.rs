//! Error types for the action engine.
//!
//! `EngineError` is what handlers raise. The interpreter wraps the one that
//! ends a run into a `RunFailure`, which always carries the screenshot ledger
//! captured up to that point.

use serde::Serialize;
use thiserror::Error;

use crate::types::ScreenshotRecord;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("element not found with any strategy: {selector}")]
    ElementNotFound { selector: String },

    #[error("field not found: {selector}")]
    FieldNotFound { selector: String },

    #[error("no popup or new page found after {waited_secs}s")]
    PopupNotFound { waited_secs: u64 },

    #[error("loop on {selector} gave up after {attempts} attempts{}", last_error_suffix(.last_error))]
    LoopExceeded {
        selector: String,
        attempts: u32,
        last_error: Option<String>,
    },

    #[error("no active page left in the session")]
    NoActivePage,

    #[error("page was closed before the operation started")]
    PageClosed,

    #[error("main page was closed")]
    MainPageClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Driver(#[from] anyhow::Error),
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    match last_error {
        Some(message) => format!(": {message}"),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// The action that ended a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedAction {
    /// 1-based position in the action list.
    pub index: usize,
    #[serde(rename = "type")]
    pub kind: String,
}

/// A run that did not complete. The ledger is part of the error.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct RunFailure {
    pub message: String,
    pub action: Option<FailedAction>,
    pub screenshots: Vec<ScreenshotRecord>,
}

impl RunFailure {
    pub fn new(message: impl Into<String>, screenshots: Vec<ScreenshotRecord>) -> Self {
        Self {
            message: message.into(),
            action: None,
            screenshots,
        }
    }

    pub fn at_action(
        index: usize,
        kind: &str,
        source: &EngineError,
        screenshots: Vec<ScreenshotRecord>,
    ) -> Self {
        Self {
            message: format!("Action {index} ({kind}) failed: {source}"),
            action: Some(FailedAction {
                index,
                kind: kind.to_string(),
            }),
            screenshots,
        }
    }
}
