use serde::{Deserialize, Serialize};

/// A single declarative step executed against the current page.
///
/// The wire shape is the one callers post: `{"type": "click", "xpath": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Action {
    Goto {
        url: String,
    },
    Click {
        xpath: String,
    },
    Type {
        xpath: String,
        #[serde(default)]
        value: String,
    },
    Wait {
        #[serde(default = "default_wait_seconds")]
        seconds: f64,
    },
    SwitchToPopup,
    SwitchToMain,
    LoopUntil {
        xpath: String,
        #[serde(rename = "actionsIfTrue", default)]
        actions_if_true: Vec<Action>,
        #[serde(rename = "maxAttempts", default, skip_serializing_if = "Option::is_none")]
        max_attempts: Option<u32>,
    },
    Screenshot {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    /// The text read is reported in [`RunOutcome::extracted`], keyed by the
    /// action's position, since the posted list itself is never mutated.
    ExtractText {
        xpath: String,
    },
    /// Any `type` the engine does not know. Skipped at run time.
    #[serde(other)]
    Unknown,
}

fn default_wait_seconds() -> f64 {
    1.0
}

impl Action {
    /// The wire name of the action type, as used in labels and messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Goto { .. } => "goto",
            Action::Click { .. } => "click",
            Action::Type { .. } => "type",
            Action::Wait { .. } => "wait",
            Action::SwitchToPopup => "switchToPopup",
            Action::SwitchToMain => "switchToMain",
            Action::LoopUntil { .. } => "loopUntil",
            Action::Screenshot { .. } => "screenshot",
            Action::ExtractText { .. } => "extractText",
            Action::Unknown => "unknown",
        }
    }

    pub fn xpath(&self) -> Option<&str> {
        match self {
            Action::Click { xpath }
            | Action::Type { xpath, .. }
            | Action::LoopUntil { xpath, .. }
            | Action::ExtractText { xpath, .. } => Some(xpath),
            _ => None,
        }
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            Action::Type { value, .. } if !value.is_empty() => Some(value),
            _ => None,
        }
    }

    /// Actions that routinely trigger navigation or DOM swaps get a settle delay first.
    pub fn mutates_page(&self) -> bool {
        matches!(self, Action::Goto { .. } | Action::Click { .. })
    }
}

/// One entry of the screenshot ledger. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotRecord {
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    pub filename: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Text pulled out of the page by an `extractText` action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub index: usize,
    pub selector: String,
    pub content: Option<String>,
}

/// What a successful run hands back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub success: bool,
    pub message: String,
    pub html: String,
    pub screenshots: Vec<ScreenshotRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extracted: Vec<Extraction>,
}

/// Placeholder URL of a freshly opened tab.
pub const BLANK_PAGE: &str = "about:blank";
