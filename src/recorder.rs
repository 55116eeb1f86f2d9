//! Screenshot ledger: a full-page capture before, after and on error of every
//! step, assembled into the ordered record list handed back to the caller.

use chrono::{SecondsFormat, Utc};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::driver::{CaptureFormat, PageRef};
use crate::types::{Action, ScreenshotRecord};

/// Append-only list of screenshot records for one run.
#[derive(Debug, Default)]
pub struct Ledger {
    records: Vec<ScreenshotRecord>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ScreenshotRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<ScreenshotRecord> {
        self.records
    }

    fn push(&mut self, record: ScreenshotRecord) {
        self.records.push(record);
    }
}

/// Which point of the run a capture belongs to. Indices are 1-based.
#[derive(Debug, Clone, Copy)]
pub enum Step<'a> {
    Initial,
    AfterAction { index: usize, action: &'a Action },
    ActionError { index: usize, action: &'a Action, error: &'a str },
    LoopIteration { index: usize, action: &'a Action, iteration: u32 },
    Final,
}

impl Step<'_> {
    fn file_label(&self) -> String {
        match self {
            Step::Initial => "initial".to_string(),
            Step::AfterAction { index, action } => format!("action_{index}_{}", action.kind()),
            Step::ActionError { index, action, .. } => {
                format!("error_action_{index}_{}", action.kind())
            }
            Step::LoopIteration { index, action, .. } => {
                format!("action_{index}_{}_iteration", action.kind())
            }
            Step::Final => "final".to_string(),
        }
    }

    fn attempt(&self) -> Option<u32> {
        match self {
            Step::LoopIteration { iteration, .. } => Some(*iteration),
            _ => None,
        }
    }

    fn into_record(self, filename: String) -> ScreenshotRecord {
        let (step, action, error) = match self {
            Step::Initial => ("initial".to_string(), None, None),
            Step::AfterAction { index, action } => (format!("action {index}"), Some(action), None),
            Step::ActionError {
                index,
                action,
                error,
            } => (
                format!("error on action {index}"),
                Some(action),
                Some(error.to_string()),
            ),
            Step::LoopIteration {
                index,
                action,
                iteration,
            } => (format!("loop {index} iteration {iteration}"), Some(action), None),
            Step::Final => ("final".to_string(), None, None),
        };

        ScreenshotRecord {
            step,
            action: action.map(|a| a.kind().to_string()),
            filename,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            selector: action.and_then(|a| a.xpath()).map(str::to_string),
            value: action.and_then(|a| a.value()).map(str::to_string),
            error,
        }
    }
}

/// Writes debug screenshots and feeds the ledger.
#[derive(Debug, Clone)]
pub struct Recorder {
    dir: PathBuf,
    quality: u8,
    live: Option<broadcast::Sender<ScreenshotRecord>>,
}

impl Recorder {
    pub fn new(dir: impl Into<PathBuf>, quality: u8) -> Self {
        Self {
            dir: dir.into(),
            quality,
            live: None,
        }
    }

    /// Also publish every appended record on `live`.
    pub fn with_live_feed(mut self, live: broadcast::Sender<ScreenshotRecord>) -> Self {
        self.live = Some(live);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Capture the page into the screenshots directory.
    ///
    /// Never fails: a closed page or an I/O problem is logged and yields
    /// `None`, so observability can never be the reason a run fails.
    pub async fn capture(&self, page: &PageRef, label: &str, attempt: Option<u32>) -> Option<String> {
        if page.is_closed().await {
            warn!(label, "Page closed, skipping screenshot");
            return None;
        }

        let filename = screenshot_filename(label, attempt);
        match self.write_capture(page, &filename).await {
            Ok(size) => {
                info!(file = %filename, kb = size / 1024, "Screenshot saved");
                Some(filename)
            }
            Err(e) => {
                warn!(label, error = %e, "Failed to capture screenshot");
                None
            }
        }
    }

    async fn write_capture(&self, page: &PageRef, filename: &str) -> anyhow::Result<usize> {
        tokio::fs::create_dir_all(&self.dir).await?;

        match (page.url().await, page.title().await) {
            (Ok(url), Ok(title)) => debug!(%url, %title, "Capturing page"),
            _ => debug!("Capturing page without url/title"),
        }

        let bytes = page
            .screenshot(CaptureFormat::Jpeg {
                quality: self.quality,
            })
            .await?;
        tokio::fs::write(self.dir.join(filename), &bytes).await?;
        Ok(bytes.len())
    }

    /// Capture `step` and append it to the ledger if the capture succeeded.
    pub async fn record(&self, ledger: &mut Ledger, page: &PageRef, step: Step<'_>) {
        let Some(filename) = self.capture(page, &step.file_label(), step.attempt()).await else {
            return;
        };
        let record = step.into_record(filename);
        if let Some(live) = &self.live {
            let _ = live.send(record.clone());
        }
        ledger.push(record);
    }
}

/// `debug_<label>[_attempt_<n>]_<timestamp>_<suffix>.jpg`
fn screenshot_filename(label: &str, attempt: Option<u32>) -> String {
    let timestamp = Utc::now().format("%Y-%m-%dT%H-%M-%S-%3fZ");
    let suffix: u16 = rand::random();
    match attempt {
        Some(n) => format!("debug_{label}_attempt_{n}_{timestamp}_{suffix:04x}.jpg"),
        None => format!("debug_{label}_{timestamp}_{suffix:04x}.jpg"),
    }
}
