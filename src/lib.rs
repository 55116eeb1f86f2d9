//! Action-execution engine for driving flaky, tab-spawning web pages.
//!
//! An [`Engine`] takes a start URL and an ordered list of [`Action`]s, runs
//! them against a fresh browser and returns either a [`RunOutcome`] or a
//! [`RunFailure`]. Both carry the screenshot ledger of the run.

pub mod adapter;
pub mod chrome;
pub mod config;
pub mod driver;
pub mod error;
pub mod interpreter;
pub mod lifecycle;
pub mod popup;
pub mod recorder;
pub mod resolver;
pub mod session;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use adapter::{AccountPrefill, AccountPrefillAdapter, DomainAdapter, SiteAdapter};
pub use chrome::{BrowserConfig, ChromeLauncher};
pub use config::{EngineConfig, Timings};
pub use driver::{Driver, Launcher, Page, Selector};
pub use error::{EngineError, FailedAction, RunFailure};
pub use interpreter::{Engine, FixedReference, LoopReference, Today};
pub use types::{Action, Extraction, RunOutcome, ScreenshotRecord};
