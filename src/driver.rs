//! The capability surface the engine needs from a browser-automation driver.
//!
//! Everything the engine does to a page goes through [`Page`]; everything it
//! does to the tab group goes through [`Driver`]. The production
//! implementation lives in [`crate::chrome`].

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub type PageRef = Arc<dyn Page>;
pub type DriverRef = Arc<dyn Driver>;

/// A selector expression understood by every driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    XPath(String),
    Css(String),
    /// Elements whose own text contains the string.
    Text(String),
}

/// What a driver actually hands to the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    XPath(String),
    Css(String),
}

impl Selector {
    pub fn xpath(expr: impl Into<String>) -> Self {
        Selector::XPath(expr.into())
    }

    pub fn text(text: impl Into<String>) -> Self {
        Selector::Text(text.into())
    }

    pub fn query(&self) -> Query {
        match self {
            Selector::XPath(expr) => Query::XPath(expr.clone()),
            Selector::Css(expr) => Query::Css(expr.clone()),
            Selector::Text(text) => Query::XPath(format!(
                "//*[text()[contains(., {})]]",
                xpath_literal(text)
            )),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::XPath(expr) => write!(f, "{expr}"),
            Selector::Css(expr) => write!(f, "css={expr}"),
            Selector::Text(text) => write!(f, "text={text}"),
        }
    }
}

/// Quote a string as an XPath 1.0 literal. XPath has no escapes, so strings
/// holding both quote kinds are split into `concat()` pieces.
pub fn xpath_literal(value: &str) -> String {
    if !value.contains('"') {
        return format!("\"{value}\"");
    }
    if !value.contains('\'') {
        return format!("'{value}'");
    }
    let parts: Vec<String> = value
        .split('"')
        .map(|part| format!("\"{part}\""))
        .collect();
    format!("concat({})", parts.join(", '\"', "))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    DomContentLoaded,
    NetworkIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureFormat {
    Jpeg { quality: u8 },
    Png,
}

impl CaptureFormat {
    /// Picks the format from a file name, JPEG unless it ends in `.png`.
    pub fn for_path(path: &str, quality: u8) -> Self {
        if path.to_ascii_lowercase().ends_with(".png") {
            CaptureFormat::Png
        } else {
            CaptureFormat::Jpeg { quality }
        }
    }
}

/// A live page (tab or popup) inside a driver's browsing context.
#[async_trait]
pub trait Page: Send + Sync {
    /// Stable identity of the underlying target.
    fn id(&self) -> &str;

    async fn is_closed(&self) -> bool;
    async fn url(&self) -> Result<String>;
    async fn title(&self) -> Result<String>;

    /// Navigate and wait for network quiescence.
    async fn goto(&self, url: &str) -> Result<()>;
    /// Reload and wait for network quiescence.
    async fn reload(&self) -> Result<()>;
    async fn wait_for_load(&self, state: LoadState, timeout: Duration) -> Result<()>;

    async fn wait_for_visible(&self, selector: &Selector, timeout: Duration) -> Result<()>;
    async fn count(&self, selector: &Selector) -> Result<usize>;
    /// Clicks the first match.
    async fn click(&self, selector: &Selector) -> Result<()>;
    /// Replaces the value of the first match.
    async fn fill(&self, selector: &Selector, value: &str) -> Result<()>;
    async fn attribute(&self, selector: &Selector, name: &str) -> Result<Option<String>>;
    async fn text_content(&self, selector: &Selector) -> Result<Option<String>>;
    /// Visible text of every match, in document order.
    async fn inner_texts(&self, selector: &Selector) -> Result<Vec<String>>;

    /// Full rendered markup.
    async fn content(&self) -> Result<String>;
    async fn frame_urls(&self) -> Result<Vec<String>>;
    /// Full-page raster.
    async fn screenshot(&self, format: CaptureFormat) -> Result<Vec<u8>>;

    /// `None` lifts driver-level timeouts entirely.
    fn set_default_timeout(&self, timeout: Option<Duration>);
}

impl fmt::Debug for dyn Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page").field("id", &self.id()).finish()
    }
}

/// Lifecycle notifications from the browsing context.
#[derive(Clone, Debug)]
pub enum PageEvent {
    Created(PageRef),
    Closed(String),
}

/// One browser process and its browsing context.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn new_page(&self) -> Result<PageRef>;
    /// Open pages in creation order.
    async fn pages(&self) -> Vec<PageRef>;
    fn subscribe(&self) -> broadcast::Receiver<PageEvent>;
    async fn close(&self) -> Result<()>;
}

/// Starts a fresh driver for each run.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self) -> Result<DriverRef>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_selectors_lower_to_xpath() {
        let query = Selector::text("Sign in").query();
        assert_eq!(
            query,
            Query::XPath("//*[text()[contains(., \"Sign in\")]]".into())
        );
    }

    #[test]
    fn literals_with_both_quotes_use_concat() {
        assert_eq!(xpath_literal("plain"), "\"plain\"");
        assert_eq!(xpath_literal("say \"hi\""), "'say \"hi\"'");
        assert_eq!(
            xpath_literal("it's \"x\""),
            "concat(\"it's \", '\"', \"x\", '\"', \"\")"
        );
    }

    #[test]
    fn capture_format_follows_extension() {
        assert_eq!(CaptureFormat::for_path("shot.PNG", 80), CaptureFormat::Png);
        assert_eq!(
            CaptureFormat::for_path("shot.jpg", 80),
            CaptureFormat::Jpeg { quality: 80 }
        );
    }
}
