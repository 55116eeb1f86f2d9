//! Site-specific knowledge, kept out of the generic engine.
//!
//! The engine asks an adapter three things: does a URL look like the popup we
//! are waiting for, what semantic hints does a selector carry for the click
//! fallbacks, and (only when delegation is enabled) does it want to handle a
//! click itself.

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info};

use crate::driver::{PageRef, Selector, xpath_literal};
use crate::types::BLANK_PAGE;

/// Narrower ways to reach the same logical element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hints {
    /// Attribute-only selector such as `//*[@data-email="a@b.c"]`.
    pub attribute: Option<Selector>,
    /// Text the element is expected to show.
    pub text: Option<String>,
}

impl Hints {
    pub fn is_empty(&self) -> bool {
        self.attribute.is_none() && self.text.is_none()
    }
}

static ATTRIBUTE_PREDICATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\[\s*@([\w:-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')\s*\]"#).expect("valid regex")
});

static TEXT_PREDICATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:text\(\)|\.)\s*=\s*(?:"([^"]*)"|'([^']*)')|contains\(\s*(?:text\(\)|\.)\s*,\s*(?:"([^"]*)"|'([^']*)')\s*\)"#,
    )
    .expect("valid regex")
});

/// Pull attribute and text predicates out of an XPath expression.
pub fn hints_from_xpath(expr: &str) -> Hints {
    let mut hints = Hints::default();

    if let Some(caps) = ATTRIBUTE_PREDICATE.captures(expr) {
        let name = &caps[1];
        let value = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
        if !value.is_empty() {
            hints.attribute = Some(Selector::XPath(format!(
                "//*[@{name}={}]",
                xpath_literal(value)
            )));
            hints.text = Some(value.to_string());
        }
    }

    if let Some(caps) = TEXT_PREDICATE.captures(expr) {
        let value = (1..=4)
            .find_map(|i| caps.get(i))
            .map_or("", |m| m.as_str());
        if !value.is_empty() {
            hints.text = Some(value.to_string());
        }
    }

    hints
}

#[async_trait]
pub trait SiteAdapter: Send + Sync {
    /// Whether `url` looks like the page a `switchToPopup` is waiting for.
    fn is_popup_target(&self, url: &str) -> bool;

    fn hints(&self, selector: &Selector) -> Hints {
        match selector {
            Selector::XPath(expr) => hints_from_xpath(expr),
            _ => Hints::default(),
        }
    }

    /// Handle a click before the generic strategy runs. `Ok(true)` means the
    /// adapter already clicked what the action meant to click.
    async fn intercept_click(&self, _page: &PageRef, _selector: &Selector) -> Result<bool> {
        Ok(false)
    }
}

/// Matches popups by domain fragment. With no domains configured, any page
/// that has left the blank placeholder counts.
#[derive(Debug, Clone, Default)]
pub struct DomainAdapter {
    domains: Vec<String>,
}

impl DomainAdapter {
    pub fn new(domains: Vec<String>) -> Self {
        let domains = domains
            .into_iter()
            .map(|d| d.trim().to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        Self { domains }
    }

    fn matches(&self, url: &str) -> bool {
        if url.is_empty() || url == BLANK_PAGE {
            return false;
        }
        if self.domains.is_empty() {
            return true;
        }
        let url = url.to_ascii_lowercase();
        self.domains.iter().any(|d| url.contains(d.as_str()))
    }
}

#[async_trait]
impl SiteAdapter for DomainAdapter {
    fn is_popup_target(&self, url: &str) -> bool {
        self.matches(url)
    }
}

/// Login shortcut for account choosers that sometimes show a sign-in form
/// instead of the remembered account.
#[derive(Debug, Clone)]
pub struct AccountPrefill {
    /// Identifier typed into the sign-in form.
    pub account: String,
    /// URL fragments that mark the sign-in form.
    pub login_markers: Vec<String>,
    pub input: Selector,
    pub submit: Selector,
    /// Pause between filling the identifier and submitting.
    pub pause: Duration,
}

pub struct AccountPrefillAdapter {
    domains: DomainAdapter,
    prefill: AccountPrefill,
}

impl AccountPrefillAdapter {
    pub fn new(domains: DomainAdapter, prefill: AccountPrefill) -> Self {
        Self { domains, prefill }
    }
}

#[async_trait]
impl SiteAdapter for AccountPrefillAdapter {
    fn is_popup_target(&self, url: &str) -> bool {
        self.domains.is_popup_target(url)
    }

    async fn intercept_click(&self, page: &PageRef, selector: &Selector) -> Result<bool> {
        let url = page.url().await?;
        if !self.prefill.login_markers.iter().any(|m| url.contains(m.as_str())) {
            return Ok(false);
        }
        if self.hints(selector).attribute.is_none() {
            return Ok(false);
        }

        info!(url = %url, "Sign-in form instead of account chooser, filling identifier");
        if page.count(&self.prefill.input).await? == 0 {
            debug!("Identifier input not present");
            return Ok(false);
        }
        page.fill(&self.prefill.input, &self.prefill.account).await?;
        tokio::time::sleep(self.prefill.pause).await;

        if page.count(&self.prefill.submit).await? == 0 {
            debug!("Submit control not present");
            return Ok(false);
        }
        page.click(&self.prefill.submit).await?;
        Ok(true)
    }
}
