//! Locating and interacting with elements on pages that do not hold still.

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::adapter::SiteAdapter;
use crate::config::EngineConfig;
use crate::driver::{PageRef, Selector};
use crate::error::{EngineError, Result};

/// Containers scanned by the last click fallback.
const CONTAINER_XPATH: &str = "//div";

pub struct ElementResolver<'a> {
    adapter: &'a dyn SiteAdapter,
    config: &'a EngineConfig,
}

impl<'a> ElementResolver<'a> {
    pub fn new(adapter: &'a dyn SiteAdapter, config: &'a EngineConfig) -> Self {
        Self { adapter, config }
    }

    /// Click with bounded retries. A failed attempt reloads the page before
    /// the next one; once the last attempt fails the alternative resolution
    /// strategies get a turn.
    pub async fn click(&self, page: &PageRef, selector: &Selector) -> Result<()> {
        let attempts = self.config.click_attempts.max(1);
        let mut attempt = 1;

        loop {
            info!(attempt, attempts, %selector, "Click attempt");
            match self.try_click(page, selector).await {
                Ok(()) => {
                    info!(%selector, "Clicked");
                    return Ok(());
                }
                Err(e) if attempt < attempts => {
                    warn!(attempt, error = %e, "Click failed, reloading before retry");
                    self.recover(page).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Last click attempt failed, trying alternatives");
                    break;
                }
            }
        }

        self.click_alternatives(page, selector).await
    }

    async fn try_click(&self, page: &PageRef, selector: &Selector) -> Result<()> {
        let timings = &self.config.timings;
        sleep(timings.before_locate).await;

        if self.config.delegate_clicks {
            match self.adapter.intercept_click(page, selector).await {
                Ok(true) => {
                    info!(%selector, "Site adapter handled the click");
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) => warn!(error = %e, "Site adapter failed, using generic click"),
            }
        }

        page.wait_for_visible(selector, timings.element_visible).await?;
        sleep(timings.before_click).await;
        page.click(selector).await?;
        Ok(())
    }

    /// Reload clears transient states (overlays, half-rendered widgets) that
    /// made the previous attempt fail.
    async fn recover(&self, page: &PageRef) {
        let timings = &self.config.timings;
        sleep(timings.retry_pause).await;
        match page.reload().await {
            Ok(()) => debug!("Page reloaded for retry"),
            Err(e) => warn!(error = %e, "Reload failed"),
        }
        sleep(timings.after_reload).await;
    }

    async fn click_alternatives(&self, page: &PageRef, selector: &Selector) -> Result<()> {
        let not_found = || EngineError::ElementNotFound {
            selector: selector.to_string(),
        };

        let target = self.resolve_alternative(page, selector).await.ok_or_else(not_found)?;
        match page.click(&target).await {
            Ok(()) => {
                info!(%target, "Clicked through alternative strategy");
                Ok(())
            }
            Err(e) => {
                warn!(%target, error = %e, "Alternative target did not take the click");
                Err(not_found())
            }
        }
    }

    /// First strategy yielding a match: the selector itself, the attribute
    /// hint, the text hint, then a scan of container elements by text.
    async fn resolve_alternative(&self, page: &PageRef, selector: &Selector) -> Option<Selector> {
        let hints = self.adapter.hints(selector);

        let mut candidates = vec![selector.clone()];
        candidates.extend(hints.attribute.clone());
        candidates.extend(hints.text.as_deref().map(Selector::text));

        for candidate in candidates {
            let count = page.count(&candidate).await.unwrap_or(0);
            debug!(%candidate, count, "Alternative strategy");
            if count > 0 {
                return Some(candidate);
            }
        }

        let text = hints.text?;
        let containers = Selector::xpath(CONTAINER_XPATH);
        let texts = match page.inner_texts(&containers).await {
            Ok(texts) => texts,
            Err(e) => {
                debug!(error = %e, "Container scan failed");
                return None;
            }
        };
        texts
            .iter()
            .take(self.config.container_scan_limit)
            .position(|t| t.contains(text.as_str()))
            .map(|i| Selector::XPath(format!("({CONTAINER_XPATH})[{}]", i + 1)))
    }

    /// Single click without retries or recovery, as loop sub-actions use.
    pub async fn click_once(&self, page: &PageRef, selector: &Selector) -> Result<()> {
        page.wait_for_visible(selector, self.config.timings.field_visible)
            .await?;
        page.click(selector).await?;
        Ok(())
    }

    /// Fill a field. One retry: if the direct fill fails the field is located
    /// explicitly, failing fast when it does not exist at all.
    pub async fn fill(&self, page: &PageRef, selector: &Selector, value: &str) -> Result<()> {
        let direct = async {
            page.wait_for_visible(selector, self.config.timings.field_visible)
                .await?;
            page.fill(selector, value).await
        };
        match direct.await {
            Ok(()) => Ok(()),
            Err(e) => {
                debug!(%selector, error = %e, "Direct fill failed, locating field first");
                if page.count(selector).await.unwrap_or(0) == 0 {
                    return Err(EngineError::FieldNotFound {
                        selector: selector.to_string(),
                    });
                }
                page.fill(selector, value).await?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::DomainAdapter;
    use crate::config::Timings;
    use crate::testing::{FakeBrowser, FakeElement};

    fn config() -> EngineConfig {
        EngineConfig {
            timings: Timings::immediate(),
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn missing_element_takes_three_attempts_and_two_reloads() {
        let browser = FakeBrowser::new();
        let page = browser.open_page("https://example.test/");
        let adapter = DomainAdapter::default();
        let config = config();
        let resolver = ElementResolver::new(&adapter, &config);

        let err = resolver
            .click(&page, &Selector::xpath("//button[@id='missing']"))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::ElementNotFound { .. }));
        let fake = browser.fake_page(page.id());
        assert_eq!(fake.visibility_waits(), 3);
        assert_eq!(fake.reloads(), 2);
    }

    #[tokio::test]
    async fn visible_element_is_clicked_first_time() {
        let browser = FakeBrowser::new();
        let page = browser.open_page("https://example.test/");
        let fake = browser.fake_page(page.id());
        fake.add_element(FakeElement::new("//button").tag("button"));
        let adapter = DomainAdapter::default();
        let config = config();

        ElementResolver::new(&adapter, &config)
            .click(&page, &Selector::xpath("//button"))
            .await
            .unwrap();

        assert_eq!(fake.clicks(), vec!["//button".to_string()]);
        assert_eq!(fake.reloads(), 0);
    }

    #[tokio::test]
    async fn hidden_element_is_clicked_by_the_original_selector_at_the_end() {
        let browser = FakeBrowser::new();
        let page = browser.open_page("https://example.test/");
        let fake = browser.fake_page(page.id());
        fake.add_element(FakeElement::new("//a[@id='go']").tag("a").hidden());
        let adapter = DomainAdapter::default();
        let config = config();

        ElementResolver::new(&adapter, &config)
            .click(&page, &Selector::xpath("//a[@id='go']"))
            .await
            .unwrap();

        assert_eq!(fake.visibility_waits(), 3);
        assert_eq!(fake.clicks(), vec!["//a[@id='go']".to_string()]);
    }

    #[tokio::test]
    async fn attribute_hint_finds_a_restructured_element() {
        let browser = FakeBrowser::new();
        let page = browser.open_page("https://example.test/");
        let fake = browser.fake_page(page.id());
        fake.add_element(FakeElement::new(r#"//*[@data-email="a@example.test"]"#));
        let adapter = DomainAdapter::default();
        let config = config();

        ElementResolver::new(&adapter, &config)
            .click(
                &page,
                &Selector::xpath(r#"//ul/li/div[@data-email="a@example.test"]"#),
            )
            .await
            .unwrap();

        assert_eq!(
            fake.clicks(),
            vec![r#"//*[@data-email="a@example.test"]"#.to_string()]
        );
    }

    #[tokio::test]
    async fn container_scan_is_the_last_resort() {
        let browser = FakeBrowser::new();
        let page = browser.open_page("https://example.test/");
        let fake = browser.fake_page(page.id());
        fake.add_element(FakeElement::new("//div[@class='header']").text("Choose an account"));
        fake.add_element(FakeElement::new("//div[@class='row']").nested_text("Continue as Ana"));
        let adapter = DomainAdapter::default();
        let config = config();

        // The text hint only appears together with other text, so neither the
        // selector nor a text match on a single node finds it.
        let resolver = ElementResolver::new(&adapter, &config);
        let target = resolver
            .resolve_alternative(&page, &Selector::xpath("//li[contains(., 'as Ana')]"))
            .await;
        assert_eq!(target, Some(Selector::xpath("(//div)[2]")));
    }

    #[tokio::test]
    async fn fill_fails_fast_on_missing_field() {
        let browser = FakeBrowser::new();
        let page = browser.open_page("https://example.test/");
        let adapter = DomainAdapter::default();
        let config = config();

        let err = ElementResolver::new(&adapter, &config)
            .fill(&page, &Selector::xpath("//input[@name='q']"), "rust")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::FieldNotFound { .. }));
    }

    #[tokio::test]
    async fn fill_retries_on_a_hidden_field() {
        let browser = FakeBrowser::new();
        let page = browser.open_page("https://example.test/");
        let fake = browser.fake_page(page.id());
        fake.add_element(FakeElement::new("//input[@name='q']").tag("input").hidden());
        let adapter = DomainAdapter::default();
        let config = config();

        ElementResolver::new(&adapter, &config)
            .fill(&page, &Selector::xpath("//input[@name='q']"), "rust")
            .await
            .unwrap();
        assert_eq!(fake.value_of("//input[@name='q']").as_deref(), Some("rust"));
    }
}
