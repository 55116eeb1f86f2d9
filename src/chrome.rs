//! `headless_chrome` implementation of the driver traits.
//!
//! Every CDP call blocks, so each one runs on the blocking pool with a clone
//! of the tab handle. DOM work goes through small injected scripts that
//! resolve XPath or CSS queries in the page and return JSON strings.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page::{CaptureScreenshotFormatOption, Viewport};
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::de::DeserializeOwned;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::driver::{
    CaptureFormat, Driver, DriverRef, Launcher, LoadState, Page, PageEvent, PageRef, Query,
    Selector,
};

/// Stand-in for "no timeout"; CDP calls need a finite bound.
const UNBOUNDED: Duration = Duration::from_secs(24 * 60 * 60);
const POLL: Duration = Duration::from_millis(100);
/// Resource count has to hold still this long to call the network idle.
const QUIET_WINDOW: Duration = Duration::from_millis(500);
const WATCH_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    pub user_agent: Option<String>,
    /// Chrome executable; found on the system when unset.
    pub chrome_path: Option<PathBuf>,
    pub sandbox: bool,
    /// Bound on the quiescence wait after navigation and reload.
    pub network_idle_timeout: Duration,
    /// How long the browser may go without CDP traffic before it is dropped.
    pub idle_browser_timeout: Duration,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1920,
            window_height: 1080,
            user_agent: Some(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                    .to_string(),
            ),
            chrome_path: None,
            sandbox: false,
            network_idle_timeout: Duration::from_secs(30),
            idle_browser_timeout: Duration::from_secs(600),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Run a blocking tab operation off the async runtime.
async fn blocking<T, F>(tab: &Arc<Tab>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Tab) -> Result<T> + Send + 'static,
{
    let tab = tab.clone();
    tokio::task::spawn_blocking(move || f(&tab)).await?
}

// --- injected scripts ---

const NODES_JS: &str = r#"
  const findNodes = (kind, expr) => {
    if (kind === 'css') return Array.from(document.querySelectorAll(expr));
    const snapshot = document.evaluate(expr, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
    const nodes = [];
    for (let i = 0; i < snapshot.snapshotLength; i++) nodes.push(snapshot.snapshotItem(i));
    return nodes;
  };
  const isVisible = (el) => {
    if (!(el instanceof Element)) return false;
    const style = getComputedStyle(el);
    if (style.display === 'none' || style.visibility === 'hidden' || style.opacity === '0') return false;
    const rect = el.getBoundingClientRect();
    return rect.width > 0 && rect.height > 0;
  };
"#;

const COUNT_JS: &str = "return JSON.stringify(nodes.length);";
const VISIBLE_JS: &str = "return JSON.stringify(nodes.some(isVisible));";
const CLEAR_JS: &str = r#"
  const el = nodes[0];
  if (!el) return JSON.stringify(false);
  el.value = '';
  el.dispatchEvent(new Event('input', { bubbles: true }));
  return JSON.stringify(true);
"#;
const TEXT_JS: &str = "const el = nodes[0]; return JSON.stringify(el ? el.textContent : null);";
const INNER_TEXTS_JS: &str =
    "return JSON.stringify(nodes.map(n => n.innerText || n.textContent || ''));";

const LOAD_PROBE_JS: &str = r#"JSON.stringify([document.readyState, performance.getEntriesByType('resource').length])"#;
const FRAMES_JS: &str = r#"JSON.stringify(Array.from(document.querySelectorAll('iframe, frame')).map(f => f.src).filter(Boolean))"#;
const PAGE_SIZE_JS: &str = r#"JSON.stringify([
  Math.max(document.documentElement.scrollWidth, document.body ? document.body.scrollWidth : 0),
  Math.max(document.documentElement.scrollHeight, document.body ? document.body.scrollHeight : 0)
])"#;

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Wrap `body` so it runs with `nodes` bound to the matches of `selector`.
fn query_script(selector: &Selector, body: &str) -> String {
    let (kind, expr) = match selector.query() {
        Query::XPath(expr) => ("xpath", expr),
        Query::Css(expr) => ("css", expr),
    };
    format!(
        "(() => {{{NODES_JS}  const nodes = findNodes('{kind}', {});\n{body}\n}})()",
        js_string(&expr)
    )
}

fn attribute_script(selector: &Selector, name: &str) -> String {
    let body = format!(
        "const el = nodes[0];
  if (!el) return JSON.stringify({{ found: false, value: null }});
  const name = {};
  const value = name === 'value' && 'value' in el ? el.value : el.getAttribute(name);
  return JSON.stringify({{ found: true, value: value == null ? null : String(value) }});",
        js_string(name)
    );
    query_script(selector, &body)
}

/// Evaluate a script that returns a JSON string.
fn eval_json<T: DeserializeOwned>(tab: &Tab, script: &str) -> Result<T> {
    let raw = tab
        .evaluate(script, false)?
        .value
        .and_then(|v| v.as_str().map(String::from))
        .ok_or_else(|| anyhow!("script returned no value"))?;
    Ok(serde_json::from_str(&raw)?)
}

#[derive(serde::Deserialize)]
struct AttributeProbe {
    found: bool,
    value: Option<String>,
}

fn wait_for_load_blocking(tab: &Tab, state: LoadState, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    let mut last_count = None;
    let mut quiet_since = Instant::now();

    loop {
        // Probes fail while a navigation swaps the document; keep polling.
        if let Ok((ready, count)) = eval_json::<(String, usize)>(tab, LOAD_PROBE_JS) {
            match state {
                LoadState::DomContentLoaded if ready != "loading" => return Ok(()),
                LoadState::NetworkIdle if ready == "complete" => {
                    if last_count != Some(count) {
                        last_count = Some(count);
                        quiet_since = Instant::now();
                    } else if quiet_since.elapsed() >= QUIET_WINDOW {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
        if Instant::now() >= deadline {
            bail!("timed out after {timeout:?} waiting for {state:?}");
        }
        std::thread::sleep(POLL);
    }
}

fn capture_format(format: CaptureFormat) -> (CaptureScreenshotFormatOption, Option<u32>) {
    match format {
        CaptureFormat::Jpeg { quality } => {
            (CaptureScreenshotFormatOption::Jpeg, Some(u32::from(quality)))
        }
        CaptureFormat::Png => (CaptureScreenshotFormatOption::Png, None),
    }
}

// --- page ---

pub struct ChromePage {
    id: String,
    tab: Arc<Tab>,
    /// The browser's live tab list; a target missing from it is closed.
    tabs: Arc<Mutex<Vec<Arc<Tab>>>>,
    gone: AtomicBool,
    driver_closed: Arc<AtomicBool>,
    network_idle_timeout: Duration,
}

impl ChromePage {
    fn in_tab_list(&self) -> bool {
        lock(&self.tabs)
            .iter()
            .any(|t| t.get_target_id().as_str() == self.id)
    }

    async fn settle_network(&self) {
        let timeout = self.network_idle_timeout;
        if let Err(e) = blocking(&self.tab, move |tab| {
            wait_for_load_blocking(tab, LoadState::NetworkIdle, timeout)
        })
        .await
        {
            debug!(page = %self.id, error = %e, "Network not idle, continuing");
        }
    }

    async fn eval_query<T>(&self, selector: &Selector, body: &str) -> Result<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let script = query_script(selector, body);
        blocking(&self.tab, move |tab| eval_json(tab, &script))
            .await
            .with_context(|| format!("query failed for {selector}"))
    }
}

#[async_trait]
impl Page for ChromePage {
    fn id(&self) -> &str {
        &self.id
    }

    async fn is_closed(&self) -> bool {
        self.driver_closed.load(Ordering::SeqCst)
            || self.gone.load(Ordering::SeqCst)
            || !self.in_tab_list()
    }

    async fn url(&self) -> Result<String> {
        blocking(&self.tab, |tab| Ok(tab.get_url())).await
    }

    async fn title(&self) -> Result<String> {
        blocking(&self.tab, |tab| tab.get_title()).await
    }

    async fn goto(&self, url: &str) -> Result<()> {
        let target = url.to_string();
        blocking(&self.tab, move |tab| {
            tab.navigate_to(&target)?.wait_until_navigated()?;
            Ok(())
        })
        .await
        .with_context(|| format!("navigation to {url} failed"))?;
        self.settle_network().await;
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        blocking(&self.tab, |tab| {
            tab.reload(false, None)?.wait_until_navigated()?;
            Ok(())
        })
        .await?;
        self.settle_network().await;
        Ok(())
    }

    async fn wait_for_load(&self, state: LoadState, timeout: Duration) -> Result<()> {
        blocking(&self.tab, move |tab| wait_for_load_blocking(tab, state, timeout)).await
    }

    async fn wait_for_visible(&self, selector: &Selector, timeout: Duration) -> Result<()> {
        let script = query_script(selector, VISIBLE_JS);
        let shown = selector.to_string();
        blocking(&self.tab, move |tab| {
            let deadline = Instant::now() + timeout;
            loop {
                if matches!(eval_json::<bool>(tab, &script), Ok(true)) {
                    return Ok(());
                }
                if Instant::now() >= deadline {
                    bail!("timed out after {timeout:?} waiting for {shown} to be visible");
                }
                std::thread::sleep(POLL);
            }
        })
        .await
    }

    async fn count(&self, selector: &Selector) -> Result<usize> {
        self.eval_query(selector, COUNT_JS).await
    }

    async fn click(&self, selector: &Selector) -> Result<()> {
        let query = selector.query();
        blocking(&self.tab, move |tab| {
            let element = match &query {
                Query::XPath(expr) => tab.find_element_by_xpath(expr)?,
                Query::Css(expr) => tab.find_element(expr)?,
            };
            element.click()?;
            Ok(())
        })
        .await
        .with_context(|| format!("click failed for {selector}"))
    }

    async fn fill(&self, selector: &Selector, value: &str) -> Result<()> {
        let cleared: bool = self.eval_query(selector, CLEAR_JS).await?;
        if !cleared {
            bail!("no element for {selector}");
        }
        let query = selector.query();
        let text = value.to_string();
        blocking(&self.tab, move |tab| {
            let element = match &query {
                Query::XPath(expr) => tab.find_element_by_xpath(expr)?,
                Query::Css(expr) => tab.find_element(expr)?,
            };
            element.focus()?;
            tab.type_str(&text)?;
            Ok(())
        })
        .await
        .with_context(|| format!("typing failed for {selector}"))
    }

    async fn attribute(&self, selector: &Selector, name: &str) -> Result<Option<String>> {
        let script = attribute_script(selector, name);
        let probe: AttributeProbe = blocking(&self.tab, move |tab| eval_json(tab, &script)).await?;
        if !probe.found {
            bail!("no element for {selector}");
        }
        Ok(probe.value)
    }

    async fn text_content(&self, selector: &Selector) -> Result<Option<String>> {
        self.eval_query(selector, TEXT_JS).await
    }

    async fn inner_texts(&self, selector: &Selector) -> Result<Vec<String>> {
        self.eval_query(selector, INNER_TEXTS_JS).await
    }

    async fn content(&self) -> Result<String> {
        blocking(&self.tab, |tab| tab.get_content()).await
    }

    async fn frame_urls(&self) -> Result<Vec<String>> {
        blocking(&self.tab, |tab| eval_json(tab, FRAMES_JS)).await
    }

    async fn screenshot(&self, format: CaptureFormat) -> Result<Vec<u8>> {
        let (format, quality) = capture_format(format);
        blocking(&self.tab, move |tab| {
            let (width, height): (f64, f64) = eval_json(tab, PAGE_SIZE_JS)?;
            let clip = Viewport {
                x: 0.0,
                y: 0.0,
                width,
                height,
                scale: 1.0,
            };
            tab.capture_screenshot(format, quality, Some(clip), true)
        })
        .await
    }

    fn set_default_timeout(&self, timeout: Option<Duration>) {
        self.tab.set_default_timeout(timeout.unwrap_or(UNBOUNDED));
    }
}

// --- driver ---

/// Page handles keyed by target, so every caller sees the same `PageRef`
/// for a tab, plus the event channel that announces them.
struct Registry {
    tabs: Arc<Mutex<Vec<Arc<Tab>>>>,
    pages: Mutex<Vec<Arc<ChromePage>>>,
    events: broadcast::Sender<PageEvent>,
    closed: Arc<AtomicBool>,
    network_idle_timeout: Duration,
}

impl Registry {
    fn live_tabs(&self) -> Vec<Arc<Tab>> {
        lock(&self.tabs).clone()
    }

    fn adopt(&self, tab: Arc<Tab>, announce: bool) -> Arc<ChromePage> {
        let id = tab.get_target_id().to_string();
        let page = {
            let mut pages = lock(&self.pages);
            if let Some(existing) = pages.iter().find(|p| p.id == id) {
                return existing.clone();
            }
            let page = Arc::new(ChromePage {
                id,
                tab,
                tabs: self.tabs.clone(),
                gone: AtomicBool::new(false),
                driver_closed: self.closed.clone(),
                network_idle_timeout: self.network_idle_timeout,
            });
            pages.push(page.clone());
            page
        };
        if announce {
            debug!(page = %page.id, "Page created");
            let _ = self.events.send(PageEvent::Created(page.clone()));
        }
        page
    }

    /// Bring the registry in line with the browser's tab list.
    fn sync(&self) {
        let live = self.live_tabs();
        for tab in &live {
            self.adopt(tab.clone(), true);
        }

        let pages = lock(&self.pages).clone();
        for page in pages {
            let alive = live
                .iter()
                .any(|t| t.get_target_id().as_str() == page.id);
            if !alive && !page.gone.swap(true, Ordering::SeqCst) {
                debug!(page = %page.id, "Page closed");
                let _ = self.events.send(PageEvent::Closed(page.id.clone()));
            }
        }
    }

    fn open_pages(&self) -> Vec<PageRef> {
        lock(&self.pages)
            .iter()
            .filter(|p| !p.gone.load(Ordering::SeqCst) && p.in_tab_list())
            .map(|p| p.clone() as PageRef)
            .collect()
    }
}

pub struct ChromeDriver {
    browser: Arc<Browser>,
    registry: Arc<Registry>,
    /// Tabs present at launch, handed out before new ones are opened.
    initial: Mutex<Vec<Arc<ChromePage>>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl ChromeDriver {
    fn start(browser: Browser, network_idle_timeout: Duration) -> Self {
        let registry = Arc::new(Registry {
            tabs: browser.get_tabs().clone(),
            pages: Mutex::new(Vec::new()),
            events: broadcast::channel(64).0,
            closed: Arc::new(AtomicBool::new(false)),
            network_idle_timeout,
        });
        let initial = registry
            .live_tabs()
            .into_iter()
            .map(|tab| registry.adopt(tab, false))
            .collect();

        let watched = registry.clone();
        let watcher = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(WATCH_INTERVAL);
            loop {
                ticker.tick().await;
                if watched.closed.load(Ordering::SeqCst) {
                    break;
                }
                watched.sync();
            }
        });

        Self {
            browser: Arc::new(browser),
            registry,
            initial: Mutex::new(initial),
            watcher: Mutex::new(Some(watcher)),
        }
    }
}

#[async_trait]
impl Driver for ChromeDriver {
    async fn new_page(&self) -> Result<PageRef> {
        let unused = lock(&self.initial).pop();
        if let Some(page) = unused {
            return Ok(page);
        }
        let browser = self.browser.clone();
        let tab = tokio::task::spawn_blocking(move || browser.new_tab()).await??;
        Ok(self.registry.adopt(tab, true))
    }

    async fn pages(&self) -> Vec<PageRef> {
        self.registry.sync();
        self.registry.open_pages()
    }

    fn subscribe(&self) -> broadcast::Receiver<PageEvent> {
        self.registry.events.subscribe()
    }

    async fn close(&self) -> Result<()> {
        if self.registry.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(watcher) = lock(&self.watcher).take() {
            watcher.abort();
        }

        let tabs = self.registry.live_tabs();
        tokio::task::spawn_blocking(move || {
            for tab in tabs {
                if let Err(e) = tab.close(false) {
                    debug!(error = %e, "Tab did not close cleanly");
                }
            }
        })
        .await?;
        Ok(())
    }
}

impl Drop for ChromeDriver {
    fn drop(&mut self) {
        if let Some(watcher) = lock(&self.watcher).take() {
            watcher.abort();
        }
    }
}

/// Launches a fresh Chrome for every run.
#[derive(Debug, Clone, Default)]
pub struct ChromeLauncher {
    config: BrowserConfig,
}

impl ChromeLauncher {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }
}

fn launch_browser(config: &BrowserConfig) -> Result<Browser> {
    let user_agent = config
        .user_agent
        .as_ref()
        .map(|ua| format!("--user-agent={ua}"));
    let mut options = LaunchOptions::default_builder()
        .headless(config.headless)
        .sandbox(config.sandbox)
        .window_size(Some((config.window_width, config.window_height)))
        .path(config.chrome_path.clone())
        .idle_browser_timeout(config.idle_browser_timeout)
        .build()
        .map_err(|e| anyhow!("invalid launch options: {e}"))?;

    options.args.extend([
        OsStr::new("--no-first-run"),
        OsStr::new("--no-default-browser-check"),
        OsStr::new("--disable-dev-shm-usage"),
        OsStr::new("--disable-blink-features=AutomationControlled"),
    ]);
    if let Some(arg) = &user_agent {
        options.args.push(OsStr::new(arg));
    }

    Browser::new(options).map_err(|e| anyhow!("browser launch failed: {e}"))
}

#[async_trait]
impl Launcher for ChromeLauncher {
    async fn launch(&self) -> Result<DriverRef> {
        info!(
            headless = self.config.headless,
            width = self.config.window_width,
            height = self.config.window_height,
            "Launching browser"
        );
        let config = self.config.clone();
        let browser = tokio::task::spawn_blocking(move || launch_browser(&config))
            .await?
            .inspect_err(|e| warn!(error = %e, "Browser launch failed"))?;
        info!("Browser ready");
        Ok(Arc::new(ChromeDriver::start(
            browser,
            self.config.network_idle_timeout,
        )))
    }
}
