//! Scripted in-memory browser for exercising the engine without Chrome.

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::driver::{
    CaptureFormat, Driver, DriverRef, Launcher, LoadState, Page, PageEvent, PageRef, Selector,
};
use crate::types::BLANK_PAGE;

type PageHook = Arc<dyn Fn(&FakePage) + Send + Sync>;

/// What happens when an element is clicked or filled.
#[derive(Clone)]
pub enum ClickEffect {
    /// Open a new page at `url` after `delay`.
    OpenPopup { url: String, delay: Duration },
    /// The page closes itself, as `window.close()` would.
    CloseSelf,
    Navigate(String),
    Run(PageHook),
}

#[derive(Clone)]
pub struct FakeElement {
    pub xpath: String,
    pub tag: String,
    pub text: String,
    /// Rendered text including descendants, when it differs from `text`.
    pub nested_text: Option<String>,
    pub value: Option<String>,
    pub visible: bool,
    pub on_click: Option<ClickEffect>,
    pub on_fill: Option<ClickEffect>,
}

impl FakeElement {
    pub fn new(xpath: &str) -> Self {
        Self {
            xpath: xpath.to_string(),
            tag: "div".to_string(),
            text: String::new(),
            nested_text: None,
            value: None,
            visible: true,
            on_click: None,
            on_fill: None,
        }
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.tag = tag.to_string();
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn nested_text(mut self, text: &str) -> Self {
        self.nested_text = Some(text.to_string());
        self
    }

    pub fn value(mut self, value: &str) -> Self {
        self.value = Some(value.to_string());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn on_click(mut self, effect: ClickEffect) -> Self {
        self.on_click = Some(effect);
        self
    }

    pub fn on_fill(mut self, effect: ClickEffect) -> Self {
        self.on_fill = Some(effect);
        self
    }
}

#[derive(Clone, Default)]
struct Route {
    html: String,
    elements: Vec<FakeElement>,
}

#[derive(Default)]
struct PageState {
    url: String,
    html: String,
    elements: Vec<FakeElement>,
    frames: Vec<String>,
    reloads: usize,
    visibility_waits: usize,
    clicks: Vec<String>,
    fills: Vec<(String, String)>,
    timeouts_lifted: bool,
}

pub struct FakePage {
    id: String,
    closed: AtomicBool,
    browser: Weak<FakeBrowser>,
    state: Mutex<PageState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl FakePage {
    fn state(&self) -> MutexGuard<'_, PageState> {
        lock(&self.state)
    }

    fn load(&self, url: &str) {
        let route = self
            .browser
            .upgrade()
            .and_then(|b| lock(&b.routes).get(url).cloned())
            .unwrap_or_else(|| Route {
                html: format!("<html><body><p>{url}</p></body></html>"),
                elements: Vec::new(),
            });
        let mut state = self.state();
        state.url = url.to_string();
        state.html = route.html;
        state.elements = route.elements;
    }

    fn matching(&self, selector: &Selector) -> Vec<FakeElement> {
        let state = self.state();
        match selector {
            Selector::XPath(expr) => {
                if let Some((base, nth)) = indexed(expr) {
                    let all = matches_xpath(&state.elements, base);
                    return all.into_iter().skip(nth - 1).take(1).collect();
                }
                matches_xpath(&state.elements, expr)
            }
            Selector::Css(expr) => state
                .elements
                .iter()
                .filter(|e| &e.xpath == expr)
                .cloned()
                .collect(),
            Selector::Text(text) => state
                .elements
                .iter()
                .filter(|e| e.text.contains(text.as_str()))
                .cloned()
                .collect(),
        }
    }

    pub fn add_element(&self, element: FakeElement) {
        self.state().elements.push(element);
    }

    pub fn set_value(&self, xpath: &str, value: &str) {
        for element in self.state().elements.iter_mut() {
            if element.xpath == xpath {
                element.value = Some(value.to_string());
            }
        }
    }

    pub fn value_of(&self, xpath: &str) -> Option<String> {
        self.state()
            .elements
            .iter()
            .find(|e| e.xpath == xpath)
            .and_then(|e| e.value.clone())
    }

    pub fn set_url(&self, url: &str) {
        self.state().url = url.to_string();
    }

    pub fn add_frame(&self, url: &str) {
        self.state().frames.push(url.to_string());
    }

    pub fn reloads(&self) -> usize {
        self.state().reloads
    }

    pub fn visibility_waits(&self) -> usize {
        self.state().visibility_waits
    }

    pub fn clicks(&self) -> Vec<String> {
        self.state().clicks.clone()
    }

    pub fn fills(&self) -> Vec<(String, String)> {
        self.state().fills.clone()
    }

    pub fn timeouts_lifted(&self) -> bool {
        self.state().timeouts_lifted
    }

    fn apply(&self, effect: ClickEffect) {
        let Some(browser) = self.browser.upgrade() else {
            return;
        };
        match effect {
            ClickEffect::OpenPopup { url, delay } => {
                if delay.is_zero() {
                    browser.open_page(&url);
                } else {
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        browser.open_page(&url);
                    });
                }
            }
            ClickEffect::CloseSelf => browser.close_page(&self.id),
            ClickEffect::Navigate(url) => self.load(&url),
            ClickEffect::Run(hook) => hook(self),
        }
    }
}

fn indexed(expr: &str) -> Option<(&str, usize)> {
    let inner = expr.strip_prefix('(')?;
    let (base, rest) = inner.split_once(")[")?;
    let nth = rest.strip_suffix(']')?.parse().ok()?;
    Some((base, nth))
}

fn matches_xpath(elements: &[FakeElement], expr: &str) -> Vec<FakeElement> {
    elements
        .iter()
        .filter(|e| e.xpath == expr || expr == format!("//{}", e.tag))
        .cloned()
        .collect()
}

#[async_trait]
impl Page for FakePage {
    fn id(&self) -> &str {
        &self.id
    }

    async fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn url(&self) -> Result<String> {
        Ok(self.state().url.clone())
    }

    async fn title(&self) -> Result<String> {
        Ok(format!("Fake {}", self.state().url))
    }

    async fn goto(&self, url: &str) -> Result<()> {
        if self.is_closed().await {
            bail!("page closed");
        }
        self.load(url);
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        let url = {
            let mut state = self.state();
            state.reloads += 1;
            state.url.clone()
        };
        let has_route = self
            .browser
            .upgrade()
            .is_some_and(|b| lock(&b.routes).contains_key(&url));
        if has_route {
            self.load(&url);
        }
        Ok(())
    }

    async fn wait_for_load(&self, _state: LoadState, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn wait_for_visible(&self, selector: &Selector, _timeout: Duration) -> Result<()> {
        self.state().visibility_waits += 1;
        if self.matching(selector).iter().any(|e| e.visible) {
            Ok(())
        } else {
            Err(anyhow!("timed out waiting for {selector}"))
        }
    }

    async fn count(&self, selector: &Selector) -> Result<usize> {
        Ok(self.matching(selector).len())
    }

    async fn click(&self, selector: &Selector) -> Result<()> {
        let element = self
            .matching(selector)
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no element for {selector}"))?;
        self.state().clicks.push(element.xpath.clone());
        if let Some(effect) = element.on_click {
            self.apply(effect);
        }
        Ok(())
    }

    async fn fill(&self, selector: &Selector, value: &str) -> Result<()> {
        let element = self
            .matching(selector)
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no element for {selector}"))?;
        self.set_value(&element.xpath, value);
        self.state()
            .fills
            .push((element.xpath.clone(), value.to_string()));
        if let Some(effect) = element.on_fill {
            self.apply(effect);
        }
        Ok(())
    }

    async fn attribute(&self, selector: &Selector, name: &str) -> Result<Option<String>> {
        let element = self
            .matching(selector)
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no element for {selector}"))?;
        Ok(if name == "value" { element.value } else { None })
    }

    async fn text_content(&self, selector: &Selector) -> Result<Option<String>> {
        Ok(self.matching(selector).into_iter().next().map(|e| e.text))
    }

    async fn inner_texts(&self, selector: &Selector) -> Result<Vec<String>> {
        Ok(self
            .matching(selector)
            .into_iter()
            .map(|e| e.nested_text.unwrap_or(e.text))
            .collect())
    }

    async fn content(&self) -> Result<String> {
        Ok(self.state().html.clone())
    }

    async fn frame_urls(&self) -> Result<Vec<String>> {
        Ok(self.state().frames.clone())
    }

    async fn screenshot(&self, _format: CaptureFormat) -> Result<Vec<u8>> {
        if self.is_closed().await {
            bail!("page closed");
        }
        Ok(b"fake-image".to_vec())
    }

    fn set_default_timeout(&self, timeout: Option<Duration>) {
        self.state().timeouts_lifted = timeout.is_none();
    }
}

pub struct FakeBrowser {
    me: Weak<FakeBrowser>,
    pages: Mutex<Vec<Arc<FakePage>>>,
    routes: Mutex<HashMap<String, Route>>,
    events: broadcast::Sender<PageEvent>,
    next_id: AtomicUsize,
    closed: AtomicBool,
}

impl FakeBrowser {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            pages: Mutex::new(Vec::new()),
            routes: Mutex::new(HashMap::new()),
            events: broadcast::channel(64).0,
            next_id: AtomicUsize::new(1),
            closed: AtomicBool::new(false),
        })
    }

    /// Serve `html` and `elements` whenever a page navigates to `url`.
    pub fn route(&self, url: &str, html: &str, elements: Vec<FakeElement>) {
        lock(&self.routes).insert(
            url.to_string(),
            Route {
                html: html.to_string(),
                elements,
            },
        );
    }

    /// A page the site opened on its own.
    pub fn open_page(&self, url: &str) -> PageRef {
        let id = format!("page-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let page = Arc::new(FakePage {
            id,
            closed: AtomicBool::new(false),
            browser: self.me.clone(),
            state: Mutex::new(PageState::default()),
        });
        if url == BLANK_PAGE {
            page.state().url = BLANK_PAGE.to_string();
        } else {
            page.load(url);
        }
        lock(&self.pages).push(page.clone());
        let page: PageRef = page;
        let _ = self.events.send(PageEvent::Created(page.clone()));
        page
    }

    pub fn close_page(&self, id: &str) {
        if let Some(page) = lock(&self.pages).iter().find(|p| p.id == id) {
            page.closed.store(true, Ordering::SeqCst);
        }
        let _ = self.events.send(PageEvent::Closed(id.to_string()));
    }

    pub fn fake_page(&self, id: &str) -> Arc<FakePage> {
        lock(&self.pages)
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .unwrap_or_else(|| panic!("no fake page {id}"))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Driver for FakeBrowser {
    async fn new_page(&self) -> Result<PageRef> {
        Ok(self.open_page(BLANK_PAGE))
    }

    async fn pages(&self) -> Vec<PageRef> {
        lock(&self.pages)
            .iter()
            .filter(|p| !p.closed.load(Ordering::SeqCst))
            .map(|p| p.clone() as PageRef)
            .collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<PageEvent> {
        self.events.subscribe()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        for page in lock(&self.pages).iter() {
            page.closed.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Hands out the same prepared browser on every launch.
pub struct FakeLauncher(pub Arc<FakeBrowser>);

#[async_trait]
impl Launcher for FakeLauncher {
    async fn launch(&self) -> Result<DriverRef> {
        Ok(self.0.clone())
    }
}
