//! The run loop: walks the action list, threads the current page between
//! handlers and turns the first unrecoverable error into a `RunFailure` that
//! carries every screenshot taken so far.

use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::adapter::{DomainAdapter, SiteAdapter};
use crate::config::EngineConfig;
use crate::driver::{CaptureFormat, Launcher, PageRef, Selector};
use crate::error::{EngineError, Result, RunFailure};
use crate::lifecycle::{configure_timeouts, ensure_active};
use crate::popup::{PopupOutcome, PopupResolver, PopupWatch};
use crate::recorder::{Ledger, Recorder, Step};
use crate::resolver::ElementResolver;
use crate::session::Session;
use crate::types::{Action, Extraction, RunOutcome, ScreenshotRecord};

const DEFAULT_SCREENSHOT_NAME: &str = "screenshot.png";

/// The value a `loopUntil` field has to reach.
pub trait LoopReference: Send + Sync {
    fn reference(&self) -> String;
}

/// Today's date in UTC, `YYYY-MM-DD`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Today;

impl LoopReference for Today {
    fn reference(&self) -> String {
        Utc::now().format("%Y-%m-%d").to_string()
    }
}

#[derive(Debug, Clone)]
pub struct FixedReference(pub String);

impl LoopReference for FixedReference {
    fn reference(&self) -> String {
        self.0.clone()
    }
}

/// Runs action lists, one fresh browser per run.
#[derive(Clone)]
pub struct Engine {
    config: EngineConfig,
    launcher: Arc<dyn Launcher>,
    adapter: Arc<dyn SiteAdapter>,
    reference: Arc<dyn LoopReference>,
    live: Option<broadcast::Sender<ScreenshotRecord>>,
}

impl Engine {
    pub fn new(launcher: Arc<dyn Launcher>, config: EngineConfig) -> Self {
        Self {
            config,
            launcher,
            adapter: Arc::new(DomainAdapter::default()),
            reference: Arc::new(Today),
            live: None,
        }
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn SiteAdapter>) -> Self {
        self.adapter = adapter;
        self
    }

    pub fn with_loop_reference(mut self, reference: Arc<dyn LoopReference>) -> Self {
        self.reference = reference;
        self
    }

    /// Publish every screenshot record on `live` as it is captured.
    pub fn with_live_feed(mut self, live: broadcast::Sender<ScreenshotRecord>) -> Self {
        self.live = Some(live);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Open `url` and run `actions` against it. The browser is closed before
    /// this returns, whatever the outcome.
    pub async fn run(&self, url: &str, actions: &[Action]) -> std::result::Result<RunOutcome, RunFailure> {
        info!(url, actions = actions.len(), "Starting run");

        let driver = self.launcher.launch().await.map_err(|e| {
            error!(error = %e, "Failed to launch browser");
            RunFailure::new(format!("Failed to launch browser: {e}"), Vec::new())
        })?;

        let session = match Session::open(driver.clone()).await {
            Ok(session) => session,
            Err(e) => {
                if let Err(close) = driver.close().await {
                    warn!(error = %close, "Failed to close browser");
                }
                return Err(RunFailure::new(
                    format!("Failed to open page: {e}"),
                    Vec::new(),
                ));
            }
        };

        let mut recorder = Recorder::new(&self.config.screenshots_dir, self.config.screenshot_quality);
        if let Some(live) = &self.live {
            recorder = recorder.with_live_feed(live.clone());
        }

        let run = Run {
            engine: self,
            session: &session,
            recorder: &recorder,
            ledger: Ledger::new(),
            extracted: Vec::new(),
            watch: None,
        };
        let result = run.execute(url, actions).await;
        session.close().await;

        match &result {
            Ok(outcome) => info!(screenshots = outcome.screenshots.len(), "Run completed"),
            Err(failure) => error!(
                message = %failure.message,
                screenshots = failure.screenshots.len(),
                "Run failed"
            ),
        }
        result
    }
}

/// State of one run. Dropped when the run ends.
struct Run<'a> {
    engine: &'a Engine,
    session: &'a Session,
    recorder: &'a Recorder,
    ledger: Ledger,
    extracted: Vec<Extraction>,
    /// Armed ahead of an action that is followed by `switchToPopup`.
    watch: Option<PopupWatch>,
}

impl Run<'_> {
    fn config(&self) -> &EngineConfig {
        &self.engine.config
    }

    fn resolver(&self) -> ElementResolver<'_> {
        ElementResolver::new(self.engine.adapter.as_ref(), &self.engine.config)
    }

    async fn execute(mut self, url: &str, actions: &[Action]) -> std::result::Result<RunOutcome, RunFailure> {
        let mut page = self.session.original().clone();

        if let Err(e) = page.goto(url).await {
            return Err(RunFailure::new(
                format!("Failed to open {url}: {e}"),
                self.ledger.into_records(),
            ));
        }
        self.recorder
            .record(&mut self.ledger, &page, Step::Initial)
            .await;

        let mut after_popup = false;
        for (i, action) in actions.iter().enumerate() {
            let index = i + 1;
            let next = actions.get(i + 1);
            info!(index, total = actions.len(), kind = action.kind(), "Executing action");

            match self.step(page.clone(), index, action, next, after_popup).await {
                Ok(current) => page = current,
                Err(e) => return Err(self.fail(&page, index, action, e).await),
            }

            self.recorder
                .record(&mut self.ledger, &page, Step::AfterAction { index, action })
                .await;
            after_popup = matches!(action, Action::SwitchToPopup);
        }

        let page = match ensure_active(self.session, &page).await {
            Ok(page) => page,
            Err(e) => {
                return Err(RunFailure::new(
                    format!("No page left after the last action: {e}"),
                    self.ledger.into_records(),
                ));
            }
        };
        self.recorder.record(&mut self.ledger, &page, Step::Final).await;

        let html = match page.content().await {
            Ok(html) => html,
            Err(e) => {
                return Err(RunFailure::new(
                    format!("Failed to read page content: {e}"),
                    self.ledger.into_records(),
                ));
            }
        };

        Ok(RunOutcome {
            success: true,
            message: "Actions executed successfully".to_string(),
            html,
            screenshots: self.ledger.into_records(),
            extracted: self.extracted,
        })
    }

    async fn fail(mut self, page: &PageRef, index: usize, action: &Action, e: EngineError) -> RunFailure {
        error!(index, kind = action.kind(), error = %e, "Action failed");
        let message = e.to_string();
        let target = ensure_active(self.session, page)
            .await
            .unwrap_or_else(|_| page.clone());
        self.recorder
            .record(
                &mut self.ledger,
                &target,
                Step::ActionError {
                    index,
                    action,
                    error: &message,
                },
            )
            .await;
        RunFailure::at_action(index, action.kind(), &e, self.ledger.into_records())
    }

    async fn step(
        &mut self,
        page: PageRef,
        index: usize,
        action: &Action,
        next: Option<&Action>,
        after_popup: bool,
    ) -> Result<PageRef> {
        if page.is_closed().await {
            return Err(EngineError::PreconditionFailed(format!(
                "page was closed before action {index} started"
            )));
        }
        if self.session.open_count().await == 0 {
            return Err(EngineError::PreconditionFailed(
                "no open page in the session".to_string(),
            ));
        }

        let timings = &self.engine.config.timings;
        if after_popup {
            debug!("Waiting for the popup to settle");
            sleep(timings.after_popup).await;
            if let Action::Click { xpath } = action {
                let selector = Selector::xpath(xpath);
                if let Err(e) = page.wait_for_visible(&selector, timings.after_popup_probe).await {
                    warn!(%selector, error = %e, "Element not visible after popup, trying anyway");
                }
            }
        }
        if action.mutates_page() {
            sleep(timings.settle).await;
        }
        if matches!(next, Some(Action::SwitchToPopup)) && self.watch.is_none() {
            self.watch = Some(PopupWatch::arm(self.session).await);
        }

        self.dispatch(page, index, action).await
    }

    async fn dispatch(&mut self, page: PageRef, index: usize, action: &Action) -> Result<PageRef> {
        let timings = self.engine.config.timings.clone();
        match action {
            Action::Goto { url } => {
                info!(%url, "Navigating");
                page.goto(url).await?;
                sleep(timings.after_navigation).await;
                ensure_active(self.session, &page).await
            }
            Action::Click { xpath } => {
                self.resolver().click(&page, &Selector::xpath(xpath)).await?;
                sleep(timings.after_click).await;
                ensure_active(self.session, &page).await
            }
            Action::Type { xpath, value } => {
                info!(%xpath, "Typing");
                self.resolver()
                    .fill(&page, &Selector::xpath(xpath), value)
                    .await?;
                Ok(page)
            }
            Action::Wait { seconds } => self.wait(page, *seconds).await,
            Action::SwitchToPopup => self.switch_to_popup(page).await,
            Action::SwitchToMain => {
                let original = self.session.original().clone();
                if original.is_closed().await {
                    return Err(EngineError::MainPageClosed);
                }
                configure_timeouts(&original);
                info!(page = original.id(), "Back on the main page");
                Ok(original)
            }
            Action::LoopUntil {
                xpath,
                actions_if_true,
                max_attempts,
            } => {
                let attempts = max_attempts
                    .unwrap_or(self.config().max_loop_attempts)
                    .max(1);
                self.loop_until(page, index, action, xpath, actions_if_true, attempts)
                    .await
            }
            Action::Screenshot { path } => {
                self.screenshot(&page, path.as_deref()).await?;
                Ok(page)
            }
            Action::ExtractText { xpath } => {
                let content = page.text_content(&Selector::xpath(xpath)).await?;
                info!(%xpath, found = content.is_some(), "Extracted text");
                self.extracted.push(Extraction {
                    index,
                    selector: xpath.clone(),
                    content,
                });
                Ok(page)
            }
            Action::Unknown => {
                warn!(index, "Unknown action type, skipping");
                Ok(page)
            }
        }
    }

    /// A page closing during the wait is fine; one closed before it starts
    /// is not.
    async fn wait(&self, page: PageRef, seconds: f64) -> Result<PageRef> {
        if page.is_closed().await {
            return Err(EngineError::PageClosed);
        }
        let duration = Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO);
        info!(seconds, "Waiting");
        sleep(duration).await;
        ensure_active(self.session, &page).await
    }

    async fn switch_to_popup(&mut self, page: PageRef) -> Result<PageRef> {
        let watch = match self.watch.take() {
            Some(watch) => watch,
            None => PopupWatch::arm(self.session).await,
        };
        let resolver = PopupResolver::new(self.session, self.engine.adapter.as_ref(), &self.engine.config);
        match resolver.resolve(&page, watch).await? {
            PopupOutcome::Switched(popup) => {
                info!(page = popup.id(), "Switched to popup");
                Ok(popup)
            }
            PopupOutcome::InPlace | PopupOutcome::Stayed => ensure_active(self.session, &page).await,
        }
    }

    async fn screenshot(&self, page: &PageRef, path: Option<&str>) -> Result<()> {
        let name = path
            .and_then(|p| Path::new(p).file_name())
            .and_then(|n| n.to_str())
            .unwrap_or(DEFAULT_SCREENSHOT_NAME);
        let bytes = page
            .screenshot(CaptureFormat::for_path(name, self.config().screenshot_quality))
            .await?;

        let dir = self.recorder.dir();
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(dir.join(name), &bytes).await?;
        info!(file = name, "Screenshot written");
        Ok(())
    }

    async fn loop_until(
        &mut self,
        mut page: PageRef,
        index: usize,
        action: &Action,
        xpath: &str,
        sub_actions: &[Action],
        attempts: u32,
    ) -> Result<PageRef> {
        let reference = self.engine.reference.reference();
        let selector = Selector::xpath(xpath);
        let mut last_error = None;
        info!(xpath, %reference, attempts, "Looping until value reaches reference");

        for iteration in 1..=attempts {
            match page.attribute(&selector, "value").await {
                Ok(Some(value)) if value.as_str() >= reference.as_str() => {
                    info!(iteration, %value, "Loop condition met");
                    return Ok(page);
                }
                Ok(value) => debug!(iteration, ?value, "Loop condition not met"),
                Err(e) => {
                    debug!(iteration, error = %e, "Loop field not readable");
                    last_error = Some(e.to_string());
                }
            }

            if self.config().capture_loop_iterations {
                self.recorder
                    .record(
                        &mut self.ledger,
                        &page,
                        Step::LoopIteration {
                            index,
                            action,
                            iteration,
                        },
                    )
                    .await;
            }

            for sub in sub_actions {
                match self.sub_action(&page, sub).await {
                    Ok(current) => page = current,
                    Err(EngineError::NoActivePage) => return Err(EngineError::NoActivePage),
                    Err(e) => {
                        warn!(iteration, kind = sub.kind(), error = %e, "Loop sub-action failed");
                        last_error = Some(e.to_string());
                        break;
                    }
                }
            }

            page = ensure_active(self.session, &page).await?;
            sleep(self.config().timings.loop_settle).await;
        }

        Err(EngineError::LoopExceeded {
            selector: xpath.to_string(),
            attempts,
            last_error,
        })
    }

    /// Loop bodies run without the outer retry machinery.
    async fn sub_action(&self, page: &PageRef, action: &Action) -> Result<PageRef> {
        match action {
            Action::Click { xpath } => {
                self.resolver()
                    .click_once(page, &Selector::xpath(xpath))
                    .await?;
                ensure_active(self.session, page).await
            }
            Action::Type { xpath, value } => {
                self.resolver()
                    .fill(page, &Selector::xpath(xpath), value)
                    .await?;
                Ok(page.clone())
            }
            Action::Wait { seconds } => {
                sleep(Duration::try_from_secs_f64(*seconds).unwrap_or(Duration::ZERO)).await;
                ensure_active(self.session, page).await
            }
            other => {
                warn!(kind = other.kind(), "Action not allowed inside a loop, skipping");
                Ok(page.clone())
            }
        }
    }
}
