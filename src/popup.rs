//! Finding the page a `switchToPopup` is meant to land on.
//!
//! Sites open popups late, open a blank tab first and navigate it afterwards,
//! or never open a tab at all and redirect in place. The resolver races the
//! page-created event stream against a poll tick until a deadline and only
//! degrades to "stay where we are" once every signal has come up empty.

use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep, sleep_until};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use crate::adapter::SiteAdapter;
use crate::config::EngineConfig;
use crate::driver::{LoadState, PageEvent, PageRef};
use crate::error::{EngineError, Result};
use crate::lifecycle;
use crate::session::Session;
use crate::types::BLANK_PAGE;

/// Event subscription and page count taken before the action that may open
/// the popup, so nothing that action triggers goes unseen.
pub struct PopupWatch {
    events: broadcast::Receiver<PageEvent>,
    baseline: usize,
}

impl PopupWatch {
    pub async fn arm(session: &Session) -> Self {
        let events = session.subscribe();
        let baseline = session.open_count().await;
        debug!(baseline, "Popup watch armed");
        Self { events, baseline }
    }

    pub fn baseline(&self) -> usize {
        self.baseline
    }
}

#[derive(Debug)]
pub enum PopupOutcome {
    /// A different page was accepted and stabilized.
    Switched(PageRef),
    /// The current page (or one of its frames) is already the target.
    InPlace,
    /// Nothing conclusive; the run continues on the current page.
    Stayed,
}

pub struct PopupResolver<'a> {
    session: &'a Session,
    adapter: &'a dyn SiteAdapter,
    config: &'a EngineConfig,
}

impl<'a> PopupResolver<'a> {
    pub fn new(session: &'a Session, adapter: &'a dyn SiteAdapter, config: &'a EngineConfig) -> Self {
        Self {
            session,
            adapter,
            config,
        }
    }

    pub async fn resolve(&self, current: &PageRef, watch: PopupWatch) -> Result<PopupOutcome> {
        let outcome = self.search(current, watch).await?;
        sleep(self.config.timings.popup_settle).await;
        Ok(outcome)
    }

    async fn search(&self, current: &PageRef, watch: PopupWatch) -> Result<PopupOutcome> {
        let timings = &self.config.timings;
        let PopupWatch { events, baseline } = watch;

        if let Some(page) = self.existing_target(current).await {
            info!(page = page.id(), "Popup already open");
            return Ok(self.accept(page).await);
        }

        sleep(timings.popup_initial_wait).await;

        let deadline = Instant::now() + timings.popup_budget;
        let mut ticker = interval(timings.popup_poll.max(std::time::Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut events = BroadcastStream::new(events);
        let mut listening = true;
        let mut created: Vec<PageRef> = Vec::new();

        loop {
            tokio::select! {
                _ = sleep_until(deadline) => break,
                event = events.next(), if listening => match event {
                    Some(Ok(PageEvent::Created(page))) => {
                        if page.id() != current.id() {
                            debug!(page = page.id(), "Page created during popup wait");
                            created.push(page);
                        }
                    }
                    Some(Ok(PageEvent::Closed(id))) => created.retain(|p| p.id() != id),
                    Some(Err(e)) => debug!(error = %e, "Popup event stream lagged"),
                    None => listening = false,
                },
                _ = ticker.tick() => {}
            }

            if let Some(page) = self.created_target(&created).await {
                info!(page = page.id(), "Popup detected by creation event");
                return Ok(self.accept(page).await);
            }
            if let Some(page) = self.counted_target(current, baseline).await {
                info!(page = page.id(), "Popup detected by page count");
                return Ok(self.accept(page).await);
            }
        }

        debug!("Popup wait budget exhausted, checking fallbacks");
        if self.in_place(current).await {
            info!("Target is the current page or one of its frames");
            return Ok(PopupOutcome::InPlace);
        }

        let open = self.session.open_pages().await;
        if open.len() > baseline {
            if let Some(page) = open.into_iter().rev().find(|p| p.id() != current.id()) {
                info!(page = page.id(), "Page count rose, switching to newest page");
                return Ok(self.accept(page).await);
            }
        }

        if self.config.require_popup {
            return Err(EngineError::PopupNotFound {
                waited_secs: timings.popup_budget.as_secs(),
            });
        }
        warn!("No popup found, continuing on the current page");
        Ok(PopupOutcome::Stayed)
    }

    /// An open page other than `current` whose URL already matches.
    async fn existing_target(&self, current: &PageRef) -> Option<PageRef> {
        for page in self.session.open_pages().await.into_iter().rev() {
            if page.id() == current.id() {
                continue;
            }
            if self.adapter.is_popup_target(&url_of(&page).await) {
                return Some(page);
            }
        }
        None
    }

    /// A page seen being created that has left the placeholder state.
    async fn created_target(&self, created: &[PageRef]) -> Option<PageRef> {
        for page in created {
            if page.is_closed().await {
                continue;
            }
            let url = url_of(page).await;
            if !url.is_empty() && url != BLANK_PAGE {
                return Some(page.clone());
            }
        }
        None
    }

    /// The newest non-blank matching page, when the page count rose.
    async fn counted_target(&self, current: &PageRef, baseline: usize) -> Option<PageRef> {
        let open = self.session.open_pages().await;
        if open.len() <= baseline {
            return None;
        }
        for page in open.into_iter().rev() {
            if page.id() == current.id() {
                continue;
            }
            let url = url_of(&page).await;
            if url.is_empty() || url == BLANK_PAGE {
                continue;
            }
            if self.adapter.is_popup_target(&url) {
                return Some(page);
            }
        }
        None
    }

    async fn in_place(&self, current: &PageRef) -> bool {
        if current.is_closed().await {
            return false;
        }
        if self.adapter.is_popup_target(&url_of(current).await) {
            return true;
        }
        match current.frame_urls().await {
            Ok(frames) => frames.iter().any(|url| self.adapter.is_popup_target(url)),
            Err(e) => {
                debug!(error = %e, "Could not list frames");
                false
            }
        }
    }

    /// Let the accepted page finish loading. Each wait is bounded and a
    /// timeout only costs the budget.
    async fn accept(&self, page: PageRef) -> PopupOutcome {
        let budget = self.config.timings.popup_stabilize;
        for state in [LoadState::DomContentLoaded, LoadState::NetworkIdle] {
            if let Err(e) = page.wait_for_load(state, budget).await {
                debug!(page = page.id(), ?state, error = %e, "Popup still loading, continuing");
            }
        }
        lifecycle::configure_timeouts(&page);
        PopupOutcome::Switched(page)
    }
}

async fn url_of(page: &PageRef) -> String {
    page.url().await.unwrap_or_default()
}
