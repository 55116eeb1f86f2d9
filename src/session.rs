use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::driver::{DriverRef, PageEvent, PageRef};
use crate::error::Result;
use crate::lifecycle;

/// The browser, its browsing context and the pages of one run.
///
/// Only the session opens or closes pages; everything else queries it and
/// switches attention among the pages it already has.
pub struct Session {
    driver: DriverRef,
    original: PageRef,
}

impl Session {
    /// Open the main tab on a freshly launched driver.
    pub async fn open(driver: DriverRef) -> Result<Self> {
        let original = driver.new_page().await?;
        lifecycle::configure_timeouts(&original);
        info!(page = original.id(), "Session opened");
        Ok(Self { driver, original })
    }

    /// The first page of the run, the "main" tab.
    pub fn original(&self) -> &PageRef {
        &self.original
    }

    pub async fn pages(&self) -> Vec<PageRef> {
        self.driver.pages().await
    }

    /// Open pages only, in creation order.
    pub async fn open_pages(&self) -> Vec<PageRef> {
        let mut open = Vec::new();
        for page in self.driver.pages().await {
            if !page.is_closed().await {
                open.push(page);
            }
        }
        open
    }

    pub async fn open_count(&self) -> usize {
        self.open_pages().await.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PageEvent> {
        self.driver.subscribe()
    }

    /// Tear the browser down. Failures are logged, never raised, so a failed
    /// run can still hand back its ledger.
    pub async fn close(&self) {
        debug!("Closing browser");
        match self.driver.close().await {
            Ok(()) => info!("Browser closed"),
            Err(e) => warn!(error = %e, "Failed to close browser"),
        }
    }
}
