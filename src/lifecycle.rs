//! Tracks which page is current when the site closes or replaces tabs under us.

use tracing::{debug, info};

use crate::driver::PageRef;
use crate::error::{EngineError, Result};
use crate::session::Session;

/// Return `page` if it is still open, otherwise the most recently created
/// open page of the session.
pub async fn ensure_active(session: &Session, page: &PageRef) -> Result<PageRef> {
    if !page.is_closed().await {
        return Ok(page.clone());
    }

    debug!(page = page.id(), "Current page closed, looking for an active page");
    let replacement = session
        .open_pages()
        .await
        .pop()
        .ok_or(EngineError::NoActivePage)?;

    configure_timeouts(&replacement);
    info!(from = page.id(), to = replacement.id(), "Switched to active page");
    Ok(replacement)
}

/// Lift driver-level timeouts. Bounded waits are enforced by the handlers'
/// own attempt counters so a driver timeout never cuts a recovery sequence
/// short.
pub fn configure_timeouts(page: &PageRef) {
    page.set_default_timeout(None);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBrowser;

    #[tokio::test]
    async fn open_page_is_returned_unchanged_every_time() {
        let browser = FakeBrowser::new();
        let session = Session::open(browser.clone()).await.unwrap();
        let page = session.original().clone();

        let first = ensure_active(&session, &page).await.unwrap();
        let second = ensure_active(&session, &first).await.unwrap();

        assert_eq!(first.id(), page.id());
        assert_eq!(second.id(), page.id());
    }

    #[tokio::test]
    async fn closed_page_falls_back_to_newest_open_page() {
        let browser = FakeBrowser::new();
        let session = Session::open(browser.clone()).await.unwrap();
        let middle = browser.open_page("https://example.test/a");
        let newest = browser.open_page("https://example.test/b");
        browser.close_page(session.original().id());

        let active = ensure_active(&session, session.original()).await.unwrap();
        assert_eq!(active.id(), newest.id());
        assert_ne!(active.id(), middle.id());
        assert!(browser.fake_page(newest.id()).timeouts_lifted());
    }

    #[tokio::test]
    async fn no_open_page_is_fatal() {
        let browser = FakeBrowser::new();
        let session = Session::open(browser.clone()).await.unwrap();
        let page: PageRef = session.original().clone();
        browser.close_page(page.id());

        let err = ensure_active(&session, &page).await.unwrap_err();
        assert!(matches!(err, EngineError::NoActivePage));
    }
}
