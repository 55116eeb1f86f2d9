//! Engine tuning knobs. Defaults match the production values; tests shrink the
//! timings so the state machine can be driven in milliseconds.

use std::path::PathBuf;
use std::time::Duration;

/// Fixed waits and bounded-wait budgets used by the handlers.
#[derive(Debug, Clone)]
pub struct Timings {
    /// Pause before dispatching `goto` and `click`.
    pub settle: Duration,
    /// Pause after a `goto` before re-asserting an active page.
    pub after_navigation: Duration,
    /// Pause after a click before re-asserting an active page.
    pub after_click: Duration,
    /// Pause before each click attempt starts looking for the element.
    pub before_locate: Duration,
    /// How long a click attempt waits for its element to become visible.
    pub element_visible: Duration,
    /// Pause between visibility and the click itself.
    pub before_click: Duration,
    /// Pause between a failed click attempt and the reload.
    pub retry_pause: Duration,
    /// Pause after the recovery reload.
    pub after_reload: Duration,
    /// Visibility budget for `type` and for loop sub-actions.
    pub field_visible: Duration,
    /// Settle between `loopUntil` iterations.
    pub loop_settle: Duration,
    /// Pause before the popup search starts polling.
    pub popup_initial_wait: Duration,
    pub popup_poll: Duration,
    pub popup_budget: Duration,
    /// Bound for each stabilization wait on an accepted popup.
    pub popup_stabilize: Duration,
    /// Pause after the popup search finishes, whatever it found.
    pub popup_settle: Duration,
    /// Extra pause for the action following a `switchToPopup`.
    pub after_popup: Duration,
    /// Visibility probe budget for a click following a `switchToPopup`.
    pub after_popup_probe: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(500),
            after_navigation: Duration::from_secs(2),
            after_click: Duration::from_secs(2),
            before_locate: Duration::from_secs(2),
            element_visible: Duration::from_secs(30),
            before_click: Duration::from_secs(1),
            retry_pause: Duration::from_secs(3),
            after_reload: Duration::from_secs(2),
            field_visible: Duration::from_secs(10),
            loop_settle: Duration::from_secs(3),
            popup_initial_wait: Duration::from_secs(3),
            popup_poll: Duration::from_secs(1),
            popup_budget: Duration::from_secs(60),
            popup_stabilize: Duration::from_secs(15),
            popup_settle: Duration::from_secs(3),
            after_popup: Duration::from_secs(8),
            after_popup_probe: Duration::from_secs(15),
        }
    }
}

impl Timings {
    /// Every fixed pause zeroed and every budget cut to a few milliseconds.
    pub fn immediate() -> Self {
        Self {
            settle: Duration::ZERO,
            after_navigation: Duration::ZERO,
            after_click: Duration::ZERO,
            before_locate: Duration::ZERO,
            element_visible: Duration::from_millis(5),
            before_click: Duration::ZERO,
            retry_pause: Duration::ZERO,
            after_reload: Duration::ZERO,
            field_visible: Duration::from_millis(5),
            loop_settle: Duration::ZERO,
            popup_initial_wait: Duration::ZERO,
            popup_poll: Duration::from_millis(5),
            popup_budget: Duration::from_millis(50),
            popup_stabilize: Duration::from_millis(5),
            popup_settle: Duration::ZERO,
            after_popup: Duration::ZERO,
            after_popup_probe: Duration::from_millis(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Where debug screenshots are written.
    pub screenshots_dir: PathBuf,
    /// JPEG quality for ledger screenshots.
    pub screenshot_quality: u8,
    /// Default `maxAttempts` for `loopUntil`.
    pub max_loop_attempts: u32,
    /// Outer click attempts before giving up.
    pub click_attempts: u32,
    /// Raise `PopupNotFound` instead of staying on the current page.
    pub require_popup: bool,
    /// Record one ledger entry per unsatisfied `loopUntil` iteration.
    pub capture_loop_iterations: bool,
    /// Let the site adapter handle clicks before the generic strategy runs.
    pub delegate_clicks: bool,
    /// Upper bound on containers scanned by the last click fallback.
    pub container_scan_limit: usize,
    pub timings: Timings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            screenshots_dir: PathBuf::from("screenshots"),
            screenshot_quality: 80,
            max_loop_attempts: 10,
            click_attempts: 3,
            require_popup: false,
            capture_loop_iterations: false,
            delegate_clicks: false,
            container_scan_limit: 500,
            timings: Timings::default(),
        }
    }
}
