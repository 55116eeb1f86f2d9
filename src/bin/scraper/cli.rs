use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tabflow::{
    AccountPrefill, AccountPrefillAdapter, BrowserConfig, DomainAdapter, EngineConfig, Selector,
    SiteAdapter,
};

/// HTTP service that runs declarative browser action lists.
#[derive(Parser, Debug)]
#[command(name = "scraper", version, about)]
pub struct Cli {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// First port tried; the next nine are tried when it is taken.
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    #[arg(long, env = "SCREENSHOTS_DIR", default_value = "screenshots")]
    pub screenshots_dir: PathBuf,

    #[arg(long, env = "SCREENSHOT_QUALITY", default_value_t = 80)]
    pub screenshot_quality: u8,

    /// Default `maxAttempts` for `loopUntil`.
    #[arg(long, env = "MAX_LOOP_ATTEMPTS", default_value_t = 10)]
    pub max_loop_attempts: u32,

    #[arg(long, env = "HEADLESS", default_value_t = true, action = ArgAction::Set)]
    pub headless: bool,

    #[arg(long, env = "CHROME_PATH")]
    pub chrome_path: Option<PathBuf>,

    #[arg(long, env = "USER_AGENT")]
    pub user_agent: Option<String>,

    /// Domain fragments a popup URL must contain. Empty accepts any page.
    #[arg(long, env = "POPUP_DOMAINS", value_delimiter = ',')]
    pub popup_domains: Vec<String>,

    /// Fail `switchToPopup` instead of staying on the current page.
    #[arg(long, env = "REQUIRE_POPUP")]
    pub require_popup: bool,

    /// Record a screenshot for every unsatisfied `loopUntil` iteration.
    #[arg(long, env = "CAPTURE_LOOP_ITERATIONS")]
    pub capture_loop_iterations: bool,

    /// Account identifier typed when a sign-in form shows up instead of the
    /// account chooser. Enables click delegation.
    #[arg(long, env = "PREFILL_ACCOUNT")]
    pub prefill_account: Option<String>,

    #[arg(
        long,
        env = "PREFILL_LOGIN_MARKERS",
        value_delimiter = ',',
        default_value = "signin/identifier,ServiceLogin"
    )]
    pub prefill_login_markers: Vec<String>,

    #[arg(long, env = "PREFILL_INPUT", default_value = "//input[@type='email']")]
    pub prefill_input: String,

    #[arg(long, env = "PREFILL_SUBMIT", default_value = "//*[@id='identifierNext']")]
    pub prefill_submit: String,
}

impl Cli {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            screenshots_dir: self.screenshots_dir.clone(),
            screenshot_quality: self.screenshot_quality,
            max_loop_attempts: self.max_loop_attempts,
            require_popup: self.require_popup,
            capture_loop_iterations: self.capture_loop_iterations,
            delegate_clicks: self.prefill_account.is_some(),
            ..EngineConfig::default()
        }
    }

    pub fn browser_config(&self) -> BrowserConfig {
        let defaults = BrowserConfig::default();
        BrowserConfig {
            headless: self.headless,
            chrome_path: self.chrome_path.clone(),
            user_agent: self.user_agent.clone().or(defaults.user_agent.clone()),
            ..defaults
        }
    }

    pub fn adapter(&self) -> Arc<dyn SiteAdapter> {
        let domains = DomainAdapter::new(self.popup_domains.clone());
        match &self.prefill_account {
            Some(account) => Arc::new(AccountPrefillAdapter::new(
                domains,
                AccountPrefill {
                    account: account.clone(),
                    login_markers: self.prefill_login_markers.clone(),
                    input: Selector::xpath(&self.prefill_input),
                    submit: Selector::xpath(&self.prefill_submit),
                    pause: Duration::from_secs(1),
                },
            )),
            None => Arc::new(domains),
        }
    }
}
