//! Configuration management with serde serialization/deserialization
//!
//! This module provides all configuration structures for the resolver,
//! including browser settings, site API constants and the login credentials.

use crate::ResolveError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const USERNAME_ENV: &str = "MEDIA_RESOLVER_USERNAME";
pub const PASSWORD_ENV: &str = "MEDIA_RESOLVER_PASSWORD";
pub const VERIFICATION_CODE_ENV: &str = "MEDIA_RESOLVER_VERIFICATION_CODE";

/// Main configuration structure for the resolver
///
/// # Examples
///
/// ```rust
/// use media_resolver::Config;
///
/// let config = Config {
///     concurrency: 8,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Maximum number of links resolved at the same time (default: 4)
    ///
    /// Each in-flight link holds one open tab on the shared browser.
    pub concurrency: usize,

    /// Upper bound for resolving a single link, page load included (default: 60 seconds)
    pub link_timeout: Duration,

    /// Extra wait after the load event before the page data is read (default: 500ms)
    pub navigation_settle: Duration,

    /// Site the links belong to
    pub site: SiteConfig,

    /// Browser launch settings
    pub browser: BrowserSettings,

    /// Serve Prometheus metrics on this port (default: disabled)
    pub metrics_port: Option<u16>,

    /// Login credentials, normally supplied through the environment
    #[serde(skip_serializing)]
    pub credentials: Option<Credentials>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrency: 4,
            link_timeout: Duration::from_secs(60),
            navigation_settle: Duration::from_millis(500),
            site: SiteConfig::default(),
            browser: BrowserSettings::default(),
            metrics_port: None,
            credentials: None,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ResolveError> {
        if self.concurrency == 0 {
            return Err(ResolveError::ConfigurationError(
                "Concurrency must be greater than 0".to_string(),
            ));
        }

        if self.link_timeout.is_zero() {
            return Err(ResolveError::ConfigurationError(
                "Link timeout must be greater than 0".to_string(),
            ));
        }

        let domain = url::Url::parse(&self.site.domain).map_err(|e| {
            ResolveError::ConfigurationError(format!("Invalid site domain {}: {e}", self.site.domain))
        })?;
        if !matches!(domain.scheme(), "http" | "https") {
            return Err(ResolveError::ConfigurationError(format!(
                "Site domain must be http(s): {}",
                self.site.domain
            )));
        }

        if self.site.app_id.is_empty() || self.site.asbd_id.is_empty() {
            return Err(ResolveError::ConfigurationError(
                "Site app id and asbd id must be set".to_string(),
            ));
        }

        if self.metrics_port == Some(0) {
            return Err(ResolveError::ConfigurationError(
                "Metrics port must be greater than 0".to_string(),
            ));
        }

        if self.browser.window.0 == 0 || self.browser.window.1 == 0 {
            return Err(ResolveError::ConfigurationError(
                "Window dimensions must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Fills in credentials from the environment when none were configured.
    pub fn with_env_credentials(mut self) -> Self {
        if self.credentials.is_none() {
            self.credentials = Credentials::from_env();
        }
        self
    }
}

/// Site endpoints and the fixed API headers sent with every in-page fetch
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Scheme and host without trailing slash (default: https://www.instagram.com)
    pub domain: String,

    /// Value of the `x-ig-app-id` header
    pub app_id: String,

    /// Value of the `x-asbd-id` header
    pub asbd_id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            domain: "https://www.instagram.com".to_string(),
            app_id: "936619743392459".to_string(),
            asbd_id: "129477".to_string(),
        }
    }
}

impl SiteConfig {
    /// Joins a site-relative path onto the domain.
    pub fn absolute(&self, path: &str) -> String {
        format!("{}{}", self.domain.trim_end_matches('/'), path)
    }

    pub fn media_info_url(&self, media_id: &str) -> String {
        self.absolute(&format!("/api/v1/media/{media_id}/info/"))
    }

    pub fn reels_media_url(&self, user_id: &str) -> String {
        self.absolute(&format!("/api/v1/feed/reels_media/?reel_ids={user_id}"))
    }

    pub fn login_url(&self) -> String {
        self.absolute("/accounts/login/")
    }
}

/// Browser launch settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrowserSettings {
    /// Path to Chrome/Chromium executable (default: auto-detect)
    pub chrome_path: Option<String>,

    /// Run without a visible window (default: true)
    pub headless: bool,

    /// Custom User-Agent string (default: Chrome default)
    pub user_agent: Option<String>,

    /// Profile directory; keeping it between runs keeps the login cookies
    pub user_data_dir: Option<PathBuf>,

    /// Window size in pixels (default: 1280x900)
    pub window: (u32, u32),
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: true,
            user_agent: None,
            user_data_dir: None,
            window: (1280, 900),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// Verification code known up front, skips the interactive prompt
    #[serde(default)]
    pub verification_code: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Option<Self> {
        let username = std::env::var(USERNAME_ENV).ok()?;
        let password = std::env::var(PASSWORD_ENV).ok()?;

        Some(Self {
            username,
            password,
            verification_code: std::env::var(VERIFICATION_CODE_ENV).ok(),
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Chrome command-line arguments for the session browser
pub fn get_chrome_args(config: &Config) -> Vec<String> {
    let mut args = vec![
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        "--disable-features=TranslateUI".to_string(),
        "--disable-extensions".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-sync".to_string(),
        "--no-first-run".to_string(),
        format!(
            "--window-size={},{}",
            config.browser.window.0, config.browser.window.1
        ),
    ];

    if let Some(user_agent) = &config.browser.user_agent {
        args.push(format!("--user-agent={user_agent}"));
    }

    args
}

pub fn create_browser_config(
    config: &Config,
) -> Result<chromiumoxide::browser::BrowserConfig, ResolveError> {
    use chromiumoxide::browser::BrowserConfig;

    let mut builder = BrowserConfig::builder()
        .window_size(config.browser.window.0, config.browser.window.1)
        .args(get_chrome_args(config));

    if !config.browser.headless {
        builder = builder.with_head();
    }

    if let Some(chrome_path) = &config.browser.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }

    if let Some(dir) = &config.browser.user_data_dir {
        builder = builder.user_data_dir(dir);
    }

    builder.build().map_err(ResolveError::BrowserLaunchFailed)
}
