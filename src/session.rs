//! Authenticated browser session and per-link pages
//!
//! The resolver only talks to the [`Session`] and [`PageContext`] traits. The
//! production implementation drives a single headless Chrome instance through
//! chromiumoxide; every link gets its own tab on the shared, already logged in
//! browser.

use crate::scripts::{fetch_json_script, FetchEnvelope, SCRIPT_PAYLOADS_SCRIPT};
use crate::{create_browser_config, Config, ResolveError};
use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Ordered request headers for an in-page fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    headers: Vec<(String, String)>,
}

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), Value::String(value.clone())))
            .collect();
        Value::Object(map)
    }
}

/// An isolated page bound to the authenticated session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PageContext: Send + Sync {
    /// Navigates to `url`, returning once the page has finished loading.
    async fn navigate(&self, url: &str) -> Result<(), ResolveError>;

    /// Embedded JSON script payloads of the loaded page, in document order.
    async fn script_payloads(&self) -> Result<Vec<Value>, ResolveError>;

    /// GET from inside the page's security context, parsed as JSON.
    async fn fetch_json(&self, url: &str, headers: &HeaderSet) -> Result<Value, ResolveError>;

    async fn close(&self) -> Result<(), ResolveError>;
}

#[async_trait]
pub trait Session: Send + Sync {
    type Page: PageContext + 'static;

    async fn open_page(&self) -> Result<Self::Page, ResolveError>;
}

/// Owns an open page and makes sure it gets closed exactly once.
///
/// [`PageGuard::close`] closes in place. If the guard is dropped while still
/// armed, for example because the resolving future was cancelled, the close
/// is handed to the runtime.
pub struct PageGuard<P: PageContext + 'static> {
    page: Option<P>,
}

impl<P: PageContext + 'static> PageGuard<P> {
    pub fn new(page: P) -> Self {
        Self { page: Some(page) }
    }

    pub fn page(&self) -> Option<&P> {
        self.page.as_ref()
    }

    pub async fn close(mut self) -> Result<(), ResolveError> {
        match self.page.take() {
            Some(page) => page.close().await,
            None => Ok(()),
        }
    }
}

impl<P: PageContext + 'static> Drop for PageGuard<P> {
    fn drop(&mut self) {
        let Some(page) = self.page.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = page.close().await {
                        warn!("Failed to close abandoned page: {}", e);
                    }
                });
            }
            Err(_) => warn!("Page dropped outside a runtime, left open"),
        }
    }
}

/// The shared headless browser.
pub struct BrowserSession {
    /// Write access is only needed to close the browser.
    browser: RwLock<Browser>,
    /// Background task polling the DevTools protocol handler
    handler: tokio::task::JoinHandle<Result<(), chromiumoxide::error::CdpError>>,
    navigation_settle: Duration,
    pages_opened: AtomicUsize,
    is_shutting_down: AtomicBool,
}

impl BrowserSession {
    pub async fn launch(config: &Config) -> Result<Self, ResolveError> {
        if let Some(dir) = &config.browser.user_data_dir {
            std::fs::create_dir_all(dir).map_err(|e| {
                ResolveError::BrowserLaunchFailed(format!("Failed to create user data dir: {e}"))
            })?;
        }

        let browser_config = create_browser_config(config)?;
        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| ResolveError::BrowserLaunchFailed(e.to_string()))?;

        // The handler is a Stream and must be polled for the browser to make progress.
        let handler_task = tokio::spawn(async move {
            loop {
                match handler.next().await {
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        error!("Handler error: {}", e);
                        return Err(e);
                    }
                    None => {
                        info!("Handler stream ended");
                        break;
                    }
                }
            }
            Ok(())
        });

        info!("Browser session launched");

        Ok(Self {
            browser: RwLock::new(browser),
            handler: handler_task,
            navigation_settle: config.navigation_settle,
            pages_opened: AtomicUsize::new(0),
            is_shutting_down: AtomicBool::new(false),
        })
    }

    pub fn is_alive(&self) -> bool {
        !self.is_shutting_down.load(Ordering::Relaxed) && !self.handler.is_finished()
    }

    pub fn pages_opened(&self) -> usize {
        self.pages_opened.load(Ordering::Relaxed)
    }

    /// Opens a raw chromiumoxide page, used by the login flow.
    pub(crate) async fn new_raw_page(&self, url: &str) -> Result<Page, ResolveError> {
        if !self.is_alive() {
            return Err(ResolveError::SessionUnavailable);
        }

        let browser = self.browser.read().await;
        let page = browser
            .new_page(url)
            .await
            .map_err(|e| ResolveError::PageError(e.to_string()))?;
        self.pages_opened.fetch_add(1, Ordering::Relaxed);

        Ok(page)
    }

    pub(crate) fn navigation_settle(&self) -> Duration {
        self.navigation_settle
    }

    pub async fn shutdown(&self) {
        info!("Shutting down browser session...");
        self.is_shutting_down.store(true, Ordering::Relaxed);

        // A stalled page open holds the read lock; don't wait on it forever.
        match tokio::time::timeout(SHUTDOWN_GRACE, self.browser.write()).await {
            Ok(mut browser) => {
                if let Err(e) = browser.close().await {
                    warn!("Browser close failed: {}", e);
                }
            }
            Err(_) => warn!("Browser still busy after {:?}, aborting handler", SHUTDOWN_GRACE),
        }
        self.handler.abort();

        info!(
            "Browser session shutdown complete ({} pages opened)",
            self.pages_opened()
        );
    }
}

#[async_trait]
impl Session for BrowserSession {
    type Page = BrowserPage;

    async fn open_page(&self) -> Result<Self::Page, ResolveError> {
        let page = self.new_raw_page("about:blank").await?;
        Ok(BrowserPage::new(page, self.navigation_settle))
    }
}

/// One chromiumoxide tab.
pub struct BrowserPage {
    page: Page,
    settle: Duration,
}

impl BrowserPage {
    pub fn new(page: Page, settle: Duration) -> Self {
        Self { page, settle }
    }

    async fn evaluate<T: DeserializeOwned>(&self, script: String) -> Result<T, ResolveError> {
        let params = EvaluateParams::builder()
            .expression(script)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(ResolveError::PageError)?;

        let result = self
            .page
            .evaluate(params)
            .await
            .map_err(|e| ResolveError::PageError(e.to_string()))?;

        result
            .into_value::<T>()
            .map_err(|e| ResolveError::UnexpectedResponse(e.to_string()))
    }
}

#[async_trait]
impl PageContext for BrowserPage {
    async fn navigate(&self, url: &str) -> Result<(), ResolveError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| ResolveError::NavigationFailed(e.to_string()))?;
        self.page
            .wait_for_navigation()
            .await
            .map_err(|e| ResolveError::NavigationFailed(e.to_string()))?;

        // Script payloads land shortly after the load event.
        if !self.settle.is_zero() {
            sleep(self.settle).await;
        }

        debug!("Navigated to {}", url);
        Ok(())
    }

    async fn script_payloads(&self) -> Result<Vec<Value>, ResolveError> {
        self.evaluate(SCRIPT_PAYLOADS_SCRIPT.to_string()).await
    }

    async fn fetch_json(&self, url: &str, headers: &HeaderSet) -> Result<Value, ResolveError> {
        let script = fetch_json_script(url, headers)?;
        let envelope: FetchEnvelope = self.evaluate(script).await?;
        envelope.into_json(url)
    }

    async fn close(&self) -> Result<(), ResolveError> {
        self.page
            .clone()
            .close()
            .await
            .map_err(|e| ResolveError::PageError(e.to_string()))
    }
}
