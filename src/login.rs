//! Login precondition for the shared session
//!
//! Resolution assumes a logged in browser. [`ensure_logged_in`] checks for the
//! session cookie and, when it is missing, runs the login form. A second factor
//! code is pulled from an injected [`VerificationCodeSource`]. Every failure
//! here is fatal for the run, never for a single link.

use crate::{BrowserSession, Config, Credentials, ResolveError};
use async_trait::async_trait;
use chromiumoxide::page::Page;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::sleep;
use tracing::{debug, info, warn};

pub const SESSION_COOKIE: &str = "sessionid";

const USERNAME_INPUT: &str = r#"input[name="username"]"#;
const PASSWORD_INPUT: &str = r#"input[name="password"]"#;
const VERIFICATION_INPUTS: &[&str] = &[
    r#"input[name="verificationCode"]"#,
    r#"input[name="security_code"]"#,
];

/// Out-of-band provider of second factor codes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VerificationCodeSource: Send + Sync {
    async fn verification_code(&self) -> Result<String, ResolveError>;
}

/// A code known before the run started.
pub struct StaticCodeSource {
    code: String,
}

impl StaticCodeSource {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}

#[async_trait]
impl VerificationCodeSource for StaticCodeSource {
    async fn verification_code(&self) -> Result<String, ResolveError> {
        Ok(self.code.clone())
    }
}

const CODE_PROMPT: &[u8] = b"Verification code: ";

/// Asks for the code on the terminal. The prompt goes to stderr, stdout
/// carries results.
#[derive(Default)]
pub struct PromptCodeSource;

#[async_trait]
impl VerificationCodeSource for PromptCodeSource {
    async fn verification_code(&self) -> Result<String, ResolveError> {
        prompt_line(
            BufReader::new(tokio::io::stdin()),
            tokio::io::stderr(),
        )
        .await
    }
}

async fn prompt_line<R, W>(mut input: R, mut prompt: W) -> Result<String, ResolveError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    prompt.write_all(CODE_PROMPT).await?;
    prompt.flush().await?;

    let mut line = String::new();
    input.read_line(&mut line).await?;
    Ok(line)
}

/// Picks the code source for a run: a configured code wins over the prompt.
pub fn code_source_for(credentials: Option<&Credentials>) -> Box<dyn VerificationCodeSource> {
    match credentials.and_then(|c| c.verification_code.clone()) {
        Some(code) => Box::new(StaticCodeSource::new(code)),
        None => Box::new(PromptCodeSource),
    }
}

/// Fetches and sanity checks a code. Codes are short digit strings.
pub async fn obtain_code(source: &dyn VerificationCodeSource) -> Result<String, ResolveError> {
    let code = source
        .verification_code()
        .await
        .map_err(|e| ResolveError::VerificationFailed(e.to_string()))?;
    let code = code.trim().replace(' ', "");

    if code.is_empty() || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(ResolveError::VerificationFailed(format!(
            "malformed verification code {code:?}"
        )));
    }

    Ok(code)
}

/// Makes sure `session` carries a valid login before any link is resolved.
pub async fn ensure_logged_in(
    session: &BrowserSession,
    config: &Config,
    codes: &dyn VerificationCodeSource,
) -> Result<(), ResolveError> {
    let page = session.new_raw_page(&config.site.login_url()).await?;
    let result = run_login(session, &page, config, codes).await;

    if let Err(e) = page.close().await {
        warn!("Failed to close login page: {}", e);
    }

    result
}

async fn run_login(
    session: &BrowserSession,
    page: &Page,
    config: &Config,
    codes: &dyn VerificationCodeSource,
) -> Result<(), ResolveError> {
    let settle = session.navigation_settle();
    sleep(settle).await;

    if has_session_cookie(page).await? {
        info!("Existing session found, skipping login");
        return Ok(());
    }

    let credentials = config.credentials.as_ref().ok_or_else(|| {
        ResolveError::LoginFailed("not logged in and no credentials configured".to_string())
    })?;

    info!("Logging in as {}", credentials.username);
    fill_input(page, USERNAME_INPUT, &credentials.username).await?;
    fill_input(page, PASSWORD_INPUT, &credentials.password).await?;
    submit(page, PASSWORD_INPUT).await?;
    sleep(settle).await;

    if let Some(selector) = find_verification_input(page).await {
        debug!("Verification challenge shown ({})", selector);
        let code = obtain_code(codes).await?;
        fill_input(page, selector, &code).await?;
        submit(page, selector).await?;
        sleep(settle).await;
    }

    if !has_session_cookie(page).await? {
        return Err(ResolveError::LoginFailed(
            "session cookie missing after login".to_string(),
        ));
    }

    info!("Login succeeded");
    Ok(())
}

async fn has_session_cookie(page: &Page) -> Result<bool, ResolveError> {
    let cookies = page
        .get_cookies()
        .await
        .map_err(|e| ResolveError::LoginFailed(e.to_string()))?;
    Ok(cookies.iter().any(|cookie| cookie.name == SESSION_COOKIE))
}

async fn fill_input(page: &Page, selector: &str, value: &str) -> Result<(), ResolveError> {
    page.find_element(selector)
        .await
        .map_err(|e| ResolveError::LoginFailed(format!("{selector} not found: {e}")))?
        .click()
        .await
        .map_err(|e| ResolveError::LoginFailed(e.to_string()))?
        .type_str(value)
        .await
        .map_err(|e| ResolveError::LoginFailed(e.to_string()))?;
    Ok(())
}

async fn submit(page: &Page, selector: &str) -> Result<(), ResolveError> {
    page.find_element(selector)
        .await
        .map_err(|e| ResolveError::LoginFailed(e.to_string()))?
        .press_key("Enter")
        .await
        .map_err(|e| ResolveError::LoginFailed(e.to_string()))?;

    // A client-side rerender does not always produce a navigation event.
    if let Err(e) = page.wait_for_navigation().await {
        debug!("No navigation after submit: {}", e);
    }
    Ok(())
}

async fn find_verification_input(page: &Page) -> Option<&'static str> {
    for selector in VERIFICATION_INPUTS {
        if page.find_element(*selector).await.is_ok() {
            return Some(*selector);
        }
    }
    None
}
