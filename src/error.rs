use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("unhandled page type")]
    UnhandledPageType,

    #[error("no media found")]
    NoMediaFound,

    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Page error: {0}")]
    PageError(String),

    #[error("Browser session unavailable")]
    SessionUnavailable,

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Invalid link: {0}")]
    InvalidLink(String),

    #[error("Browser launch failed: {0}")]
    BrowserLaunchFailed(String),

    #[error("Login failed: {0}")]
    LoginFailed(String),

    #[error("Verification code unavailable: {0}")]
    VerificationFailed(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl ResolveError {
    /// Errors raised while bringing the session up. These abort the whole run
    /// instead of being reported against a single link.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ResolveError::BrowserLaunchFailed(_)
                | ResolveError::LoginFailed(_)
                | ResolveError::VerificationFailed(_)
                | ResolveError::ConfigurationError(_)
        )
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ResolveError::UnhandledPageType => "unhandled_page_type",
            ResolveError::NoMediaFound => "no_media",
            ResolveError::FetchFailed(_)
            | ResolveError::HttpStatus { .. }
            | ResolveError::UnexpectedResponse(_) => "upstream",
            ResolveError::Timeout(_) => "timeout",
            ResolveError::InvalidLink(_) => "invalid_link",
            ResolveError::NavigationFailed(_)
            | ResolveError::PageError(_)
            | ResolveError::SessionUnavailable => "browser",
            _ => "startup",
        }
    }
}

impl From<chromiumoxide::error::CdpError> for ResolveError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        ResolveError::PageError(err.to_string())
    }
}

impl From<std::io::Error> for ResolveError {
    fn from(err: std::io::Error) -> Self {
        ResolveError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for ResolveError {
    fn from(err: serde_json::Error) -> Self {
        ResolveError::SerializationError(err.to_string())
    }
}
