//! # Media Resolver
//!
//! Resolves links to social media posts and stories into direct photo and
//! video URLs. Links are opened in a logged in headless Chrome, the page's
//! embedded structured data is searched for its route, and the media API is
//! queried from inside the page so the session cookies apply.
//!
//! ## Pipeline
//!
//! | Stage | Module | Output |
//! |-------|--------|--------|
//! | Locate | [`locator`] | first structured-data node matching a predicate |
//! | Classify | [`descriptor`] | [`PageKind`]: post, story or unrecognized |
//! | Fetch | [`resolver`] | raw media records from the media API |
//! | Normalize | [`media`] | flat list of [`MediaDescriptor`] |
//! | Batch | [`batch`] | one [`BatchOutcome`] per link, bounded concurrency |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use media_resolver::{BrowserSession, Config, ContentResolver};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default().with_env_credentials();
//!     let session = Arc::new(BrowserSession::launch(&config).await?);
//!
//!     let resolver = ContentResolver::new(session.clone(), &config);
//!     let content = resolver.resolve("https://www.instagram.com/p/C0de/").await?;
//!     for media in &content.media {
//!         println!("{:?} {}", media.kind, media.url);
//!     }
//!
//!     session.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! media-resolver resolve --input links.txt --output results.jsonl --concurrency 4
//! media-resolver resolve https://www.instagram.com/stories/someone/99/
//! ```

/// Configuration and settings for the resolver
pub mod config;

/// Error types and error handling utilities
pub mod error;

/// Structured-data search
pub mod locator;

/// Media records and their normalization
pub mod media;

/// Page classification into post and story descriptors
pub mod descriptor;

/// Scripts evaluated inside content pages
pub mod scripts;

/// Browser session and page abstractions
pub mod session;

/// Login precondition for the shared session
pub mod login;

/// Per-link resolution state machine
pub mod resolver;

/// Bounded-concurrency batch runner
pub mod batch;

/// Command-line interface implementation
pub mod cli;

/// Performance metrics collection
pub mod metrics;

/// Utility functions and helpers
pub mod utils;

#[cfg(test)]
mod tests;

pub use batch::*;
pub use cli::*;
pub use config::*;
pub use descriptor::*;
pub use error::*;
pub use locator::*;
pub use login::*;
pub use media::*;
pub use metrics::*;
pub use resolver::*;
pub use session::*;
pub use utils::*;
