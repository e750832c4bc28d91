//! Per-link content resolution
//!
//! A link moves through load, classification, media fetch and normalization.
//! Any step may fail; the failure becomes the outcome of that link only.
//!
//! ```text
//! Loaded -> Classified -> Fetched -> Normalized -> Done
//!    \__________\____________\___________\______-> Failed
//! ```

use crate::descriptor::{classify, id_value, page_data, PageKind, PostDescriptor, StoryDescriptor};
use crate::media::{flatten, MediaDescriptor, RawMediaRecord};
use crate::session::{HeaderSet, PageContext, PageGuard, Session};
use crate::{normalize_link, Config, ResolveError, SiteConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Final result for one link. `media` is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedContent {
    pub title: Option<String>,
    pub url: Option<String>,
    pub media: Vec<MediaDescriptor>,
}

/// Media record batch plus the metadata picked up on the way.
#[derive(Debug)]
struct FetchedMedia {
    title: Option<String>,
    url: String,
    records: Vec<RawMediaRecord>,
}

#[derive(Debug, Deserialize)]
struct MediaInfoResponse {
    items: Vec<RawMediaRecord>,
}

#[derive(Debug, Deserialize)]
struct ReelsMediaResponse {
    reels: HashMap<String, Reel>,
}

#[derive(Debug, Deserialize)]
struct Reel {
    #[serde(default)]
    user: Option<ReelUser>,
    #[serde(default)]
    items: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ReelUser {
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

impl ReelUser {
    fn display_name(self) -> Option<String> {
        self.full_name
            .filter(|name| !name.is_empty())
            .or(self.username.filter(|name| !name.is_empty()))
    }
}

pub struct ContentResolver<S> {
    session: Arc<S>,
    site: SiteConfig,
    link_timeout: Duration,
}

impl<S: Session> ContentResolver<S> {
    pub fn new(session: Arc<S>, config: &Config) -> Self {
        Self {
            session,
            site: config.site.clone(),
            link_timeout: config.link_timeout,
        }
    }

    pub fn session(&self) -> &Arc<S> {
        &self.session
    }

    /// Headers every media API request must carry. Cookies come from the page.
    pub fn api_headers(&self) -> HeaderSet {
        HeaderSet::new()
            .with("x-ig-app-id", self.site.app_id.clone())
            .with("x-asbd-id", self.site.asbd_id.clone())
            .with("x-ig-www-claim", "0")
            .with("accept", "*/*")
    }

    /// Resolves one link on its own page. The timeout covers opening the
    /// page too. The page is closed on every path, including timeouts and
    /// cancellation of the returned future.
    pub async fn resolve(&self, link: &str) -> Result<ResolvedContent, ResolveError> {
        let url = normalize_link(link, &self.site)?;
        let mut guard: Option<PageGuard<S::Page>> = None;

        let outcome = timeout(self.link_timeout, async {
            let page = self.session.open_page().await?;
            let guard = guard.insert(PageGuard::new(page));
            match guard.page() {
                Some(page) => self.resolve_on_page(page, &url).await,
                None => Err(ResolveError::SessionUnavailable),
            }
        })
        .await;

        if let Some(guard) = guard.take() {
            if let Err(e) = guard.close().await {
                warn!(link = %link, "Failed to close page: {}", e);
            }
        }

        match outcome {
            Ok(result) => result,
            Err(_) => Err(ResolveError::Timeout(self.link_timeout)),
        }
    }

    async fn resolve_on_page(&self, page: &S::Page, url: &str) -> Result<ResolvedContent, ResolveError> {
        page.navigate(url).await?;
        debug!(link = %url, "Page loaded");

        let payloads = page.script_payloads().await?;
        let kind = classify(&page_data(&payloads));
        debug!(link = %url, kind = kind.label(), payloads = payloads.len(), "Page classified");

        let fetched = match kind {
            PageKind::Post(post) => self.fetch_post(page, post).await?,
            PageKind::Story(story) => self.fetch_story(page, story).await?,
            PageKind::Unrecognized => return Err(ResolveError::UnhandledPageType),
        };
        debug!(link = %url, records = fetched.records.len(), "Media fetched");

        let media = flatten(&fetched.records);
        if media.is_empty() {
            return Err(ResolveError::NoMediaFound);
        }

        Ok(ResolvedContent {
            title: fetched.title,
            url: Some(fetched.url),
            media,
        })
    }

    async fn fetch_post(&self, page: &S::Page, post: PostDescriptor) -> Result<FetchedMedia, ResolveError> {
        let endpoint = self.site.media_info_url(&post.media_id);
        let body = page.fetch_json(&endpoint, &self.api_headers()).await?;

        let response: MediaInfoResponse = serde_json::from_value(body)
            .map_err(|e| ResolveError::UnexpectedResponse(format!("media info: {e}")))?;

        Ok(FetchedMedia {
            title: post.title,
            url: self.site.absolute(&post.url),
            records: response.items,
        })
    }

    async fn fetch_story(&self, page: &S::Page, story: StoryDescriptor) -> Result<FetchedMedia, ResolveError> {
        let endpoint = self.site.reels_media_url(&story.user_id);
        let body = page.fetch_json(&endpoint, &self.api_headers()).await?;

        let mut response: ReelsMediaResponse = serde_json::from_value(body)
            .map_err(|e| ResolveError::UnexpectedResponse(format!("reels media: {e}")))?;

        let (title, records) = match response.reels.remove(&story.user_id) {
            Some(reel) => {
                let title = reel.user.and_then(ReelUser::display_name);
                let records = reel
                    .items
                    .into_iter()
                    .find(|item| {
                        item.get("pk").and_then(id_value).as_deref()
                            == Some(story.initial_media_id.as_str())
                    })
                    .map(RawMediaRecord::from)
                    .into_iter()
                    .collect();
                (title, records)
            }
            None => (None, Vec::new()),
        };

        Ok(FetchedMedia {
            title,
            url: self.site.absolute(&story.url),
            records,
        })
    }
}
