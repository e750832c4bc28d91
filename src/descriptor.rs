//! Page classification
//!
//! Turns the structured data embedded in a loaded page into a [`PageKind`].
//! Route objects are located with the [`locator`](crate::locator) and then
//! decoded against a fixed schema, so anything past this point works with
//! typed descriptors instead of raw JSON.

use crate::locator::{search, search_path, tagged, trace_policy, PathSpec};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

pub const POST_TRACE_POLICY: &str = "polaris.postPage";
pub const STORY_TRACE_POLICY: &str = "polaris.StoriesPage";

/// Server-scheduled payloads are `[tag, "handle", null, [{"__bbox": {"require": [...]}}]]`.
const SCHEDULED_TAG: &str = "ScheduledServerJS";
const SCHEDULED_REQUIRE_PATH: &str = "3.0.__bbox.require";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostDescriptor {
    /// Path relative to the site domain, e.g. `/p/C0de/`.
    pub url: String,
    pub media_id: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryDescriptor {
    pub url: String,
    pub user_id: String,
    pub initial_media_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageKind {
    Post(PostDescriptor),
    Story(StoryDescriptor),
    Unrecognized,
}

impl PageKind {
    pub fn label(&self) -> &'static str {
        match self {
            PageKind::Post(_) => "post",
            PageKind::Story(_) => "story",
            PageKind::Unrecognized => "unrecognized",
        }
    }
}

#[derive(Debug, Deserialize)]
struct RootView<P> {
    props: P,
}

#[derive(Debug, Default, Deserialize)]
struct RouteMeta {
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PostRoute {
    url: String,
    #[serde(rename = "rootView")]
    root_view: RootView<PostProps>,
    #[serde(default)]
    meta: Option<RouteMeta>,
}

#[derive(Debug, Deserialize)]
struct PostProps {
    #[serde(deserialize_with = "id_string")]
    media_id: String,
}

#[derive(Debug, Deserialize)]
struct StoryRoute {
    url: String,
    #[serde(rename = "rootView")]
    root_view: RootView<StoryProps>,
}

#[derive(Debug, Deserialize)]
struct StoryProps {
    user: StoryUser,
    #[serde(deserialize_with = "id_string")]
    initial_media_id: String,
}

#[derive(Debug, Deserialize)]
struct StoryUser {
    #[serde(deserialize_with = "id_string")]
    id: String,
}

impl From<PostRoute> for PostDescriptor {
    fn from(route: PostRoute) -> Self {
        Self {
            url: route.url,
            media_id: route.root_view.props.media_id,
            title: route.meta.and_then(|meta| meta.title).filter(|title| !title.is_empty()),
        }
    }
}

impl From<StoryRoute> for StoryDescriptor {
    fn from(route: StoryRoute) -> Self {
        Self {
            url: route.url,
            user_id: route.root_view.props.user.id,
            initial_media_id: route.root_view.props.initial_media_id,
        }
    }
}

/// Site ids show up both as JSON strings and as numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Text(String),
    Number(u64),
}

pub(crate) fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match IdRepr::deserialize(deserializer)? {
        IdRepr::Text(text) => text,
        IdRepr::Number(number) => number.to_string(),
    })
}

/// Normalizes an id value that may be a string or a number.
pub(crate) fn id_value(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Combines the script payloads of a page into one structured value: every
/// payload's top-level `require` array, concatenated in document order.
pub fn page_data(payloads: &[Value]) -> Value {
    let combined = payloads
        .iter()
        .filter_map(|payload| payload.get("require").and_then(Value::as_array))
        .flatten()
        .cloned()
        .collect();

    Value::Array(combined)
}

/// Classifies a page from its structured data. A post route takes
/// precedence over a story route when both are present.
pub fn classify(data: &Value) -> PageKind {
    let scheduled: Vec<&Value> = search_path(
        data,
        tagged(SCHEDULED_TAG),
        PathSpec::from_dotted(SCHEDULED_REQUIRE_PATH),
    )
    .collect();

    let roots = if scheduled.is_empty() {
        vec![data]
    } else {
        scheduled
    };

    if let Some(route) = find_route::<PostRoute>(&roots, POST_TRACE_POLICY) {
        return PageKind::Post(route.into());
    }

    if let Some(route) = find_route::<StoryRoute>(&roots, STORY_TRACE_POLICY) {
        return PageKind::Story(route.into());
    }

    PageKind::Unrecognized
}

/// First route with `policy` that also decodes as `R`.
fn find_route<R>(roots: &[&Value], policy: &str) -> Option<R>
where
    R: DeserializeOwned,
{
    roots
        .iter()
        .flat_map(|root| search(*root, trace_policy(policy)))
        .find_map(|candidate| R::deserialize(candidate).ok())
}
