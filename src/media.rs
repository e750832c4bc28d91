//! Media record decoding and flattening
//!
//! The media endpoints return items that are either a single video, a single
//! image or a carousel of further items. [`RawMediaRecord`] is the closed
//! decoding of one such item and [`flatten`] turns a batch of them into the
//! ordered list of downloadable media.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
}

/// A single normalized media item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub kind: MediaKind,
    pub url: String,
}

impl MediaDescriptor {
    pub fn photo(url: impl Into<String>) -> Self {
        Self {
            kind: MediaKind::Photo,
            url: url.into(),
        }
    }

    pub fn video(url: impl Into<String>) -> Self {
        Self {
            kind: MediaKind::Video,
            url: url.into(),
        }
    }
}

/// One media item as returned by the site API.
///
/// Decoding never fails: items of an unknown shape become
/// [`RawMediaRecord::Unrecognized`] and contribute nothing when flattened.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "Value")]
pub enum RawMediaRecord {
    Video { url: String },
    Photo { url: String },
    Carousel(Vec<RawMediaRecord>),
    Unrecognized,
}

#[derive(Debug, Default, Deserialize)]
struct RawMediaFields {
    #[serde(default)]
    video_versions: Option<Vec<MediaVariant>>,
    #[serde(default)]
    image_versions2: Option<ImageVersions>,
    #[serde(default)]
    carousel_media: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct MediaVariant {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageVersions {
    #[serde(default)]
    candidates: Vec<MediaVariant>,
}

/// The first variant is the default rendition.
fn first_url(variants: Option<Vec<MediaVariant>>) -> Option<String> {
    variants?.into_iter().next()?.url
}

impl From<RawMediaFields> for RawMediaRecord {
    fn from(fields: RawMediaFields) -> Self {
        let video = first_url(fields.video_versions);
        let photo = first_url(fields.image_versions2.map(|versions| versions.candidates));

        // Video posts also carry a poster image, so video is checked first.
        match (video, photo, fields.carousel_media) {
            (Some(url), _, _) => RawMediaRecord::Video { url },
            (None, Some(url), _) => RawMediaRecord::Photo { url },
            (None, None, Some(children)) => {
                RawMediaRecord::Carousel(children.into_iter().map(RawMediaRecord::from).collect())
            }
            (None, None, None) => RawMediaRecord::Unrecognized,
        }
    }
}

impl From<Value> for RawMediaRecord {
    fn from(value: Value) -> Self {
        serde_json::from_value::<RawMediaFields>(value)
            .map(RawMediaRecord::from)
            .unwrap_or(RawMediaRecord::Unrecognized)
    }
}

/// Flattens `records` depth-first, keeping carousel order.
pub fn flatten(records: &[RawMediaRecord]) -> Vec<MediaDescriptor> {
    let mut media = Vec::new();
    flatten_into(records, &mut media);
    media
}

fn flatten_into(records: &[RawMediaRecord], media: &mut Vec<MediaDescriptor>) {
    for record in records {
        match record {
            RawMediaRecord::Video { url } => media.push(MediaDescriptor::video(url.clone())),
            RawMediaRecord::Photo { url } => media.push(MediaDescriptor::photo(url.clone())),
            RawMediaRecord::Carousel(children) => flatten_into(children, media),
            RawMediaRecord::Unrecognized => {}
        }
    }
}
