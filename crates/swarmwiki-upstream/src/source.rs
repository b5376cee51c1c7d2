//! Upstream content source seam
//!
//! Proxies turn these calls into containers. Every call is a plain
//! request/response; retries and caching are the caller's business.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use swarmwiki_core::SwarmResult;

/// Today's feed of one language edition
#[derive(Debug, Clone, PartialEq)]
pub struct FeedPayload {
    /// Featured article summary
    pub tfa: Value,
    /// Most-read list (`{ "articles": [...] , ... }`)
    pub mostread: Value,
}

impl FeedPayload {
    /// Images the feed refers to: the featured article's original image
    /// and each most-read article's original image
    pub fn media_refs(&self) -> Vec<MediaRef> {
        let mut refs = Vec::new();
        refs.extend(original_image(&self.tfa));

        if let Some(articles) = self.mostread.get("articles").and_then(Value::as_array) {
            refs.extend(articles.iter().filter_map(original_image));
        }
        refs
    }
}

fn original_image(summary: &Value) -> Option<MediaRef> {
    summary
        .pointer("/originalimage/source")
        .and_then(Value::as_str)
        .and_then(MediaRef::from_url)
}

/// A media file to download and bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    /// Suggested file name inside the container
    pub name: String,
    /// Absolute download URL
    pub url: String,
}

impl MediaRef {
    /// Reference named after the URL's last path segment
    pub fn from_url(url: &str) -> Option<Self> {
        let url = absolute_url(url);
        let path = url.split(['?', '#']).next().unwrap_or_default();
        let name = path.rsplit('/').next().unwrap_or_default();
        if name.is_empty() || !name.contains('.') {
            return None;
        }
        Some(MediaRef {
            name: sanitize_name(name),
            url,
        })
    }

    /// Reference with an explicit name
    pub fn named(name: &str, url: &str) -> Self {
        MediaRef {
            name: sanitize_name(name),
            url: absolute_url(url),
        }
    }
}

/// Upgrade protocol-relative URLs (`//host/path`) to https
pub fn absolute_url(url: &str) -> String {
    if url.starts_with("//") {
        format!("https:{url}")
    } else {
        url.to_string()
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect()
}

/// Media items of a `page/media-list` payload that have a rendition.
///
/// Items without a `srcset` (audio, video posters without images) are
/// skipped; each kept item is named after its `title`.
pub fn media_refs_from_list(list: &Value) -> Vec<MediaRef> {
    let Some(items) = list.get("items").and_then(Value::as_array) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let src = item.pointer("/srcset/0/src").and_then(Value::as_str)?;
            match item.get("title").and_then(Value::as_str) {
                Some(title) => Some(MediaRef::named(title, src)),
                None => MediaRef::from_url(src),
            }
        })
        .collect()
}

/// Structured content upstream
#[async_trait]
pub trait UpstreamSource: Send + Sync + 'static {
    async fn fetch_feed(&self, lang: &str) -> SwarmResult<FeedPayload>;

    /// Lead and remaining sections of an article
    async fn fetch_article_sections(&self, lang: &str, title: &str) -> SwarmResult<Value>;

    async fn fetch_article_media(&self, lang: &str, title: &str) -> SwarmResult<Vec<MediaRef>>;

    async fn fetch_revisions(&self, lang: &str, title: &str) -> SwarmResult<Value>;

    /// `None` when the article exists in no other language
    async fn fetch_language_links(&self, lang: &str, title: &str) -> SwarmResult<Option<Value>>;

    async fn search(&self, lang: &str, query: &str) -> SwarmResult<Vec<Value>>;
}

/// Binary media downloads
#[async_trait]
pub trait MediaSource: Send + Sync + 'static {
    async fn fetch_media(&self, url: &str) -> SwarmResult<Bytes>;
}
