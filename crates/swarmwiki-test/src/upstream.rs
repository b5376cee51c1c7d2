//! Deterministic upstream for tests
//!
//! Content is derived from the request alone, so independent proxies fed
//! by separate `FakeUpstream`s still build byte-identical containers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::watch;

use swarmwiki_core::{SwarmError, SwarmResult};
use swarmwiki_upstream::{FeedPayload, MediaRef, MediaSource, UpstreamSource};

/// Host used for every generated media URL
pub const MEDIA_HOST: &str = "https://upload.test";

/// Call counters of a [`FakeUpstream`]
#[derive(Debug, Default)]
pub struct UpstreamCalls {
    pub feeds: AtomicUsize,
    pub articles: AtomicUsize,
    pub searches: AtomicUsize,
    pub media: AtomicUsize,
}

/// In-memory stand-in for Wikipedia
pub struct FakeUpstream {
    pub calls: UpstreamCalls,
    /// Closed gate holds feed, article and search calls
    gate: watch::Sender<bool>,
    failing_media: Mutex<HashSet<String>>,
    without_languages: Mutex<HashSet<String>>,
    search_suffix: Mutex<String>,
}

impl Default for FakeUpstream {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeUpstream {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        FakeUpstream {
            calls: UpstreamCalls::default(),
            gate,
            failing_media: Mutex::new(HashSet::new()),
            without_languages: Mutex::new(HashSet::new()),
            search_suffix: Mutex::new(String::new()),
        }
    }

    /// Hold upstream calls until [`open_gate`](Self::open_gate)
    pub fn close_gate(&self) {
        self.gate.send_replace(false);
    }

    pub fn open_gate(&self) {
        self.gate.send_replace(true);
    }

    /// Make downloads of `url` fail
    pub fn fail_media(&self, url: impl Into<String>) {
        self.failing_media.lock().insert(url.into());
    }

    pub fn heal_media(&self) {
        self.failing_media.lock().clear();
    }

    /// Report no language links for `title`
    pub fn without_languages(&self, title: impl Into<String>) {
        self.without_languages.lock().insert(title.into());
    }

    /// Alter search results so this upstream disagrees with others
    pub fn skew_search(&self, suffix: impl Into<String>) {
        *self.search_suffix.lock() = suffix.into();
    }

    pub fn feed_calls(&self) -> usize {
        self.calls.feeds.load(Ordering::SeqCst)
    }

    pub fn article_calls(&self) -> usize {
        self.calls.articles.load(Ordering::SeqCst)
    }

    pub fn search_calls(&self) -> usize {
        self.calls.searches.load(Ordering::SeqCst)
    }

    pub fn media_calls(&self) -> usize {
        self.calls.media.load(Ordering::SeqCst)
    }

    async fn pass_gate(&self) {
        let mut gate = self.gate.subscribe();
        // Sender lives as long as self
        let _ = gate.wait_for(|open| *open).await;
    }
}

/// URL of the generated image for `name`
pub fn media_url(name: &str) -> String {
    format!("{MEDIA_HOST}/{name}")
}

/// The featured article every feed of `lang` carries
pub fn featured_title(lang: &str) -> String {
    format!("Featured of {lang}")
}

/// Search results an honest upstream returns
pub fn search_pages(query: &str) -> Vec<Value> {
    vec![
        json!({ "ns": 0, "title": query, "snippet": format!("About {query}") }),
        json!({ "ns": 0, "title": format!("{query} (disambiguation)"), "snippet": "" }),
    ]
}

#[async_trait]
impl UpstreamSource for FakeUpstream {
    async fn fetch_feed(&self, lang: &str) -> SwarmResult<FeedPayload> {
        self.calls.feeds.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await;
        Ok(FeedPayload {
            tfa: json!({
                "title": featured_title(lang),
                "originalimage": { "source": media_url(&format!("{lang}-featured.jpg")) }
            }),
            mostread: json!({
                "articles": [
                    { "title": "Popular", "views": 1000,
                      "originalimage": { "source": media_url(&format!("{lang}-popular.jpg")) } },
                    { "title": "Imageless", "views": 10 }
                ]
            }),
        })
    }

    async fn fetch_article_sections(&self, _lang: &str, title: &str) -> SwarmResult<Value> {
        self.calls.articles.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await;
        Ok(json!({
            "lead": {
                "normalizedtitle": title.replace('_', " "),
                "sections": [ { "id": 0, "text": format!("<p>{title} is a topic.</p>") } ]
            },
            "remaining": { "sections": [ { "id": 1, "line": "History", "text": "<p>Long ago.</p>" } ] }
        }))
    }

    async fn fetch_article_media(&self, _lang: &str, title: &str) -> SwarmResult<Vec<MediaRef>> {
        let name = format!("{}.png", title.replace('/', "_"));
        Ok(vec![MediaRef::named(&name, &media_url(&name))])
    }

    async fn fetch_revisions(&self, _lang: &str, title: &str) -> SwarmResult<Value> {
        Ok(json!([
            { "revid": 2, "parentid": 1, "user": "Editor", "comment": format!("Expand {title}") },
            { "revid": 1, "parentid": 0, "user": "Creator", "comment": "New page" }
        ]))
    }

    async fn fetch_language_links(&self, lang: &str, title: &str) -> SwarmResult<Option<Value>> {
        if self.without_languages.lock().contains(title) {
            return Ok(None);
        }
        let other = if lang == "de" { "en" } else { "de" };
        Ok(Some(json!([ { "lang": other, "title": title } ])))
    }

    async fn search(&self, _lang: &str, query: &str) -> SwarmResult<Vec<Value>> {
        self.calls.searches.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await;
        let suffix = self.search_suffix.lock().clone();
        Ok(search_pages(&format!("{query}{suffix}")))
    }
}

#[async_trait]
impl MediaSource for FakeUpstream {
    async fn fetch_media(&self, url: &str) -> SwarmResult<Bytes> {
        self.calls.media.fetch_add(1, Ordering::SeqCst);
        if self.failing_media.lock().contains(url) {
            return Err(SwarmError::MediaFetch {
                url: url.to_string(),
                reason: "HTTP 503".into(),
            });
        }
        Ok(Bytes::from(format!("image bytes of {url}")))
    }
}
