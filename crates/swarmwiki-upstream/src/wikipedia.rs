//! Wikipedia HTTP client
//!
//! REST v1 for the feed, sections and media lists; the action API for
//! revisions, language links and search.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Datelike, Utc};
use reqwest::{Client, Url};
use serde_json::{json, Value};

use swarmwiki_core::{SwarmError, SwarmResult};

use crate::{
    absolute_url, media_refs_from_list, FeedPayload, MediaRef, MediaSource, UpstreamSource,
};

/// `{lang}` is replaced by the language edition
pub const DEFAULT_HOST_TEMPLATE: &str = "https://{lang}.wikipedia.org";

const USER_AGENT: &str = concat!("swarmwiki/", env!("CARGO_PKG_VERSION"));

/// Number of revisions bundled with an article
const REVISION_LIMIT: &str = "20";

/// Upstream source backed by the public Wikipedia APIs
#[derive(Debug, Clone)]
pub struct WikipediaClient {
    http: Client,
    host_template: String,
}

impl WikipediaClient {
    pub fn new() -> SwarmResult<Self> {
        Self::with_host_template(DEFAULT_HOST_TEMPLATE)
    }

    /// Point the client somewhere else, e.g. a local mirror
    pub fn with_host_template(template: impl Into<String>) -> SwarmResult<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SwarmError::Upstream(e.to_string()))?;
        Ok(WikipediaClient {
            http,
            host_template: template.into(),
        })
    }

    fn base(&self, lang: &str) -> SwarmResult<Url> {
        if lang.is_empty() || !lang.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(SwarmError::Upstream(format!("invalid language code {lang:?}")));
        }
        let host = self.host_template.replace("{lang}", lang);
        Url::parse(&host).map_err(|e| SwarmError::Upstream(format!("{host}: {e}")))
    }

    /// `base` plus path segments, each percent-encoded
    fn rest_url(&self, lang: &str, segments: &[&str]) -> SwarmResult<Url> {
        let mut url = self.base(lang)?;
        url.path_segments_mut()
            .map_err(|_| SwarmError::Upstream("host template cannot be a base".into()))?
            .pop_if_empty()
            .extend(["api", "rest_v1"])
            .extend(segments);
        Ok(url)
    }

    fn action_url(&self, lang: &str) -> SwarmResult<Url> {
        let mut url = self.base(lang)?;
        url.set_path("/w/api.php");
        Ok(url)
    }

    async fn get_json(&self, url: Url) -> SwarmResult<Value> {
        tracing::debug!(%url, "upstream request");
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SwarmError::Upstream(format!("{url}: {e}")))?;
        response
            .json::<Value>()
            .await
            .map_err(|e| SwarmError::Upstream(format!("{url}: {e}")))
    }

    async fn query_page(&self, lang: &str, params: &[(&str, &str)]) -> SwarmResult<Value> {
        let mut url = self.action_url(lang)?;
        url.query_pairs_mut()
            .append_pair("action", "query")
            .append_pair("format", "json")
            .append_pair("formatversion", "2")
            .extend_pairs(params);
        self.get_json(url).await
    }
}

/// The first page object of an action API `query` answer
fn first_page(body: &Value) -> Option<&Value> {
    body.pointer("/query/pages/0")
}

#[async_trait]
impl UpstreamSource for WikipediaClient {
    async fn fetch_feed(&self, lang: &str) -> SwarmResult<FeedPayload> {
        let today = Utc::now().date_naive();
        let year = today.year().to_string();
        let month = format!("{:02}", today.month());
        let day = format!("{:02}", today.day());
        let url = self.rest_url(
            lang,
            &["feed", "featured", year.as_str(), month.as_str(), day.as_str()],
        )?;

        let body = self.get_json(url).await?;
        let tfa = body
            .get("tfa")
            .cloned()
            .ok_or_else(|| SwarmError::Upstream(format!("{lang} feed has no featured article")))?;
        let mostread = body.get("mostread").cloned().unwrap_or_else(|| json!({}));
        Ok(FeedPayload { tfa, mostread })
    }

    async fn fetch_article_sections(&self, lang: &str, title: &str) -> SwarmResult<Value> {
        let url = self.rest_url(lang, &["page", "mobile-sections", title])?;
        self.get_json(url).await
    }

    async fn fetch_article_media(&self, lang: &str, title: &str) -> SwarmResult<Vec<MediaRef>> {
        let url = self.rest_url(lang, &["page", "media-list", title])?;
        let body = self.get_json(url).await?;
        Ok(media_refs_from_list(&body))
    }

    async fn fetch_revisions(&self, lang: &str, title: &str) -> SwarmResult<Value> {
        let body = self
            .query_page(
                lang,
                &[
                    ("prop", "revisions"),
                    ("titles", title),
                    ("rvprop", "ids|timestamp|user|comment|size"),
                    ("rvlimit", REVISION_LIMIT),
                ],
            )
            .await?;
        Ok(first_page(&body)
            .and_then(|page| page.get("revisions"))
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new())))
    }

    async fn fetch_language_links(&self, lang: &str, title: &str) -> SwarmResult<Option<Value>> {
        let body = self
            .query_page(
                lang,
                &[
                    ("prop", "langlinks"),
                    ("titles", title),
                    ("llprop", "url|langname|autonym"),
                    ("lllimit", "max"),
                ],
            )
            .await?;
        Ok(first_page(&body)
            .and_then(|page| page.get("langlinks"))
            .filter(|links| links.as_array().is_some_and(|a| !a.is_empty()))
            .cloned())
    }

    async fn search(&self, lang: &str, query: &str) -> SwarmResult<Vec<Value>> {
        let body = self
            .query_page(lang, &[("list", "search"), ("srsearch", query)])
            .await?;
        Ok(body
            .pointer("/query/search")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl MediaSource for WikipediaClient {
    async fn fetch_media(&self, url: &str) -> SwarmResult<Bytes> {
        let url = absolute_url(url);
        let media_err = |reason: String| SwarmError::MediaFetch {
            url: url.clone(),
            reason,
        };

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| media_err(e.to_string()))?;
        response.bytes().await.map_err(|e| media_err(e.to_string()))
    }
}
