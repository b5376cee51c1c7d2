//! Content identity for SwarmWiki
//!
//! A `ContentKey` names a piece of publishable content logically (which
//! feed, which article); a `ContentAddress` names one concrete container of
//! it on the content network. Proxies memoize builds by key, clients cache
//! fetched results by key.

use std::fmt;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{SwarmError, SwarmResult};

/// Member file names of published containers
pub mod files {
    /// Featured article summary of a feed
    pub const TFA: &str = "tfa.json";
    /// Most-read list of a feed
    pub const MOST_READ: &str = "mostread.json";
    /// Mobile sections of an article
    pub const ARTICLE: &str = "article.json";
    /// Revision history of an article
    pub const REVISIONS: &str = "revisions.json";
    /// Cross-language links of an article (absent when there are none)
    pub const LANGUAGES: &str = "languages.json";
}

/// Container name used for every feed publication
pub const FEED_CONTAINER_NAME: &str = "feed";

/// Content namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Feed,
    Article,
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentKind::Feed => f.write_str("feed"),
            ContentKind::Article => f.write_str("article"),
        }
    }
}

/// UTC calendar day, `YYYY-MM-DD`
///
/// Fixed width, so lexicographic order is chronological order.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeriodKey(String);

impl PeriodKey {
    /// The current UTC day
    pub fn today() -> Self {
        Self::from_date(Utc::now().date_naive())
    }

    pub fn from_date(date: NaiveDate) -> Self {
        PeriodKey(date.format("%Y-%m-%d").to_string())
    }

    pub fn parse(s: &str) -> SwarmResult<Self> {
        let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|e| SwarmError::InvalidPeriodKey(format!("{s}: {e}")))?;
        let key = Self::from_date(date);
        // Reject short forms like 2024-1-2 that would break the ordering
        if key.0 != s {
            return Err(SwarmError::InvalidPeriodKey(s.to_string()));
        }
        Ok(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Period({})", self.0)
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Logical identity of publishable content
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ContentKey {
    /// Daily feed of one language edition
    Feed { lang: String, period: PeriodKey },
    /// Single article of one language edition
    Article { lang: String, title: String },
}

impl ContentKey {
    pub fn feed(lang: impl Into<String>, period: PeriodKey) -> Self {
        ContentKey::Feed {
            lang: lang.into(),
            period,
        }
    }

    pub fn article(lang: impl Into<String>, title: impl Into<String>) -> Self {
        ContentKey::Article {
            lang: lang.into(),
            title: title.into(),
        }
    }

    pub fn kind(&self) -> ContentKind {
        match self {
            ContentKey::Feed { .. } => ContentKind::Feed,
            ContentKey::Article { .. } => ContentKind::Article,
        }
    }

    pub fn language(&self) -> &str {
        match self {
            ContentKey::Feed { lang, .. } | ContentKey::Article { lang, .. } => lang,
        }
    }

    /// Period of a feed key, `None` for articles
    pub fn period(&self) -> Option<&PeriodKey> {
        match self {
            ContentKey::Feed { period, .. } => Some(period),
            ContentKey::Article { .. } => None,
        }
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentKey::Feed { lang, period } => write!(f, "feed/{lang}/{period}"),
            ContentKey::Article { lang, title } => write!(f, "article/{lang}/{title}"),
        }
    }
}

/// Deterministic address of a published container (lowercase hex)
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentAddress(String);

impl ContentAddress {
    /// Validate an address received from a peer
    pub fn parse(s: &str) -> SwarmResult<Self> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(SwarmError::MalformedMessage(format!(
                "not a content address: {s:?}"
            )));
        }
        Ok(ContentAddress(s.to_ascii_lowercase()))
    }

    pub fn from_digest(digest: &[u8]) -> Self {
        ContentAddress(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Debug for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Addr({})", self.short())
    }
}

impl fmt::Display for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
