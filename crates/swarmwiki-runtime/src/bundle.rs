//! Upstream payloads gathered for one container
//!
//! Feed containers hold `tfa.json`, `mostread.json` and the images both
//! refer to. Article containers hold `article.json`, `revisions.json`,
//! optionally `languages.json`, and the article's media. Media names are
//! made unique by prefixing `1-`, `2-`, ... on collision, in reference
//! order, so every proxy assembles byte-identical bundles.

use std::collections::HashSet;

use bytes::Bytes;
use serde_json::Value;

use swarmwiki_core::{files, SwarmResult, FEED_CONTAINER_NAME};
use swarmwiki_transport::NamedFile;
use swarmwiki_upstream::{MediaRef, UpstreamSource};

/// Everything a build needs except the media bytes
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamBundle {
    /// Container name
    pub name: String,
    /// Record files, in container order
    pub parts: Vec<(String, Value)>,
    /// Media to download
    pub media: Vec<MediaRef>,
}

impl UpstreamBundle {
    /// Today's feed for `lang`
    pub async fn feed<U: UpstreamSource + ?Sized>(upstream: &U, lang: &str) -> SwarmResult<Self> {
        let feed = upstream.fetch_feed(lang).await?;
        let media = feed.media_refs();
        Ok(UpstreamBundle {
            name: FEED_CONTAINER_NAME.to_string(),
            parts: vec![
                (files::TFA.to_string(), feed.tfa),
                (files::MOST_READ.to_string(), feed.mostread),
            ],
            media,
        })
    }

    /// One article with its revisions, language links and media
    pub async fn article<U: UpstreamSource + ?Sized>(
        upstream: &U,
        lang: &str,
        title: &str,
    ) -> SwarmResult<Self> {
        let (sections, revisions, languages, media) = tokio::try_join!(
            upstream.fetch_article_sections(lang, title),
            upstream.fetch_revisions(lang, title),
            upstream.fetch_language_links(lang, title),
            upstream.fetch_article_media(lang, title),
        )?;

        let name = sections
            .pointer("/lead/normalizedtitle")
            .and_then(Value::as_str)
            .unwrap_or(title)
            .to_string();

        let mut parts = vec![
            (files::ARTICLE.to_string(), sections),
            (files::REVISIONS.to_string(), revisions),
        ];
        if let Some(languages) = languages {
            parts.push((files::LANGUAGES.to_string(), languages));
        }

        Ok(UpstreamBundle { name, parts, media })
    }

    /// Serialize the records and pair them with downloaded media.
    ///
    /// `media` must follow the order of `self.media`.
    pub fn into_files(self, media: Vec<(MediaRef, Bytes)>) -> SwarmResult<(String, Vec<NamedFile>)> {
        let mut taken = HashSet::new();
        let mut out = Vec::with_capacity(self.parts.len() + media.len());

        for (name, value) in self.parts {
            let data = serde_json::to_vec(&value)?;
            taken.insert(name.clone());
            out.push(NamedFile::new(name, data));
        }
        for (media, data) in media {
            let name = unique_name(&mut taken, &media.name);
            out.push(NamedFile::new(name, data));
        }
        Ok((self.name, out))
    }
}

/// `wanted`, or `n-wanted` with the smallest free `n`
fn unique_name(taken: &mut HashSet<String>, wanted: &str) -> String {
    let mut name = wanted.to_string();
    let mut n = 1;
    while taken.contains(&name) {
        name = format!("{n}-{wanted}");
        n += 1;
    }
    taken.insert(name.clone());
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn media(name: &str) -> MediaRef {
        MediaRef::named(name, &format!("https://upload.example.org/{name}"))
    }

    #[test]
    fn test_unique_name() {
        let mut taken = HashSet::new();
        assert_eq!(unique_name(&mut taken, "a.png"), "a.png");
        assert_eq!(unique_name(&mut taken, "a.png"), "1-a.png");
        assert_eq!(unique_name(&mut taken, "a.png"), "2-a.png");
        assert_eq!(unique_name(&mut taken, "b.png"), "b.png");
    }

    #[test]
    fn test_into_files_layout() {
        let bundle = UpstreamBundle {
            name: "feed".into(),
            parts: vec![
                ("tfa.json".into(), json!({"title": "Crab"})),
                ("mostread.json".into(), json!({"articles": []})),
            ],
            media: vec![media("crab.jpg"), media("crab.jpg")],
        };
        let downloaded = vec![
            (media("crab.jpg"), Bytes::from_static(b"one")),
            (media("crab.jpg"), Bytes::from_static(b"two")),
        ];

        let (name, files) = bundle.into_files(downloaded).unwrap();
        assert_eq!(name, "feed");
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["tfa.json", "mostread.json", "crab.jpg", "1-crab.jpg"]);
        assert_eq!(files[0].data.as_ref(), br#"{"title":"Crab"}"#);
        assert_eq!(files[3].data.as_ref(), b"two");
    }

    #[test]
    fn test_media_cannot_shadow_records() {
        let bundle = UpstreamBundle {
            name: "Odd".into(),
            parts: vec![("article.json".into(), json!({}))],
            media: vec![media("article.json")],
        };
        let downloaded = vec![(media("article.json"), Bytes::from_static(b"x"))];

        let (_, files) = bundle.into_files(downloaded).unwrap();
        assert_eq!(files[1].name, "1-article.json");
    }
}
