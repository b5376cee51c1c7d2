//! Container builds on the proxy side
//!
//! A build for a content key runs at most once at a time. While it runs,
//! further requests for the same key wait for its outcome instead of
//! starting their own; once it succeeds the key is seeded and later
//! requests reuse the address without touching upstream.
//!
//! Lock order is `building` then `seeds`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use swarmwiki_core::{ContentAddress, ContentKey, SwarmError, SwarmResult};
use swarmwiki_transport::ContentNetwork;
use swarmwiki_upstream::{MediaRef, MediaSource};

use crate::bundle::UpstreamBundle;
use crate::seeds::{SeedEntry, SharedSeeds};

type Waiter = oneshot::Sender<SwarmResult<ContentAddress>>;

/// Build counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Builds that ran to completion
    pub built: u64,
    /// Requests answered from an existing seed
    pub reused: u64,
    /// Requests that waited on another request's build
    pub joined: u64,
    pub failed: u64,
    pub media_fetched: u64,
}

/// Builds, publishes and registers containers
pub struct ContainerBuilder<C: ContentNetwork, M: MediaSource> {
    network: Arc<C>,
    media: Arc<M>,
    seeds: SharedSeeds,
    building: Mutex<HashMap<ContentKey, Vec<Waiter>>>,
    media_concurrency: usize,
    stats: Mutex<BuildStats>,
}

enum Claim {
    Seeded(ContentAddress),
    Wait(oneshot::Receiver<SwarmResult<ContentAddress>>),
    Build,
}

impl<C: ContentNetwork, M: MediaSource> ContainerBuilder<C, M> {
    pub fn new(network: Arc<C>, media: Arc<M>, seeds: SharedSeeds, media_concurrency: usize) -> Self {
        ContainerBuilder {
            network,
            media,
            seeds,
            building: Mutex::new(HashMap::new()),
            media_concurrency: media_concurrency.max(1),
            stats: Mutex::new(BuildStats::default()),
        }
    }

    /// Address of the container for `key`, building it if needed.
    ///
    /// `fetch_upstream` is only called when this request ends up running
    /// the build. If the build fails, every request that waited on it gets
    /// the same error and nothing is registered.
    pub async fn build_or_reuse<F, Fut>(
        &self,
        key: ContentKey,
        fetch_upstream: F,
    ) -> SwarmResult<ContentAddress>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SwarmResult<UpstreamBundle>>,
    {
        match self.claim(&key) {
            Claim::Seeded(address) => {
                self.stats.lock().reused += 1;
                debug!(key = %key, address = address.short(), "reusing seed");
                Ok(address)
            }
            Claim::Wait(outcome) => {
                self.stats.lock().joined += 1;
                debug!(key = %key, "waiting for build in progress");
                outcome.await.unwrap_or_else(|_| {
                    Err(SwarmError::BuildAborted {
                        key: key.to_string(),
                        reason: "builder went away".into(),
                    })
                })
            }
            Claim::Build => {
                let guard = BuildGuard {
                    builder: self,
                    key: key.clone(),
                    settled: false,
                };
                let result = self.build(&key, fetch_upstream).await;
                guard.settle(result.clone());
                result
            }
        }
    }

    fn claim(&self, key: &ContentKey) -> Claim {
        let mut building = self.building.lock();
        if let Some(waiters) = building.get_mut(key) {
            let (tx, rx) = oneshot::channel();
            waiters.push(tx);
            return Claim::Wait(rx);
        }
        if let Some(entry) = self.seeds.lock().get(key) {
            return Claim::Seeded(entry.address.clone());
        }
        building.insert(key.clone(), Vec::new());
        Claim::Build
    }

    async fn build<F, Fut>(&self, key: &ContentKey, fetch_upstream: F) -> SwarmResult<ContentAddress>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SwarmResult<UpstreamBundle>>,
    {
        let started = Instant::now();
        let bundle = fetch_upstream().await?;
        let media = self.fetch_media(bundle.media.clone()).await?;
        let (name, files) = bundle.into_files(media)?;
        let file_count = files.len();
        let address = self.network.publish(&name, files).await?;

        info!(
            key = %key,
            address = address.short(),
            files = file_count,
            elapsed = ?started.elapsed(),
            "container published"
        );
        Ok(address)
    }

    /// Download media, at most `media_concurrency` at a time, keeping
    /// reference order. The first failure aborts the rest.
    async fn fetch_media(&self, refs: Vec<MediaRef>) -> SwarmResult<Vec<(MediaRef, Bytes)>> {
        let total = refs.len();
        let fetched: Vec<(MediaRef, Bytes)> = stream::iter(refs)
            .map(|media| {
                let source = Arc::clone(&self.media);
                async move {
                    let data = source.fetch_media(&media.url).await?;
                    debug!(name = %media.name, bytes = data.len(), "media fetched");
                    Ok::<_, SwarmError>((media, data))
                }
            })
            .buffered(self.media_concurrency)
            .try_collect()
            .await?;

        self.stats.lock().media_fetched += total as u64;
        Ok(fetched)
    }

    pub fn is_building(&self, key: &ContentKey) -> bool {
        self.building.lock().contains_key(key)
    }

    pub fn stats(&self) -> BuildStats {
        self.stats.lock().clone()
    }
}

/// Clears the in-progress marker and wakes waiters however the build ends
struct BuildGuard<'a, C: ContentNetwork, M: MediaSource> {
    builder: &'a ContainerBuilder<C, M>,
    key: ContentKey,
    settled: bool,
}

impl<C: ContentNetwork, M: MediaSource> BuildGuard<'_, C, M> {
    fn settle(mut self, result: SwarmResult<ContentAddress>) {
        self.settled = true;
        self.finish(result);
    }

    fn finish(&self, result: SwarmResult<ContentAddress>) {
        let waiters = {
            let mut building = self.builder.building.lock();
            match &result {
                Ok(address) => {
                    let entry = SeedEntry::new(self.key.clone(), address.clone(), Instant::now());
                    self.builder.seeds.lock().insert(entry);
                    self.builder.stats.lock().built += 1;
                }
                Err(e) => {
                    self.builder.stats.lock().failed += 1;
                    warn!(key = %self.key, error = %e, "build failed");
                }
            }
            building.remove(&self.key).unwrap_or_default()
        };

        for waiter in waiters {
            // Waiters that gave up are fine to skip
            let _ = waiter.send(result.clone());
        }
    }
}

impl<C: ContentNetwork, M: MediaSource> Drop for BuildGuard<'_, C, M> {
    fn drop(&mut self) {
        if !self.settled {
            self.finish(Err(SwarmError::BuildAborted {
                key: self.key.to_string(),
                reason: "build cancelled".into(),
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use swarmwiki_core::PeriodKey;
    use swarmwiki_transport::MemoryContentNetwork;

    use crate::seeds::SeedTable;

    /// Serves every URL except those containing "broken"
    #[derive(Default)]
    struct FakeMedia {
        calls: AtomicUsize,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl MediaSource for FakeMedia {
        async fn fetch_media(&self, url: &str) -> SwarmResult<Bytes> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            if url.contains("broken") {
                return Err(SwarmError::MediaFetch {
                    url: url.to_string(),
                    reason: "404".into(),
                });
            }
            Ok(Bytes::from(url.to_string()))
        }
    }

    fn builder(concurrency: usize) -> ContainerBuilder<MemoryContentNetwork, FakeMedia> {
        ContainerBuilder::new(
            Arc::new(MemoryContentNetwork::new()),
            Arc::new(FakeMedia::default()),
            SeedTable::shared(),
            concurrency,
        )
    }

    fn feed_key() -> ContentKey {
        ContentKey::feed("en", PeriodKey::parse("2024-05-01").unwrap())
    }

    fn bundle(media: &[&str]) -> UpstreamBundle {
        UpstreamBundle {
            name: "feed".into(),
            parts: vec![("tfa.json".into(), json!({"title": "Crab"}))],
            media: media
                .iter()
                .map(|m| MediaRef::named(m, &format!("https://upload.example.org/{m}")))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_build_then_reuse() {
        let builder = builder(4);
        let upstream_calls = AtomicUsize::new(0);
        let calls = &upstream_calls;
        let fetch = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(bundle(&["a.png"]))
        };

        let first = builder.build_or_reuse(feed_key(), fetch).await.unwrap();
        let second = builder.build_or_reuse(feed_key(), fetch).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(upstream_calls.load(Ordering::SeqCst), 1);
        assert_eq!(builder.network.publish_count(), 1);
        let stats = builder.stats();
        assert_eq!((stats.built, stats.reused), (1, 1));
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_build() {
        let builder = builder(4);
        let upstream_calls = AtomicUsize::new(0);
        let calls = &upstream_calls;
        let fetch = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(bundle(&["a.png", "b.png"]))
        };

        let (a, b, c) = tokio::join!(
            builder.build_or_reuse(feed_key(), fetch),
            builder.build_or_reuse(feed_key(), fetch),
            builder.build_or_reuse(feed_key(), fetch),
        );

        let a = a.unwrap();
        assert_eq!(a, b.unwrap());
        assert_eq!(a, c.unwrap());
        assert_eq!(upstream_calls.load(Ordering::SeqCst), 1);
        assert_eq!(builder.stats().joined, 2);
        assert!(!builder.is_building(&feed_key()));
    }

    #[tokio::test]
    async fn test_failure_reaches_waiters_and_is_not_cached() {
        let builder = builder(2);
        let fetch = || async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(bundle(&["ok.png", "broken.png"]))
        };

        let (a, b) = tokio::join!(
            builder.build_or_reuse(feed_key(), fetch),
            builder.build_or_reuse(feed_key(), fetch),
        );
        assert!(matches!(a, Err(SwarmError::MediaFetch { .. })));
        assert_eq!(a, b);
        assert!(builder.seeds.lock().is_empty());
        assert_eq!(builder.network.publish_count(), 0);

        // Next request retries from scratch
        let retry = builder
            .build_or_reuse(feed_key(), || async { Ok(bundle(&["ok.png"])) })
            .await;
        assert!(retry.is_ok());
    }

    #[tokio::test]
    async fn test_media_concurrency_is_bounded() {
        let builder = builder(2);
        let names: Vec<String> = (0..8).map(|i| format!("{i}.png")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let refs = &refs;

        builder
            .build_or_reuse(feed_key(), move || async move { Ok(bundle(refs)) })
            .await
            .unwrap();

        assert_eq!(builder.media.calls.load(Ordering::SeqCst), 8);
        assert!(builder.media.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(builder.stats().media_fetched, 8);
    }

    #[tokio::test]
    async fn test_cancelled_build_releases_waiters() {
        let builder = Arc::new(builder(1));
        let gate = Arc::new(tokio::sync::Notify::new());

        let running = {
            let builder = Arc::clone(&builder);
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                builder
                    .build_or_reuse(feed_key(), || async move {
                        gate.notified().await;
                        Ok(bundle(&[]))
                    })
                    .await
            })
        };
        while !builder.is_building(&feed_key()) {
            tokio::task::yield_now().await;
        }

        let waiter = {
            let builder = Arc::clone(&builder);
            tokio::spawn(async move {
                builder
                    .build_or_reuse(feed_key(), || async { Ok(bundle(&[])) })
                    .await
            })
        };
        while builder.stats().joined == 0 {
            tokio::task::yield_now().await;
        }

        running.abort();
        let outcome = waiter.await.unwrap();
        assert!(matches!(outcome, Err(SwarmError::BuildAborted { .. })));
        assert!(!builder.is_building(&feed_key()));
    }
}
