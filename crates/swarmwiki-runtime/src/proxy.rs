//! Proxy role
//!
//! Answers probes, turns feed and article requests into seeded
//! containers, and answers searches inline. Each inbound request is
//! handled on its own task; a request that fails is left unanswered.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use swarmwiki_core::{
    ContentKey, PeriodKey, ProxyRequest, ProxyResponse, SwarmResult, WireMessage,
};
use swarmwiki_transport::{ContentNetwork, EventReceiver, InboundRequest, TransportEvent};
use swarmwiki_upstream::{MediaSource, UpstreamSource};

use crate::builder::{BuildStats, ContainerBuilder};
use crate::bundle::UpstreamBundle;
use crate::config::ProxyConfig;
use crate::seeds::{SeedEntry, SeedLifecycle, SeedTable, SharedSeeds};

/// Proxy counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProxyStats {
    pub probes: u64,
    pub requests: u64,
    pub answered: u64,
    pub failed: u64,
    pub searches: u64,
    pub seeds: usize,
    pub retired: u64,
    pub builds: BuildStats,
}

struct ProxyInner<C: ContentNetwork, U: UpstreamSource, M: MediaSource> {
    upstream: Arc<U>,
    builder: ContainerBuilder<C, M>,
    lifecycle: SeedLifecycle<C>,
    seeds: SharedSeeds,
    probes: AtomicU64,
    requests: AtomicU64,
    answered: AtomicU64,
    failed: AtomicU64,
    searches: AtomicU64,
}

/// A swarm proxy. Cheap to clone; clones share all state.
pub struct ProxyNode<C: ContentNetwork, U: UpstreamSource, M: MediaSource> {
    inner: Arc<ProxyInner<C, U, M>>,
}

impl<C: ContentNetwork, U: UpstreamSource, M: MediaSource> Clone for ProxyNode<C, U, M> {
    fn clone(&self) -> Self {
        ProxyNode {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: ContentNetwork, U: UpstreamSource, M: MediaSource> ProxyNode<C, U, M> {
    pub fn new(
        config: ProxyConfig,
        network: Arc<C>,
        upstream: Arc<U>,
        media: Arc<M>,
    ) -> SwarmResult<Self> {
        config.validate()?;
        let seeds = SeedTable::shared();
        let builder = ContainerBuilder::new(
            Arc::clone(&network),
            media,
            Arc::clone(&seeds),
            config.media_concurrency,
        );
        let lifecycle = SeedLifecycle::new(
            network,
            Arc::clone(&seeds),
            config.sweep_interval,
            config.idle_ttl,
        );

        Ok(ProxyNode {
            inner: Arc::new(ProxyInner {
                upstream,
                builder,
                lifecycle,
                seeds,
                probes: AtomicU64::new(0),
                requests: AtomicU64::new(0),
                answered: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                searches: AtomicU64::new(0),
            }),
        })
    }

    /// Serve requests and run the seed lifecycle until `shutdown` flips
    /// to true or the event channel closes
    pub async fn run(self, mut events: EventReceiver, mut shutdown: watch::Receiver<bool>) {
        info!("proxy started");
        let lifecycle = {
            let node = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { node.inner.lifecycle.run(shutdown).await })
        };

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(TransportEvent::Request(request)) => {
                        let node = self.clone();
                        tokio::spawn(async move { node.serve(request).await });
                    }
                    Some(TransportEvent::PeerConnected(peer)) => {
                        debug!(peer = %peer.id, "peer connected");
                    }
                    Some(TransportEvent::PeerClosed(peer)) => {
                        debug!(peer = %peer.id, "peer closed");
                    }
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        lifecycle.abort();
        info!("proxy stopped");
    }

    /// Decode, handle and answer one inbound request
    pub async fn serve(&self, request: InboundRequest) {
        let from = request.from;
        let message = match WireMessage::decode(&request.payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(peer = %from.id, error = %e, "undecodable request");
                return;
            }
        };

        match self.handle_message(message).await {
            Ok(Some(answer)) => match answer.encode() {
                Ok(payload) => {
                    if !request.respond(payload) {
                        debug!(peer = %from.id, "requester went away");
                    }
                }
                Err(e) => warn!(peer = %from.id, error = %e, "cannot encode answer"),
            },
            Ok(None) => {}
            Err(e) => {
                self.inner.failed.fetch_add(1, Ordering::Relaxed);
                warn!(peer = %from.id, error = %e, "request failed");
            }
        }
    }

    /// Answer for `message`, or `None` if it needs none
    pub async fn handle_message(&self, message: WireMessage) -> SwarmResult<Option<WireMessage>> {
        match message {
            WireMessage::Probe => {
                self.inner.probes.fetch_add(1, Ordering::Relaxed);
                Ok(Some(WireMessage::ProxyAck))
            }
            WireMessage::Request(request) => {
                self.inner.requests.fetch_add(1, Ordering::Relaxed);
                let response = self.handle_request(request).await?;
                self.inner.answered.fetch_add(1, Ordering::Relaxed);
                Ok(Some(WireMessage::Response(response)))
            }
            other => {
                debug!(kind = other.name(), "ignoring message");
                Ok(None)
            }
        }
    }

    pub async fn handle_request(&self, request: ProxyRequest) -> SwarmResult<ProxyResponse> {
        let upstream = self.inner.upstream.as_ref();
        match request {
            ProxyRequest::Feed { lang } => {
                let key = ContentKey::feed(lang.as_str(), PeriodKey::today());
                let address = self
                    .inner
                    .builder
                    .build_or_reuse(key, || UpstreamBundle::feed(upstream, &lang))
                    .await?;
                Ok(ProxyResponse::container(&address))
            }
            ProxyRequest::Article { lang, title } => {
                let key = ContentKey::article(lang.as_str(), title.as_str());
                let address = self
                    .inner
                    .builder
                    .build_or_reuse(key, || UpstreamBundle::article(upstream, &lang, &title))
                    .await?;
                Ok(ProxyResponse::container(&address))
            }
            ProxyRequest::Search { lang, query } => {
                self.inner.searches.fetch_add(1, Ordering::Relaxed);
                let pages = upstream.search(&lang, &query).await?;
                ProxyResponse::search(pages)
            }
        }
    }

    /// Currently seeded containers
    pub fn seeds(&self) -> Vec<SeedEntry> {
        self.inner.seeds.lock().entries()
    }

    pub fn stats(&self) -> ProxyStats {
        let inner = &self.inner;
        ProxyStats {
            probes: inner.probes.load(Ordering::Relaxed),
            requests: inner.requests.load(Ordering::Relaxed),
            answered: inner.answered.load(Ordering::Relaxed),
            failed: inner.failed.load(Ordering::Relaxed),
            searches: inner.searches.load(Ordering::Relaxed),
            seeds: inner.seeds.lock().len(),
            retired: inner.lifecycle.retired(),
            builds: inner.builder.stats(),
        }
    }
}
