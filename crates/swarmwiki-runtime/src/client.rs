//! Client role
//!
//! The client probes every peer that connects. Peers that acknowledge are
//! registered as proxies, and each registration drains the request queue
//! into the broadcaster. Fetched feeds and articles are cached by content
//! key for the life of the node; search results are not cached.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use swarmwiki_core::{
    files, ContentKey, PeriodKey, ProxyRequest, ProxyResponse, RequestId, SwarmError,
    SwarmResult, WireMessage,
};
use swarmwiki_transport::{ContentNetwork, EventReceiver, PeerHandle, Transport, TransportEvent};

use crate::config::ClientConfig;
use crate::consensus::{BroadcastStats, Broadcaster};
use crate::fetcher::{ContentFetcher, EmptyValue, ExpectedFile, MediaHandle, ResolvedContainer};
use crate::queue::{PendingRequest, RequestQueue};
use crate::registry::{AddOutcome, ProxyPeer, ProxyRegistry};

const FEED_FILES: &[ExpectedFile] = &[
    ExpectedFile::new(files::TFA, EmptyValue::Mapping),
    ExpectedFile::new(files::MOST_READ, EmptyValue::Mapping),
];

const ARTICLE_FILES: &[ExpectedFile] = &[
    ExpectedFile::new(files::ARTICLE, EmptyValue::Mapping),
    ExpectedFile::new(files::REVISIONS, EmptyValue::Sequence),
    ExpectedFile::new(files::LANGUAGES, EmptyValue::Sequence),
];

/// A day's feed as delivered by the swarm
#[derive(Debug, Clone)]
pub struct Feed {
    pub tfa: Value,
    pub mostread: Value,
    pub media: Vec<MediaHandle>,
}

impl Feed {
    fn from_container(mut container: ResolvedContainer) -> Self {
        Feed {
            tfa: container.take_record(files::TFA),
            mostread: container.take_record(files::MOST_READ),
            media: container.media(),
        }
    }
}

/// An article as delivered by the swarm
#[derive(Debug, Clone)]
pub struct Article {
    /// Container name, the article's normalized title
    pub title: String,
    pub sections: Value,
    pub revisions: Value,
    /// Empty when the article exists in no other language
    pub languages: Value,
    pub media: Vec<MediaHandle>,
}

impl Article {
    fn from_container(mut container: ResolvedContainer) -> Self {
        Article {
            title: container.name.clone(),
            sections: container.take_record(files::ARTICLE),
            revisions: container.take_record(files::REVISIONS),
            languages: container.take_record(files::LANGUAGES),
            media: container.media(),
        }
    }
}

#[derive(Debug, Clone)]
enum CachedContent {
    Feed(Arc<Feed>),
    Article(Arc<Article>),
}

/// Client counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub requests: u64,
    /// Requests that had to wait for the first proxy
    pub queued: u64,
    pub cache_hits: u64,
    pub containers_fetched: u64,
    pub proxies_added: u64,
    pub duplicate_proxies: u64,
    pub proxies_lost: u64,
    pub broadcast: BroadcastStats,
}

struct ClientState {
    registry: ProxyRegistry,
    queue: RequestQueue,
    cache: HashMap<ContentKey, CachedContent>,
    stats: ClientStats,
}

struct ClientInner<T: Transport, C: ContentNetwork> {
    config: ClientConfig,
    transport: Arc<T>,
    broadcaster: Broadcaster<T>,
    fetcher: ContentFetcher<C>,
    state: Mutex<ClientState>,
    next_request: AtomicU64,
}

/// A swarm client. Cheap to clone; clones share all state.
pub struct ClientNode<T: Transport, C: ContentNetwork> {
    inner: Arc<ClientInner<T, C>>,
}

impl<T: Transport, C: ContentNetwork> Clone for ClientNode<T, C> {
    fn clone(&self) -> Self {
        ClientNode {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport, C: ContentNetwork> ClientNode<T, C> {
    pub fn new(config: ClientConfig, transport: Arc<T>, network: Arc<C>) -> SwarmResult<Self> {
        config.validate()?;
        let broadcaster = Broadcaster::new(
            Arc::clone(&transport),
            config.quorum,
            config.broadcast_linger,
        );
        let state = ClientState {
            registry: ProxyRegistry::new(),
            queue: RequestQueue::new(config.max_queued_requests),
            cache: HashMap::new(),
            stats: ClientStats::default(),
        };

        Ok(ClientNode {
            inner: Arc::new(ClientInner {
                config,
                transport,
                broadcaster,
                fetcher: ContentFetcher::new(network),
                state: Mutex::new(state),
                next_request: AtomicU64::new(1),
            }),
        })
    }

    /// Process transport events until the channel closes
    pub async fn run(self, mut events: EventReceiver) {
        info!(peer = %self.inner.transport.local_id(), "client started");
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        debug!("client event channel closed");
    }

    pub fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::PeerConnected(peer) => {
                let node = self.clone();
                tokio::spawn(async move { node.handshake(peer).await });
            }
            TransportEvent::PeerClosed(peer) => self.on_peer_closed(peer),
            TransportEvent::Request(request) => {
                // Clients serve nobody; dropping fails the sender fast
                debug!(peer = %request.from.id, "ignoring request to client");
            }
        }
    }

    async fn handshake(&self, peer: PeerHandle) {
        match self.probe(peer).await {
            Ok(true) => self.on_proxy(peer),
            Ok(false) => debug!(peer = %peer.id, "peer is not a proxy"),
            Err(e) => debug!(peer = %peer.id, error = %e, "handshake failed"),
        }
    }

    /// Ask `peer` whether it is a proxy
    async fn probe(&self, peer: PeerHandle) -> SwarmResult<bool> {
        let limit = self.inner.config.handshake_timeout;
        let probe = WireMessage::Probe.encode()?;
        let answer = tokio::time::timeout(limit, self.inner.transport.send(peer, probe))
            .await
            .map_err(|_| SwarmError::HandshakeTimeout(limit))??;
        Ok(matches!(WireMessage::decode(&answer)?, WireMessage::ProxyAck))
    }

    fn on_proxy(&self, peer: PeerHandle) {
        let outcome = {
            let mut state = self.inner.state.lock();
            let outcome = state.registry.add(peer);
            match outcome {
                AddOutcome::Added { .. } => state.stats.proxies_added += 1,
                AddOutcome::Duplicate { .. } => state.stats.duplicate_proxies += 1,
            }
            outcome
        };

        match outcome {
            AddOutcome::Added { first } => {
                info!(peer = %peer.id, first, proxies = self.proxy_count(), "proxy registered");
                self.drain();
            }
            AddOutcome::Duplicate { existing } => {
                warn!(
                    peer = %peer.id,
                    kept = %existing.conn,
                    dropped = %peer.conn,
                    "duplicate proxy connection"
                );
                self.inner.transport.disconnect(peer);
            }
        }
    }

    fn on_peer_closed(&self, peer: PeerHandle) {
        let removed = {
            let mut state = self.inner.state.lock();
            let removed = state.registry.remove_connection(peer);
            if removed.is_some() {
                state.stats.proxies_lost += 1;
            }
            removed
        };
        if removed.is_some() {
            info!(peer = %peer.id, proxies = self.proxy_count(), "proxy left");
        }
    }

    /// Broadcast everything queued, if any proxy is known
    fn drain(&self) {
        let (peers, batch) = {
            let mut state = self.inner.state.lock();
            let ClientState {
                registry, queue, ..
            } = &mut *state;
            let batch = queue.drain(registry);
            (registry.handles(), batch)
        };
        for pending in batch {
            self.inner.broadcaster.dispatch(pending, peers.clone());
        }
    }

    /// Send `request` to the swarm and wait for a quorum answer.
    ///
    /// Waits for the first proxy if none is known yet. Fails with
    /// `QuorumTimeout` once the configured request timeout elapses; with no
    /// timeout configured a request that never reaches quorum never returns.
    pub async fn broadcast(&self, request: ProxyRequest) -> SwarmResult<ProxyResponse> {
        let id = RequestId::new(self.inner.next_request.fetch_add(1, Ordering::Relaxed));
        let (reply, answer) = oneshot::channel();
        {
            let mut state = self.inner.state.lock();
            state.queue.enqueue(PendingRequest::new(id, request, reply))?;
            state.stats.requests += 1;
            if state.registry.is_empty() {
                state.stats.queued += 1;
                debug!(request = %id, "no proxy yet, request queued");
            }
        }
        self.drain();

        let settled = async move {
            match answer.await {
                Ok(response) => response,
                // Broadcast ended without quorum; nothing will ever arrive
                Err(_) => std::future::pending().await,
            }
        };
        match self.inner.config.request_timeout {
            Some(limit) => tokio::time::timeout(limit, settled)
                .await
                .map_err(|_| SwarmError::QuorumTimeout(limit)),
            None => Ok(settled.await),
        }
    }

    /// Today's feed for `lang`
    pub async fn fetch_feed(&self, lang: &str) -> SwarmResult<Arc<Feed>> {
        let key = ContentKey::feed(lang, PeriodKey::today());
        if let Some(CachedContent::Feed(feed)) = self.cached_content(&key) {
            return Ok(feed);
        }

        let response = self.broadcast(ProxyRequest::Feed { lang: lang.to_string() }).await?;
        let container = self.resolve(&response, FEED_FILES).await?;
        let feed = Arc::new(Feed::from_container(container));
        self.store(key, CachedContent::Feed(Arc::clone(&feed)));
        Ok(feed)
    }

    pub async fn fetch_article(&self, lang: &str, title: &str) -> SwarmResult<Arc<Article>> {
        let key = ContentKey::article(lang, title);
        if let Some(CachedContent::Article(article)) = self.cached_content(&key) {
            return Ok(article);
        }

        let request = ProxyRequest::Article {
            lang: lang.to_string(),
            title: title.to_string(),
        };
        let response = self.broadcast(request).await?;
        let container = self.resolve(&response, ARTICLE_FILES).await?;
        let article = Arc::new(Article::from_container(container));
        self.store(key, CachedContent::Article(Arc::clone(&article)));
        Ok(article)
    }

    /// Search result pages, as agreed by a quorum of proxies
    pub async fn search(&self, lang: &str, query: &str) -> SwarmResult<Vec<Value>> {
        let request = ProxyRequest::Search {
            lang: lang.to_string(),
            query: query.to_string(),
        };
        let response = self.broadcast(request).await?;
        response.pages.ok_or_else(|| SwarmError::UnexpectedMessage {
            expected: "search results",
            actual: "container address".into(),
        })
    }

    async fn resolve(
        &self,
        response: &ProxyResponse,
        expected: &[ExpectedFile],
    ) -> SwarmResult<ResolvedContainer> {
        let address = response.content_address()?;
        let container = self.inner.fetcher.resolve(&address, expected).await?;
        self.inner.state.lock().stats.containers_fetched += 1;
        Ok(container)
    }

    fn cached_content(&self, key: &ContentKey) -> Option<CachedContent> {
        let mut state = self.inner.state.lock();
        let hit = state.cache.get(key).cloned();
        if hit.is_some() {
            state.stats.cache_hits += 1;
            debug!(key = %key, "cache hit");
        }
        hit
    }

    fn store(&self, key: ContentKey, content: CachedContent) {
        self.inner.state.lock().cache.insert(key, content);
    }

    pub fn is_cached(&self, key: &ContentKey) -> bool {
        self.inner.state.lock().cache.contains_key(key)
    }

    pub fn proxies(&self) -> Vec<ProxyPeer> {
        self.inner.state.lock().registry.all()
    }

    pub fn proxy_count(&self) -> usize {
        self.inner.state.lock().registry.len()
    }

    /// Requests waiting for the first proxy
    pub fn queued(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Broadcasts still running
    pub fn in_flight(&self) -> usize {
        self.inner.broadcaster.in_flight()
    }

    pub fn stats(&self) -> ClientStats {
        let mut stats = self.inner.state.lock().stats.clone();
        stats.broadcast = self.inner.broadcaster.stats();
        stats
    }
}
