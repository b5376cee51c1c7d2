//! In-process swarm builder
//!
//! Every node joins one `MemoryHub` and shares one `MemoryContentNetwork`.
//! Nodes run on spawned tasks and stop when the swarm is shut down.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use swarmwiki_core::PeerId;
use swarmwiki_runtime::{ClientConfig, ClientNode, ProxyConfig, ProxyNode};
use swarmwiki_transport::{
    MemoryContentNetwork, MemoryHub, MemoryTransport, PeerHandle, Transport,
};

use crate::scripted::{run_scripted, Behaviour};
use crate::upstream::FakeUpstream;

pub type TestClient = ClientNode<MemoryTransport, MemoryContentNetwork>;
pub type TestProxy = ProxyNode<MemoryContentNetwork, FakeUpstream, FakeUpstream>;

/// How long [`wait_until`] polls before giving up
pub const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// A set of nodes wired over one memory hub
pub struct Swarm {
    pub hub: MemoryHub,
    pub network: Arc<MemoryContentNetwork>,
    /// Upstream shared by proxies spawned without their own
    pub upstream: Arc<FakeUpstream>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Default for Swarm {
    fn default() -> Self {
        Self::new()
    }
}

impl Swarm {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Swarm {
            hub: MemoryHub::new(),
            network: Arc::new(MemoryContentNetwork::new()),
            upstream: Arc::new(FakeUpstream::new()),
            shutdown,
            tasks: Vec::new(),
        }
    }

    /// Start a proxy fed by the shared upstream
    pub fn spawn_proxy(&mut self, config: ProxyConfig) -> (PeerId, TestProxy) {
        let upstream = Arc::clone(&self.upstream);
        self.spawn_proxy_with(config, upstream)
    }

    /// Start a proxy fed by its own upstream
    pub fn spawn_proxy_with(
        &mut self,
        config: ProxyConfig,
        upstream: Arc<FakeUpstream>,
    ) -> (PeerId, TestProxy) {
        let (transport, events) = self.hub.join();
        let id = transport.local_id();
        let proxy = ProxyNode::new(
            config,
            Arc::clone(&self.network),
            Arc::clone(&upstream),
            upstream,
        )
        .expect("valid proxy config");

        let node = proxy.clone();
        let shutdown = self.shutdown.subscribe();
        self.tasks
            .push(tokio::spawn(async move { node.run(events, shutdown).await }));
        (id, proxy)
    }

    pub fn spawn_client(&mut self, config: ClientConfig) -> (PeerId, TestClient) {
        let (transport, events) = self.hub.join();
        let id = transport.local_id();
        let client = ClientNode::new(config, Arc::new(transport), Arc::clone(&self.network))
            .expect("valid client config");

        let node = client.clone();
        self.tasks.push(tokio::spawn(async move { node.run(events).await }));
        (id, client)
    }

    pub fn spawn_scripted(&mut self, behaviour: Behaviour) -> PeerId {
        let (transport, events) = self.hub.join();
        let network = Arc::clone(&self.network);
        self.tasks
            .push(tokio::spawn(run_scripted(behaviour, network, events)));
        transport.local_id()
    }

    /// Connect two peers; returns `a`'s handle to `b` and `b`'s to `a`
    pub fn connect(&self, a: PeerId, b: PeerId) -> (PeerHandle, PeerHandle) {
        self.hub.connect(a, b).expect("both peers joined")
    }

    /// Stop every proxy and abort every other task
    pub fn shutdown(self) {
        self.shutdown.send_replace(true);
        for task in self.tasks {
            task.abort();
        }
    }
}

/// Client config with a short request timeout
pub fn quick_client(quorum: usize) -> ClientConfig {
    ClientConfig {
        quorum,
        request_timeout: Some(Duration::from_millis(500)),
        broadcast_linger: Duration::from_millis(500),
        handshake_timeout: Duration::from_secs(1),
        ..ClientConfig::default()
    }
}

/// Poll `condition` until it holds; panics after [`WAIT_LIMIT`]
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Connect `client` to every peer in `proxies` and wait until it has
/// registered `expected` of them
pub async fn join_proxies(
    swarm: &Swarm,
    client: (PeerId, &TestClient),
    proxies: &[PeerId],
    expected: usize,
) {
    let (client_id, node) = client;
    for proxy in proxies {
        swarm.connect(client_id, *proxy);
    }
    wait_until("proxies to register", || node.proxy_count() == expected).await;
}
