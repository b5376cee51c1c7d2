//! In-process transport and content network
//!
//! `MemoryHub` is a switchboard: every joined peer gets a `MemoryTransport`
//! and an event channel, and the hub wires connections between them.
//! `MemoryContentNetwork` is a shared seeding store; clones are handles to
//! the same swarm, so one node publishes and another fetches.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use swarmwiki_core::{ConnectionId, ContentAddress, PeerId, SwarmError, SwarmResult};

use crate::{
    Container, ContainerFile, ContentNetwork, EventReceiver, EventSender, InboundRequest,
    NamedFile, PeerHandle, TransferActivity, Transport, TransportEvent,
};

// ============================================================================
// TRANSPORT
// ============================================================================

/// One direction of a connection
#[derive(Debug, Clone, Copy)]
struct Link {
    local: PeerId,
    remote: PeerId,
    /// The remote side's id for the same connection
    peer_conn: ConnectionId,
}

#[derive(Default)]
struct HubState {
    endpoints: HashMap<PeerId, EventSender>,
    links: HashMap<ConnectionId, Link>,
    /// Flips to true when the connection closes; shared by both ends
    closing: HashMap<ConnectionId, Arc<watch::Sender<bool>>>,
    next_conn: u64,
}

impl HubState {
    fn notify(&self, peer: PeerId, event: TransportEvent) {
        if let Some(events) = self.endpoints.get(&peer) {
            // Receiver gone means the peer stopped listening
            let _ = events.send(event);
        }
    }
}

/// In-process switchboard between simulated peers
#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join with a random identity
    pub fn join(&self) -> (MemoryTransport, EventReceiver) {
        self.join_as(PeerId::random())
    }

    /// Join with a chosen identity, replacing any previous endpoint for it
    pub fn join_as(&self, id: PeerId) -> (MemoryTransport, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().endpoints.insert(id, tx);
        let transport = MemoryTransport {
            id,
            hub: self.clone(),
        };
        (transport, rx)
    }

    /// Open a connection between two joined peers.
    ///
    /// Returns `a`'s handle to `b` and `b`'s handle to `a`. Connecting the
    /// same pair twice yields a second, distinct connection.
    pub fn connect(&self, a: PeerId, b: PeerId) -> SwarmResult<(PeerHandle, PeerHandle)> {
        let mut state = self.state.lock();
        for id in [a, b] {
            if !state.endpoints.contains_key(&id) {
                return Err(SwarmError::TransportError(format!("unknown peer {id}")));
            }
        }

        let a_conn = ConnectionId::new(state.next_conn);
        let b_conn = ConnectionId::new(state.next_conn + 1);
        state.next_conn += 2;

        state.links.insert(
            a_conn,
            Link {
                local: a,
                remote: b,
                peer_conn: b_conn,
            },
        );
        state.links.insert(
            b_conn,
            Link {
                local: b,
                remote: a,
                peer_conn: a_conn,
            },
        );

        let closing = Arc::new(watch::channel(false).0);
        state.closing.insert(a_conn, Arc::clone(&closing));
        state.closing.insert(b_conn, closing);

        let a_side = PeerHandle::new(b, a_conn);
        let b_side = PeerHandle::new(a, b_conn);
        state.notify(a, TransportEvent::PeerConnected(a_side));
        state.notify(b, TransportEvent::PeerConnected(b_side));
        tracing::debug!(%a, %b, %a_conn, %b_conn, "memory link up");
        Ok((a_side, b_side))
    }

    /// Close a connection from either side; both ends see `PeerClosed`
    /// and sends still waiting on it fail
    pub fn close(&self, conn: ConnectionId) {
        let mut state = self.state.lock();
        let Some(link) = state.links.remove(&conn) else {
            return;
        };
        state.links.remove(&link.peer_conn);
        state.closing.remove(&link.peer_conn);
        if let Some(closing) = state.closing.remove(&conn) {
            closing.send_replace(true);
        }

        state.notify(
            link.local,
            TransportEvent::PeerClosed(PeerHandle::new(link.remote, conn)),
        );
        state.notify(
            link.remote,
            TransportEvent::PeerClosed(PeerHandle::new(link.local, link.peer_conn)),
        );
        tracing::debug!(local = %link.local, remote = %link.remote, %conn, "memory link down");
    }

    /// Drop a peer from the hub, closing all of its connections
    pub fn leave(&self, id: PeerId) {
        let conns: Vec<ConnectionId> = self
            .state
            .lock()
            .links
            .iter()
            .filter(|(_, link)| link.local == id)
            .map(|(conn, _)| *conn)
            .collect();
        for conn in conns {
            self.close(conn);
        }
        self.state.lock().endpoints.remove(&id);
    }

    /// Number of open connections (each counted once)
    pub fn connection_count(&self) -> usize {
        self.state.lock().links.len() / 2
    }

    fn deliver(
        &self,
        from: PeerId,
        to: PeerHandle,
        payload: Bytes,
    ) -> SwarmResult<(oneshot::Receiver<Bytes>, watch::Receiver<bool>)> {
        let state = self.state.lock();
        let link = state
            .links
            .get(&to.conn)
            .filter(|link| link.local == from && link.remote == to.id)
            .copied()
            .ok_or(SwarmError::ConnectionClosed(to.conn))?;

        let events = state
            .endpoints
            .get(&to.id)
            .ok_or_else(|| SwarmError::TransportError(format!("peer {} left", to.id)))?;

        let closed = state
            .closing
            .get(&to.conn)
            .map(|closing| closing.subscribe())
            .ok_or(SwarmError::ConnectionClosed(to.conn))?;

        let (reply, answer) = oneshot::channel();
        let request = InboundRequest::new(PeerHandle::new(from, link.peer_conn), payload, reply);
        events
            .send(TransportEvent::Request(request))
            .map_err(|_| SwarmError::TransportError(format!("peer {} not listening", to.id)))?;
        Ok((answer, closed))
    }
}

/// A peer's handle onto a `MemoryHub`
#[derive(Clone)]
pub struct MemoryTransport {
    id: PeerId,
    hub: MemoryHub,
}

impl MemoryTransport {
    pub fn hub(&self) -> &MemoryHub {
        &self.hub
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_id(&self) -> PeerId {
        self.id
    }

    async fn send(&self, peer: PeerHandle, payload: Bytes) -> SwarmResult<Bytes> {
        let (answer, mut closed) = self.hub.deliver(self.id, peer, payload)?;
        tokio::select! {
            answer = answer => answer.map_err(|_| {
                SwarmError::TransportError(format!("peer {} dropped the request", peer.id))
            }),
            _ = closed.wait_for(|closed| *closed) => Err(SwarmError::ConnectionClosed(peer.conn)),
        }
    }

    fn disconnect(&self, peer: PeerHandle) {
        self.hub.close(peer.conn);
    }
}

// ============================================================================
// CONTENT NETWORK
// ============================================================================

struct StoredContainer {
    name: String,
    files: Vec<NamedFile>,
    /// Number of live publications
    seeders: usize,
}

struct SwarmStore {
    containers: HashMap<ContentAddress, StoredContainer>,
    publishes: u64,
    fetches: u64,
}

/// Shared in-process seeding store
#[derive(Clone)]
pub struct MemoryContentNetwork {
    store: Arc<Mutex<SwarmStore>>,
    activity: broadcast::Sender<TransferActivity>,
}

impl Default for MemoryContentNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryContentNetwork {
    pub fn new() -> Self {
        let (activity, _) = broadcast::channel(256);
        MemoryContentNetwork {
            store: Arc::new(Mutex::new(SwarmStore {
                containers: HashMap::new(),
                publishes: 0,
                fetches: 0,
            })),
            activity,
        }
    }

    /// Address of a bundle: SHA-256 over its name and its files in name order
    pub fn address_of(name: &str, files: &[NamedFile]) -> ContentAddress {
        let mut sorted: Vec<&NamedFile> = files.iter().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));

        let mut hasher = Sha256::new();
        hasher.update((name.len() as u64).to_le_bytes());
        hasher.update(name.as_bytes());
        for file in sorted {
            hasher.update((file.name.len() as u64).to_le_bytes());
            hasher.update(file.name.as_bytes());
            hasher.update((file.data.len() as u64).to_le_bytes());
            hasher.update(&file.data);
        }
        ContentAddress::from_digest(&hasher.finalize())
    }

    /// Whether anyone is still seeding `address`
    pub fn is_seeded(&self, address: &ContentAddress) -> bool {
        self.store.lock().containers.contains_key(address)
    }

    /// Number of containers currently seeded
    pub fn seeded_count(&self) -> usize {
        self.store.lock().containers.len()
    }

    /// Total `publish` calls so far
    pub fn publish_count(&self) -> u64 {
        self.store.lock().publishes
    }

    /// Total successful `fetch` calls so far
    pub fn fetch_count(&self) -> u64 {
        self.store.lock().fetches
    }
}

#[async_trait]
impl ContentNetwork for MemoryContentNetwork {
    async fn publish(&self, name: &str, files: Vec<NamedFile>) -> SwarmResult<ContentAddress> {
        let address = Self::address_of(name, &files);
        let mut store = self.store.lock();
        store.publishes += 1;
        store
            .containers
            .entry(address.clone())
            .and_modify(|c| c.seeders += 1)
            .or_insert_with(|| StoredContainer {
                name: name.to_string(),
                files,
                seeders: 1,
            });
        Ok(address)
    }

    async fn fetch(&self, address: &ContentAddress) -> SwarmResult<Container> {
        let container = {
            let mut store = self.store.lock();
            let stored = store
                .containers
                .get(address)
                .ok_or_else(|| SwarmError::ContainerNotFound(address.clone()))?;

            let files: Vec<Arc<dyn ContainerFile>> = stored
                .files
                .iter()
                .map(|f| {
                    Arc::new(MemoryFile {
                        name: f.name.clone(),
                        data: f.data.clone(),
                    }) as Arc<dyn ContainerFile>
                })
                .collect();
            let container = Container {
                address: address.clone(),
                name: stored.name.clone(),
                files,
            };
            store.fetches += 1;
            container
        };

        let bytes = container.files.iter().map(|f| f.len()).sum();
        // No subscribers is fine: nobody tracks activity
        let _ = self.activity.send(TransferActivity {
            address: address.clone(),
            bytes,
        });
        Ok(container)
    }

    async fn destroy(&self, address: &ContentAddress) {
        let mut store = self.store.lock();
        let gone = match store.containers.get_mut(address) {
            Some(stored) => {
                stored.seeders = stored.seeders.saturating_sub(1);
                stored.seeders == 0
            }
            None => false,
        };
        if gone {
            store.containers.remove(address);
        }
    }

    fn activity(&self) -> broadcast::Receiver<TransferActivity> {
        self.activity.subscribe()
    }
}

/// Buffer-backed member file
#[derive(Debug)]
struct MemoryFile {
    name: String,
    data: Bytes,
}

#[async_trait]
impl ContainerFile for MemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read(&self) -> SwarmResult<Bytes> {
        Ok(self.data.clone())
    }
}
