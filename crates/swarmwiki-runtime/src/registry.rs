//! Known proxies
//!
//! One entry per remote identity. A second connection from a peer that is
//! already registered is reported as a duplicate and not stored, and a
//! close only removes the entry if it came from the registered connection.

use std::collections::HashMap;

use tokio::time::Instant;

use swarmwiki_core::PeerId;
use swarmwiki_transport::PeerHandle;

/// A peer that answered our probe as a proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyPeer {
    pub handle: PeerHandle,
    pub joined_at: Instant,
}

/// Result of [`ProxyRegistry::add`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Stored; `first` is set when the registry was empty before
    Added { first: bool },
    /// The identity is already registered over `existing`
    Duplicate { existing: PeerHandle },
}

/// Proxy set keyed by peer identity
#[derive(Debug, Default)]
pub struct ProxyRegistry {
    peers: HashMap<PeerId, ProxyPeer>,
}

impl ProxyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, handle: PeerHandle) -> AddOutcome {
        if let Some(existing) = self.peers.get(&handle.id) {
            return AddOutcome::Duplicate {
                existing: existing.handle,
            };
        }

        let first = self.peers.is_empty();
        self.peers.insert(
            handle.id,
            ProxyPeer {
                handle,
                joined_at: Instant::now(),
            },
        );
        AddOutcome::Added { first }
    }

    /// Remove by identity regardless of connection
    pub fn remove(&mut self, id: &PeerId) -> Option<ProxyPeer> {
        self.peers.remove(id)
    }

    /// Remove `handle.id` only if it is registered over `handle.conn`
    pub fn remove_connection(&mut self, handle: PeerHandle) -> Option<ProxyPeer> {
        match self.peers.get(&handle.id) {
            Some(peer) if peer.handle.conn == handle.conn => self.peers.remove(&handle.id),
            _ => None,
        }
    }

    pub fn get(&self, id: &PeerId) -> Option<&ProxyPeer> {
        self.peers.get(id)
    }

    /// Snapshot of all registered proxies
    pub fn all(&self) -> Vec<ProxyPeer> {
        self.peers.values().copied().collect()
    }

    /// Connections to broadcast over
    pub fn handles(&self) -> Vec<PeerHandle> {
        self.peers.values().map(|p| p.handle).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
