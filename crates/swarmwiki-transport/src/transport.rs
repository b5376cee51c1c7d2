//! Peer transport seam
//!
//! A transport surfaces peer connect/close events and incoming requests on
//! one event channel, and offers a point-to-point `send` whose answer may
//! never arrive. There is no built-in timeout: callers that need one
//! impose it themselves.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use swarmwiki_core::{ConnectionId, PeerId, SwarmResult};

/// A live connection to a peer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PeerHandle {
    /// Stable identity of the remote peer
    pub id: PeerId,
    /// The connection this handle speaks over
    pub conn: ConnectionId,
}

impl PeerHandle {
    pub fn new(id: PeerId, conn: ConnectionId) -> Self {
        PeerHandle { id, conn }
    }
}

/// A request from a remote peer waiting for our answer
#[derive(Debug)]
pub struct InboundRequest {
    /// Who asked, and over which connection
    pub from: PeerHandle,
    pub payload: Bytes,
    reply: oneshot::Sender<Bytes>,
}

impl InboundRequest {
    pub fn new(from: PeerHandle, payload: Bytes, reply: oneshot::Sender<Bytes>) -> Self {
        InboundRequest {
            from,
            payload,
            reply,
        }
    }

    /// Answer the request. Returns false if the requester is gone.
    pub fn respond(self, payload: Bytes) -> bool {
        self.reply.send(payload).is_ok()
    }
}

/// Everything a transport reports to its owner
#[derive(Debug)]
pub enum TransportEvent {
    PeerConnected(PeerHandle),
    PeerClosed(PeerHandle),
    Request(InboundRequest),
}

/// Event channel receiver handed out when a transport is created
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Event channel sender held by transport implementations
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Point-to-point messaging between swarm peers
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Our own identity on the swarm
    fn local_id(&self) -> PeerId;

    /// Send `payload` to `peer` and wait for its answer.
    ///
    /// Resolves at most once. A peer that keeps the request without
    /// answering leaves this pending forever.
    async fn send(&self, peer: PeerHandle, payload: Bytes) -> SwarmResult<Bytes>;

    /// Tear down one connection
    fn disconnect(&self, peer: PeerHandle);
}
