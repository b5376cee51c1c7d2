//! Pending requests
//!
//! A request is owned by exactly one place at a time: the queue while no
//! proxy is known, then its broadcast task until it resolves or is dropped.

use std::collections::VecDeque;

use tokio::sync::oneshot;

use swarmwiki_core::{ProxyRequest, ProxyResponse, RequestId, SwarmError, SwarmResult};

use crate::consensus::ResponseTally;
use crate::registry::ProxyRegistry;

/// Lifecycle of one request
#[derive(Debug)]
pub enum RequestPhase {
    /// Waiting for the first proxy
    Queued,
    /// Sent to every proxy; answers are being counted
    Broadcasting(ResponseTally),
    /// An answer reached quorum and was delivered
    Resolved,
}

/// What happened to one counted answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Counted, quorum not reached yet
    Counted,
    /// This answer completed the quorum for `hash`
    Resolved { hash: String },
    /// The request had already resolved
    Late,
}

/// A request together with the channel its answer goes to
#[derive(Debug)]
pub struct PendingRequest {
    id: RequestId,
    request: ProxyRequest,
    phase: RequestPhase,
    reply: Option<oneshot::Sender<ProxyResponse>>,
}

impl PendingRequest {
    pub fn new(id: RequestId, request: ProxyRequest, reply: oneshot::Sender<ProxyResponse>) -> Self {
        PendingRequest {
            id,
            request,
            phase: RequestPhase::Queued,
            reply: Some(reply),
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn request(&self) -> &ProxyRequest {
        &self.request
    }

    pub fn phase(&self) -> &RequestPhase {
        &self.phase
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.phase, RequestPhase::Resolved)
    }

    /// The requester stopped waiting
    pub fn is_abandoned(&self) -> bool {
        self.reply.as_ref().map_or(true, |tx| tx.is_closed())
    }

    /// Completes when the requester stops waiting. Never completes once
    /// the answer has been delivered.
    pub async fn abandoned(&mut self) {
        match self.reply.as_mut() {
            Some(tx) => tx.closed().await,
            None => std::future::pending().await,
        }
    }

    /// Move from `Queued` to `Broadcasting`
    pub fn begin_broadcast(&mut self, quorum: usize) {
        if matches!(self.phase, RequestPhase::Queued) {
            self.phase = RequestPhase::Broadcasting(ResponseTally::new(quorum));
        }
    }

    /// Count one verified answer, delivering it if it completes a quorum
    pub fn record(&mut self, response: ProxyResponse) -> VoteOutcome {
        let RequestPhase::Broadcasting(tally) = &mut self.phase else {
            return VoteOutcome::Late;
        };
        let Some(winner) = tally.record(response) else {
            return VoteOutcome::Counted;
        };

        let hash = winner.hash.clone();
        self.phase = RequestPhase::Resolved;
        if let Some(reply) = self.reply.take() {
            // A requester that gave up in the meantime is not an error
            let _ = reply.send(winner);
        }
        VoteOutcome::Resolved { hash }
    }
}

/// FIFO of requests waiting for the first proxy
#[derive(Debug)]
pub struct RequestQueue {
    pending: VecDeque<PendingRequest>,
    capacity: usize,
}

impl RequestQueue {
    pub fn new(capacity: usize) -> Self {
        RequestQueue {
            pending: VecDeque::new(),
            capacity,
        }
    }

    /// Append `request`. Abandoned requests are purged before the
    /// capacity check.
    pub fn enqueue(&mut self, request: PendingRequest) -> SwarmResult<()> {
        if self.pending.len() >= self.capacity {
            self.pending.retain(|pending| !pending.is_abandoned());
        }
        if self.pending.len() >= self.capacity {
            return Err(SwarmError::QueueFull(self.pending.len()));
        }
        self.pending.push_back(request);
        Ok(())
    }

    /// Hand over every waiting request, oldest first.
    ///
    /// Does nothing while `proxies` is empty. Requests whose caller has
    /// gone away are dropped here instead of being broadcast.
    pub fn drain(&mut self, proxies: &ProxyRegistry) -> Vec<PendingRequest> {
        if proxies.is_empty() {
            return Vec::new();
        }
        self.pending
            .drain(..)
            .filter(|pending| !pending.is_abandoned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
