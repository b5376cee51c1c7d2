//! Quorum broadcast
//!
//! Each drained request gets its own task that:
//!
//! - Sends the request to every proxy known at dispatch time
//! - Verifies each answer against the request and drops the ones that fail
//! - Counts answers per hash and delivers the first hash to reach quorum
//! - Stops early if the requester gives up before delivery
//!
//! After delivery the task keeps counting late answers until every send
//! has finished or the linger period passes, then drops the request.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use swarmwiki_core::{ProxyResponse, SwarmResult, WireMessage};
use swarmwiki_transport::{PeerHandle, Transport};

use crate::queue::{PendingRequest, VoteOutcome};

/// Votes per answer hash
#[derive(Debug, Clone)]
pub struct ResponseTally {
    quorum: usize,
    votes: HashMap<String, Vote>,
    total: usize,
    winner: Option<String>,
}

#[derive(Debug, Clone)]
struct Vote {
    count: usize,
    /// First answer seen with this hash; the one delivered
    response: ProxyResponse,
}

impl ResponseTally {
    /// A quorum of 0 is treated as 1
    pub fn new(quorum: usize) -> Self {
        ResponseTally {
            quorum: quorum.max(1),
            votes: HashMap::new(),
            total: 0,
            winner: None,
        }
    }

    /// Count one answer. Returns the winning answer exactly once: on the
    /// vote that brings its hash to quorum.
    pub fn record(&mut self, response: ProxyResponse) -> Option<ProxyResponse> {
        self.total += 1;
        let vote = self
            .votes
            .entry(response.hash.clone())
            .or_insert_with(|| Vote {
                count: 0,
                response,
            });
        vote.count += 1;

        if self.winner.is_none() && vote.count >= self.quorum {
            self.winner = Some(vote.response.hash.clone());
            return Some(vote.response.clone());
        }
        None
    }

    /// Hash that reached quorum, if any
    pub fn winner(&self) -> Option<&str> {
        self.winner.as_deref()
    }

    pub fn count(&self, hash: &str) -> usize {
        self.votes.get(hash).map_or(0, |v| v.count)
    }

    /// Answers counted so far
    pub fn total(&self) -> usize {
        self.total
    }

    /// Distinct hashes seen
    pub fn distinct(&self) -> usize {
        self.votes.len()
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }
}

/// Broadcast counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub broadcasts: u64,
    /// Verified answers counted
    pub votes: u64,
    /// Answers that failed to decode or verify
    pub malformed: u64,
    /// Sends that ended without an answer
    pub unanswered: u64,
    pub resolved: u64,
    /// Answers counted after delivery
    pub late_votes: u64,
    /// Broadcasts where every proxy answered but no hash reached quorum
    pub no_quorum: u64,
    /// Broadcasts stopped because the requester gave up
    pub abandoned: u64,
}

/// Keeps the in-flight gauge accurate however the task ends
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(gauge: &Arc<AtomicUsize>) -> Self {
        gauge.fetch_add(1, Ordering::SeqCst);
        InFlight(Arc::clone(gauge))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

enum Step {
    Vote(PeerHandle, SwarmResult<Bytes>),
    Exhausted,
    Abandoned,
    Expired,
}

/// Fans requests out to proxies and settles them by quorum
pub struct Broadcaster<T: Transport> {
    transport: Arc<T>,
    quorum: usize,
    linger: Duration,
    in_flight: Arc<AtomicUsize>,
    stats: Arc<Mutex<BroadcastStats>>,
}

impl<T: Transport> Broadcaster<T> {
    /// `linger` bounds how long a broadcast task keeps counting late
    /// answers once it has delivered
    pub fn new(transport: Arc<T>, quorum: usize, linger: Duration) -> Self {
        Broadcaster {
            transport,
            quorum: quorum.max(1),
            linger,
            in_flight: Arc::new(AtomicUsize::new(0)),
            stats: Arc::new(Mutex::new(BroadcastStats::default())),
        }
    }

    /// Start broadcasting `pending` to `peers` in the background
    pub fn dispatch(&self, pending: PendingRequest, peers: Vec<PeerHandle>) {
        let guard = InFlight::enter(&self.in_flight);
        let transport = Arc::clone(&self.transport);
        let stats = Arc::clone(&self.stats);
        let quorum = self.quorum;
        let linger = self.linger;

        self.stats.lock().broadcasts += 1;
        tokio::spawn(async move {
            let _guard = guard;
            run_broadcast(transport, pending, peers, quorum, linger, stats).await;
        });
    }

    /// Broadcast tasks still running
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> BroadcastStats {
        self.stats.lock().clone()
    }
}

async fn run_broadcast<T: Transport>(
    transport: Arc<T>,
    mut pending: PendingRequest,
    peers: Vec<PeerHandle>,
    quorum: usize,
    linger: Duration,
    stats: Arc<Mutex<BroadcastStats>>,
) {
    let id = pending.id();
    let payload = match WireMessage::Request(pending.request().clone()).encode() {
        Ok(payload) => payload,
        Err(e) => {
            warn!(request = %id, error = %e, "cannot encode request");
            return;
        }
    };

    pending.begin_broadcast(quorum);
    debug!(request = %id, proxies = peers.len(), quorum, "broadcasting");

    let mut sends: FuturesUnordered<_> = peers
        .into_iter()
        .map(|peer| {
            let transport = Arc::clone(&transport);
            let payload = payload.clone();
            async move { (peer, transport.send(peer, payload).await) }
        })
        .collect();

    // Set on delivery
    let mut deadline: Option<Instant> = None;

    loop {
        let resolved = pending.is_resolved();
        let step = tokio::select! {
            next = sends.next() => match next {
                Some((peer, answer)) => Step::Vote(peer, answer),
                None => Step::Exhausted,
            },
            _ = pending.abandoned(), if !resolved => Step::Abandoned,
            _ = expire(deadline) => Step::Expired,
        };

        match step {
            Step::Vote(peer, Ok(answer)) => {
                let response = match WireMessage::decode_response(&answer, pending.request()) {
                    Ok(response) => response,
                    Err(e) => {
                        stats.lock().malformed += 1;
                        warn!(request = %id, peer = %peer.id, error = %e, "discarding invalid answer");
                        continue;
                    }
                };

                let outcome = pending.record(response);
                let mut stats = stats.lock();
                stats.votes += 1;
                match outcome {
                    VoteOutcome::Counted => debug!(request = %id, peer = %peer.id, "answer counted"),
                    VoteOutcome::Resolved { hash } => {
                        stats.resolved += 1;
                        deadline = Some(Instant::now() + linger);
                        info!(request = %id, hash = %hash, "quorum reached");
                    }
                    VoteOutcome::Late => stats.late_votes += 1,
                }
            }
            Step::Vote(peer, Err(e)) => {
                stats.lock().unanswered += 1;
                debug!(request = %id, peer = %peer.id, error = %e, "no answer");
            }
            Step::Exhausted => {
                if !pending.is_resolved() {
                    stats.lock().no_quorum += 1;
                    warn!(request = %id, "all proxies answered without reaching quorum");
                }
                break;
            }
            Step::Abandoned => {
                stats.lock().abandoned += 1;
                debug!(request = %id, "requester gave up");
                break;
            }
            Step::Expired => {
                debug!(request = %id, resolved = pending.is_resolved(), "broadcast expired");
                break;
            }
        }
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
