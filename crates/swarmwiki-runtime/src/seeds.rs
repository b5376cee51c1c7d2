//! Seeded containers and their retirement
//!
//! Every published container is tracked with the last time a peer pulled
//! from it. A periodic sweep retires:
//!
//! - Entries idle for longer than the configured TTL
//! - Feeds of any period older than the newest one seeded
//!
//! Retired entries leave the table first, then the network is told to stop
//! seeding them, so a request arriving mid-sweep rebuilds instead of
//! receiving an address that is about to disappear.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast::error::RecvError, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use swarmwiki_core::{ContentAddress, ContentKey, PeriodKey};
use swarmwiki_transport::{ContentNetwork, TransferActivity};

/// One seeded container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedEntry {
    pub key: ContentKey,
    pub address: ContentAddress,
    pub last_active: Instant,
}

impl SeedEntry {
    pub fn new(key: ContentKey, address: ContentAddress, now: Instant) -> Self {
        SeedEntry {
            key,
            address,
            last_active: now,
        }
    }
}

/// Seeds by content key
#[derive(Debug, Default)]
pub struct SeedTable {
    entries: HashMap<ContentKey, SeedEntry>,
}

/// Seed table shared between the builder and the lifecycle task
pub type SharedSeeds = Arc<Mutex<SeedTable>>;

impl SeedTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedSeeds {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Register a seed, returning the entry it replaces
    pub fn insert(&mut self, entry: SeedEntry) -> Option<SeedEntry> {
        self.entries.insert(entry.key.clone(), entry)
    }

    pub fn get(&self, key: &ContentKey) -> Option<&SeedEntry> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &ContentKey) -> Option<SeedEntry> {
        self.entries.remove(key)
    }

    /// Mark every entry seeded at `address` as active. Returns how many.
    pub fn touch(&mut self, address: &ContentAddress, now: Instant) -> usize {
        let mut touched = 0;
        for entry in self.entries.values_mut().filter(|e| &e.address == address) {
            entry.last_active = now;
            touched += 1;
        }
        touched
    }

    /// Newest feed period currently seeded
    pub fn latest_period(&self) -> Option<PeriodKey> {
        self.entries.keys().filter_map(|k| k.period()).max().cloned()
    }

    /// Remove and return every entry that should stop seeding at `now`
    pub fn sweep(&mut self, now: Instant, idle_ttl: Duration) -> Vec<SeedEntry> {
        let latest = self.latest_period();
        let retire = |entry: &SeedEntry| {
            let idle = now.saturating_duration_since(entry.last_active) > idle_ttl;
            let stale_feed = match (entry.key.period(), &latest) {
                (Some(period), Some(latest)) => period < latest,
                _ => false,
            };
            idle || stale_feed
        };

        let keys: Vec<ContentKey> = self
            .entries
            .values()
            .filter(|e| retire(*e))
            .map(|e| e.key.clone())
            .collect();
        keys.iter().filter_map(|k| self.entries.remove(k)).collect()
    }

    pub fn entries(&self) -> Vec<SeedEntry> {
        self.entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Periodic seed retirement driven by a timer and upload activity
pub struct SeedLifecycle<C: ContentNetwork> {
    network: Arc<C>,
    seeds: SharedSeeds,
    sweep_interval: Duration,
    idle_ttl: Duration,
    retired: AtomicU64,
}

impl<C: ContentNetwork> SeedLifecycle<C> {
    pub fn new(
        network: Arc<C>,
        seeds: SharedSeeds,
        sweep_interval: Duration,
        idle_ttl: Duration,
    ) -> Self {
        SeedLifecycle {
            network,
            seeds,
            sweep_interval,
            idle_ttl,
            retired: AtomicU64::new(0),
        }
    }

    /// One sweep: retire what is due at `now`. Returns the retired entries.
    pub async fn tick(&self, now: Instant) -> Vec<SeedEntry> {
        let retired = self.seeds.lock().sweep(now, self.idle_ttl);
        for entry in &retired {
            self.network.destroy(&entry.address).await;
            info!(key = %entry.key, address = entry.address.short(), "seed retired");
        }
        self.retired.fetch_add(retired.len() as u64, Ordering::Relaxed);
        retired
    }

    /// Record upload activity
    pub fn touch(&self, activity: &TransferActivity, now: Instant) {
        let touched = self.seeds.lock().touch(&activity.address, now);
        if touched > 0 {
            debug!(address = activity.address.short(), bytes = activity.bytes, "seed active");
        }
    }

    /// Sweep on every interval until `shutdown` flips to true or its
    /// sender is dropped
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut activity = self.network.activity();
        let mut activity_open = true;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(Instant::now()).await;
                }
                seen = activity.recv(), if activity_open => match seen {
                    Ok(seen) => self.touch(&seen, Instant::now()),
                    Err(RecvError::Lagged(missed)) => {
                        debug!(missed, "activity events dropped");
                    }
                    Err(RecvError::Closed) => activity_open = false,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("seed lifecycle stopped");
    }

    pub fn retired(&self) -> u64 {
        self.retired.load(Ordering::Relaxed)
    }
}
