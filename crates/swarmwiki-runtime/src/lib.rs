//! SwarmWiki Runtime - the two swarm roles
//!
//! A client never talks to the upstream source. It fans each request out
//! to every proxy it knows, trusts the answer a quorum agrees on, and pulls
//! the referenced container from the content network:
//!
//! 1. Queue the request until at least one proxy is known
//! 2. Broadcast it to every registered proxy
//! 3. Tally answers by hash; deliver the first hash to reach quorum
//! 4. Fetch and decode the container at that address
//! 5. Cache the result under its content key
//!
//! A proxy builds each container once per content key, keeps seeding it
//! while peers pull from it, and retires idle containers and yesterday's
//! feeds on a timer.

pub mod config;
pub mod telemetry;
pub mod registry;
pub mod queue;
pub mod consensus;
pub mod fetcher;
pub mod client;
pub mod bundle;
pub mod builder;
pub mod seeds;
pub mod proxy;

pub use config::*;
pub use telemetry::*;
pub use registry::*;
pub use queue::*;
pub use consensus::*;
pub use fetcher::*;
pub use client::*;
pub use bundle::*;
pub use builder::*;
pub use seeds::*;
pub use proxy::*;
