//! SwarmWiki Test Harness - in-process swarms
//!
//! This crate provides:
//! - A deterministic upstream with call counters, a gate and failure injection
//! - Scripted peers that lie, stall, send garbage or refuse to be proxies
//! - A `Swarm` builder wiring real clients and proxies over a memory hub
//! - End-to-end scenarios for queueing, quorum, caching and seed retirement

pub mod upstream;
pub mod scripted;
pub mod harness;
pub mod integration;

pub use upstream::*;
pub use scripted::*;
pub use harness::*;
