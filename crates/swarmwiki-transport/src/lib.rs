//! SwarmWiki Transport Layer - the collaborators the core consumes
//!
//! This crate provides:
//! - The peer transport seam (connect/close events, request/response)
//! - The content network seam (publish/fetch/destroy of named file bundles)
//! - In-process implementations of both for simulation and tests

pub mod transport;
pub mod content;
pub mod memory;

pub use transport::*;
pub use content::*;
pub use memory::{MemoryContentNetwork, MemoryHub, MemoryTransport};
