//! SwarmWiki Core - Fundamental types and primitives
//!
//! This crate defines the types shared by every SwarmWiki role:
//! - Identifiers (PeerId, ConnectionId, RequestId)
//! - Content identity (ContentKey, PeriodKey, ContentAddress)
//! - Client/proxy wire messages
//! - Content hashing and the error taxonomy

pub mod id;
pub mod content;
pub mod message;
pub mod hash;
pub mod error;

pub use id::*;
pub use content::*;
pub use message::*;
pub use hash::*;
pub use error::*;
