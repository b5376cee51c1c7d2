//! Error types for SwarmWiki

use std::time::Duration;

use thiserror::Error;

use crate::{ConnectionId, ContentAddress, RequestId};

/// Core SwarmWiki errors
///
/// Payloads are plain strings and ids so a single failure can be handed to
/// every task waiting on the same build.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SwarmError {
    // Wire errors
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Unexpected message: expected {expected}, got {actual}")]
    UnexpectedMessage {
        expected: &'static str,
        actual: String,
    },

    #[error("Response hash mismatch: claimed {claimed}, computed {computed}")]
    HashMismatch { claimed: String, computed: String },

    // Consensus errors
    #[error("Quorum not reached within {0:?}")]
    QuorumTimeout(Duration),

    #[error("Request queue full: {0} requests waiting")]
    QueueFull(usize),

    #[error("Request {0} dropped before resolving")]
    RequestDropped(RequestId),

    // Transport errors
    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Connection {0} is closed")]
    ConnectionClosed(ConnectionId),

    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    // Content network errors
    #[error("Container not found: {0}")]
    ContainerNotFound(ContentAddress),

    #[error("Content network error: {0}")]
    ContentNetwork(String),

    #[error("Invalid container file {name}: {reason}")]
    InvalidFile { name: String, reason: String },

    // Upstream errors
    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Media download failed for {url}: {reason}")]
    MediaFetch { url: String, reason: String },

    // Build errors
    #[error("Build aborted for {key}: {reason}")]
    BuildAborted { key: String, reason: String },

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid period key: {0}")]
    InvalidPeriodKey(String),
}

impl From<serde_json::Error> for SwarmError {
    fn from(err: serde_json::Error) -> Self {
        SwarmError::MalformedMessage(err.to_string())
    }
}

/// Result type for SwarmWiki operations
pub type SwarmResult<T> = Result<T, SwarmError>;
