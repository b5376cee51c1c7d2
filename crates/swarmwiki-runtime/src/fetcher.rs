//! Container retrieval and decoding
//!
//! Resolving an address fetches the container and decodes the record
//! files the caller expects as JSON. Every other member stays a
//! lazily-read media handle. Expected records that are missing are
//! filled with an empty value instead of failing.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::try_join_all;
use serde_json::{Map, Value};
use tracing::debug;

use swarmwiki_core::{ContentAddress, SwarmError, SwarmResult};
use swarmwiki_transport::{ContainerFile, ContentNetwork};

/// Placeholder used for a missing record file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyValue {
    /// `[]`
    Sequence,
    /// `{}`
    Mapping,
}

impl EmptyValue {
    pub fn to_value(self) -> Value {
        match self {
            EmptyValue::Sequence => Value::Array(Vec::new()),
            EmptyValue::Mapping => Value::Object(Map::new()),
        }
    }
}

/// A record file the caller expects, with its fallback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedFile {
    pub name: &'static str,
    pub empty: EmptyValue,
}

impl ExpectedFile {
    pub const fn new(name: &'static str, empty: EmptyValue) -> Self {
        ExpectedFile { name, empty }
    }
}

/// A media file left inside the container until someone reads it
#[derive(Clone)]
pub struct MediaHandle(Arc<dyn ContainerFile>);

impl MediaHandle {
    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn len(&self) -> u64 {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub async fn bytes(&self) -> SwarmResult<Bytes> {
        self.0.read().await
    }
}

impl fmt::Debug for MediaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Media({}, {} bytes)", self.name(), self.len())
    }
}

/// One decoded member of a container
#[derive(Debug, Clone)]
pub enum ContainerEntry {
    Record(Value),
    Media(MediaHandle),
}

/// A fetched container with every member decoded
#[derive(Debug, Clone)]
pub struct ResolvedContainer {
    pub address: ContentAddress,
    pub name: String,
    entries: BTreeMap<String, ContainerEntry>,
}

impl ResolvedContainer {
    pub fn get(&self, name: &str) -> Option<&ContainerEntry> {
        self.entries.get(name)
    }

    pub fn record(&self, name: &str) -> Option<&Value> {
        match self.entries.get(name) {
            Some(ContainerEntry::Record(value)) => Some(value),
            _ => None,
        }
    }

    /// Remove and return a record, `Null` if absent
    pub fn take_record(&mut self, name: &str) -> Value {
        match self.entries.remove(name) {
            Some(ContainerEntry::Record(value)) => value,
            Some(other) => {
                self.entries.insert(name.to_string(), other);
                Value::Null
            }
            None => Value::Null,
        }
    }

    /// Media handles in name order
    pub fn media(&self) -> Vec<MediaHandle> {
        self.entries
            .values()
            .filter_map(|entry| match entry {
                ContainerEntry::Media(handle) => Some(handle.clone()),
                ContainerEntry::Record(_) => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Pulls containers from the content network
pub struct ContentFetcher<C: ContentNetwork> {
    network: Arc<C>,
}

impl<C: ContentNetwork> ContentFetcher<C> {
    pub fn new(network: Arc<C>) -> Self {
        ContentFetcher { network }
    }

    /// Fetch `address` and decode its files.
    ///
    /// An expected record that is not valid UTF-8 JSON fails the whole call.
    pub async fn resolve(
        &self,
        address: &ContentAddress,
        expected: &[ExpectedFile],
    ) -> SwarmResult<ResolvedContainer> {
        let container = self.network.fetch(address).await?;
        debug!(address = address.short(), files = container.files.len(), "container fetched");

        let decoded = try_join_all(container.files.iter().map(|file| {
            let is_record = expected.iter().any(|e| e.name == file.name());
            decode_entry(file, is_record)
        }))
        .await?;
        let mut entries: BTreeMap<String, ContainerEntry> = decoded.into_iter().collect();

        for file in expected {
            entries
                .entry(file.name.to_string())
                .or_insert_with(|| ContainerEntry::Record(file.empty.to_value()));
        }

        Ok(ResolvedContainer {
            address: container.address,
            name: container.name,
            entries,
        })
    }
}

async fn decode_entry(
    file: &Arc<dyn ContainerFile>,
    is_record: bool,
) -> SwarmResult<(String, ContainerEntry)> {
    let name = file.name().to_string();
    if !is_record {
        return Ok((name, ContainerEntry::Media(MediaHandle(Arc::clone(file)))));
    }

    let invalid = |reason: String| SwarmError::InvalidFile {
        name: name.clone(),
        reason,
    };
    let raw = file.read().await?;
    let text = std::str::from_utf8(&raw).map_err(|e| invalid(e.to_string()))?;
    let value = serde_json::from_str(text).map_err(|e| invalid(e.to_string()))?;
    Ok((name, ContainerEntry::Record(value)))
}
