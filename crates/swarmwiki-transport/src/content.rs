//! Content network seam
//!
//! Containers are immutable bundles of named files. Publishing yields an
//! address derived from the content alone, so two publishers of identical
//! bundles end up with the same address. Fetching may have to wait for the
//! transfer to complete; member files are exposed as handles and only read
//! on demand.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

use swarmwiki_core::{ContentAddress, SwarmResult};

/// A file handed to the network for publication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedFile {
    pub name: String,
    pub data: Bytes,
}

impl NamedFile {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        NamedFile {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// One member file of a fetched container
#[async_trait]
pub trait ContainerFile: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Size in bytes
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the whole file, waiting for its pieces if necessary
    async fn read(&self) -> SwarmResult<Bytes>;
}

/// A fetched container
#[derive(Debug, Clone)]
pub struct Container {
    pub address: ContentAddress,
    pub name: String,
    pub files: Vec<Arc<dyn ContainerFile>>,
}

impl Container {
    /// Look up a member file by name
    pub fn file(&self, name: &str) -> Option<&Arc<dyn ContainerFile>> {
        self.files.iter().find(|f| f.name() == name)
    }
}

/// A peer pulled data from one of our published containers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferActivity {
    pub address: ContentAddress,
    pub bytes: u64,
}

/// Content-addressed publication and retrieval
#[async_trait]
pub trait ContentNetwork: Send + Sync + 'static {
    /// Start seeding a bundle; returns its address
    async fn publish(&self, name: &str, files: Vec<NamedFile>) -> SwarmResult<ContentAddress>;

    /// Locate a container by address and enumerate its files
    async fn fetch(&self, address: &ContentAddress) -> SwarmResult<Container>;

    /// Stop seeding a container we published
    async fn destroy(&self, address: &ContentAddress);

    /// Upload activity on containers published through this handle
    fn activity(&self) -> broadcast::Receiver<TransferActivity>;
}
