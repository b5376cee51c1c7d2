//! SwarmWiki Upstream - where proxies get their content from
//!
//! This crate provides:
//! - The upstream content source and media download seams
//! - Media reference extraction from feed and media-list payloads
//! - An HTTP client for the Wikipedia REST and action APIs

pub mod source;
pub mod wikipedia;

pub use source::*;
pub use wikipedia::WikipediaClient;
