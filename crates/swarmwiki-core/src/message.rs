//! Client/proxy wire messages
//!
//! Messages travel as JSON. A client probes every newly connected peer;
//! peers willing to proxy acknowledge, and from then on receive
//! `ProxyRequest`s. Every `ProxyResponse` carries a `hash` that identifies
//! the answer for consensus: the container address for feeds and articles,
//! the fingerprint of `pages` for searches.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{fingerprint_json, ContentAddress, SwarmError, SwarmResult};

/// Request a client fans out to its proxies
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "get", rename_all = "lowercase")]
pub enum ProxyRequest {
    Feed { lang: String },
    Article { lang: String, title: String },
    Search { lang: String, query: String },
}

impl ProxyRequest {
    pub fn language(&self) -> &str {
        match self {
            ProxyRequest::Feed { lang }
            | ProxyRequest::Article { lang, .. }
            | ProxyRequest::Search { lang, .. } => lang,
        }
    }
}

const SEARCH_RESULTS: &str = "search results";
const CONTAINER_ADDRESS: &str = "container address";

/// A proxy's answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyResponse {
    /// Identifies the answer's content
    pub hash: String,
    /// Search results, inline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<Vec<Value>>,
}

impl ProxyResponse {
    /// Answer pointing at a published container
    pub fn container(address: &ContentAddress) -> Self {
        ProxyResponse {
            hash: address.as_str().to_string(),
            pages: None,
        }
    }

    /// Answer carrying search results inline
    pub fn search(pages: Vec<Value>) -> SwarmResult<Self> {
        let hash = fingerprint_json(&pages)?;
        Ok(ProxyResponse {
            hash,
            pages: Some(pages),
        })
    }

    /// Check that `hash` actually identifies what the response carries
    pub fn verify(&self) -> SwarmResult<()> {
        match &self.pages {
            Some(pages) => {
                let computed = fingerprint_json(pages)?;
                if !computed.eq_ignore_ascii_case(&self.hash) {
                    return Err(SwarmError::HashMismatch {
                        claimed: self.hash.clone(),
                        computed,
                    });
                }
                Ok(())
            }
            None => ContentAddress::parse(&self.hash).map(|_| ()),
        }
    }

    /// Verify this as the answer to `request` and return it with its hash
    /// in canonical lowercase form. Searches must carry pages; feeds and
    /// articles must carry a container address and nothing else.
    pub fn verify_for(mut self, request: &ProxyRequest) -> SwarmResult<Self> {
        let expected = match request {
            ProxyRequest::Search { .. } => SEARCH_RESULTS,
            ProxyRequest::Feed { .. } | ProxyRequest::Article { .. } => CONTAINER_ADDRESS,
        };
        if self.kind() != expected {
            return Err(SwarmError::UnexpectedMessage {
                expected,
                actual: self.kind().to_string(),
            });
        }
        self.verify()?;
        self.hash.make_ascii_lowercase();
        Ok(self)
    }

    /// What the response carries
    pub fn kind(&self) -> &'static str {
        match self.pages {
            Some(_) => SEARCH_RESULTS,
            None => CONTAINER_ADDRESS,
        }
    }

    pub fn content_address(&self) -> SwarmResult<ContentAddress> {
        ContentAddress::parse(&self.hash)
    }
}

/// Envelope for everything sent between clients and proxies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum WireMessage {
    /// "Are you a proxy?"
    Probe,
    /// "Yes, I am a proxy"
    ProxyAck,
    Request(ProxyRequest),
    Response(ProxyResponse),
}

impl WireMessage {
    pub fn encode(&self) -> SwarmResult<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(buf: &[u8]) -> SwarmResult<Self> {
        Ok(serde_json::from_slice(buf)?)
    }

    /// Short name for logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            WireMessage::Probe => "probe",
            WireMessage::ProxyAck => "proxy_ack",
            WireMessage::Request(_) => "request",
            WireMessage::Response(_) => "response",
        }
    }

    /// Decode a buffer that must hold a `Response` to `request`, verified
    pub fn decode_response(buf: &[u8], request: &ProxyRequest) -> SwarmResult<ProxyResponse> {
        match Self::decode(buf)? {
            WireMessage::Response(response) => response.verify_for(request),
            other => Err(SwarmError::UnexpectedMessage {
                expected: "response",
                actual: other.name().to_string(),
            }),
        }
    }
}
