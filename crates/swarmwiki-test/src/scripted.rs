//! Misbehaving peers
//!
//! A scripted peer runs its own event loop on a memory hub endpoint and
//! answers according to a fixed [`Behaviour`] instead of running a real
//! proxy.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::json;
use tracing::debug;

use swarmwiki_core::{files, ProxyRequest, ProxyResponse, SwarmResult, WireMessage};
use swarmwiki_transport::{
    ContentNetwork, EventReceiver, InboundRequest, MemoryContentNetwork, NamedFile,
    TransportEvent,
};

/// How a scripted peer answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// Acknowledges probes, answers with well-formed forged content
    Lying,
    /// Acknowledges probes, never answers requests
    Silent,
    /// Acknowledges probes, answers requests with undecodable bytes
    Garbage,
    /// Acknowledges probes, answers searches with pages that do not match
    /// their hash and everything else with a bad address
    BadHash,
    /// Acknowledges probes, answers searches with a container address and
    /// everything else with search results
    WrongKind,
    /// Answers probes with something other than an acknowledgement
    Bystander,
}

/// Run a scripted peer until its event channel closes
pub async fn run_scripted(
    behaviour: Behaviour,
    network: Arc<MemoryContentNetwork>,
    mut events: EventReceiver,
) {
    // Silent peers keep requests alive so senders never see a failure
    let mut held: Vec<InboundRequest> = Vec::new();

    while let Some(event) = events.recv().await {
        let TransportEvent::Request(request) = event else {
            continue;
        };
        let message = match WireMessage::decode(&request.payload) {
            Ok(message) => message,
            Err(_) => continue,
        };

        let answer = match (behaviour, message) {
            (Behaviour::Bystander, WireMessage::Probe) => encode(&WireMessage::Probe),
            (_, WireMessage::Probe) => encode(&WireMessage::ProxyAck),
            (Behaviour::Silent, WireMessage::Request(_)) => {
                held.push(request);
                continue;
            }
            (Behaviour::Garbage, WireMessage::Request(_)) => {
                Some(Bytes::from_static(b"\x00garbage"))
            }
            (Behaviour::Lying, WireMessage::Request(req)) => match forge(&network, &req).await {
                Ok(response) => encode(&WireMessage::Response(response)),
                Err(_) => None,
            },
            (Behaviour::BadHash, WireMessage::Request(req)) => {
                encode(&WireMessage::Response(bad_hash(&req)))
            }
            (Behaviour::WrongKind, WireMessage::Request(req)) => {
                wrong_kind(&req).ok().and_then(|r| encode(&WireMessage::Response(r)))
            }
            (_, other) => {
                debug!(kind = other.name(), "scripted peer ignoring message");
                None
            }
        };

        if let Some(answer) = answer {
            request.respond(answer);
        }
    }
}

fn encode(message: &WireMessage) -> Option<Bytes> {
    message.encode().ok()
}

/// A valid answer for `request` pointing at forged content
pub async fn forge(
    network: &MemoryContentNetwork,
    request: &ProxyRequest,
) -> SwarmResult<ProxyResponse> {
    match request {
        ProxyRequest::Search { query, .. } => {
            ProxyResponse::search(vec![json!({ "title": format!("Forged {query}") })])
        }
        ProxyRequest::Feed { lang } => {
            let tfa = json!({ "title": format!("Forged feed of {lang}") });
            let address = network
                .publish(
                    "feed",
                    vec![NamedFile::new(files::TFA, serde_json::to_vec(&tfa)?)],
                )
                .await?;
            Ok(ProxyResponse::container(&address))
        }
        ProxyRequest::Article { title, .. } => {
            let article = json!({ "lead": { "normalizedtitle": format!("Forged {title}") } });
            let address = network
                .publish(
                    title,
                    vec![NamedFile::new(files::ARTICLE, serde_json::to_vec(&article)?)],
                )
                .await?;
            Ok(ProxyResponse::container(&address))
        }
    }
}

fn bad_hash(request: &ProxyRequest) -> ProxyResponse {
    match request {
        ProxyRequest::Search { query, .. } => ProxyResponse {
            hash: "00".repeat(32),
            pages: Some(vec![json!({ "title": query })]),
        },
        _ => ProxyResponse {
            hash: "not-an-address".into(),
            pages: None,
        },
    }
}

/// A self-consistent answer of the other kind than `request` asks for
fn wrong_kind(request: &ProxyRequest) -> SwarmResult<ProxyResponse> {
    match request {
        ProxyRequest::Search { .. } => Ok(ProxyResponse {
            hash: "abcdef".into(),
            pages: None,
        }),
        _ => ProxyResponse::search(vec![json!({ "title": "Elsewhere" })]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_hash_fails_verification() {
        let search = ProxyRequest::Search {
            lang: "en".into(),
            query: "rust".into(),
        };
        assert!(bad_hash(&search).verify().is_err());

        let feed = ProxyRequest::Feed { lang: "en".into() };
        assert!(bad_hash(&feed).verify().is_err());
    }

    #[test]
    fn test_wrong_kind_answers_verify_alone() {
        let search = ProxyRequest::Search {
            lang: "en".into(),
            query: "rust".into(),
        };
        let feed = ProxyRequest::Feed { lang: "en".into() };
        for request in [search, feed] {
            let response = wrong_kind(&request).unwrap();
            assert!(response.verify().is_ok());
            assert!(response.verify_for(&request).is_err());
        }
    }

    #[tokio::test]
    async fn test_forged_answers_verify() {
        let network = MemoryContentNetwork::new();
        let feed = ProxyRequest::Feed { lang: "en".into() };
        let response = forge(&network, &feed).await.unwrap();
        assert!(response.verify().is_ok());
        assert!(network.is_seeded(&response.content_address().unwrap()));
    }
}
