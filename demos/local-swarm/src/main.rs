//! SwarmWiki local swarm
//!
//! Starts a few proxies backed by live Wikipedia and one client on a
//! memory hub, then reads a feed or an article through the swarm.
//!
//! ```text
//! local-swarm [LANG] [TITLE]
//! ```
//!
//! Configuration comes from the usual `SWARMWIKI_*` environment variables.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::info;

use swarmwiki_runtime::{init_logging, ClientConfig, ClientNode, LogFormat, ProxyConfig, ProxyNode};
use swarmwiki_transport::{MemoryContentNetwork, MemoryHub, Transport};
use swarmwiki_upstream::WikipediaClient;

const PROXIES: usize = 3;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging(LogFormat::from_env()?)?;

    let mut args = std::env::args().skip(1);
    let lang = args.next().unwrap_or_else(|| "en".to_string());
    let title = args.next();

    let client_config = ClientConfig::from_env()?;
    let proxy_config = ProxyConfig::from_env()?;
    anyhow::ensure!(
        client_config.quorum <= PROXIES,
        "quorum {} cannot be reached with {PROXIES} proxies",
        client_config.quorum
    );

    let hub = MemoryHub::new();
    let network = Arc::new(MemoryContentNetwork::new());
    let wikipedia = Arc::new(WikipediaClient::new().context("building HTTP client")?);
    let (shutdown, _) = watch::channel(false);

    let (transport, events) = hub.join();
    let client_id = transport.local_id();
    let client = ClientNode::new(client_config, Arc::new(transport), Arc::clone(&network))?;
    tokio::spawn(client.clone().run(events));

    for _ in 0..PROXIES {
        let (transport, events) = hub.join();
        let proxy = ProxyNode::new(
            proxy_config.clone(),
            Arc::clone(&network),
            Arc::clone(&wikipedia),
            Arc::clone(&wikipedia),
        )?;
        tokio::spawn(proxy.run(events, shutdown.subscribe()));
        hub.connect(client_id, transport.local_id())?;
    }
    info!(proxies = PROXIES, "swarm up");

    match title {
        Some(title) => {
            let article = client.fetch_article(&lang, &title).await?;
            println!("{}", article.title);
            println!("  revisions: {}", article.revisions.as_array().map_or(0, Vec::len));
            println!("  languages: {}", article.languages.as_array().map_or(0, Vec::len));
            println!("  media:     {}", article.media.len());
        }
        None => {
            let feed = client.fetch_feed(&lang).await?;
            let featured = feed.tfa.get("title").and_then(|t| t.as_str()).unwrap_or("-");
            println!("Featured: {featured}");
            if let Some(articles) = feed.mostread.get("articles").and_then(|a| a.as_array()) {
                for article in articles.iter().take(10) {
                    let name = article.get("title").and_then(|t| t.as_str()).unwrap_or("-");
                    println!("  {name}");
                }
            }
            println!("Media files: {}", feed.media.len());
        }
    }

    let stats = client.stats();
    info!(
        proxies = client.proxy_count(),
        broadcasts = stats.broadcast.broadcasts,
        votes = stats.broadcast.votes,
        "done"
    );
    shutdown.send_replace(true);
    Ok(())
}
