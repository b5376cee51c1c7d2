//! End-to-end scenarios
//!
//! Real clients and proxies over a memory hub:
//! - Feed, article and search round trips
//! - Requests queued before the first proxy
//! - Quorum against lying, silent, confused and garbage-sending peers
//! - Proxies lost while a broadcast is in flight
//! - Client caching and proxy build memoization
//! - Registry handling of duplicate connections and departures
//! - Seed retirement

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use swarmwiki_core::{files, ContentKey, PeriodKey, ProxyRequest, SwarmError};
    use swarmwiki_runtime::{ClientConfig, ProxyConfig};
    use swarmwiki_transport::ContentNetwork;

    use crate::harness::{join_proxies, quick_client, wait_until, Swarm, WAIT_LIMIT};
    use crate::scripted::Behaviour;
    use crate::upstream::{featured_title, media_url, search_pages, FakeUpstream};

    // ========================================================================
    // ROUND TRIPS
    // ========================================================================

    #[tokio::test]
    async fn test_feed_round_trip() {
        let mut swarm = Swarm::new();
        let (proxy_id, proxy) = swarm.spawn_proxy(ProxyConfig::default());
        let (client_id, client) = swarm.spawn_client(ClientConfig::default());
        join_proxies(&swarm, (client_id, &client), &[proxy_id], 1).await;

        let feed = client.fetch_feed("en").await.unwrap();
        assert_eq!(feed.tfa["title"], featured_title("en"));
        assert_eq!(feed.mostread["articles"][0]["title"], "Popular");

        let names: Vec<&str> = feed.media.iter().map(|m| m.name()).collect();
        assert_eq!(names, vec!["en-featured.jpg", "en-popular.jpg"]);
        let bytes = feed.media[0].bytes().await.unwrap();
        assert_eq!(bytes, format!("image bytes of {}", media_url("en-featured.jpg")));

        assert_eq!(proxy.stats().builds.built, 1);
        assert_eq!(proxy.seeds().len(), 1);
        assert!(client.is_cached(&ContentKey::feed("en", PeriodKey::today())));
        swarm.shutdown();
    }

    #[tokio::test]
    async fn test_article_round_trip() {
        let mut swarm = Swarm::new();
        let (proxy_id, _proxy) = swarm.spawn_proxy(ProxyConfig::default());
        let (client_id, client) = swarm.spawn_client(ClientConfig::default());
        join_proxies(&swarm, (client_id, &client), &[proxy_id], 1).await;

        let article = client.fetch_article("en", "Rust_(language)").await.unwrap();
        assert_eq!(article.title, "Rust (language)");
        assert_eq!(article.sections["remaining"]["sections"][0]["line"], "History");
        assert_eq!(article.revisions.as_array().unwrap().len(), 2);
        assert_eq!(article.languages[0]["lang"], "de");
        assert_eq!(article.media.len(), 1);
        assert_eq!(article.media[0].name(), "Rust_(language).png");
        swarm.shutdown();
    }

    #[tokio::test]
    async fn test_article_without_languages() {
        let mut swarm = Swarm::new();
        swarm.upstream.without_languages("Hamlet");
        let (proxy_id, _proxy) = swarm.spawn_proxy(ProxyConfig::default());
        let (client_id, client) = swarm.spawn_client(ClientConfig::default());
        join_proxies(&swarm, (client_id, &client), &[proxy_id], 1).await;

        let article = client.fetch_article("en", "Hamlet").await.unwrap();
        assert_eq!(article.languages, serde_json::json!([]));
        swarm.shutdown();
    }

    #[tokio::test]
    async fn test_search_round_trip_is_not_cached() {
        let mut swarm = Swarm::new();
        let (proxy_id, proxy) = swarm.spawn_proxy(ProxyConfig::default());
        let (client_id, client) = swarm.spawn_client(ClientConfig::default());
        join_proxies(&swarm, (client_id, &client), &[proxy_id], 1).await;

        assert_eq!(client.search("en", "ferris").await.unwrap(), search_pages("ferris"));
        assert_eq!(client.search("en", "ferris").await.unwrap(), search_pages("ferris"));
        assert_eq!(proxy.stats().searches, 2);
        assert_eq!(swarm.upstream.search_calls(), 2);
        assert_eq!(client.stats().cache_hits, 0);
        swarm.shutdown();
    }

    // ========================================================================
    // QUEUEING
    // ========================================================================

    #[tokio::test]
    async fn test_request_waits_for_first_proxy() {
        let mut swarm = Swarm::new();
        let (client_id, client) = swarm.spawn_client(ClientConfig::default());

        let pending = {
            let client = client.clone();
            tokio::spawn(async move { client.fetch_feed("en").await })
        };
        wait_until("request to queue", || client.queued() == 1).await;
        assert_eq!(client.in_flight(), 0);

        let (proxy_id, _proxy) = swarm.spawn_proxy(ProxyConfig::default());
        swarm.connect(client_id, proxy_id);

        let feed = pending.await.unwrap().unwrap();
        assert_eq!(feed.tfa["title"], featured_title("en"));
        assert_eq!(client.queued(), 0);
        assert_eq!(client.stats().queued, 1);
        swarm.shutdown();
    }

    #[tokio::test]
    async fn test_queued_request_times_out() {
        let mut swarm = Swarm::new();
        let (_client_id, client) = swarm.spawn_client(quick_client(1));

        let err = client.fetch_feed("en").await.unwrap_err();
        assert_eq!(err, SwarmError::QuorumTimeout(Duration::from_millis(500)));
        swarm.shutdown();
    }

    #[tokio::test]
    async fn test_queue_capacity() {
        let mut swarm = Swarm::new();
        let config = ClientConfig {
            max_queued_requests: 1,
            ..quick_client(1)
        };
        let (_client_id, client) = swarm.spawn_client(config);

        let first = {
            let client = client.clone();
            tokio::spawn(async move { client.search("en", "a").await })
        };
        wait_until("request to queue", || client.queued() == 1).await;

        let err = client.search("en", "b").await.unwrap_err();
        assert_eq!(err, SwarmError::QueueFull(1));
        first.abort();
        swarm.shutdown();
    }

    // ========================================================================
    // CONSENSUS
    // ========================================================================

    #[tokio::test]
    async fn test_quorum_outvotes_liar() {
        let mut swarm = Swarm::new();
        let (a, _) = swarm.spawn_proxy(ProxyConfig::default());
        let (b, _) = swarm.spawn_proxy(ProxyConfig::default());
        let liar = swarm.spawn_scripted(Behaviour::Lying);
        let (client_id, client) = swarm.spawn_client(quick_client(2));
        join_proxies(&swarm, (client_id, &client), &[a, b, liar], 3).await;

        let feed = client.fetch_feed("en").await.unwrap();
        assert_eq!(feed.tfa["title"], featured_title("en"));

        let found = client.search("en", "crab").await.unwrap();
        assert_eq!(found, search_pages("crab"));
        swarm.shutdown();
    }

    #[tokio::test]
    async fn test_independent_proxies_agree() {
        let mut swarm = Swarm::new();
        let first = Arc::new(FakeUpstream::new());
        let second = Arc::new(FakeUpstream::new());
        let (a, _) = swarm.spawn_proxy_with(ProxyConfig::default(), first.clone());
        let (b, _) = swarm.spawn_proxy_with(ProxyConfig::default(), second.clone());
        let (client_id, client) = swarm.spawn_client(quick_client(2));
        join_proxies(&swarm, (client_id, &client), &[a, b], 2).await;

        let article = client.fetch_article("en", "Crab").await.unwrap();
        assert_eq!(article.title, "Crab");
        assert_eq!(first.article_calls(), 1);
        assert_eq!(second.article_calls(), 1);
        swarm.shutdown();
    }

    #[tokio::test]
    async fn test_split_answers_time_out() {
        let mut swarm = Swarm::new();
        let skewed = Arc::new(FakeUpstream::new());
        skewed.skew_search(" (edited)");
        let (a, _) = swarm.spawn_proxy(ProxyConfig::default());
        let (b, _) = swarm.spawn_proxy_with(ProxyConfig::default(), skewed);
        let (client_id, client) = swarm.spawn_client(quick_client(2));
        join_proxies(&swarm, (client_id, &client), &[a, b], 2).await;

        let err = client.search("en", "crab").await.unwrap_err();
        assert!(matches!(err, SwarmError::QuorumTimeout(_)));
        wait_until("broadcast to finish", || client.in_flight() == 0).await;
        assert_eq!(client.stats().broadcast.no_quorum, 1);
        swarm.shutdown();
    }

    #[tokio::test]
    async fn test_silent_proxy_times_out_and_releases_broadcast() {
        let mut swarm = Swarm::new();
        let (honest, _) = swarm.spawn_proxy(ProxyConfig::default());
        let silent = swarm.spawn_scripted(Behaviour::Silent);
        let (client_id, client) = swarm.spawn_client(quick_client(2));
        join_proxies(&swarm, (client_id, &client), &[honest, silent], 2).await;

        let err = client.fetch_feed("en").await.unwrap_err();
        assert_eq!(err, SwarmError::QuorumTimeout(Duration::from_millis(500)));

        wait_until("broadcast to stop", || client.in_flight() == 0).await;
        assert_eq!(client.stats().broadcast.resolved, 0);
        assert_eq!(client.stats().broadcast.votes, 1);
        assert!(!client.is_cached(&ContentKey::feed("en", PeriodKey::today())));
        swarm.shutdown();
    }

    #[tokio::test]
    async fn test_garbage_answers_are_discarded() {
        let mut swarm = Swarm::new();
        let garbage = swarm.spawn_scripted(Behaviour::Garbage);
        let (honest, _) = swarm.spawn_proxy(ProxyConfig::default());
        let (client_id, client) = swarm.spawn_client(quick_client(1));
        join_proxies(&swarm, (client_id, &client), &[garbage, honest], 2).await;

        let feed = client.fetch_feed("en").await.unwrap();
        assert_eq!(feed.tfa["title"], featured_title("en"));

        wait_until("late answers", || client.in_flight() == 0).await;
        let stats = client.stats().broadcast;
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.resolved, 1);
        swarm.shutdown();
    }

    #[tokio::test]
    async fn test_search_with_wrong_hash_is_ignored() {
        let mut swarm = Swarm::new();
        let cheat = swarm.spawn_scripted(Behaviour::BadHash);
        let (client_id, client) = swarm.spawn_client(quick_client(1));
        join_proxies(&swarm, (client_id, &client), &[cheat], 1).await;

        let err = client.search("en", "crab").await.unwrap_err();
        assert!(matches!(err, SwarmError::QuorumTimeout(_)));

        let (honest, _) = swarm.spawn_proxy(ProxyConfig::default());
        join_proxies(&swarm, (client_id, &client), &[honest], 2).await;
        assert_eq!(client.search("en", "crab").await.unwrap(), search_pages("crab"));
        swarm.shutdown();
    }

    #[tokio::test]
    async fn test_answers_of_wrong_kind_are_discarded() {
        let mut swarm = Swarm::new();
        let confused = swarm.spawn_scripted(Behaviour::WrongKind);
        let (client_id, client) = swarm.spawn_client(quick_client(1));
        join_proxies(&swarm, (client_id, &client), &[confused], 1).await;

        let err = client.search("en", "crab").await.unwrap_err();
        assert!(matches!(err, SwarmError::QuorumTimeout(_)));

        let (honest, _) = swarm.spawn_proxy(ProxyConfig::default());
        join_proxies(&swarm, (client_id, &client), &[honest], 2).await;
        for _ in 0..5 {
            assert_eq!(client.search("en", "crab").await.unwrap(), search_pages("crab"));
        }
        let feed = client.fetch_feed("en").await.unwrap();
        assert_eq!(feed.tfa["title"], featured_title("en"));

        wait_until("late answers", || client.in_flight() == 0).await;
        let stats = client.stats().broadcast;
        assert_eq!(stats.malformed, 7);
        assert_eq!(stats.resolved, 6);
        swarm.shutdown();
    }

    #[tokio::test]
    async fn test_proxy_lost_mid_broadcast() {
        let mut swarm = Swarm::new();
        let silent = swarm.spawn_scripted(Behaviour::Silent);
        let (honest, _) = swarm.spawn_proxy(ProxyConfig::default());
        let (client_id, client) = swarm.spawn_client(ClientConfig {
            request_timeout: Some(WAIT_LIMIT),
            ..quick_client(1)
        });
        let (to_silent, _) = swarm.connect(client_id, silent);
        join_proxies(&swarm, (client_id, &client), &[honest], 2).await;

        swarm.upstream.close_gate();
        let pending = {
            let client = client.clone();
            tokio::spawn(async move { client.fetch_feed("en").await })
        };
        wait_until("proxy to build", || swarm.upstream.feed_calls() == 1).await;
        assert_eq!(client.in_flight(), 1);

        swarm.hub.close(to_silent.conn);
        wait_until("silent proxy removed", || client.proxy_count() == 1).await;
        wait_until("send to fail", || client.stats().broadcast.unanswered == 1).await;

        swarm.upstream.open_gate();
        let feed = pending.await.unwrap().unwrap();
        assert_eq!(feed.tfa["title"], featured_title("en"));
        wait_until("broadcast to finish", || client.in_flight() == 0).await;
        assert_eq!(client.stats().broadcast.resolved, 1);
        swarm.shutdown();
    }

    #[tokio::test]
    async fn test_raw_broadcast_delivers_first_quorum() {
        let mut swarm = Swarm::new();
        let (a, _) = swarm.spawn_proxy(ProxyConfig::default());
        let (client_id, client) = swarm.spawn_client(quick_client(1));
        join_proxies(&swarm, (client_id, &client), &[a], 1).await;

        let response = client
            .broadcast(ProxyRequest::Feed { lang: "fr".into() })
            .await
            .unwrap();
        let address = response.content_address().unwrap();
        assert!(swarm.network.is_seeded(&address));
        swarm.shutdown();
    }

    // ========================================================================
    // CACHING AND BUILDS
    // ========================================================================

    #[tokio::test]
    async fn test_client_cache_skips_broadcast() {
        let mut swarm = Swarm::new();
        let (proxy_id, proxy) = swarm.spawn_proxy(ProxyConfig::default());
        let (client_id, client) = swarm.spawn_client(ClientConfig::default());
        join_proxies(&swarm, (client_id, &client), &[proxy_id], 1).await;

        let first = client.fetch_article("en", "Crab").await.unwrap();
        let second = client.fetch_article("en", "Crab").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(proxy.stats().requests, 1);
        assert_eq!(client.stats().cache_hits, 1);
        assert_eq!(client.stats().broadcast.broadcasts, 1);
        swarm.shutdown();
    }

    #[tokio::test]
    async fn test_proxy_builds_once_for_concurrent_clients() {
        let mut swarm = Swarm::new();
        let (proxy_id, proxy) = swarm.spawn_proxy(ProxyConfig::default());
        let (a_id, a) = swarm.spawn_client(ClientConfig::default());
        let (b_id, b) = swarm.spawn_client(ClientConfig::default());
        join_proxies(&swarm, (a_id, &a), &[proxy_id], 1).await;
        join_proxies(&swarm, (b_id, &b), &[proxy_id], 1).await;

        swarm.upstream.close_gate();
        let first = {
            let a = a.clone();
            tokio::spawn(async move { a.fetch_article("en", "Crab").await })
        };
        let second = {
            let b = b.clone();
            tokio::spawn(async move { b.fetch_article("en", "Crab").await })
        };
        wait_until("both requests at the proxy", || proxy.stats().requests == 2).await;
        swarm.upstream.open_gate();

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(first.sections, second.sections);
        assert_eq!(swarm.upstream.article_calls(), 1);
        assert_eq!(swarm.network.publish_count(), 1);

        let builds = proxy.stats().builds;
        assert_eq!(builds.built, 1);
        assert_eq!(builds.joined + builds.reused, 1);
        swarm.shutdown();
    }

    #[tokio::test]
    async fn test_failed_build_is_retried() {
        let mut swarm = Swarm::new();
        swarm.upstream.fail_media(media_url("Crab.png"));
        let (proxy_id, proxy) = swarm.spawn_proxy(ProxyConfig::default());
        let (client_id, client) = swarm.spawn_client(quick_client(1));
        join_proxies(&swarm, (client_id, &client), &[proxy_id], 1).await;

        let err = client.fetch_article("en", "Crab").await.unwrap_err();
        assert!(matches!(err, SwarmError::QuorumTimeout(_)));
        assert_eq!(proxy.stats().builds.failed, 1);
        assert!(proxy.seeds().is_empty());
        assert_eq!(swarm.network.seeded_count(), 0);

        swarm.upstream.heal_media();
        let article = client.fetch_article("en", "Crab").await.unwrap();
        assert_eq!(article.title, "Crab");
        assert_eq!(proxy.stats().builds.built, 1);
        swarm.shutdown();
    }

    // ========================================================================
    // REGISTRY
    // ========================================================================

    #[tokio::test]
    async fn test_duplicate_connection_is_dropped() {
        let mut swarm = Swarm::new();
        let (proxy_id, _proxy) = swarm.spawn_proxy(ProxyConfig::default());
        let (client_id, client) = swarm.spawn_client(ClientConfig::default());

        let (first, _) = swarm.connect(client_id, proxy_id);
        wait_until("first connection", || client.proxy_count() == 1).await;
        swarm.connect(client_id, proxy_id);

        wait_until("duplicate to be dropped", || client.stats().duplicate_proxies == 1).await;
        wait_until("duplicate link closed", || swarm.hub.connection_count() == 1).await;
        assert_eq!(client.proxy_count(), 1);
        assert_eq!(client.proxies()[0].handle, first);

        // Closing the kept connection does remove the proxy
        swarm.hub.close(first.conn);
        wait_until("proxy removed", || client.proxy_count() == 0).await;
        swarm.shutdown();
    }

    #[tokio::test]
    async fn test_bystander_is_not_registered() {
        let mut swarm = Swarm::new();
        let bystander = swarm.spawn_scripted(Behaviour::Bystander);
        let other_client = swarm.spawn_client(ClientConfig::default());
        let (proxy_id, _proxy) = swarm.spawn_proxy(ProxyConfig::default());
        let (client_id, client) = swarm.spawn_client(ClientConfig::default());

        swarm.connect(client_id, bystander);
        swarm.connect(client_id, other_client.0);
        swarm.connect(client_id, proxy_id);
        wait_until("proxy to register", || client.proxy_count() == 1).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(client.proxy_count(), 1);
        assert_eq!(client.proxies()[0].handle.id, proxy_id);
        assert_eq!(other_client.1.proxy_count(), 0);
        swarm.shutdown();
    }

    #[tokio::test]
    async fn test_departed_proxy_is_forgotten() {
        let mut swarm = Swarm::new();
        let (a, _) = swarm.spawn_proxy(ProxyConfig::default());
        let (b, _) = swarm.spawn_proxy(ProxyConfig::default());
        let (client_id, client) = swarm.spawn_client(ClientConfig::default());
        join_proxies(&swarm, (client_id, &client), &[a, b], 2).await;

        swarm.hub.leave(a);
        wait_until("proxy to leave", || client.proxy_count() == 1).await;
        assert_eq!(client.stats().proxies_lost, 1);

        let feed = client.fetch_feed("de").await.unwrap();
        assert_eq!(feed.tfa["title"], featured_title("de"));
        swarm.shutdown();
    }

    // ========================================================================
    // SEED LIFECYCLE
    // ========================================================================

    #[tokio::test]
    async fn test_idle_seed_is_retired() {
        let mut swarm = Swarm::new();
        let config = ProxyConfig {
            sweep_interval: Duration::from_millis(20),
            idle_ttl: Duration::from_millis(150),
            ..ProxyConfig::default()
        };
        let (proxy_id, proxy) = swarm.spawn_proxy(config);
        let (client_id, client) = swarm.spawn_client(ClientConfig::default());
        join_proxies(&swarm, (client_id, &client), &[proxy_id], 1).await;

        let response = client
            .broadcast(ProxyRequest::Article {
                lang: "en".into(),
                title: "Crab".into(),
            })
            .await
            .unwrap();
        let address = response.content_address().unwrap();
        assert!(swarm.network.is_seeded(&address));

        wait_until("seed retirement", || proxy.seeds().is_empty()).await;
        assert!(!swarm.network.is_seeded(&address));
        assert_eq!(proxy.stats().retired, 1);

        // The next request rebuilds
        client
            .broadcast(ProxyRequest::Article {
                lang: "en".into(),
                title: "Crab".into(),
            })
            .await
            .unwrap();
        assert_eq!(proxy.stats().builds.built, 2);
        swarm.shutdown();
    }

    #[tokio::test]
    async fn test_feed_files_are_laid_out() {
        let mut swarm = Swarm::new();
        let (proxy_id, _proxy) = swarm.spawn_proxy(ProxyConfig::default());
        let (client_id, client) = swarm.spawn_client(ClientConfig::default());
        join_proxies(&swarm, (client_id, &client), &[proxy_id], 1).await;

        let response = client
            .broadcast(ProxyRequest::Feed { lang: "en".into() })
            .await
            .unwrap();
        let address = response.content_address().unwrap();
        let container = swarm.network.fetch(&address).await.unwrap();
        assert_eq!(container.name, "feed");
        assert!(container.file(files::TFA).is_some());
        assert!(container.file(files::MOST_READ).is_some());
        assert_eq!(container.files.len(), 4);
        assert!(container.file("en-featured.jpg").is_some());
        swarm.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_stops_proxy() {
        let mut swarm = Swarm::new();
        let (proxy_id, _proxy) = swarm.spawn_proxy(ProxyConfig::default());
        let (client_id, client) = swarm.spawn_client(quick_client(1));
        join_proxies(&swarm, (client_id, &client), &[proxy_id], 1).await;

        swarm.shutdown();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = client.search("en", "crab").await.unwrap_err();
        assert!(matches!(err, SwarmError::QuorumTimeout(_)));
        assert_eq!(client.stats().broadcast.unanswered, 1);
    }
}
