//! Integration tests for the master coordinator
//!
//! Workers are simulated by registering channels directly on the transport
//! and reading what the master dispatches to them.

use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use sumi_swarm::config::{parse_config, Config};
use sumi_swarm::master::{
    load_latest, submit_seeds, CheckpointWriter, MasterCoordinator, MasterPhase, Partitioner,
};
use sumi_swarm::state::{PathState, SeenState};
use sumi_swarm::transport::{
    decode_url_batch, ControlMessage, MemoryTransport, SqliteTransport, Transport, DONE,
    MASTER_ANNOUNCE, MASTER_RECEIVE, TODO,
};
use sumi_swarm::url::CanonicalUrl;
use tempfile::TempDir;

fn create_test_config(domains: &[&str], mountpath: &Path) -> Config {
    let mut content = format!(
        r#"
[crawler]
idle-backoff-ms = 10

[user-agent]
crawler-name = "TestBot"
crawler-version = "1.0.0"
contact-url = "https://example.com/contact"
contact-email = "test@example.com"

[transport]
database-path = ":memory:"

[store]
database-path = ":memory:"

[master]
mountpath = "{}"
checkpoint-interval-secs = 3600
"#,
        mountpath.display()
    );
    for domain in domains {
        content.push_str(&format!("\n[[whitelist]]\ndomain = \"{}\"\n", domain));
    }
    parse_config(&content).expect("Failed to parse test config")
}

async fn register(transport: &dyn Transport, channel: &str) {
    transport
        .send(MASTER_RECEIVE, &ControlMessage::Register(channel.to_string()).to_string())
        .await
        .expect("Failed to register worker");
}

/// Everything queued on `channel`, decoded and acknowledged
async fn drain_urls(transport: &dyn Transport, channel: &str) -> Vec<String> {
    let mut urls = Vec::new();
    loop {
        let batch = transport.receive(channel).await.expect("Receive failed");
        if batch.is_empty() {
            return urls;
        }
        let handles: Vec<_> = batch.iter().map(|m| m.handle.clone()).collect();
        for message in &batch {
            urls.extend(decode_url_batch(&message.body));
        }
        transport.delete(channel, &handles).await.expect("Delete failed");
    }
}

#[tokio::test]
async fn test_discoveries_partitioned_by_host() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let transport = Arc::new(
        SqliteTransport::new(&dir.path().join("queue.db"), Duration::from_secs(30), 10)
            .expect("Failed to open transport"),
    );
    register(transport.as_ref(), "worker-a").await;
    register(transport.as_ref(), "worker-b").await;
    register(transport.as_ref(), "worker-a").await;

    let hosts = ["alpha.test", "beta.test", "gamma.test", "delta.test", "epsilon.test"];
    let domains: Vec<String> = hosts.iter().map(|h| format!("http://{}/", h)).collect();
    let domain_refs: Vec<&str> = domains.iter().map(String::as_str).collect();
    let config = create_test_config(&domain_refs, dir.path());

    let master = MasterCoordinator::bootstrap(config, transport.clone(), None)
        .await
        .expect("Master failed to bootstrap");
    assert_eq!(master.workers().to_vec(), vec!["worker-a", "worker-b"]);
    assert_eq!(master.phase(), MasterPhase::Running);

    for host in hosts {
        for path in ["/", "/one", "/two"] {
            master.submit(format!("http://{}{}", host, path));
        }
    }
    assert_eq!(master.transmit_pending().await, 15);

    let partitioner = Partitioner::new(2);
    let mut owners: HashMap<String, &str> = HashMap::new();
    for channel in ["worker-a", "worker-b"] {
        for raw in drain_urls(transport.as_ref(), channel).await {
            let url = CanonicalUrl::parse(&raw).expect("Dispatched URL parses");
            let previous = owners.insert(url.host().to_string(), channel);
            assert!(previous.is_none() || previous == Some(channel), "{} split across workers", url.host());
            assert_eq!(master.workers()[partitioner.owner_of(url.host())], channel);
        }
    }
    assert_eq!(owners.len(), hosts.len());
}

#[tokio::test]
async fn test_unlisted_and_repeated_discoveries_dropped() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let transport = Arc::new(MemoryTransport::new(Duration::from_secs(30), 10));
    register(transport.as_ref(), "worker-a").await;

    let config = create_test_config(&["http://example.com/"], dir.path());
    let master = MasterCoordinator::bootstrap(config, transport.clone(), None)
        .await
        .expect("Master failed to bootstrap");

    master.submit("http://example.com/page");
    master.submit("http://EXAMPLE.com/page");
    master.submit("http://example.com:80/page#fragment");
    master.submit("http://elsewhere.com/page");
    master.submit("not a url");
    master.transmit_pending().await;

    assert_eq!(
        drain_urls(transport.as_ref(), "worker-a").await,
        vec!["http://example.com/page"]
    );
    assert_eq!(master.progress().assigned, 1);
}

#[tokio::test]
async fn test_resume_resubmits_only_unfinished() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let crawl_time = Utc
        .timestamp_millis_opt(1_700_000_000_000)
        .single()
        .expect("Valid timestamp");

    let seen = SeenState::new();
    seen.assign("http://d.test/", "/a");
    seen.assign("http://d.test/", "/b");
    seen.mark_done("http://d.test/", "/a");
    let mut writer = CheckpointWriter::new(dir.path(), crawl_time);
    writer.write(&seen).await.expect("Failed to write checkpoint");

    let transport = Arc::new(MemoryTransport::new(Duration::from_secs(30), 10));
    register(transport.as_ref(), "worker-a").await;
    transport
        .send(TODO, "http%3A%2F%2Fd.test%2Fc")
        .await
        .expect("Send failed");

    let checkpoint = load_latest(dir.path(), 1_700_000_000_000)
        .await
        .expect("Checkpoint should load");
    let config = create_test_config(&["http://d.test/"], dir.path());
    let master = MasterCoordinator::bootstrap(config, transport.clone(), Some(checkpoint))
        .await
        .expect("Master failed to resume");

    assert_eq!(master.crawl_time(), crawl_time);
    assert_eq!(master.seen().state_of("http://d.test/", "/a"), Some(PathState::Done));

    // Discoveries from before the restart survive a resume
    assert_eq!(transport.len(TODO), 1);

    master.transmit_pending().await;
    assert_eq!(
        drain_urls(transport.as_ref(), "worker-a").await,
        vec!["http://d.test/b"]
    );

    let announcements = transport.peek(MASTER_ANNOUNCE);
    assert!(announcements.contains(&"qtime:1700000000000".to_string()));

    // The next checkpoint continues the generation count
    let path = master.checkpoint().await.expect("Checkpoint failed");
    assert!(path.ends_with("state/state-saved-1700000000000-2"));
}

#[tokio::test]
async fn test_running_master_routes_seeds_and_completions() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let transport = Arc::new(MemoryTransport::new(Duration::from_secs(30), 10));
    register(transport.as_ref(), "worker-a").await;

    // Left over from an earlier crawl; a fresh start discards it
    transport.send(DONE, "http://example.com/stale").await.expect("Send failed");

    let config = create_test_config(&["http://example.com/"], dir.path());
    let master = Arc::new(
        MasterCoordinator::bootstrap(config, transport.clone(), None)
            .await
            .expect("Master failed to bootstrap"),
    );
    assert_eq!(transport.len(DONE), 0);

    let handle = tokio::spawn(master.clone().run());

    let seeds = ["http://example.com/", "http://example.com/about"];
    submit_seeds(transport.as_ref(), &seeds, 10)
        .await
        .expect("Seed submission failed");

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut assigned = Vec::new();
    while assigned.len() < 2 {
        assert!(Instant::now() < deadline, "Seeds were never dispatched");
        assigned.extend(drain_urls(transport.as_ref(), "worker-a").await);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assigned.sort();
    assert_eq!(assigned, vec!["http://example.com/", "http://example.com/about"]);

    for url in &assigned {
        transport.send(DONE, url).await.expect("Send failed");
    }
    while master.progress().done < 2 {
        assert!(Instant::now() < deadline, "Completions were never applied");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    master.request_shutdown();
    handle
        .await
        .expect("Master task panicked")
        .expect("Master failed");

    assert_eq!(master.phase(), MasterPhase::Terminated);
    assert!(transport
        .peek(MASTER_ANNOUNCE)
        .contains(&"qecmd:shutdown".to_string()));

    let saved = load_latest(dir.path(), master.crawl_time().timestamp_millis())
        .await
        .expect("Final checkpoint should exist");
    assert!(saved.seen["http://example.com/"].values().all(|done| *done));
}
