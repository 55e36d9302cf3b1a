//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and drive the worker
//! pipeline, and the master and a worker together, against them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use sumi_swarm::config::{parse_config, Config};
use sumi_swarm::crawler::{
    build_http_client, crawl_step, extract_job, CrawlContext, DomainRotation, FetchOutcome,
    HttpFetcher, ProbeOutcome, Reporter, StepOutcome, WorkerSupervisor,
};
use sumi_swarm::master::MasterCoordinator;
use sumi_swarm::robots::{collect_sitemap_paths, fetch_policy};
use sumi_swarm::state::{DomainRecord, PathState};
use sumi_swarm::storage::{BlobStore, DocumentStore, SqliteStore};
use sumi_swarm::transport::{decode_url_batch, MemoryTransport, DONE, TODO};
use sumi_swarm::url::CanonicalUrl;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration whitelisting `domain`
fn create_test_config(domain: &str, mountpath: &std::path::Path) -> Config {
    parse_config(&format!(
        r#"
[crawler]
fetch-threads = 2
extract-threads = 1
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

[[whitelist]]
domain = "{}"
"#,
        mountpath.display(),
        domain
    ))
    .expect("Failed to parse test config")
}

fn http_fetcher(config: &Config) -> Arc<HttpFetcher> {
    let client = build_http_client(&config.user_agent, Duration::from_secs(5))
        .expect("Failed to build client");
    Arc::new(HttpFetcher::from_client(client, 3, 1_000_000))
}

/// Worker pipeline wired to a mock server, without any master
struct Pipeline {
    ctx: CrawlContext,
    transport: Arc<MemoryTransport>,
    domain: DomainRecord,
    origin: CanonicalUrl,
    _dir: TempDir,
}

async fn pipeline(server: &MockServer) -> Pipeline {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = create_test_config(&format!("{}/", server.uri()), dir.path());
    let fetcher = http_fetcher(&config);
    let transport = Arc::new(MemoryTransport::new(Duration::from_secs(30), 10));
    let documents = DocumentStore::new(
        Arc::new(SqliteStore::open_in_memory().expect("Failed to open store")),
        BlobStore::new(dir.path().join("blobs")),
        chrono::Utc::now(),
    );

    let origin = CanonicalUrl::parse(&server.uri()).expect("Failed to parse server URI");
    let domain = DomainRecord::new(&origin);
    let policy = fetch_policy(fetcher.as_ref(), &origin, "TestBot").await;
    domain.resolve_policy(policy);

    let ctx = CrawlContext::new(
        fetcher,
        documents,
        Arc::new(DomainRotation::new()),
        Reporter::new(transport.clone(), 100),
        &config.crawler,
        CancellationToken::new(),
    );

    Pipeline {
        ctx,
        transport,
        domain,
        origin: origin.origin(),
        _dir: dir,
    }
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/html")
}

#[tokio::test]
async fn test_end_to_end_single_worker() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let mountpath = TempDir::new().expect("Failed to create mountpath");

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nAllow: /"))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("HEAD"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/html"))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html("<html><head><title>Home</title></head><body>Hello</body></html>"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let domain = CanonicalUrl::parse(&base_url)
        .expect("Failed to parse base URL")
        .domain()
        .to_string();
    let config = create_test_config(&domain, mountpath.path());
    let transport = Arc::new(MemoryTransport::new(Duration::from_secs(5), 10));

    let worker = WorkerSupervisor::start(
        config.clone(),
        transport.clone(),
        http_fetcher(&config),
        Arc::new(SqliteStore::open_in_memory().expect("Failed to open store")),
    )
    .await
    .expect("Worker failed to register");

    let master = Arc::new(
        MasterCoordinator::bootstrap(config, transport.clone(), None)
            .await
            .expect("Master failed to bootstrap"),
    );
    assert_eq!(master.workers().to_vec(), vec![worker.channel().to_string()]);

    let announcement = worker
        .await_announcements()
        .await
        .expect("Announcement receive failed")
        .expect("Worker shut down before announcements");
    assert_eq!(announcement.crawl_time, master.crawl_time());

    let worker_handle = tokio::spawn(worker.clone().run(announcement));
    let master_handle = tokio::spawn(master.clone().run());

    master.submit(format!("{}/", base_url));

    let deadline = Instant::now() + Duration::from_secs(10);
    while master.seen().state_of(&domain, "/") != Some(PathState::Done) {
        assert!(Instant::now() < deadline, "Timed out waiting for completion");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let mut expected = BTreeMap::new();
    expected.insert(domain.clone(), BTreeMap::from([("/".to_string(), true)]));
    assert_eq!(master.seen().snapshot(), expected);

    master.request_shutdown();
    master_handle
        .await
        .expect("Master task panicked")
        .expect("Master failed");

    tokio::time::timeout(Duration::from_secs(5), worker_handle)
        .await
        .expect("Worker did not stop after shutdown")
        .expect("Worker task panicked")
        .expect("Worker failed");

    let blobs = BlobStore::new(mountpath.path())
        .list()
        .await
        .expect("Failed to list blobs");
    assert_eq!(blobs.len(), 1);
}

#[tokio::test]
async fn test_robots_txt_respect() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /admin\n\nUser-agent: TestBot\nDisallow: /private\nAllow: /private/public"),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("HEAD"))
        .and(path("/admin"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/html"))
        .mount(&mock_server)
        .await;

    Mock::given(method("HEAD"))
        .and(path("/private/secret"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/html"))
        .expect(0)
        .mount(&mock_server)
        .await;

    Mock::given(method("HEAD"))
        .and(path("/private/public/page"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/html"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let p = pipeline(&mock_server).await;

    // TestBot's own group applies, so /admin is allowed but /private is not
    assert!(p.domain.enqueue_probe("/admin"));
    assert!(!p.domain.enqueue_probe("/private/secret"));
    assert!(p.domain.enqueue_probe("/private/public/page"));

    let first = crawl_step(&p.ctx, &p.domain).await;
    let second = crawl_step(&p.ctx, &p.domain).await;
    assert_eq!(first, StepOutcome::Probed(ProbeOutcome::QueuedForFetch));
    assert_eq!(second, StepOutcome::Probed(ProbeOutcome::QueuedForFetch));
    assert_eq!(p.domain.queued(), (0, 2));
}

#[tokio::test]
async fn test_unreachable_robots_means_unrestricted() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let p = pipeline(&mock_server).await;
    assert!(p.domain.is_ready());
    assert!(p.domain.approved("/anything"));
    assert!(p.domain.policy().expect("Policy resolved").crawl_delay().is_zero());
}

#[tokio::test]
async fn test_crawl_delay_spaces_fetches() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nCrawl-delay: 1"))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(html("<html>a</html>"))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(html("<html>b</html>"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let p = pipeline(&mock_server).await;
    p.domain.enqueue_fetch("/a");
    p.domain.enqueue_fetch("/b");

    let started = Instant::now();
    assert_eq!(
        crawl_step(&p.ctx, &p.domain).await,
        StepOutcome::Fetched(FetchOutcome::Extracted)
    );
    assert_eq!(crawl_step(&p.ctx, &p.domain).await, StepOutcome::Idle);

    while crawl_step(&p.ctx, &p.domain).await == StepOutcome::Idle {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(started.elapsed() >= Duration::from_millis(1000));
    assert_eq!(p.transport.len(DONE), 2);
}

#[tokio::test]
async fn test_links_followed_to_master_channel() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(&format!(
            r#"<html><body>
            <a href="/page1">Page 1</a>
            <a href="{}/page2">Page 2</a>
            <a href="https://other.example/">Elsewhere</a>
            <a href="mailto:someone@example.com">Mail</a>
            </body></html>"#,
            base_url
        )))
        .mount(&mock_server)
        .await;

    let p = pipeline(&mock_server).await;
    p.domain.enqueue_fetch("/");
    crawl_step(&p.ctx, &p.domain).await;

    let job = p.ctx.extraction.pop().expect("Body queued for extraction");
    assert_eq!(extract_job(&p.ctx, job).await, 3);

    let discovered: Vec<String> = p
        .transport
        .peek(TODO)
        .iter()
        .flat_map(|body| decode_url_batch(body))
        .collect();
    assert_eq!(
        discovered,
        vec![
            format!("{}/page1", base_url),
            format!("{}/page2", base_url),
            "https://other.example/".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_conditional_probe_and_redirects() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/stored"))
        .respond_with(html("<html>stored</html>"))
        .mount(&mock_server)
        .await;

    Mock::given(method("HEAD"))
        .and(path("/stored"))
        .and(header_exists("if-modified-since"))
        .respond_with(ResponseTemplate::new(304))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("HEAD"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("location", "/new"))
        .mount(&mock_server)
        .await;

    Mock::given(method("HEAD"))
        .and(path("/new"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/html"))
        .mount(&mock_server)
        .await;

    let p = pipeline(&mock_server).await;

    // Fetched earlier in this crawl, so the 304 needs no re-extraction
    p.domain.enqueue_fetch("/stored");
    crawl_step(&p.ctx, &p.domain).await;
    p.ctx.extraction.pop();
    p.domain.enqueue_probe("/stored");
    assert_eq!(
        crawl_step(&p.ctx, &p.domain).await,
        StepOutcome::Probed(ProbeOutcome::Fresh)
    );

    p.domain.enqueue_probe("/old");
    let redirected = crawl_step(&p.ctx, &p.domain).await;
    assert_eq!(
        redirected,
        StepOutcome::Probed(ProbeOutcome::RedirectQueued(p.origin.with_path("/new")))
    );
    assert_eq!(p.domain.queued(), (0, 1));
}

#[tokio::test]
async fn test_get_redirect_forwarded_unfollowed() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/new"))
        .expect(1)
        .mount(&mock_server)
        .await;

    // Reached only through the master after a probe, never from the redirect
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(html("<html>new</html>"))
        .expect(0)
        .mount(&mock_server)
        .await;

    let p = pipeline(&mock_server).await;
    p.domain.enqueue_fetch("/old");

    let target = p.origin.with_path("/new");
    assert_eq!(
        crawl_step(&p.ctx, &p.domain).await,
        StepOutcome::Fetched(FetchOutcome::Redirected(target.clone()))
    );
    assert!(p.ctx.extraction.pop().is_none());
    assert!(p
        .ctx
        .documents
        .site_record(&p.origin.with_path("/old"))
        .await
        .expect("Store lookup failed")
        .is_none());
    assert_eq!(decode_url_batch(&p.transport.peek(TODO)[0]), vec![target.to_string()]);
    assert_eq!(p.transport.peek(DONE), vec![p.origin.with_path("/old").to_string()]);
}

#[tokio::test]
async fn test_sitemap_paths_seed_probe_queue() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "User-agent: *\nDisallow: /hidden\nSitemap: /sitemap.xml",
        ))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(format!(
                    r#"<?xml version="1.0" encoding="UTF-8"?>
                    <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
                      <url><loc>{0}/listed</loc></url>
                      <url><loc>{0}/hidden/page</loc></url>
                      <url><loc>https://other.example/x</loc></url>
                    </urlset>"#,
                    base_url
                ))
                .insert_header("content-type", "application/xml"),
        )
        .mount(&mock_server)
        .await;

    let p = pipeline(&mock_server).await;
    let policy = p.domain.policy().expect("Policy resolved");
    let paths = collect_sitemap_paths(p.ctx.fetcher.as_ref(), &p.domain, policy.sitemaps()).await;
    assert_eq!(paths, vec!["/listed".to_string(), "/hidden/page".to_string()]);

    let queued = paths.iter().filter(|path| p.domain.enqueue_probe(path)).count();
    assert_eq!(queued, 1);
}

#[tokio::test]
async fn test_foreign_sitemap_never_fetched() {
    let mock_server = MockServer::start().await;
    let other_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "User-agent: *\nSitemap: {}/sitemap.xml\nSitemap: /local.xml",
            other_server.uri()
        )))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/local.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
            <sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
              <sitemap><loc>{}/nested.xml</loc></sitemap>
            </sitemapindex>"#,
            other_server.uri()
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<urlset></urlset>"))
        .expect(0)
        .mount(&other_server)
        .await;

    let p = pipeline(&mock_server).await;
    let policy = p.domain.policy().expect("Policy resolved");
    assert_eq!(policy.sitemaps().len(), 2);

    let paths = collect_sitemap_paths(p.ctx.fetcher.as_ref(), &p.domain, policy.sitemaps()).await;
    assert!(paths.is_empty());
}

#[tokio::test]
async fn test_sitemap_fetches_respect_crawl_delay() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "User-agent: *\nCrawl-delay: 0.5\nSitemap: /index.xml",
        ))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/index.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
              <sitemap><loc>{}/pages.xml</loc></sitemap>
            </sitemapindex>"#,
            base_url
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/pages.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
              <url><loc><![CDATA[{}/from-cdata]]></loc></url>
            </urlset>"#,
            base_url
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    let p = pipeline(&mock_server).await;
    let policy = p.domain.policy().expect("Policy resolved");

    let started = Instant::now();
    let paths = collect_sitemap_paths(p.ctx.fetcher.as_ref(), &p.domain, policy.sitemaps()).await;
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert_eq!(paths, vec!["/from-cdata".to_string()]);

    // The sitemap downloads count against the delay for page fetches too
    p.domain.enqueue_fetch("/");
    assert_eq!(crawl_step(&p.ctx, &p.domain).await, StepOutcome::Idle);
}
