//! Crawl runs that stream archives from a mock HTTP server

mod common;

use common::*;
use newsrake_crawl::archive::HttpArchiveSource;
use newsrake_crawl::catalog::ArchiveDescriptor;
use newsrake_crawl::config::CrawlConfig;
use newsrake_crawl::extract::ResponseExtractor;
use newsrake_crawl::ledger::CompletionLedger;
use newsrake_crawl::pipeline::Crawler;
use newsrake_crawl::storage::LocalStorage;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn serve(server: &MockServer, key: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(format!("/{}", key)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_http_crawl() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let keys: Vec<String> = (1..=3).map(|d| archive_key(d, d)).collect();

    serve(&server, &keys[0], news_archive("h0", 5)).await;
    serve(&server, &keys[1], news_archive("h1", 9)).await;
    // keys[2] is not served: 404

    let config = CrawlConfig {
        base_url: format!("{}/", server.uri()),
        workers: 2,
        flush_every: 3,
        ..test_config(dir.path())
    };
    let crawler = Crawler::new(
        config.clone(),
        Arc::new(StaticListing::of(&keys)),
        Arc::new(HttpArchiveSource::new(config.base_url.clone()).unwrap()),
        Arc::new(LocalStorage::new(dir.path().join("out"))),
        Arc::new(ResponseExtractor::new().with_valid_hosts(["example.com"])),
    );

    let summary = crawler.run().await.unwrap();
    assert_eq!(summary.planned, 3);
    assert_eq!(summary.stats.archives_completed, 2);
    assert_eq!(summary.stats.archives_failed, 1);

    let done = CompletionLedger::load(&config.ledger_path).unwrap();
    let served_url = ArchiveDescriptor::from_remote_path(&keys[1]).url(&config.base_url);
    assert!(done.contains(&served_url));
    assert_eq!(done.len(), 2);

    let outcomes = CompletionLedger::outcomes(&config.ledger_path).unwrap();
    let missing = outcomes.iter().find(|o| !o.completed).unwrap();
    assert!(missing.failure.as_deref().unwrap_or_default().contains("404"));

    let out = dir.path().join("out");
    for (key, responses) in [(&keys[0], 5), (&keys[1], 9)] {
        let batches = read_batches(&out.join(ArchiveDescriptor::from_remote_path(key).output_key()));
        assert_eq!(batches.len(), accepted_in(responses));
        assert!(batches
            .iter()
            .all(|r| r["host"] == "news.example.com" && r["status"] == 200));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_valid_hosts_filter_rejects_other_sites() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let keys = vec![archive_key(7, 1)];
    serve(&server, &keys[0], news_archive("f", 4)).await;

    let config = CrawlConfig {
        base_url: server.uri(),
        ..test_config(dir.path())
    };
    let crawler = Crawler::new(
        config.clone(),
        Arc::new(StaticListing::of(&keys)),
        Arc::new(HttpArchiveSource::new(server.uri()).unwrap()),
        Arc::new(LocalStorage::new(dir.path().join("out"))),
        Arc::new(ResponseExtractor::new().with_valid_hosts(["another-paper.org"])),
    );

    let summary = crawler.run().await.unwrap();
    assert_eq!(summary.stats.archives_completed, 1);
    assert_eq!(summary.stats.records_accepted, 0);
    assert_eq!(summary.stats.records_rejected, 4);

    let outcomes = CompletionLedger::outcomes(&config.ledger_path).unwrap();
    assert!(outcomes[0].completed);
    assert_eq!(outcomes[0].record_count, 0);
}
