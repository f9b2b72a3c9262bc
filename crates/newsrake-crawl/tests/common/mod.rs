//! Shared fixtures for crawl integration tests
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use flate2::{write::GzEncoder, Compression};
use newsrake_crawl::catalog::{DateWindow, ListingOutput, ListingRunner};
use newsrake_crawl::config::CrawlConfig;
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const BASE_URL: &str = "https://data.commoncrawl.org/";

/// Catalog key for an archive dated 2021-06-`day`
pub fn archive_key(day: u32, seq: u32) -> String {
    format!(
        "crawl-data/CC-NEWS/2021/06/CC-NEWS-202106{:02}120000-{:05}.warc.gz",
        day, seq
    )
}

pub fn warc_record(kind: &str, uri: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "WARC/1.0\r\nWARC-Type: {}\r\nWARC-Target-URI: {}\r\nWARC-Date: 2021-06-01T12:00:00Z\r\nContent-Length: {}\r\n\r\n",
        kind,
        uri,
        payload.len()
    )
    .into_bytes();
    out.extend_from_slice(payload);
    out.extend_from_slice(b"\r\n\r\n");
    out
}

pub fn http_response(body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\n\r\n{}",
        body
    )
    .into_bytes()
}

/// One gzip member per record, as in CC-NEWS
pub fn gzip_members(records: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for record in records {
        let mut enc = GzEncoder::new(Vec::new(), Compression::fast());
        enc.write_all(record).unwrap();
        out.extend(enc.finish().unwrap());
    }
    out
}

/// A warcinfo record followed by `responses` response/request pairs.
/// Every fourth response has an empty body and is rejected by the extractor.
pub fn news_archive(tag: &str, responses: usize) -> Vec<u8> {
    let mut records = vec![warc_record("warcinfo", "", b"software: fixture")];
    for i in 0..responses {
        let uri = format!("https://news.example.com/{}/{}", tag, i);
        records.push(warc_record("request", &uri, b"GET / HTTP/1.1\r\n\r\n"));
        let body = if i % 4 == 3 {
            String::new()
        } else {
            format!("<p>{} article {}</p>", tag, i)
        };
        records.push(warc_record("response", &uri, &http_response(&body)));
    }
    gzip_members(&records)
}

/// Accepted records `news_archive(tag, responses)` yields
pub fn accepted_in(responses: usize) -> usize {
    (0..responses).filter(|i| i % 4 != 3).count()
}

pub fn write_mirror(root: &Path, key: &str, bytes: &[u8]) {
    let path = root.join(key);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, bytes).unwrap();
}

/// Listing that returns fixed text
pub struct StaticListing(pub String);

impl StaticListing {
    pub fn of(keys: &[String]) -> Self {
        Self(keys.join("\n"))
    }
}

#[async_trait]
impl ListingRunner for StaticListing {
    async fn list(&self, _window: &DateWindow) -> newsrake_crawl::Result<ListingOutput> {
        Ok(ListingOutput {
            exit_code: 0,
            text: self.0.clone(),
        })
    }
}

/// Every record of every `last_record_*.json` batch under `dir`, in
/// checkpoint order
pub fn read_batches(dir: &Path) -> Vec<Value> {
    let mut files: Vec<(u64, PathBuf)> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter_map(|e| {
                    let name = e.file_name().to_string_lossy().into_owned();
                    newsrake_crawl::archive::checkpoint::parse_checkpoint_name(&name)
                        .map(|n| (n, e.path()))
                })
                .collect()
        })
        .unwrap_or_default();
    files.sort();

    files
        .into_iter()
        .flat_map(|(_, path)| {
            let records: Vec<Value> = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
            records
        })
        .collect()
}

pub fn urls_of(records: &[Value]) -> Vec<String> {
    let mut urls: Vec<String> = records
        .iter()
        .map(|r| r["url"].as_str().unwrap().to_string())
        .collect();
    urls.sort();
    urls
}

pub fn test_config(root: &Path) -> CrawlConfig {
    CrawlConfig {
        base_url: BASE_URL.to_string(),
        ledger_path: root.join("ledger.jsonl"),
        destination: root.join("out").display().to_string(),
        min_date: chrono::NaiveDate::from_ymd_opt(2021, 6, 1),
        max_date: chrono::NaiveDate::from_ymd_opt(2021, 6, 30),
        workers: 1,
        flush_every: 4,
        identity: Some("worker-a".to_string()),
        ..CrawlConfig::default()
    }
}
