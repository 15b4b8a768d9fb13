//! Shared fixtures for the pipeline integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use epg_ingest::{
    config::Config,
    errors::{AppError, AppResult},
    pipeline::Pipeline,
    storage::{ByteStream, MemoryDocumentStore, MemoryObjectStore},
    utils::FeedSource,
};
use flate2::{Compression, write::GzEncoder};
use futures::StreamExt;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// The two-channel feed used throughout the scenario tests
pub const SCENARIO_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<tv generator-info-name="test">
  <channel id="c1"><display-name>La 1</display-name></channel>
  <channel id="c2"><display-name>UnknownChan</display-name></channel>
  <programme channel="c1" start="2024060100000" stop="20240601010000">
    <title>Noticias</title>
    <desc>2023 | 16 | 8/10
Drama / Thriller · A gripping tale
Reparto: Ana, Luis · País: España</desc>
  </programme>
</tv>"#;

/// Feed source serving a fixed body, or failing when offline
pub struct FakeFeedSource {
    body: Mutex<Option<Vec<u8>>>,
    requests: AtomicUsize,
}

impl FakeFeedSource {
    pub fn serving(body: impl Into<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            body: Mutex::new(Some(body.into())),
            requests: AtomicUsize::new(0),
        })
    }

    pub fn offline() -> Arc<Self> {
        Arc::new(Self {
            body: Mutex::new(None),
            requests: AtomicUsize::new(0),
        })
    }

    pub fn set_body(&self, body: impl Into<Vec<u8>>) {
        *self.body.lock().unwrap() = Some(body.into());
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedSource for FakeFeedSource {
    async fn fetch(&self, _url: &str) -> AppResult<Bytes> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.body
            .lock()
            .unwrap()
            .clone()
            .map(Bytes::from)
            .ok_or_else(|| AppError::source_unavailable("connection refused"))
    }

    async fn open_stream(&self, url: &str) -> AppResult<ByteStream> {
        let body = self.fetch(url).await?;
        let chunks: Vec<AppResult<Bytes>> = body
            .chunks(64)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(futures::stream::iter(chunks).boxed())
    }
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// A feed with `count` uniquely named channels, each with one programme on
/// 2024-06-01
pub fn wide_feed(count: usize) -> String {
    let mut xml = String::from("<tv>\n");
    for i in 0..count {
        xml.push_str(&format!(
            "<channel id=\"ch{i}\"><display-name>Channel {i:05}</display-name></channel>\n"
        ));
    }
    for i in 0..count {
        xml.push_str(&format!(
            "<programme channel=\"ch{i}\" start=\"20240601080000\" stop=\"20240601090000\"><title>Show {i}</title></programme>\n"
        ));
    }
    xml.push_str("</tv>");
    xml
}

pub struct Harness {
    pub pipeline: Pipeline,
    pub objects: Arc<MemoryObjectStore>,
    pub documents: Arc<MemoryDocumentStore>,
    pub source: Arc<FakeFeedSource>,
}

pub fn harness(source: Arc<FakeFeedSource>) -> Harness {
    harness_with_config(source, Config::default())
}

pub fn harness_with_config(source: Arc<FakeFeedSource>, config: Config) -> Harness {
    let objects = Arc::new(MemoryObjectStore::new());
    let documents = Arc::new(MemoryDocumentStore::new());
    let pipeline = Pipeline::new(config, objects.clone(), documents.clone(), source.clone());
    Harness {
        pipeline,
        objects,
        documents,
        source,
    }
}
