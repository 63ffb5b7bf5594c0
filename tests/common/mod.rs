//! Shared test doubles: in-memory storage and catalog, plus a local image host

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use loadout::db::{InsertOutcome, MediaRecord, NewMedia};
use loadout::services::{ImageImporter, MediaCatalog, ObjectStore, UploadOutcome};

pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR-weapon-a";
pub const JPEG_BYTES: &[u8] = b"\xff\xd8\xff\xe0\0\x10JFIF-perk-b";
pub const OVERSIZE_BYTES: usize = 3 * 1024 * 1024;

// ============================================================================
// Object store
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, (Vec<u8>, String, String)>>,
    pub uploads: AtomicUsize,
    /// Report every upload as already present without storing it
    pub pretend_exists: AtomicBool,
}

impl MemoryStore {
    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = self.objects.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn object(&self, path: &str) -> Option<(Vec<u8>, String, String)> {
        self.objects.lock().get(path).cloned()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_object(
        &self,
        path: &str,
        body: Vec<u8>,
        content_type: &str,
        cache_control: &str,
    ) -> anyhow::Result<UploadOutcome> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if self.pretend_exists.load(Ordering::SeqCst) {
            return Ok(UploadOutcome::AlreadyExists);
        }

        let mut objects = self.objects.lock();
        if objects.contains_key(path) {
            return Ok(UploadOutcome::AlreadyExists);
        }
        objects.insert(
            path.to_string(),
            (body, content_type.to_string(), cache_control.to_string()),
        );
        Ok(UploadOutcome::Created)
    }

    fn public_url(&self, path: &str) -> String {
        format!("https://storage.test/media/{path}")
    }
}

// ============================================================================
// Media catalog
// ============================================================================

#[derive(Default)]
pub struct MemoryCatalog {
    rows: Mutex<HashMap<Vec<u8>, MediaRecord>>,
    pub lookups: AtomicUsize,
    pub inserts: AtomicUsize,
    /// Simulate another worker inserting the same hash just before us
    pub lose_insert_race: AtomicBool,
}

impl MemoryCatalog {
    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    fn record(media: NewMedia) -> MediaRecord {
        MediaRecord {
            id: Uuid::new_v4(),
            source_url: media.source_url,
            storage_path: media.storage_path,
            format: media.format,
            byte_size: media.byte_size,
            content_hash: media.content_hash,
            attribution: media.attribution,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
impl MediaCatalog for MemoryCatalog {
    async fn find_by_hash(&self, content_hash: &[u8]) -> anyhow::Result<Option<MediaRecord>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.rows.lock().get(content_hash).cloned())
    }

    async fn insert(&self, media: NewMedia) -> anyhow::Result<InsertOutcome> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.lock();

        if self.lose_insert_race.load(Ordering::SeqCst) {
            let mut winner = Self::record(media.clone());
            winner.source_url = "https://other-worker.test/same.png".to_string();
            rows.insert(media.content_hash, winner);
            return Ok(InsertOutcome::DuplicateHash);
        }

        if rows.contains_key(&media.content_hash) {
            return Ok(InsertOutcome::DuplicateHash);
        }
        let record = Self::record(media);
        rows.insert(record.content_hash.clone(), record.clone());
        Ok(InsertOutcome::Inserted(record))
    }
}

pub fn importer(store: Arc<MemoryStore>, catalog: Arc<MemoryCatalog>) -> ImageImporter {
    ImageImporter::new(store, catalog, Duration::from_secs(5)).expect("importer")
}

// ============================================================================
// Local image host
// ============================================================================

#[derive(Clone, Default)]
pub struct ImageHost {
    pub hits: Arc<AtomicUsize>,
}

async fn png(State(host): State<ImageHost>) -> Response {
    host.hits.fetch_add(1, Ordering::SeqCst);
    ([(header::CONTENT_TYPE, "image/png")], PNG_BYTES).into_response()
}

async fn jpeg(State(host): State<ImageHost>) -> Response {
    host.hits.fetch_add(1, Ordering::SeqCst);
    ([(header::CONTENT_TYPE, "image/jpeg; charset=binary")], JPEG_BYTES).into_response()
}

async fn html(State(host): State<ImageHost>) -> Response {
    host.hits.fetch_add(1, Ordering::SeqCst);
    ([(header::CONTENT_TYPE, "text/html")], "<html>hotlinking denied</html>").into_response()
}

async fn huge(State(host): State<ImageHost>) -> Response {
    host.hits.fetch_add(1, Ordering::SeqCst);
    ([(header::CONTENT_TYPE, "image/png")], vec![0u8; OVERSIZE_BYTES]).into_response()
}

/// Oversized body sent in chunks, so no Content-Length is declared
async fn huge_chunked(State(host): State<ImageHost>) -> Response {
    host.hits.fetch_add(1, Ordering::SeqCst);
    let chunks = (0..48).map(|_| Ok::<_, std::io::Error>(Bytes::from(vec![7u8; 64 * 1024])));
    (
        [(header::CONTENT_TYPE, "image/webp")],
        Body::from_stream(futures::stream::iter(chunks)),
    )
        .into_response()
}

async fn missing(State(host): State<ImageHost>) -> Response {
    host.hits.fetch_add(1, Ordering::SeqCst);
    StatusCode::NOT_FOUND.into_response()
}

/// Bounces to a plain-http path on the same host
async fn redirect_to_png(State(host): State<ImageHost>) -> Response {
    host.hits.fetch_add(1, Ordering::SeqCst);
    Redirect::temporary("/a.png").into_response()
}

/// Serve test images on an ephemeral local port
pub async fn spawn_image_host() -> (SocketAddr, ImageHost) {
    let host = ImageHost::default();
    let app = Router::new()
        .route("/a.png", get(png))
        .route("/mirror/a-copy.png", get(png))
        .route("/b.jpg", get(jpeg))
        .route("/page.html", get(html))
        .route("/huge.png", get(huge))
        .route("/huge-chunked.webp", get(huge_chunked))
        .route("/missing.png", get(missing))
        .route("/redirect", get(redirect_to_png))
        .with_state(host.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("image host");
    });

    (addr, host)
}
