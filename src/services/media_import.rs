//! Image importer: mirrors externally hosted artwork into the media bucket
//!
//! Every image is keyed by the SHA-256 of its raw bytes. A hash that is already
//! catalogued is returned as-is, so each distinct image is uploaded and
//! recorded at most once no matter how many source URLs point at it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::db::media::{InsertOutcome, MediaRecord, NewMedia};

/// Largest accepted image payload (2 MiB)
pub const MAX_IMAGE_BYTES: u64 = 2 * 1024 * 1024;

/// Objects are content addressed, so they never change once written
pub const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

const FETCH_ACCEPT: &str = "image/avif,image/webp,image/apng,image/svg+xml,image/*,*/*;q=0.8";
const FETCH_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// What the imported image depicts; decides where it lands in the bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    #[serde(alias = "weapon_image")]
    Weapon,
    #[serde(alias = "perk_icon")]
    PerkMain,
    #[serde(alias = "perk_type_icon")]
    PerkType,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Weapon => "weapon",
            MediaKind::PerkMain => "perk_main",
            MediaKind::PerkType => "perk_type",
        }
    }
}

impl std::str::FromStr for MediaKind {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "weapon" | "weapon_image" => Ok(MediaKind::Weapon),
            "perk_main" | "perk_icon" => Ok(MediaKind::PerkMain),
            "perk_type" | "perk_type_icon" => Ok(MediaKind::PerkType),
            other => Err(ImportError::InvalidRequest(format!("unknown media kind '{other}'"))),
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to mirror one remote image
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub url: String,
    pub kind: MediaKind,
    pub slug_or_id: Option<String>,
    pub attribution: Option<String>,
}

/// Result of an import, fresh or deduplicated
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportOutcome {
    pub id: Uuid,
    pub storage_path: String,
    pub public_url: String,
    pub reused: bool,
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("invalid import request: {0}")]
    InvalidRequest(String),

    #[error("failed to fetch source image: {0}")]
    UpstreamFetch(#[source] reqwest::Error),

    #[error("source responded with {0}")]
    UpstreamStatus(StatusCode),

    #[error("source is not an image (content-type: {0})")]
    NotAnImage(String),

    #[error("image exceeds {limit} bytes")]
    PayloadTooLarge { limit: u64, actual: Option<u64> },

    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),

    #[error("database error: {0:#}")]
    Database(anyhow::Error),
}

impl ImportError {
    /// HTTP status associated with the failure, `None` when no response was received.
    ///
    /// Upstream failures report the upstream status, not the status the API answers with.
    /// Storage failures report the storage status when it answered, 500 otherwise.
    pub fn status_hint(&self) -> Option<u16> {
        match self {
            ImportError::InvalidRequest(_) => Some(400),
            ImportError::UpstreamFetch(e) => e.status().map(|s| s.as_u16()),
            ImportError::UpstreamStatus(status) => Some(status.as_u16()),
            ImportError::NotAnImage(_) => Some(415),
            ImportError::PayloadTooLarge { .. } => Some(413),
            ImportError::Storage(e) => Some(
                e.downcast_ref::<StorageRejected>()
                    .map_or(500, |rejected| rejected.status.as_u16()),
            ),
            ImportError::Database(_) => Some(500),
        }
    }
}

/// Object storage refused an upload with a definite HTTP status
#[derive(Debug, Error)]
#[error("storage rejected upload with {status}: {body}")]
pub struct StorageRejected {
    pub status: StatusCode,
    pub body: String,
}

/// Upload result from an [`ObjectStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Created,
    /// The object was already present; another writer got there first
    AlreadyExists,
}

/// Object storage the importer writes into
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(
        &self,
        path: &str,
        body: Vec<u8>,
        content_type: &str,
        cache_control: &str,
    ) -> anyhow::Result<UploadOutcome>;

    fn public_url(&self, path: &str) -> String;
}

/// Metadata rows keyed by content hash
#[async_trait]
pub trait MediaCatalog: Send + Sync {
    async fn find_by_hash(&self, content_hash: &[u8]) -> anyhow::Result<Option<MediaRecord>>;

    async fn insert(&self, media: NewMedia) -> anyhow::Result<InsertOutcome>;
}

/// Anything that can turn an [`ImportRequest`] into stored media
#[async_trait]
pub trait MediaImport: Send + Sync {
    async fn import(&self, request: &ImportRequest) -> Result<ImportOutcome, ImportError>;
}

struct FetchedImage {
    bytes: Vec<u8>,
    content_type: String,
}

/// Fetch → validate → hash → dedupe → store → record
pub struct ImageImporter {
    http_client: reqwest::Client,
    store: Arc<dyn ObjectStore>,
    catalog: Arc<dyn MediaCatalog>,
    max_bytes: u64,
}

impl ImageImporter {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        catalog: Arc<dyn MediaCatalog>,
        fetch_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .context("Failed to build image fetch client")?;

        Ok(Self {
            http_client,
            store,
            catalog,
            max_bytes: MAX_IMAGE_BYTES,
        })
    }

    /// Override the payload ceiling
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn public_url(&self, path: &str) -> String {
        self.store.public_url(path)
    }

    /// Mirror one image, reusing an existing object when the bytes are already known
    pub async fn import_image(&self, request: &ImportRequest) -> Result<ImportOutcome, ImportError> {
        let source = parse_source_url(&request.url)?;

        info!(url = %source, kind = %request.kind, "Importing image");

        let image = self.fetch_image(&source).await?;
        let byte_size = image.bytes.len();

        let digest = Sha256::digest(&image.bytes);
        let content_hash = digest.to_vec();
        let hash_hex = hex::encode(&content_hash);

        if let Some(existing) = self
            .catalog
            .find_by_hash(&content_hash)
            .await
            .map_err(ImportError::Database)?
        {
            debug!(hash = %hash_hex, id = %existing.id, "Image already stored, reusing");
            return Ok(self.outcome(existing, true));
        }

        let extension = extension_for(&image.content_type);
        let path = storage_path(request.kind, &hash_hex, extension, request.slug_or_id.as_deref());

        debug!(path = %path, size = byte_size, "Uploading image");

        match self
            .store
            .put_object(&path, image.bytes, &image.content_type, IMMUTABLE_CACHE_CONTROL)
            .await
            .map_err(ImportError::Storage)?
        {
            UploadOutcome::Created => {}
            UploadOutcome::AlreadyExists => {
                debug!(path = %path, "Object already present, continuing with metadata");
            }
        }

        let new_media = NewMedia {
            source_url: source.to_string(),
            storage_path: path,
            format: extension.to_string(),
            byte_size: byte_size as i64,
            content_hash: content_hash.clone(),
            attribution: request.attribution.clone(),
        };

        match self
            .catalog
            .insert(new_media)
            .await
            .map_err(ImportError::Database)?
        {
            InsertOutcome::Inserted(record) => {
                info!(id = %record.id, path = %record.storage_path, "Image imported");
                Ok(self.outcome(record, false))
            }
            InsertOutcome::DuplicateHash => {
                warn!(hash = %hash_hex, "Lost insert race, reading winning row");
                let record = self
                    .catalog
                    .find_by_hash(&content_hash)
                    .await
                    .map_err(ImportError::Database)?
                    .ok_or_else(|| {
                        ImportError::Database(anyhow::anyhow!(
                            "media row for hash {} vanished after conflict",
                            hash_hex
                        ))
                    })?;
                Ok(self.outcome(record, true))
            }
        }
    }

    fn outcome(&self, record: MediaRecord, reused: bool) -> ImportOutcome {
        ImportOutcome {
            id: record.id,
            public_url: self.store.public_url(&record.storage_path),
            storage_path: record.storage_path,
            reused,
        }
    }

    async fn fetch_image(&self, source: &Url) -> Result<FetchedImage, ImportError> {
        let response = self
            .http_client
            .get(source.clone())
            .headers(fetch_headers(source))
            .send()
            .await
            .map_err(ImportError::UpstreamFetch)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ImportError::UpstreamStatus(status));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|ct| ct.to_str().ok())
            .map(media_type_essence)
            .unwrap_or_default();

        if !content_type.starts_with("image/") {
            let shown = if content_type.is_empty() { "<missing>".to_string() } else { content_type };
            return Err(ImportError::NotAnImage(shown));
        }

        if let Some(declared) = response.content_length()
            && declared > self.max_bytes
        {
            return Err(ImportError::PayloadTooLarge {
                limit: self.max_bytes,
                actual: Some(declared),
            });
        }

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(ImportError::UpstreamFetch)?;
            if (bytes.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(ImportError::PayloadTooLarge {
                    limit: self.max_bytes,
                    actual: None,
                });
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(FetchedImage {
            bytes,
            content_type,
        })
    }
}

#[async_trait]
impl MediaImport for ImageImporter {
    async fn import(&self, request: &ImportRequest) -> Result<ImportOutcome, ImportError> {
        self.import_image(request).await
    }
}

fn parse_source_url(raw: &str) -> Result<Url, ImportError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| ImportError::InvalidRequest(format!("url is not valid: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ImportError::InvalidRequest(format!(
            "unsupported url scheme '{other}'"
        ))),
    }
}

/// Browser-like headers; some hosts refuse hotlinked requests without a matching referrer
fn fetch_headers(source: &Url) -> HeaderMap {
    let origin = source.origin().ascii_serialization();
    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT, HeaderValue::from_static(FETCH_ACCEPT));
    headers.insert(header::USER_AGENT, HeaderValue::from_static(FETCH_USER_AGENT));
    if let Ok(referer) = HeaderValue::from_str(&format!("{origin}/")) {
        headers.insert(header::REFERER, referer);
    }
    if let Ok(origin) = HeaderValue::from_str(&origin) {
        headers.insert(header::ORIGIN, origin);
    }
    headers
}

/// `image/PNG; charset=binary` → `image/png`
fn media_type_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// File extension for a stored image, `png` when the type is unrecognised
pub fn extension_for(content_type: &str) -> &'static str {
    match media_type_essence(content_type).as_str() {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/svg+xml" => "svg",
        _ => "png",
    }
}

/// Deterministic object path for a content hash
pub fn storage_path(
    kind: MediaKind,
    hash_hex: &str,
    extension: &str,
    slug_or_id: Option<&str>,
) -> String {
    match kind {
        MediaKind::Weapon => format!(
            "weapons/{}/{}.{}",
            slug_segment(slug_or_id),
            hash_hex,
            extension
        ),
        MediaKind::PerkMain => format!("perks/main/{}.{}", hash_hex, extension),
        MediaKind::PerkType => format!("perks/type/{}.{}", hash_hex, extension),
    }
}

fn slug_segment(slug_or_id: Option<&str>) -> String {
    let cleaned = slug_or_id
        .map(sanitize_filename::sanitize)
        .unwrap_or_default()
        .trim_matches(|c: char| c == '.' || c.is_whitespace())
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase();

    if cleaned.is_empty() {
        "unsorted".to_string()
    } else {
        cleaned
    }
}
