//! Media metadata repository
//!
//! One row per distinct image, keyed by the raw SHA-256 digest (`bytea`, unique).
//! Uses runtime query validation to avoid requiring tables to exist at compile time.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::services::media_import::MediaCatalog;

/// Media record from database
#[derive(Debug, Clone, FromRow)]
pub struct MediaRecord {
    pub id: Uuid,
    pub source_url: String,
    pub storage_path: String,
    pub format: String,
    pub byte_size: i64,
    pub content_hash: Vec<u8>,
    pub attribution: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Data for recording a newly stored image
#[derive(Debug, Clone)]
pub struct NewMedia {
    pub source_url: String,
    pub storage_path: String,
    pub format: String,
    pub byte_size: i64,
    pub content_hash: Vec<u8>,
    pub attribution: Option<String>,
}

/// Insert result; a hash conflict is not an error
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Inserted(MediaRecord),
    DuplicateHash,
}

/// Media database repository
pub struct MediaRepository {
    pool: PgPool,
}

impl MediaRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a media record by ID
    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<MediaRecord>> {
        let record = sqlx::query_as::<_, MediaRecord>(
            r#"
            SELECT id, source_url, storage_path, format, byte_size,
                   content_hash, attribution, created_at
            FROM media
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Get a media record by content hash (for deduplication)
    pub async fn get_by_hash(&self, content_hash: &[u8]) -> Result<Option<MediaRecord>> {
        let record = sqlx::query_as::<_, MediaRecord>(
            r#"
            SELECT id, source_url, storage_path, format, byte_size,
                   content_hash, attribution, created_at
            FROM media
            WHERE content_hash = $1
            "#,
        )
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Insert a media row, reporting a unique-hash conflict instead of failing
    pub async fn create(&self, data: NewMedia) -> Result<InsertOutcome> {
        let result = sqlx::query_as::<_, MediaRecord>(
            r#"
            INSERT INTO media (
                source_url, storage_path, format, byte_size, content_hash, attribution
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, source_url, storage_path, format, byte_size,
                      content_hash, attribution, created_at
            "#,
        )
        .bind(&data.source_url)
        .bind(&data.storage_path)
        .bind(&data.format)
        .bind(data.byte_size)
        .bind(&data.content_hash)
        .bind(&data.attribution)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(record) => Ok(InsertOutcome::Inserted(record)),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Ok(InsertOutcome::DuplicateHash)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Count stored media rows
    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM media")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.0)
    }
}

#[async_trait]
impl MediaCatalog for MediaRepository {
    async fn find_by_hash(&self, content_hash: &[u8]) -> Result<Option<MediaRecord>> {
        self.get_by_hash(content_hash).await
    }

    async fn insert(&self, media: NewMedia) -> Result<InsertOutcome> {
        self.create(media).await
    }
}
