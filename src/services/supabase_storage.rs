//! Supabase Storage client for mirrored images

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::media_import::{MAX_IMAGE_BYTES, ObjectStore, StorageRejected, UploadOutcome};

/// Supabase Storage client
#[derive(Clone)]
pub struct StorageClient {
    base_url: String,
    service_key: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct CreateBucketRequest {
    id: String,
    name: String,
    public: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_size_limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    allowed_mime_types: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct BucketInfo {
    id: String,
    name: String,
}

/// Bucket settings for mirrored images: same ceiling as the importer, any image type
fn image_bucket_request(name: &str, public: bool) -> CreateBucketRequest {
    CreateBucketRequest {
        id: name.to_string(),
        name: name.to_string(),
        public,
        file_size_limit: Some(MAX_IMAGE_BYTES),
        allowed_mime_types: Some(vec!["image/*".to_string()]),
    }
}

/// Storage answers a duplicate object either with 409 or with a 400 whose body says so
fn is_duplicate_response(status: StatusCode, body: &str) -> bool {
    status == StatusCode::CONFLICT
        || body.contains("already exists")
        || body.contains("Duplicate")
        || body.contains("\"409\"")
}

impl StorageClient {
    pub fn new(base_url: String, service_key: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
            client: Client::new(),
        }
    }

    /// Handle for one bucket, usable as the importer's [`ObjectStore`]
    pub fn bucket(&self, name: &str) -> BucketStore {
        BucketStore {
            client: self.clone(),
            bucket: name.to_string(),
        }
    }

    /// Create a public image bucket if it doesn't already exist
    pub async fn ensure_bucket(&self, bucket_name: &str, public: bool) -> Result<()> {
        let list_url = format!("{}/storage/v1/bucket", self.base_url);

        let resp = self
            .client
            .get(&list_url)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("apikey", &self.service_key)
            .send()
            .await
            .context("Failed to list buckets")?;

        if resp.status().is_success() {
            let buckets: Vec<BucketInfo> = resp.json().await.unwrap_or_default();
            if buckets.iter().any(|b| b.id == bucket_name || b.name == bucket_name) {
                debug!(bucket = %bucket_name, "Bucket already exists");
                return Ok(());
            }
        }

        info!(bucket = %bucket_name, public = %public, "Creating storage bucket");

        let request = image_bucket_request(bucket_name, public);

        let resp = self
            .client
            .post(&list_url)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("apikey", &self.service_key)
            .json(&request)
            .send()
            .await
            .context("Failed to create bucket")?;

        let status = resp.status();
        if status.is_success() {
            info!(bucket = %bucket_name, "Bucket created successfully");
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        if is_duplicate_response(status, &body) {
            debug!(bucket = %bucket_name, "Bucket already exists (race condition)");
            Ok(())
        } else {
            warn!(bucket = %bucket_name, status = %status, body = %body, "Failed to create bucket");
            anyhow::bail!("Failed to create bucket: {} - {}", status, body)
        }
    }

    /// Get the public URL for an object
    pub fn public_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, bucket, path
        )
    }

    /// Upload a new object; never overwrites
    pub async fn upload(
        &self,
        bucket: &str,
        path: &str,
        content: Vec<u8>,
        content_type: &str,
        cache_control: &str,
    ) -> Result<UploadOutcome> {
        let url = format!("{}/storage/v1/object/{}/{}", self.base_url, bucket, path);

        debug!(url = %url, size = content.len(), content_type = %content_type, "Uploading to Supabase Storage");

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("apikey", &self.service_key)
            .header("Content-Type", content_type)
            .header("Cache-Control", cache_control)
            .header("x-upsert", "false")
            .body(content)
            .send()
            .await
            .context("Failed to send upload request")?;

        let status = resp.status();
        if status.is_success() {
            debug!(bucket = %bucket, path = %path, "Upload successful");
            return Ok(UploadOutcome::Created);
        }

        let body = resp.text().await.unwrap_or_default();
        if is_duplicate_response(status, &body) {
            debug!(bucket = %bucket, path = %path, "Object already exists");
            return Ok(UploadOutcome::AlreadyExists);
        }

        warn!(
            status = %status,
            body = %body,
            bucket = %bucket,
            path = %path,
            "Failed to upload to Supabase Storage"
        );
        Err(StorageRejected { status, body }.into())
    }
}

/// One bucket of a [`StorageClient`]
#[derive(Clone)]
pub struct BucketStore {
    client: StorageClient,
    bucket: String,
}

impl BucketStore {
    pub fn name(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for BucketStore {
    async fn put_object(
        &self,
        path: &str,
        body: Vec<u8>,
        content_type: &str,
        cache_control: &str,
    ) -> Result<UploadOutcome> {
        self.client
            .upload(&self.bucket, path, body, content_type, cache_control)
            .await
    }

    fn public_url(&self, path: &str) -> String {
        self.client.public_url(&self.bucket, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_url() {
        let client = StorageClient::new("https://abc.supabase.co/".into(), "key".into());
        assert_eq!(
            client.bucket("media").public_url("perks/main/ab.png"),
            "https://abc.supabase.co/storage/v1/object/public/media/perks/main/ab.png"
        );
    }

    #[test]
    fn test_duplicate_detection() {
        assert!(is_duplicate_response(StatusCode::CONFLICT, ""));
        assert!(is_duplicate_response(
            StatusCode::BAD_REQUEST,
            r#"{"statusCode":"409","error":"Duplicate","message":"The resource already exists"}"#
        ));
        assert!(!is_duplicate_response(StatusCode::BAD_REQUEST, r#"{"error":"Invalid JWT"}"#));
        assert!(!is_duplicate_response(StatusCode::INTERNAL_SERVER_ERROR, ""));
    }

    #[test]
    fn test_bucket_accepts_every_image_type() {
        let request = serde_json::to_value(image_bucket_request("media", true)).unwrap();
        assert_eq!(request["allowed_mime_types"], serde_json::json!(["image/*"]));
        assert_eq!(request["file_size_limit"], MAX_IMAGE_BYTES);
        assert_eq!(request["public"], true);
    }
}
