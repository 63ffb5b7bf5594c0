//! Application configuration management

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

/// Default allow list for the image proxy
pub const DEFAULT_PROXY_HOSTS: &[&str] = &["www.bungie.net"];

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port
    pub port: u16,

    /// Postgres connection string of the hosted database
    pub database_url: String,

    /// Maximum pooled database connections
    pub database_max_connections: u32,

    /// Supabase API URL (storage lives under `/storage/v1`)
    pub supabase_url: String,

    /// Supabase service role key, required for uploads. Public reads go
    /// through public bucket URLs and need no key.
    pub supabase_service_key: String,

    /// Public site URL, used as the CORS origin when set
    pub site_url: Option<String>,

    /// Whether admin-only routes (media import) are reachable
    pub admin_enabled: bool,

    /// Storage bucket holding mirrored images
    pub media_bucket: String,

    /// Hosts the image proxy is allowed to fetch from
    pub proxy_allowed_hosts: Vec<String>,

    /// Wall-clock timeout for interactive image fetches
    pub import_fetch_timeout: Duration,

    /// Apply `migrations/` at startup
    pub run_migrations: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup, e.g. a map in tests
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = var("DATABASE_URL").context("DATABASE_URL is required")?;
        let supabase_url = var("SUPABASE_URL").context("SUPABASE_URL is required")?;
        let supabase_service_key =
            var("SUPABASE_SERVICE_KEY").context("SUPABASE_SERVICE_KEY is required")?;

        Ok(Self {
            port: var("PORT")
                .unwrap_or_else(|| "3001".to_string())
                .parse()
                .context("Invalid PORT")?,

            database_url,

            database_max_connections: var("DATABASE_MAX_CONNECTIONS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),

            supabase_url: supabase_url.trim_end_matches('/').to_string(),
            supabase_service_key,

            site_url: var("SITE_URL"),

            admin_enabled: var("ADMIN_ENABLED").is_some_and(|v| parse_flag(&v)),

            media_bucket: var("MEDIA_BUCKET").unwrap_or_else(|| "media".to_string()),

            proxy_allowed_hosts: var("IMAGE_PROXY_ALLOWED_HOSTS")
                .map(|v| parse_host_list(&v))
                .unwrap_or_else(|| DEFAULT_PROXY_HOSTS.iter().map(|h| h.to_string()).collect()),

            import_fetch_timeout: Duration::from_secs(
                var("IMPORT_FETCH_TIMEOUT_SECS")
                    .unwrap_or_else(|| "15".to_string())
                    .parse()
                    .context("Invalid IMPORT_FETCH_TIMEOUT_SECS")?,
            ),

            run_migrations: var("RUN_MIGRATIONS").is_some_and(|v| parse_flag(&v)),
        })
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn parse_host_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|h| h.trim().to_ascii_lowercase())
        .filter(|h| !h.is_empty())
        .collect()
}
