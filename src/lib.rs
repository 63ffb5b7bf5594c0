//! Loadout media backend
//!
//! Mirrors externally hosted weapon and perk artwork into owned storage,
//! backfills legacy rows, and proxies an allow-listed image host.

pub mod api;
pub mod config;
pub mod db;
pub mod services;

use std::sync::Arc;

use crate::config::Config;
use crate::db::Database;
use crate::services::ImageImporter;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub importer: Arc<ImageImporter>,
    pub http_client: reqwest::Client,
}
