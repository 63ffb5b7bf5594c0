//! Backfill checkpoint file
//!
//! Records which row IDs a backfill has finished so an interrupted run can resume.
//! The file is rewritten after every mark.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    table: String,
    processed: BTreeSet<String>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

/// Processed row IDs for one table, persisted as JSON
#[derive(Debug)]
pub struct Checkpoint {
    path: PathBuf,
    table: String,
    processed: BTreeSet<String>,
}

impl Checkpoint {
    /// Start an empty checkpoint; nothing is written until the first mark
    pub fn new(path: impl Into<PathBuf>, table: &str) -> Self {
        Self {
            path: path.into(),
            table: table.to_string(),
            processed: BTreeSet::new(),
        }
    }

    /// Load a checkpoint from disk, or start empty when the file does not exist
    pub fn load(path: impl Into<PathBuf>, table: &str) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            debug!(path = %path.display(), "No checkpoint file, starting fresh");
            return Ok(Self::new(path, table));
        }

        let raw = fs::read(&path)
            .with_context(|| format!("Failed to read checkpoint {}", path.display()))?;
        let file: CheckpointFile = serde_json::from_slice(&raw)
            .with_context(|| format!("Malformed checkpoint {}", path.display()))?;

        if file.table != table {
            anyhow::bail!(
                "Checkpoint {} belongs to table '{}', not '{}'",
                path.display(),
                file.table,
                table
            );
        }

        Ok(Self {
            path,
            table: file.table,
            processed: file.processed,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, row_id: &str) -> bool {
        self.processed.contains(row_id)
    }

    pub fn len(&self) -> usize {
        self.processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
    }

    /// Mark a row finished and flush to disk before returning
    pub fn mark(&mut self, row_id: &str) -> Result<()> {
        self.processed.insert(row_id.to_string());
        self.save()
    }

    /// Write the checkpoint through a temp file so a crash never leaves half a file
    pub fn save(&self) -> Result<()> {
        let file = CheckpointFile {
            table: self.table.clone(),
            processed: self.processed.clone(),
            updated_at: Some(Utc::now()),
        };
        let json = serde_json::to_vec_pretty(&file)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        Ok(())
    }
}
