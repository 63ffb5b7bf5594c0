//! Legacy image lookups for the backfill
//!
//! Weapons carry one legacy image (`image_url`), perks carry two
//! (`icon_url`, `type_icon_url`). Each has a matching nullable media link column.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::services::backfill::{BackfillItem, BackfillRow, BackfillSource, BackfillTable};
use crate::services::media_import::MediaKind;

#[derive(Debug, FromRow)]
struct WeaponImageRow {
    id: String,
    slug: Option<String>,
    image_url: Option<String>,
}

#[derive(Debug, FromRow)]
struct PerkIconRow {
    id: String,
    slug: Option<String>,
    icon_url: Option<String>,
    type_icon_url: Option<String>,
}

/// Media link column for a (table, kind) pair
fn link_column(table: BackfillTable, kind: MediaKind) -> Option<&'static str> {
    match (table, kind) {
        (BackfillTable::Weapons, MediaKind::Weapon) => Some("image_media_id"),
        (BackfillTable::Perks, MediaKind::PerkMain) => Some("icon_media_id"),
        (BackfillTable::Perks, MediaKind::PerkType) => Some("type_icon_media_id"),
        _ => None,
    }
}

/// UPDATE keyed on the bigint primary key; table and column come from the fixed mapping
fn link_update_sql(table: BackfillTable, kind: MediaKind) -> Result<String> {
    let column = link_column(table, kind)
        .ok_or_else(|| anyhow::anyhow!("{} rows have no media column for {}", table, kind))?;
    Ok(format!("UPDATE {} SET {} = $1 WHERE id = $2", table.as_str(), column))
}

fn parse_row_id(row_id: &str) -> Result<i64> {
    row_id
        .trim()
        .parse()
        .with_context(|| format!("row id '{row_id}' is not a bigint key"))
}

fn non_empty(url: Option<String>) -> Option<String> {
    url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty())
}

/// Backfill database repository
pub struct BackfillRepository {
    pool: PgPool,
}

impl BackfillRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Weapons with a legacy image URL and no media link
    pub async fn pending_weapons(&self, limit: i64) -> Result<Vec<BackfillRow>> {
        let rows = sqlx::query_as::<_, WeaponImageRow>(
            r#"
            SELECT id::text AS id, slug, image_url
            FROM weapons
            WHERE image_media_id IS NULL
              AND COALESCE(image_url, '') <> ''
            ORDER BY id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|r| {
                let url = non_empty(r.image_url)?;
                Some(BackfillRow {
                    id: r.id,
                    slug: r.slug,
                    items: vec![BackfillItem {
                        kind: MediaKind::Weapon,
                        source_url: url,
                    }],
                })
            })
            .collect())
    }

    /// Perks with at least one legacy icon URL whose media link is missing
    pub async fn pending_perks(&self, limit: i64) -> Result<Vec<BackfillRow>> {
        let rows = sqlx::query_as::<_, PerkIconRow>(
            r#"
            SELECT id::text AS id,
                   slug,
                   CASE WHEN icon_media_id IS NULL THEN icon_url END AS icon_url,
                   CASE WHEN type_icon_media_id IS NULL THEN type_icon_url END AS type_icon_url
            FROM perks
            WHERE (icon_media_id IS NULL AND COALESCE(icon_url, '') <> '')
               OR (type_icon_media_id IS NULL AND COALESCE(type_icon_url, '') <> '')
            ORDER BY id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|r| {
                let mut items = Vec::with_capacity(2);
                if let Some(url) = non_empty(r.icon_url) {
                    items.push(BackfillItem {
                        kind: MediaKind::PerkMain,
                        source_url: url,
                    });
                }
                if let Some(url) = non_empty(r.type_icon_url) {
                    items.push(BackfillItem {
                        kind: MediaKind::PerkType,
                        source_url: url,
                    });
                }
                (!items.is_empty()).then(|| BackfillRow {
                    id: r.id,
                    slug: r.slug,
                    items,
                })
            })
            .collect())
    }

    /// Point a row's media column at a stored image
    pub async fn set_media_link(
        &self,
        table: BackfillTable,
        row_id: &str,
        kind: MediaKind,
        media_id: Uuid,
    ) -> Result<()> {
        let sql = link_update_sql(table, kind)?;
        let id = parse_row_id(row_id)?;

        let result = sqlx::query(&sql)
            .bind(media_id)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("{} row {} not found", table, row_id);
        }

        Ok(())
    }
}

#[async_trait]
impl BackfillSource for BackfillRepository {
    async fn pending_rows(&self, table: BackfillTable, limit: i64) -> Result<Vec<BackfillRow>> {
        match table {
            BackfillTable::Weapons => self.pending_weapons(limit).await,
            BackfillTable::Perks => self.pending_perks(limit).await,
        }
    }

    async fn link_media(
        &self,
        table: BackfillTable,
        row_id: &str,
        kind: MediaKind,
        media_id: Uuid,
    ) -> Result<()> {
        self.set_media_link(table, row_id, kind, media_id).await
    }
}
