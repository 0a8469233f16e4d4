//! Postgres-backed [`RunStore`].
//!
//! `items` is keyed by `id` with a unique `url`; `destination_sequences` holds
//! one counter row per destination, advanced with a single atomic upsert.
//! `publication_claims` journals each batch between publishing and settling.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, warn};
use uuid::Uuid;

use threadpress_common::{
    Destination, Item, ItemStatus, ProcessedItem, PublicationClaim, UpsertOutcome,
};

use super::{StoreError, STALE_LOCK_MINUTES};
use crate::traits::RunStore;

const RUN_LOCK: &str = "pipeline";
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Clone)]
pub struct PgRunStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct StoredItem {
    id: String,
    url: String,
    raw_text: String,
    links: Vec<String>,
    images: Vec<String>,
    collected_at: DateTime<Utc>,
    status: String,
}

#[derive(sqlx::FromRow)]
struct StoredClaim {
    id: Uuid,
    destination: String,
    sections: Json<Vec<ProcessedItem>>,
    failed: Json<Vec<Item>>,
    claimed_at: DateTime<Utc>,
}

impl From<StoredClaim> for PublicationClaim {
    fn from(row: StoredClaim) -> Self {
        PublicationClaim {
            id: row.id,
            destination: Destination::new(row.destination),
            sections: row.sections.0,
            failed: row.failed.0,
            claimed_at: row.claimed_at,
        }
    }
}

impl PgRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Load a stored item with its status.
    pub async fn get(&self, id: &str) -> Result<Option<(Item, ItemStatus)>, StoreError> {
        let row = sqlx::query_as::<_, StoredItem>(
            r#"
            SELECT id, url, raw_text, links, images, collected_at, status
            FROM items
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            let status = r.status.parse::<ItemStatus>().map_err(StoreError::Invalid)?;
            let item = Item {
                id: r.id,
                url: r.url,
                raw_text: r.raw_text,
                links: r.links,
                images: r.images,
                collected_at: r.collected_at,
            };
            Ok((item, status))
        })
        .transpose()
    }

    /// Number of items with the given status.
    pub async fn count_by_status(&self, status: ItemStatus) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM items WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

async fn write_outcomes(
    conn: &mut PgConnection,
    processed: &[ProcessedItem],
    failed: &[Item],
) -> Result<(), sqlx::Error> {
    for p in processed {
        sqlx::query(
            r#"
            UPDATE items
               SET status = $2, summary = $3, updated_at = now()
             WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(&p.item.id)
        .bind(p.status.as_str())
        .bind(&p.summary)
        .execute(&mut *conn)
        .await?;
    }

    if !failed.is_empty() {
        let ids: Vec<String> = failed.iter().map(|i| i.id.clone()).collect();
        sqlx::query(
            r#"
            UPDATE items
               SET status = 'failed', updated_at = now()
             WHERE id = ANY($1) AND status = 'pending'
            "#,
        )
        .bind(&ids)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION))
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn has(&self, id: &str) -> Result<bool, StoreError> {
        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM items WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn status(&self, id: &str) -> Result<Option<ItemStatus>, StoreError> {
        let status = sqlx::query_scalar::<_, String>("SELECT status FROM items WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        status
            .map(|s| s.parse::<ItemStatus>().map_err(StoreError::Invalid))
            .transpose()
    }

    async fn terminal_ids(&self, ids: &[String]) -> Result<HashSet<String>, StoreError> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT id FROM items WHERE id = ANY($1) AND status <> 'pending'",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn upsert(&self, item: &Item, status: ItemStatus) -> Result<UpsertOutcome, StoreError> {
        // xmax = 0 only for freshly inserted rows.
        let result = sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO items (id, url, raw_text, links, images, collected_at, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE
               SET status = EXCLUDED.status,
                   updated_at = now()
             WHERE items.status = 'pending'
               AND EXCLUDED.status <> 'pending'
            RETURNING (xmax = 0)
            "#,
        )
        .bind(&item.id)
        .bind(&item.url)
        .bind(&item.raw_text)
        .bind(&item.links)
        .bind(&item.images)
        .bind(item.collected_at)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await;

        match result {
            Ok(Some(true)) => Ok(UpsertOutcome::Inserted),
            Ok(Some(false)) => Ok(UpsertOutcome::Updated),
            Ok(None) => {
                debug!(id = %item.id, "Item already recorded, keeping stored status");
                Ok(UpsertOutcome::Unchanged)
            }
            Err(e) if is_unique_violation(&e) => {
                warn!(id = %item.id, url = %item.url, "Duplicate url under a different id, skipping");
                Ok(UpsertOutcome::Duplicate)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn record_outcomes(
        &self,
        processed: &[ProcessedItem],
        failed: &[Item],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        write_outcomes(&mut *tx, processed, failed).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn claim_publication(&self, claim: &PublicationClaim) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO publication_claims (id, destination, sections, failed, claimed_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(claim.id)
        .bind(claim.destination.as_str())
        .bind(Json(&claim.sections))
        .bind(Json(&claim.failed))
        .bind(claim.claimed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn release_publication(&self, claim_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM publication_claims WHERE id = $1")
            .bind(claim_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn settle_publication(&self, claim: &PublicationClaim) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        write_outcomes(&mut *tx, &claim.sections, &claim.failed).await?;
        sqlx::query("DELETE FROM publication_claims WHERE id = $1")
            .bind(claim.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn open_publications(&self) -> Result<Vec<PublicationClaim>, StoreError> {
        let rows = sqlx::query_as::<_, StoredClaim>(
            r#"
            SELECT id, destination, sections, failed, claimed_at
            FROM publication_claims
            ORDER BY claimed_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(PublicationClaim::from).collect())
    }

    async fn allocate_sequence_after(
        &self,
        destination: &Destination,
        floor: u64,
    ) -> Result<u64, StoreError> {
        let floor = i64::try_from(floor)
            .map_err(|_| StoreError::Invalid(format!("sequence floor out of range: {floor}")))?;

        // Row lock on conflict serializes concurrent allocations per destination.
        let value = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO destination_sequences (destination, last_value)
            VALUES ($1, $2 + 1)
            ON CONFLICT (destination) DO UPDATE
               SET last_value = GREATEST(destination_sequences.last_value, $2) + 1,
                   updated_at = now()
            RETURNING last_value
            "#,
        )
        .bind(destination.as_str())
        .bind(floor)
        .fetch_one(&self.pool)
        .await?;

        u64::try_from(value).map_err(|_| StoreError::Invalid(format!("negative sequence: {value}")))
    }

    async fn try_acquire_run_lock(&self, holder: &str) -> Result<bool, StoreError> {
        sqlx::query(
            "DELETE FROM run_locks WHERE name = $1 AND acquired_at < now() - make_interval(mins => $2)",
        )
        .bind(RUN_LOCK)
        .bind(STALE_LOCK_MINUTES as i32)
        .execute(&self.pool)
        .await?;

        let acquired = sqlx::query(
            "INSERT INTO run_locks (name, holder) VALUES ($1, $2) ON CONFLICT (name) DO NOTHING",
        )
        .bind(RUN_LOCK)
        .bind(holder)
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1;

        Ok(acquired)
    }

    async fn release_run_lock(&self, holder: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM run_locks WHERE name = $1 AND holder = $2")
            .bind(RUN_LOCK)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
