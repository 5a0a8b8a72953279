//! A Postgres implementation of [`offload::store::Store`].
//!
//! Every entry lives in the `offload_entries` table. The `BIGSERIAL` id gives the insertion order
//! batches are drained in, and an upsert keeps the id of a live entry so a batch keeps its place
//! in the queue while it is being drained.
//!
//! ```no_run
//! # async fn run(pool: sqlx::PgPool) -> Result<(), offload::store::StoreError> {
//! use offload_sqlx::PgStore;
//!
//! let store = PgStore::from_pool(pool).await?;
//! # Ok(())
//! # }
//! ```
use std::time::Duration;

use async_trait::async_trait;
use offload::store::{Entry, Store, StoreError};
use sqlx::PgPool;
use tracing::instrument;

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl std::ops::Deref for PgStore {
    type Target = PgPool;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

impl From<PgPool> for PgStore {
    fn from(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl From<&PgPool> for PgStore {
    fn from(value: &PgPool) -> Self {
        Self {
            pool: value.to_owned(),
        }
    }
}

pub(crate) fn map_err(error: sqlx::Error) -> StoreError {
    StoreError::Backend(error.to_string())
}

fn seconds(ttl: Option<Duration>) -> Option<f64> {
    ttl.map(|ttl| ttl.as_secs_f64())
}

impl PgStore {
    /// Create a store on `pool`, applying any pending migrations.
    pub async fn from_pool(pool: PgPool) -> Result<Self, StoreError> {
        let store = Self::from(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Apply the migrations creating the `offload_entries` table.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!()
            .run(&self.pool)
            .await
            .map_err(|error| {
                tracing::error!(?error, "Failed to migrate the offload tables");
                StoreError::Backend(error.to_string())
            })
    }
}

#[async_trait]
impl Store for PgStore {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        sqlx::query_scalar::<_, serde_json::Value>(
            r#"SELECT value
            FROM offload_entries
            WHERE key = $1
                AND (expires_at IS NULL OR expires_at > now())
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)
    }

    #[instrument(skip(self, value))]
    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO offload_entries (key, value, expires_at)
            VALUES ($1, $2, now() + $3::float8 * interval '1 second')
            ON CONFLICT (key) DO UPDATE SET
                value = EXCLUDED.value,
                expires_at = EXCLUDED.expires_at,
                id = CASE
                    WHEN offload_entries.expires_at <= now()
                        THEN nextval(pg_get_serial_sequence('offload_entries', 'id'))
                    ELSE offload_entries.id
                END
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(seconds(ttl))
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    #[instrument(skip(self, value))]
    async fn insert(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"INSERT INTO offload_entries (key, value, expires_at)
            VALUES ($1, $2, now() + $3::float8 * interval '1 second')
            ON CONFLICT (key) DO UPDATE SET
                value = EXCLUDED.value,
                expires_at = EXCLUDED.expires_at,
                id = nextval(pg_get_serial_sequence('offload_entries', 'id'))
            WHERE offload_entries.expires_at <= now()
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(seconds(ttl))
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM offload_entries WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list(&self, prefix: &str, limit: Option<usize>) -> Result<Vec<Entry>, StoreError> {
        let limit = limit.map(|limit| i64::try_from(limit).unwrap_or(i64::MAX));
        let rows = sqlx::query_as::<_, (String, serde_json::Value)>(
            r#"SELECT key, value
            FROM offload_entries
            WHERE starts_with(key, $1)
                AND (expires_at IS NULL OR expires_at > now())
            ORDER BY id
            LIMIT $2
            "#,
        )
        .bind(prefix)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(rows
            .into_iter()
            .map(|(key, value)| Entry { key, value })
            .collect())
    }
}
