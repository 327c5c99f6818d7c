//! Postgres-backed page store.

mod util;

pub use util::{escape_like, map_sqlx_error};

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{
    postgres::{PgPool, PgPoolOptions},
    query, query_as, query_scalar,
};
use time::OffsetDateTime;

use crate::cache::{CacheEntry, PageStore, StoreError, record_duplicates_removed};

#[derive(sqlx::FromRow)]
struct PageRow {
    id: i64,
    url: String,
    content: String,
    created_at: OffsetDateTime,
}

impl From<PageRow> for CacheEntry {
    fn from(row: PageRow) -> Self {
        Self {
            id: row.id,
            url: row.url,
            content: row.content,
            created_at: row.created_at,
        }
    }
}

#[derive(Clone)]
pub struct PostgresPageStore {
    pool: Arc<PgPool>,
}

impl PostgresPageStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(Into::into)
    }
}

fn affected(rows: u64) -> usize {
    usize::try_from(rows).unwrap_or(usize::MAX)
}

#[async_trait]
impl PageStore for PostgresPageStore {
    async fn get(&self, url: &str) -> Result<Option<CacheEntry>, StoreError> {
        let rows = query_as::<_, PageRow>(
            "SELECT id, url, content, created_at FROM page_cache WHERE url = $1 ORDER BY id",
        )
        .bind(url)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        let total = rows.len();
        let Some(first) = rows.into_iter().next() else {
            return Ok(None);
        };

        if total > 1 {
            let removed = query("DELETE FROM page_cache WHERE url = $1 AND id <> $2")
                .bind(url)
                .bind(first.id)
                .execute(self.pool())
                .await
                .map_err(map_sqlx_error)?
                .rows_affected();
            record_duplicates_removed(url, affected(removed));
        }

        Ok(Some(first.into()))
    }

    async fn put(&self, url: &str, content: &str) -> Result<(), StoreError> {
        query("INSERT INTO page_cache (url, content) VALUES ($1, $2)")
            .bind(url)
            .bind(content)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        let pattern = format!("{}%", escape_like(prefix));
        let result = query(r"DELETE FROM page_cache WHERE url LIKE $1 ESCAPE '\'")
            .bind(pattern)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(affected(result.rows_affected()))
    }

    async fn delete_exact(&self, url: &str) -> Result<usize, StoreError> {
        let result = query("DELETE FROM page_cache WHERE url = $1")
            .bind(url)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(affected(result.rows_affected()))
    }

    async fn clear_all(&self) -> Result<usize, StoreError> {
        let result = query("DELETE FROM page_cache")
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(affected(result.rows_affected()))
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let total: i64 = query_scalar("SELECT COUNT(*) FROM page_cache")
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(usize::try_from(total).unwrap_or(0))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        query("SELECT 1")
            .execute(self.pool())
            .await
            .map(|_| ())
            .map_err(map_sqlx_error)
    }
}
