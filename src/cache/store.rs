//! Page store: normalized request path → rendered HTML.
//!
//! `url` is the semantic key, but concurrent misses may insert the same URL
//! more than once. Duplicates are tolerated on write and healed on read.

use std::fmt;
use std::sync::RwLock;

use async_trait::async_trait;
use metrics::counter;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;

use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";
const METRIC_DUPLICATE_TOTAL: &str = "roamcache_page_cache_duplicate_total";

/// One stored page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Monotonic per store; lower ids were inserted first.
    pub id: i64,
    pub url: String,
    pub content: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("page store backend error: {message}")]
    Backend { message: String },
    #[error("page store timeout")]
    Timeout,
}

impl StoreError {
    pub fn backend(err: impl fmt::Display) -> Self {
        Self::Backend {
            message: err.to_string(),
        }
    }
}

/// Durable storage for rendered pages.
///
/// Every operation is idempotent, so callers never coordinate beyond what the
/// backend does internally.
#[async_trait]
pub trait PageStore: Send + Sync {
    /// Look up the page stored under exactly `url`.
    ///
    /// When several entries share the URL, the earliest one wins and the rest
    /// are deleted as part of the read. A missing entry is `Ok(None)`.
    async fn get(&self, url: &str) -> Result<Option<CacheEntry>, StoreError>;

    /// Insert without checking for an existing entry.
    async fn put(&self, url: &str, content: &str) -> Result<(), StoreError>;

    /// Delete every entry whose URL starts with `prefix`. Plain string
    /// comparison: `/tour` also matches `/tours/`.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StoreError>;

    async fn delete_exact(&self, url: &str) -> Result<usize, StoreError>;

    async fn clear_all(&self) -> Result<usize, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

pub(crate) fn record_duplicates_removed(url: &str, removed: usize) {
    if removed == 0 {
        return;
    }
    counter!(METRIC_DUPLICATE_TOTAL).increment(removed as u64);
    debug!(
        cache = "page",
        url,
        removed,
        "Removed duplicate page cache entries"
    );
}

#[derive(Default)]
struct Entries {
    next_id: i64,
    rows: Vec<CacheEntry>,
}

/// Process-local store, used when no database is configured and in tests.
#[derive(Default)]
pub struct MemoryPageStore {
    entries: RwLock<Entries>,
}

impl MemoryPageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PageStore for MemoryPageStore {
    async fn get(&self, url: &str) -> Result<Option<CacheEntry>, StoreError> {
        {
            let entries = rw_read(&self.entries, SOURCE, "get");
            let mut matches = entries.rows.iter().filter(|entry| entry.url == url);
            match (matches.next(), matches.next()) {
                (None, _) => return Ok(None),
                (Some(entry), None) => return Ok(Some(entry.clone())),
                _ => {}
            }
        }

        // Re-check under the write lock; another reader may have healed it.
        let mut entries = rw_write(&self.entries, SOURCE, "get.dedupe");
        let Some(first) = entries.rows.iter().find(|entry| entry.url == url).cloned() else {
            return Ok(None);
        };
        let before = entries.rows.len();
        entries
            .rows
            .retain(|entry| entry.url != url || entry.id == first.id);
        record_duplicates_removed(url, before - entries.rows.len());

        Ok(Some(first))
    }

    async fn put(&self, url: &str, content: &str) -> Result<(), StoreError> {
        let mut entries = rw_write(&self.entries, SOURCE, "put");
        entries.next_id += 1;
        let id = entries.next_id;
        entries.rows.push(CacheEntry {
            id,
            url: url.to_string(),
            content: content.to_string(),
            created_at: OffsetDateTime::now_utc(),
        });
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        let mut entries = rw_write(&self.entries, SOURCE, "delete_prefix");
        let before = entries.rows.len();
        entries.rows.retain(|entry| !entry.url.starts_with(prefix));
        Ok(before - entries.rows.len())
    }

    async fn delete_exact(&self, url: &str) -> Result<usize, StoreError> {
        let mut entries = rw_write(&self.entries, SOURCE, "delete_exact");
        let before = entries.rows.len();
        entries.rows.retain(|entry| entry.url != url);
        Ok(before - entries.rows.len())
    }

    async fn clear_all(&self) -> Result<usize, StoreError> {
        let mut entries = rw_write(&self.entries, SOURCE, "clear_all");
        let removed = entries.rows.len();
        entries.rows.clear();
        Ok(removed)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(rw_read(&self.entries, SOURCE, "count").rows.len())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
