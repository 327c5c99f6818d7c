//! Invalidation coordinator.
//!
//! Runs inline with every committed content write: asks the entity for its
//! targets, deletes matching store entries, then purges the CDN edge. The
//! edge purge is best effort and never fails the write.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, instrument};

use super::cdn::{CdnPurger, PurgeScope};
use super::events::ContentEvent;
use super::registry::{InvalidationRegistry, RegistryError};
use super::store::{PageStore, StoreError};
use super::targets::{CacheInvalidating, CachePath, InvalidationTarget};

const METRIC_INVALIDATION_MS: &str = "roamcache_invalidation_ms";
const METRIC_CDN_PURGE_FAILED_TOTAL: &str = "roamcache_cdn_purge_failed_total";

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of the edge purge leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CdnOutcome {
    /// No CDN configured, or nothing to purge.
    Skipped,
    Purged { scope: PurgeScope },
    Failed { error: String },
}

impl CdnOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, CdnOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InvalidationReport {
    pub source: String,
    pub target: InvalidationTarget,
    /// Store entries deleted locally.
    pub removed: usize,
    pub cdn: CdnOutcome,
}

pub struct InvalidationCoordinator {
    store: Arc<dyn PageStore>,
    registry: Arc<InvalidationRegistry>,
    cdn: Option<Arc<dyn CdnPurger>>,
}

impl InvalidationCoordinator {
    pub fn new(store: Arc<dyn PageStore>, registry: Arc<InvalidationRegistry>) -> Self {
        Self {
            store,
            registry,
            cdn: None,
        }
    }

    pub fn with_cdn(mut self, cdn: Arc<dyn CdnPurger>) -> Self {
        self.cdn = Some(cdn);
        self
    }

    pub fn store(&self) -> &Arc<dyn PageStore> {
        &self.store
    }

    /// Typed entry point for a create or update of `current`.
    pub async fn saved<E: CacheInvalidating>(
        &self,
        current: &E,
        previous: Option<&E>,
    ) -> Result<InvalidationReport, StoreError> {
        let target = current.invalidation_targets(previous);
        self.apply(E::KIND.as_str(), target).await
    }

    /// Typed entry point for a delete; targets come from the removed instance.
    pub async fn deleted<E: CacheInvalidating>(
        &self,
        removed: &E,
    ) -> Result<InvalidationReport, StoreError> {
        self.saved(removed, None).await
    }

    /// Handle a published write. `Ok(None)` means the kind is cache-inert.
    #[instrument(skip_all, fields(kind = %event.kind, change = event.change.as_str(), event_id = %event.id))]
    pub async fn entity_saved(
        &self,
        event: &ContentEvent,
    ) -> Result<Option<InvalidationReport>, CoordinatorError> {
        let Some(target) = self.registry.targets_for(event)? else {
            info!(kind = %event.kind, "Ignoring write to cache-inert content kind");
            return Ok(None);
        };

        let report = self.apply(event.kind.as_str(), target).await?;
        Ok(Some(report))
    }

    pub async fn clear_all(&self) -> Result<InvalidationReport, StoreError> {
        self.apply("manual", InvalidationTarget::All).await
    }

    pub async fn purge_prefix(&self, prefix: &str) -> Result<InvalidationReport, StoreError> {
        self.apply("manual", InvalidationTarget::paths([prefix]))
            .await
    }

    async fn apply(
        &self,
        source: &str,
        target: InvalidationTarget,
    ) -> Result<InvalidationReport, StoreError> {
        let started_at = Instant::now();

        let removed = match &target {
            InvalidationTarget::All => self.store.clear_all().await?,
            InvalidationTarget::Paths(paths) => {
                let mut removed = 0;
                for path in paths {
                    removed += match path {
                        CachePath::Prefix(prefix) => self.store.delete_prefix(prefix).await?,
                        CachePath::Exact(url) => self.store.delete_exact(url).await?,
                    };
                }
                removed
            }
        };

        info!(
            cache = "page",
            source,
            target = %target,
            removed,
            "Page cache invalidated"
        );

        let cdn = self.purge_edge(source, &target).await;

        histogram!(
            METRIC_INVALIDATION_MS,
            "scope" => if target.is_all() { "all" } else { "paths" }
        )
        .record(started_at.elapsed().as_secs_f64() * 1000.0);

        Ok(InvalidationReport {
            source: source.to_string(),
            target,
            removed,
            cdn,
        })
    }

    async fn purge_edge(&self, source: &str, target: &InvalidationTarget) -> CdnOutcome {
        let Some(cdn) = &self.cdn else {
            return CdnOutcome::Skipped;
        };
        if target.is_empty() {
            return CdnOutcome::Skipped;
        }

        match cdn.purge(target).await {
            Ok(scope) => CdnOutcome::Purged { scope },
            Err(err) => {
                counter!(METRIC_CDN_PURGE_FAILED_TOTAL).increment(1);
                error!(
                    cdn = "cloudflare",
                    source,
                    target = %target,
                    error = %err,
                    "CDN purge failed; local invalidation kept"
                );
                CdnOutcome::Failed {
                    error: err.to_string(),
                }
            }
        }
    }
}
