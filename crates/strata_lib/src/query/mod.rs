//! The read path: logs of a block and storage slots at a block, served
//! through a coalescing cache.

mod cache;

use std::mem::size_of;
use std::sync::Arc;
use std::time::Duration;

pub use cache::{CacheStats, CacheWeight, LookupOutcome, QueryCache};
use prometheus_exporter::prometheus::IntCounterVec;
use strata_common_types::inputs::{LogsQuery, StorageQuery};
use strata_common_types::{Address, BlockHash, HeaderId, LogRecord, StorageSlot, StorageValue};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::canonicity::{Canonicity, CanonicityError, CanonicityResolver};
use crate::chain_store::ChainStore;
use crate::chain_tip::ChainTip;
use crate::config::QueryConfig;

/// Cheap to clone, so that every caller waiting on a shared fetch gets the
/// same error.
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    #[error("store lookup failed: {0:#}")]
    Store(Arc<anyhow::Error>),
}

impl From<anyhow::Error> for QueryError {
    fn from(err: anyhow::Error) -> Self {
        Self::Store(Arc::new(err))
    }
}

impl CacheWeight for Arc<Vec<LogRecord>> {
    fn weight(&self) -> usize {
        let records: usize = self
            .iter()
            .map(|log| size_of::<LogRecord>() + log.topics.len() * 32 + log.data.0.len())
            .sum();
        size_of::<LogsQuery>() + size_of::<Self>() + records
    }
}

impl CacheWeight for StorageValue {
    fn weight(&self) -> usize {
        size_of::<StorageQuery>() + size_of::<Self>()
    }
}

#[derive(Debug, Clone)]
pub struct QueryBackend {
    store: Arc<dyn ChainStore>,
    resolver: CanonicityResolver,
    logs: QueryCache<LogsQuery, Arc<Vec<LogRecord>>>,
    storage: QueryCache<StorageQuery, StorageValue>,
    max_storage_walk_depth: u64,
}

impl QueryBackend {
    /// `lookups` counts cache lookups by [`LookupOutcome`]. The cache byte
    /// budget is split evenly between log and storage lookups.
    pub fn new(
        store: Arc<dyn ChainStore>,
        tip: ChainTip,
        config: &QueryConfig,
        lookups: IntCounterVec,
    ) -> Self {
        let ttl = config.cache.ttl();
        let max_bytes = config.cache.max_bytes / 2;
        Self {
            resolver: CanonicityResolver::new(store.clone(), tip),
            logs: QueryCache::new("logs", ttl, max_bytes, lookups.clone()),
            storage: QueryCache::new("storage", ttl, max_bytes, lookups),
            max_storage_walk_depth: config.max_storage_walk_depth.max(1),
            store,
        }
    }

    /// Totals over both caches.
    pub fn cache_stats(&self) -> CacheStats {
        self.logs.stats() + self.storage.stats()
    }

    /// One logging task per cache, none for a zero interval.
    pub fn spawn_cache_stats_loggers(&self, interval: Duration) -> Vec<JoinHandle<()>> {
        [
            self.logs.spawn_stats_logger(interval),
            self.storage.spawn_stats_logger(interval),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Logs of the block with exactly this hash, whether or not it is still
    /// canonical, ordered by transaction index, then log index. An unknown
    /// hash has no logs.
    pub async fn get_logs(
        &self,
        block_hash: &BlockHash,
        address: Option<&Address>,
    ) -> Result<Arc<Vec<LogRecord>>, QueryError> {
        let query = LogsQuery {
            block_hash: *block_hash,
            address: address.copied(),
        };
        let fetch = fetch_logs(self.store.clone(), query.clone());
        self.logs.get_or_fetch(query, fetch).await
    }

    /// Value of `slot` at the block with this hash: the newest recorded
    /// change at or below that block on its own ancestry. Slots without any
    /// recorded change, and unknown hashes, read as zero.
    pub async fn get_storage_at(
        &self,
        block_hash: &BlockHash,
        address: &Address,
        slot: &StorageSlot,
    ) -> Result<StorageValue, QueryError> {
        let query = StorageQuery {
            block_hash: *block_hash,
            address: *address,
            slot: *slot,
        };
        let fetch = fetch_storage(self.store.clone(), query.clone(), self.max_storage_walk_depth);
        self.storage.get_or_fetch(query, fetch).await
    }

    /// Not cached, as the answer changes with the chain tip.
    pub async fn block_canonicity(
        &self,
        hash: &BlockHash,
    ) -> Result<Canonicity, CanonicityError> {
        self.resolver.canonicity(hash).await
    }
}

async fn fetch_logs(
    store: Arc<dyn ChainStore>,
    query: LogsQuery,
) -> Result<Arc<Vec<LogRecord>>, QueryError> {
    let Some(header) = store.header_by_hash(&query.block_hash).await? else {
        trace!(block_hash = %query.block_hash, "Logs requested for unknown block");
        return Ok(Arc::new(vec![]));
    };

    let logs = store
        .logs_for_header(header.id, query.address.as_ref())
        .await?;
    Ok(Arc::new(logs))
}

async fn fetch_storage(
    store: Arc<dyn ChainStore>,
    query: StorageQuery,
    max_depth: u64,
) -> Result<StorageValue, QueryError> {
    let zero = StorageValue::default();
    let Some(target) = store.header_by_hash(&query.block_hash).await? else {
        trace!(block_hash = %query.block_hash, "Storage requested for unknown block");
        return Ok(zero);
    };

    // Changes on the target's own ancestry, within the walk window.
    let ancestry = store.ancestry(&target.hash, 0, max_depth).await?;
    let ids: Vec<HeaderId> = ancestry.iter().map(|header| header.id).collect();
    if let Some(record) = store
        .latest_storage_in(&query.address, &query.slot, &ids)
        .await?
    {
        return Ok(record.value);
    }

    // Below the window, or below a gap in the stored headers, fall back to
    // headers that were canonical when stored.
    let lowest = ancestry
        .last()
        .map_or(target.block_number, |header| header.block_number);
    if lowest == 0 {
        return Ok(zero);
    }
    trace!(
        target = %target.pointer(),
        walked = ancestry.len(),
        below = lowest,
        "Falling back to canonical storage records"
    );
    let fallback = store
        .latest_canonical_storage_below(&query.address, &query.slot, lowest, &target.fingerprint)
        .await?;
    Ok(fallback.map_or(zero, |record| record.value))
}
