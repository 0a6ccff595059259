//! In-memory stand-ins for the upstream node and the database.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::RangeBounds;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;
use strata_chain_client::{ChainClient, LogFilter};
use strata_common_types::inputs::BlockRange;
use strata_common_types::{
    Address, BlockHash, ChainHeader, Fingerprint, Header, HeaderId, LogRecord, RawLog, Receipt,
    StorageRecord, StorageSlot, StorageValue,
};

use crate::chain_store::ChainStore;
use crate::transformers::{PersistenceError, Repository};

#[derive(Debug, Default)]
struct NodeState {
    /// The node's view of the chain, one block per height.
    blocks: BTreeMap<u64, ChainHeader>,
    logs: Vec<RawLog>,
    receipts: HashMap<BlockHash, Vec<Receipt>>,
    failures: usize,
}

/// A node whose log index answers by block height: it returns every log it
/// knows at the requested block's height, regardless of fork, address or
/// topics, and leaves the filtering to the caller.
#[derive(Debug, Default)]
pub struct MockChainClient {
    state: Mutex<NodeState>,
    log_requests: AtomicUsize,
}

impl MockChainClient {
    /// Makes `headers` the node's chain, replacing blocks at the same
    /// heights.
    pub fn set_chain(&self, headers: &[ChainHeader]) {
        let mut state = self.state.lock();
        for header in headers {
            state.blocks.insert(header.number, header.clone());
        }
    }

    /// Forgets blocks above `number`.
    pub fn truncate(&self, number: u64) {
        self.state.lock().blocks.retain(|n, _| *n <= number);
    }

    pub fn add_log(&self, log: RawLog) {
        self.state.lock().logs.push(log);
    }

    pub fn add_receipts(&self, block_hash: BlockHash, receipts: Vec<Receipt>) {
        self.state.lock().receipts.insert(block_hash, receipts);
    }

    /// The next `n` calls fail.
    pub fn fail_next_calls(&self, n: usize) {
        self.state.lock().failures = n;
    }

    pub fn log_requests(&self) -> usize {
        self.log_requests.load(Ordering::SeqCst)
    }

    fn check_failure(state: &mut NodeState) -> anyhow::Result<()> {
        if state.failures > 0 {
            state.failures -= 1;
            return Err(anyhow!("node unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    fn name(&self) -> Cow<str> {
        Cow::Borrowed("mock")
    }

    async fn chain_head(&self) -> anyhow::Result<ChainHeader> {
        let mut state = self.state.lock();
        Self::check_failure(&mut state)?;
        state
            .blocks
            .values()
            .next_back()
            .cloned()
            .ok_or_else(|| anyhow!("no blocks"))
    }

    async fn header_by_number(&self, number: u64) -> anyhow::Result<Option<ChainHeader>> {
        let mut state = self.state.lock();
        Self::check_failure(&mut state)?;
        Ok(state.blocks.get(&number).cloned())
    }

    async fn logs(&self, filter: &LogFilter) -> anyhow::Result<Vec<RawLog>> {
        self.log_requests.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        Self::check_failure(&mut state)?;

        let number = state
            .blocks
            .values()
            .find(|block| block.hash == filter.block_hash)
            .map(|block| block.number)
            .or_else(|| {
                state
                    .logs
                    .iter()
                    .find(|log| log.block_hash == filter.block_hash)
                    .map(|log| log.block_number)
            });

        Ok(match number {
            Some(number) => state
                .logs
                .iter()
                .filter(|log| log.block_number == number)
                .cloned()
                .collect(),
            None => vec![],
        })
    }

    async fn block_receipts(&self, block_hash: &BlockHash) -> anyhow::Result<Vec<Receipt>> {
        let mut state = self.state.lock();
        Self::check_failure(&mut state)?;
        Ok(state.receipts.get(block_hash).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Default)]
struct StoreState {
    headers: Vec<Header>,
    receipts: HashMap<HeaderId, Vec<Receipt>>,
    storage: Vec<StorageRecord>,
    checkpoints: HashSet<(HeaderId, String)>,
}

/// An in-memory [`ChainStore`] that follows the database's semantics.
#[derive(Debug, Default)]
pub struct MockStore {
    state: Mutex<StoreState>,
    latency: Mutex<Option<Duration>>,
    log_queries: AtomicUsize,
    storage_queries: AtomicUsize,
}

impl MockStore {
    /// Delays every read, so that concurrent callers overlap.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    pub fn add_header(&self, header: &ChainHeader, canonical: bool) -> Header {
        let mut state = self.state.lock();
        if canonical {
            for sibling in state.headers.iter_mut() {
                if sibling.block_number == header.number && sibling.hash != header.hash {
                    sibling.canonical = false;
                }
            }
        }

        if let Some(existing) = state.headers.iter_mut().find(|h| h.hash == header.hash) {
            existing.canonical = canonical;
            return existing.clone();
        }

        let stored = Header {
            id: state.headers.len() as HeaderId + 1,
            block_number: header.number,
            hash: header.hash,
            parent_hash: header.parent_hash,
            fingerprint: super::fingerprint(),
            canonical,
        };
        state.headers.push(stored.clone());
        stored
    }

    pub fn headers(&self) -> Vec<Header> {
        self.state.lock().headers.clone()
    }

    pub fn add_storage(
        &self,
        header: &Header,
        address: Address,
        slot: StorageSlot,
        value: StorageValue,
    ) {
        self.state.lock().storage.push(StorageRecord {
            header_id: header.id,
            block_number: header.block_number,
            address,
            slot,
            value,
        });
    }

    pub fn add_receipts(&self, header_id: HeaderId, receipts: Vec<Receipt>) {
        self.state.lock().receipts.insert(header_id, receipts);
    }

    pub fn receipts(&self, header_id: HeaderId) -> Option<Vec<Receipt>> {
        self.state.lock().receipts.get(&header_id).cloned()
    }

    pub fn is_checked(&self, header_id: HeaderId, kind: &str) -> bool {
        self.state
            .lock()
            .checkpoints
            .contains(&(header_id, kind.to_string()))
    }

    /// Number of `logs_for_header` calls so far.
    pub fn log_queries(&self) -> usize {
        self.log_queries.load(Ordering::SeqCst)
    }

    /// Number of storage lookups so far, of either kind.
    pub fn storage_queries(&self) -> usize {
        self.storage_queries.load(Ordering::SeqCst)
    }

    pub fn repository<M>(self: &Arc<Self>, kind: &str) -> MockRepository<M> {
        MockRepository {
            kind: kind.to_string(),
            store: self.clone(),
            models: Arc::new(Mutex::new(vec![])),
            fail_next_create: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn wait(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ChainStore for MockStore {
    async fn insert_header(
        &self,
        header: &ChainHeader,
        _fingerprint: &Fingerprint,
        canonical: bool,
    ) -> anyhow::Result<Header> {
        Ok(self.add_header(header, canonical))
    }

    async fn header_by_hash(&self, hash: &BlockHash) -> anyhow::Result<Option<Header>> {
        self.wait().await;
        Ok(self
            .state
            .lock()
            .headers
            .iter()
            .find(|h| h.hash == *hash)
            .cloned())
    }

    async fn latest_header(&self, fingerprint: &Fingerprint) -> anyhow::Result<Option<Header>> {
        Ok(self
            .state
            .lock()
            .headers
            .iter()
            .filter(|h| h.fingerprint == *fingerprint)
            .max_by_key(|h| (h.block_number, h.canonical, h.id))
            .cloned())
    }

    async fn ancestry(
        &self,
        hash: &BlockHash,
        down_to: u64,
        max_len: u64,
    ) -> anyhow::Result<Vec<Header>> {
        if max_len == 0 {
            return Ok(vec![]);
        }

        let state = self.state.lock();
        let mut walked: Vec<Header> = vec![];
        let mut next = state.headers.iter().find(|h| h.hash == *hash);

        while let Some(header) = next {
            walked.push(header.clone());
            if walked.len() as u64 >= max_len || header.block_number <= down_to {
                break;
            }
            next = state.headers.iter().find(|h| {
                h.hash == header.parent_hash && h.block_number + 1 == header.block_number
            });
        }
        Ok(walked)
    }

    async fn write_receipts(
        &self,
        header_id: HeaderId,
        receipts: Vec<Receipt>,
    ) -> anyhow::Result<()> {
        self.add_receipts(header_id, receipts);
        Ok(())
    }

    async fn logs_for_header(
        &self,
        header_id: HeaderId,
        address: Option<&Address>,
    ) -> anyhow::Result<Vec<LogRecord>> {
        self.log_queries.fetch_add(1, Ordering::SeqCst);
        self.wait().await;

        let state = self.state.lock();
        let mut records: Vec<LogRecord> = state
            .receipts
            .get(&header_id)
            .into_iter()
            .flatten()
            .flat_map(|receipt| {
                receipt.logs.iter().map(|log| LogRecord {
                    address: log.address,
                    topics: log.topics.clone(),
                    data: log.data.clone(),
                    transaction_hash: receipt.transaction_hash,
                    transaction_index: receipt.transaction_index,
                    log_index: log.log_index,
                    receipt_status: receipt.status,
                })
            })
            .filter(|record| address.map_or(true, |address| record.address == *address))
            .collect();
        records.sort_by_key(|record| (record.transaction_index, record.log_index));
        Ok(records)
    }

    async fn latest_storage_in(
        &self,
        address: &Address,
        slot: &StorageSlot,
        header_ids: &[HeaderId],
    ) -> anyhow::Result<Option<StorageRecord>> {
        self.storage_queries.fetch_add(1, Ordering::SeqCst);
        self.wait().await;

        Ok(self
            .state
            .lock()
            .storage
            .iter()
            .filter(|r| r.address == *address && r.slot == *slot)
            .filter(|r| header_ids.contains(&r.header_id))
            .max_by_key(|r| r.block_number)
            .cloned())
    }

    async fn latest_canonical_storage_below(
        &self,
        address: &Address,
        slot: &StorageSlot,
        below: u64,
        fingerprint: &Fingerprint,
    ) -> anyhow::Result<Option<StorageRecord>> {
        self.storage_queries.fetch_add(1, Ordering::SeqCst);
        self.wait().await;

        let state = self.state.lock();
        let canonical: HashSet<HeaderId> = state
            .headers
            .iter()
            .filter(|h| h.canonical && h.fingerprint == *fingerprint && h.block_number < below)
            .map(|h| h.id)
            .collect();
        Ok(state
            .storage
            .iter()
            .filter(|r| r.address == *address && r.slot == *slot)
            .filter(|r| canonical.contains(&r.header_id))
            .max_by_key(|r| r.block_number)
            .cloned())
    }
}

/// A [`Repository`] over a [`MockStore`]'s headers, keeping its models in
/// memory.
#[derive(Debug)]
pub struct MockRepository<M> {
    kind: String,
    store: Arc<MockStore>,
    models: Arc<Mutex<Vec<(HeaderId, M)>>>,
    fail_next_create: Arc<AtomicBool>,
}

impl<M> Clone for MockRepository<M> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind.clone(),
            store: self.store.clone(),
            models: self.models.clone(),
            fail_next_create: self.fail_next_create.clone(),
        }
    }
}

impl<M: Clone> MockRepository<M> {
    pub fn models(&self) -> Vec<(HeaderId, M)> {
        self.models.lock().clone()
    }

    pub fn is_checked(&self, header_id: HeaderId) -> bool {
        self.store.is_checked(header_id, &self.kind)
    }

    pub fn fail_next_create(&self) {
        self.fail_next_create.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl<M: Send + Sync + 'static> Repository for MockRepository<M> {
    type Model = M;

    async fn create(&self, header_id: HeaderId, models: Vec<M>) -> Result<usize, PersistenceError> {
        if self.fail_next_create.swap(false, Ordering::SeqCst) {
            return Err(anyhow!("connection reset").into());
        }

        let count = models.len();
        self.models
            .lock()
            .extend(models.into_iter().map(|model| (header_id, model)));
        self.store
            .state
            .lock()
            .checkpoints
            .insert((header_id, self.kind.clone()));
        Ok(count)
    }

    async fn mark_header_checked(&self, header_id: HeaderId) -> Result<(), PersistenceError> {
        self.store
            .state
            .lock()
            .checkpoints
            .insert((header_id, self.kind.clone()));
        Ok(())
    }

    async fn missing_headers(
        &self,
        range: BlockRange,
        fingerprint: &Fingerprint,
    ) -> Result<Vec<Header>, PersistenceError> {
        let state = self.store.state.lock();
        let mut headers: Vec<Header> = state
            .headers
            .iter()
            .filter(|h| h.fingerprint == *fingerprint)
            .filter(|h| range.contains(&h.block_number))
            .filter(|h| !state.checkpoints.contains(&(h.id, self.kind.clone())))
            .cloned()
            .collect();
        headers.sort_by_key(|h| (h.block_number, h.id));
        Ok(headers)
    }
}
