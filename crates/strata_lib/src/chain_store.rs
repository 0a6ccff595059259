//! The part of the database that header sync, canonicity resolution and the
//! query backend rely on, behind a trait so that they can run against an
//! in-memory chain in tests.

use std::fmt::Debug;

use async_trait::async_trait;
use strata_common_types::{
    Address, BlockHash, ChainHeader, Fingerprint, Header, HeaderId, LogRecord, Receipt,
    StorageRecord, StorageSlot,
};
use strata_store::Store;

#[async_trait]
pub trait ChainStore: Send + Sync + Debug + 'static {
    async fn insert_header(
        &self,
        header: &ChainHeader,
        fingerprint: &Fingerprint,
        canonical: bool,
    ) -> anyhow::Result<Header>;

    async fn header_by_hash(&self, hash: &BlockHash) -> anyhow::Result<Option<Header>>;

    async fn latest_header(&self, fingerprint: &Fingerprint) -> anyhow::Result<Option<Header>>;

    /// Stored headers reached by following parent links from `hash`, from
    /// `hash` downwards. Stops at `down_to`, after `max_len` headers, or at
    /// the first parent that isn't stored.
    async fn ancestry(
        &self,
        hash: &BlockHash,
        down_to: u64,
        max_len: u64,
    ) -> anyhow::Result<Vec<Header>>;

    async fn write_receipts(&self, header_id: HeaderId, receipts: Vec<Receipt>)
        -> anyhow::Result<()>;

    /// Ordered by transaction index, then log index.
    async fn logs_for_header(
        &self,
        header_id: HeaderId,
        address: Option<&Address>,
    ) -> anyhow::Result<Vec<LogRecord>>;

    async fn latest_storage_in(
        &self,
        address: &Address,
        slot: &StorageSlot,
        header_ids: &[HeaderId],
    ) -> anyhow::Result<Option<StorageRecord>>;

    async fn latest_canonical_storage_below(
        &self,
        address: &Address,
        slot: &StorageSlot,
        below: u64,
        fingerprint: &Fingerprint,
    ) -> anyhow::Result<Option<StorageRecord>>;
}

#[async_trait]
impl ChainStore for Store {
    async fn insert_header(
        &self,
        header: &ChainHeader,
        fingerprint: &Fingerprint,
        canonical: bool,
    ) -> anyhow::Result<Header> {
        Store::insert_header(self, header, fingerprint, canonical).await
    }

    async fn header_by_hash(&self, hash: &BlockHash) -> anyhow::Result<Option<Header>> {
        Store::header_by_hash(self, hash).await
    }

    async fn latest_header(&self, fingerprint: &Fingerprint) -> anyhow::Result<Option<Header>> {
        Store::latest_header(self, fingerprint).await
    }

    async fn ancestry(
        &self,
        hash: &BlockHash,
        down_to: u64,
        max_len: u64,
    ) -> anyhow::Result<Vec<Header>> {
        Store::ancestry(self, hash, down_to, max_len).await
    }

    async fn write_receipts(
        &self,
        header_id: HeaderId,
        receipts: Vec<Receipt>,
    ) -> anyhow::Result<()> {
        Store::write_receipts(self, header_id, receipts).await
    }

    async fn logs_for_header(
        &self,
        header_id: HeaderId,
        address: Option<&Address>,
    ) -> anyhow::Result<Vec<LogRecord>> {
        Store::logs_for_header(self, header_id, address).await
    }

    async fn latest_storage_in(
        &self,
        address: &Address,
        slot: &StorageSlot,
        header_ids: &[HeaderId],
    ) -> anyhow::Result<Option<StorageRecord>> {
        Store::latest_storage_in(self, address, slot, header_ids).await
    }

    async fn latest_canonical_storage_below(
        &self,
        address: &Address,
        slot: &StorageSlot,
        below: u64,
        fingerprint: &Fingerprint,
    ) -> anyhow::Result<Option<StorageRecord>> {
        Store::latest_canonical_storage_below(self, address, slot, below, fingerprint).await
    }
}
