mod diesel_queries;

use std::fmt::Debug;

use anyhow::Error;
use diesel::prelude::*;
use diesel_async::pooled_connection::deadpool::{Object, Pool};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use diesel_async_migrations::{embed_migrations, EmbeddedMigrations};
use strata_common_types::inputs::BlockRange;
use strata_common_types::{
    Address, BlockHash, ChainHeader, Fingerprint, Header, HeaderId, LogRecord, Receipt,
    StorageDiff, StorageRecord, StorageSlot,
};
use tracing::{debug, info};

use crate::events::EventModel;
use crate::models::{self, Checkpoint, LogRow, NewStorageDiff, StorageDiffRow};
use crate::schema;

/// An abstraction over all database operations. It uses [`Arc`] internally, so
/// it's cheaply cloneable.
///
/// [`Arc`]: std::sync::Arc
#[derive(Clone)]
pub struct Store {
    pool: Pool<AsyncPgConnection>,
}

impl Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // It might contain sensitive data, so don't print it.
        f.debug_struct("Store").finish()
    }
}

impl Store {
    const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

    /// Connects to the database and runs all pending migrations.
    pub async fn new(db_url: &str) -> anyhow::Result<Self> {
        info!("Initializing database connection pool");

        let manager = AsyncDieselConnectionManager::new(db_url);
        let pool = Pool::builder(manager).build()?;
        let store = Self { pool };

        store.run_migrations().await?;

        Ok(store)
    }

    async fn run_migrations(&self) -> anyhow::Result<()> {
        let mut conn = self.pool.get().await?;

        // Blocks until we get the lock. Several indexer processes may share
        // one database and must not run migrations concurrently.
        diesel::sql_query("select pg_advisory_lock(1)")
            .execute(&mut conn)
            .await?;
        info!("Run database migrations");

        let result = Self::MIGRATIONS
            .run_pending_migrations(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!(e));

        diesel::sql_query("select pg_advisory_unlock(1)")
            .execute(&mut conn)
            .await?;

        result
    }

    pub async fn conn(&self) -> anyhow::Result<Object<AsyncPgConnection>> {
        Ok(self.pool.get().await?)
    }
}

/// Headers.
impl Store {
    /// Stores a header observed on the chain of `fingerprint`. If `canonical`
    /// is set, every other stored header at the same height loses its
    /// canonical flag. Inserting a header that is already stored only
    /// refreshes its flag.
    pub async fn insert_header(
        &self,
        header: &ChainHeader,
        fingerprint: &Fingerprint,
        canonical: bool,
    ) -> anyhow::Result<Header> {
        let header = header.clone();
        let fingerprint = fingerprint.clone();

        let stored = self
            .conn()
            .await?
            .transaction::<_, Error, _>(|conn| {
                async move {
                    diesel_queries::insert_header(conn, &header, &fingerprint, canonical).await
                }
                .scope_boxed()
            })
            .await?;

        Ok(stored.into_common_type())
    }

    pub async fn header_by_hash(&self, hash: &BlockHash) -> anyhow::Result<Option<Header>> {
        use schema::headers;

        Ok(headers::table
            .filter(headers::hash.eq(hash))
            .select(models::Header::as_select())
            .first(&mut self.conn().await?)
            .await
            .optional()?
            .map(models::Header::into_common_type))
    }

    /// The highest stored header of `fingerprint`. Among several headers at
    /// that height the one flagged canonical wins.
    pub async fn latest_header(&self, fingerprint: &Fingerprint) -> anyhow::Result<Option<Header>> {
        use schema::headers;

        Ok(headers::table
            .filter(headers::fingerprint.eq(fingerprint))
            .order_by((
                headers::block_number.desc(),
                headers::canonical.desc(),
                headers::id.desc(),
            ))
            .select(models::Header::as_select())
            .first(&mut self.conn().await?)
            .await
            .optional()?
            .map(models::Header::into_common_type))
    }

    /// Follows parent links from the header with hash `hash` down to
    /// `down_to` (inclusive), collecting at most `max_len` headers. Stops
    /// early at the first parent that isn't stored. The result is ordered
    /// from `hash` downwards and is empty if `hash` itself is unknown.
    pub async fn ancestry(
        &self,
        hash: &BlockHash,
        down_to: u64,
        max_len: u64,
    ) -> anyhow::Result<Vec<Header>> {
        if max_len == 0 {
            return Ok(vec![]);
        }

        let down_to = i64::try_from(down_to)?;
        let max_len = i64::try_from(max_len).unwrap_or(i64::MAX);
        let rows =
            diesel_queries::ancestry(&mut *self.conn().await?, hash, down_to, max_len).await?;

        Ok(rows
            .into_iter()
            .map(models::Header::into_common_type)
            .collect())
    }
}

/// Checkpoints and decoded events.
impl Store {
    /// Headers of `fingerprint` within `range` that `transformer_kind` still
    /// has to process, lowest first.
    pub async fn missing_headers(
        &self,
        range: BlockRange,
        fingerprint: &Fingerprint,
        transformer_kind: &str,
    ) -> anyhow::Result<Vec<Header>> {
        let rows = diesel_queries::missing_headers(
            &mut *self.conn().await?,
            range,
            fingerprint,
            transformer_kind,
        )
        .await?;

        Ok(rows
            .into_iter()
            .map(models::Header::into_common_type)
            .collect())
    }

    /// Marks a header as checked for `transformer_kind` without storing any
    /// event.
    pub async fn mark_header_checked(
        &self,
        header_id: HeaderId,
        transformer_kind: &str,
    ) -> anyhow::Result<()> {
        diesel_queries::upsert_checkpoint(&mut *self.conn().await?, header_id, transformer_kind)
            .await
    }

    /// Stores `models` and marks the header as checked in a single
    /// transaction. Either both happen or neither does.
    pub async fn create_event_models<M>(
        &self,
        header_id: HeaderId,
        transformer_kind: &str,
        models: &[M],
    ) -> anyhow::Result<usize>
    where
        M: EventModel,
    {
        let inserted = self
            .conn()
            .await?
            .transaction::<_, Error, _>(|conn| {
                async move {
                    let inserted = M::insert_all(conn, header_id, models).await?;
                    diesel_queries::upsert_checkpoint(conn, header_id, transformer_kind).await?;
                    Ok(inserted)
                }
                .scope_boxed()
            })
            .await?;

        debug!(
            header_id,
            transformer_kind,
            models = models.len(),
            inserted,
            "Stored event models"
        );
        Ok(inserted)
    }

    pub async fn event_models<M: EventModel>(&self, header_id: HeaderId) -> anyhow::Result<Vec<M>> {
        M::load_for_header(&mut *self.conn().await?, header_id).await
    }

    pub async fn checkpoint(
        &self,
        header_id: HeaderId,
        transformer_kind: &str,
    ) -> anyhow::Result<Option<Checkpoint>> {
        use schema::checkpoints;

        Ok(checkpoints::table
            .filter(checkpoints::header_id.eq(header_id))
            .filter(checkpoints::transformer_kind.eq(transformer_kind))
            .select(Checkpoint::as_select())
            .first(&mut self.conn().await?)
            .await
            .optional()?)
    }
}

/// Receipts, logs and storage.
impl Store {
    /// Stores the receipts of a block and the logs they contain. Writing the
    /// same receipts twice has no further effect.
    pub async fn write_receipts(
        &self,
        header_id: HeaderId,
        receipts: Vec<Receipt>,
    ) -> anyhow::Result<()> {
        self.conn()
            .await?
            .transaction::<_, Error, _>(|conn| {
                async move {
                    for receipt in receipts.iter() {
                        diesel_queries::write_receipt(conn, header_id, receipt).await?;
                    }
                    Ok(())
                }
                .scope_boxed()
            })
            .await
    }

    /// Logs stored for a header, optionally restricted to one contract,
    /// ordered by transaction and log index.
    pub async fn logs_for_header(
        &self,
        header_id: HeaderId,
        address: Option<&Address>,
    ) -> anyhow::Result<Vec<LogRecord>> {
        use schema::{logs, receipts};

        let mut query = logs::table
            .inner_join(receipts::table)
            .filter(receipts::header_id.eq(header_id))
            .select((
                logs::address,
                logs::topics,
                logs::data,
                receipts::tx_hash,
                logs::tx_index,
                logs::log_index,
                receipts::status,
            ))
            .order_by((logs::tx_index.asc(), logs::log_index.asc()))
            .into_boxed();

        if let Some(address) = address {
            query = query.filter(logs::address.eq(address));
        }

        let rows = query.load::<LogRow>(&mut self.conn().await?).await?;
        Ok(rows.into_iter().map(LogRow::into_common_type).collect())
    }

    /// Appends storage diffs observed at a header. Diffs for a slot that
    /// already has one at this header are ignored.
    pub async fn write_storage_diffs(
        &self,
        header_id: HeaderId,
        diffs: &[StorageDiff],
    ) -> anyhow::Result<usize> {
        use schema::storage_diffs;

        if diffs.is_empty() {
            return Ok(0);
        }

        let rows: Vec<NewStorageDiff> = diffs
            .iter()
            .map(|diff| NewStorageDiff {
                header_id,
                address: &diff.address,
                slot: &diff.slot,
                value: &diff.value,
            })
            .collect();

        Ok(diesel::insert_into(storage_diffs::table)
            .values(&rows)
            .on_conflict_do_nothing()
            .execute(&mut self.conn().await?)
            .await?)
    }

    /// The newest diff of `(address, slot)` recorded at any of `header_ids`.
    pub async fn latest_storage_in(
        &self,
        address: &Address,
        slot: &StorageSlot,
        header_ids: &[HeaderId],
    ) -> anyhow::Result<Option<StorageRecord>> {
        use schema::{headers, storage_diffs};

        if header_ids.is_empty() {
            return Ok(None);
        }

        Ok(storage_diffs::table
            .inner_join(headers::table)
            .filter(storage_diffs::address.eq(address))
            .filter(storage_diffs::slot.eq(slot))
            .filter(storage_diffs::header_id.eq_any(header_ids))
            .order_by((headers::block_number.desc(), headers::id.desc()))
            .select((
                storage_diffs::header_id,
                headers::block_number,
                storage_diffs::address,
                storage_diffs::slot,
                storage_diffs::value,
            ))
            .first::<StorageDiffRow>(&mut self.conn().await?)
            .await
            .optional()?
            .map(StorageDiffRow::into_common_type))
    }

    /// The newest diff of `(address, slot)` strictly below block `below`,
    /// considering only headers of `fingerprint` that were flagged canonical.
    pub async fn latest_canonical_storage_below(
        &self,
        address: &Address,
        slot: &StorageSlot,
        below: u64,
        fingerprint: &Fingerprint,
    ) -> anyhow::Result<Option<StorageRecord>> {
        use schema::{headers, storage_diffs};

        let below = i64::try_from(below)?;

        Ok(storage_diffs::table
            .inner_join(headers::table)
            .filter(storage_diffs::address.eq(address))
            .filter(storage_diffs::slot.eq(slot))
            .filter(headers::canonical.eq(true))
            .filter(headers::fingerprint.eq(fingerprint))
            .filter(headers::block_number.lt(below))
            .order_by((headers::block_number.desc(), headers::id.desc()))
            .select((
                storage_diffs::header_id,
                headers::block_number,
                storage_diffs::address,
                storage_diffs::slot,
                storage_diffs::value,
            ))
            .first::<StorageDiffRow>(&mut self.conn().await?)
            .await
            .optional()?
            .map(StorageDiffRow::into_common_type))
    }
}
