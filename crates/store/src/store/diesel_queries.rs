//! Provides the diesel queries, callers should handle connection pooling and
//! transactions.

use chrono::Utc;
use diesel::prelude::*;
use diesel::sql_types;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use strata_common_types::inputs::BlockRange;
use strata_common_types::{BlockHash, ChainHeader, Fingerprint, HeaderId, Receipt};

use crate::models::{self, NewCheckpoint, NewHeader, NewLog, NewReceipt};
use crate::schema;

pub(super) async fn upsert_checkpoint(
    conn: &mut AsyncPgConnection,
    header_id: HeaderId,
    transformer_kind: &str,
) -> anyhow::Result<()> {
    use schema::checkpoints;

    let now = Utc::now().naive_utc();
    let checkpoint = NewCheckpoint {
        header_id,
        transformer_kind,
        checked: true,
        updated_at: now,
    };

    diesel::insert_into(checkpoints::table)
        .values(&checkpoint)
        .on_conflict((checkpoints::header_id, checkpoints::transformer_kind))
        .do_update()
        .set((checkpoints::checked.eq(true), checkpoints::updated_at.eq(now)))
        .execute(conn)
        .await?;

    Ok(())
}

// The caller must make sure that `conn` is within a transaction.
pub(super) async fn insert_header(
    conn: &mut AsyncPgConnection,
    header: &ChainHeader,
    fingerprint: &Fingerprint,
    canonical: bool,
) -> anyhow::Result<models::Header> {
    use schema::headers;

    let block_number = i64::try_from(header.number)?;

    if canonical {
        // At most one header per height is flagged canonical for a given
        // fingerprint.
        diesel::update(
            headers::table
                .filter(headers::fingerprint.eq(fingerprint))
                .filter(headers::block_number.eq(block_number))
                .filter(headers::hash.ne(&header.hash)),
        )
        .set(headers::canonical.eq(false))
        .execute(conn)
        .await?;
    }

    let new_header = NewHeader {
        block_number,
        hash: &header.hash,
        parent_hash: &header.parent_hash,
        fingerprint,
        canonical,
    };

    // Hash, parent hash and number never change; only the canonical flag
    // is refreshed when a header is seen again.
    Ok(diesel::insert_into(headers::table)
        .values(&new_header)
        .on_conflict(headers::hash)
        .do_update()
        .set(headers::canonical.eq(canonical))
        .returning(models::Header::as_returning())
        .get_result(conn)
        .await?)
}

/// Headers of `fingerprint` in `range` that have no checkpoint for
/// `transformer_kind`, or an unchecked one. Ascending by block number.
pub(super) async fn missing_headers(
    conn: &mut AsyncPgConnection,
    range: BlockRange,
    fingerprint: &Fingerprint,
    transformer_kind: &str,
) -> anyhow::Result<Vec<models::Header>> {
    let query = diesel::sql_query(
        r#"
        SELECT h.id, h.block_number, h.hash, h.parent_hash, h.fingerprint, h.canonical
          FROM headers h
          LEFT JOIN checkpoints c
            ON c.header_id = h.id AND c.transformer_kind = $1
         WHERE h.fingerprint = $2
           AND h.block_number BETWEEN $3 AND $4
           AND (c.checked IS NULL OR c.checked = FALSE)
         ORDER BY h.block_number ASC, h.id ASC
        "#,
    )
    .bind::<sql_types::Text, _>(transformer_kind)
    .bind::<sql_types::Text, _>(fingerprint)
    .bind::<sql_types::BigInt, _>(range.start_i64())
    .bind::<sql_types::BigInt, _>(range.end_or_max());

    Ok(query.load::<models::Header>(conn).await?)
}

/// Walks parent links starting at the header with hash `hash`, going down to
/// `down_to` (inclusive) or until `max_len` headers were collected, whichever
/// comes first. The walk stops early at the first parent that is not
/// stored. Descending by block number; empty if `hash` itself is unknown.
pub(super) async fn ancestry(
    conn: &mut AsyncPgConnection,
    hash: &BlockHash,
    down_to: i64,
    max_len: i64,
) -> anyhow::Result<Vec<models::Header>> {
    let query = diesel::sql_query(
        r#"
        WITH RECURSIVE ancestry (id, block_number, hash, parent_hash, fingerprint, canonical, depth) AS (
            SELECT id, block_number, hash, parent_hash, fingerprint, canonical, 1::int8
              FROM headers
             WHERE hash = $1
            UNION ALL
            SELECT h.id, h.block_number, h.hash, h.parent_hash, h.fingerprint, h.canonical, a.depth + 1
              FROM ancestry a
              JOIN headers h
                ON h.hash = a.parent_hash AND h.block_number = a.block_number - 1
             WHERE a.depth < $2 AND a.block_number > $3
        )
        SELECT id, block_number, hash, parent_hash, fingerprint, canonical
          FROM ancestry
         ORDER BY block_number DESC
        "#,
    )
    .bind::<sql_types::Binary, _>(hash)
    .bind::<sql_types::BigInt, _>(max_len)
    .bind::<sql_types::BigInt, _>(down_to);

    Ok(query.load::<models::Header>(conn).await?)
}

// The caller must make sure that `conn` is within a transaction.
pub(super) async fn write_receipt(
    conn: &mut AsyncPgConnection,
    header_id: HeaderId,
    receipt: &Receipt,
) -> anyhow::Result<()> {
    use schema::{logs, receipts};

    let tx_index = i32::try_from(receipt.transaction_index)?;
    let new_receipt = NewReceipt {
        header_id,
        tx_hash: &receipt.transaction_hash,
        tx_index,
        status: i16::from(receipt.status),
    };

    let receipt_id: i64 = diesel::insert_into(receipts::table)
        .values(&new_receipt)
        .on_conflict((receipts::header_id, receipts::tx_index))
        .do_update()
        .set(receipts::status.eq(i16::from(receipt.status)))
        .returning(receipts::id)
        .get_result(conn)
        .await?;

    let new_logs = receipt
        .logs
        .iter()
        .map(|log| {
            Ok(NewLog {
                receipt_id,
                address: log.address,
                topics: log.topics.clone(),
                data: log.data.clone(),
                tx_index,
                log_index: i32::try_from(log.log_index)?,
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    if !new_logs.is_empty() {
        diesel::insert_into(logs::table)
            .values(&new_logs)
            .on_conflict_do_nothing()
            .execute(conn)
            .await?;
    }

    Ok(())
}
