//! Decoded contract events, one table per event type.
//!
//! Every event table has the same shape around its decoded fields: the
//! header the event was found in, the position of the log in the block and
//! the raw log itself. [`EventModel`] is what lets [`crate::Store`] persist
//! them without knowing the concrete type.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use strata_common_types::HeaderId;

use crate::schema::{drip_file_repo, pit_file_ilk};

/// A decoded event that can be stored in its own table.
#[async_trait]
pub trait EventModel: Sized + Send + Sync + 'static {
    /// Inserts `models` as belonging to `header_id`. Rows already present
    /// for the same log are left untouched. The caller decides whether this
    /// runs inside a transaction.
    async fn insert_all(
        conn: &mut AsyncPgConnection,
        header_id: HeaderId,
        models: &[Self],
    ) -> anyhow::Result<usize>;

    /// All models stored for `header_id`, in log order.
    async fn load_for_header(
        conn: &mut AsyncPgConnection,
        header_id: HeaderId,
    ) -> anyhow::Result<Vec<Self>>;
}

/// A `file` call on the pit contract that changed a per-collateral
/// parameter (`spot` or `line`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PitFileIlk {
    pub ilk: String,
    pub what: String,
    pub data: BigDecimal,
    pub tx_index: i32,
    pub log_index: i32,
    pub raw_log: serde_json::Value,
}

#[derive(Insertable)]
#[diesel(table_name = pit_file_ilk)]
struct NewPitFileIlk<'a> {
    header_id: HeaderId,
    ilk: &'a str,
    what: &'a str,
    data: &'a BigDecimal,
    tx_index: i32,
    log_index: i32,
    raw_log: &'a serde_json::Value,
}

#[async_trait]
impl EventModel for PitFileIlk {
    async fn insert_all(
        conn: &mut AsyncPgConnection,
        header_id: HeaderId,
        models: &[Self],
    ) -> anyhow::Result<usize> {
        if models.is_empty() {
            return Ok(0);
        }

        let rows: Vec<NewPitFileIlk> = models
            .iter()
            .map(|m| NewPitFileIlk {
                header_id,
                ilk: &m.ilk,
                what: &m.what,
                data: &m.data,
                tx_index: m.tx_index,
                log_index: m.log_index,
                raw_log: &m.raw_log,
            })
            .collect();

        Ok(diesel::insert_into(pit_file_ilk::table)
            .values(&rows)
            .on_conflict_do_nothing()
            .execute(conn)
            .await?)
    }

    async fn load_for_header(
        conn: &mut AsyncPgConnection,
        header_id: HeaderId,
    ) -> anyhow::Result<Vec<Self>> {
        use pit_file_ilk as t;

        let rows = t::table
            .filter(t::header_id.eq(header_id))
            .order_by((t::tx_index.asc(), t::log_index.asc()))
            .select((
                t::ilk,
                t::what,
                t::data,
                t::tx_index,
                t::log_index,
                t::raw_log,
            ))
            .load::<(String, String, BigDecimal, i32, i32, serde_json::Value)>(conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(ilk, what, data, tx_index, log_index, raw_log)| Self {
                ilk,
                what,
                data,
                tx_index,
                log_index,
                raw_log,
            })
            .collect())
    }
}

/// A `file` call on the drip contract that changed the base rate (`repo`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DripFileRepo {
    pub what: String,
    pub data: BigDecimal,
    pub tx_index: i32,
    pub log_index: i32,
    pub raw_log: serde_json::Value,
}

#[derive(Insertable)]
#[diesel(table_name = drip_file_repo)]
struct NewDripFileRepo<'a> {
    header_id: HeaderId,
    what: &'a str,
    data: &'a BigDecimal,
    tx_index: i32,
    log_index: i32,
    raw_log: &'a serde_json::Value,
}

#[async_trait]
impl EventModel for DripFileRepo {
    async fn insert_all(
        conn: &mut AsyncPgConnection,
        header_id: HeaderId,
        models: &[Self],
    ) -> anyhow::Result<usize> {
        if models.is_empty() {
            return Ok(0);
        }

        let rows: Vec<NewDripFileRepo> = models
            .iter()
            .map(|m| NewDripFileRepo {
                header_id,
                what: &m.what,
                data: &m.data,
                tx_index: m.tx_index,
                log_index: m.log_index,
                raw_log: &m.raw_log,
            })
            .collect();

        Ok(diesel::insert_into(drip_file_repo::table)
            .values(&rows)
            .on_conflict_do_nothing()
            .execute(conn)
            .await?)
    }

    async fn load_for_header(
        conn: &mut AsyncPgConnection,
        header_id: HeaderId,
    ) -> anyhow::Result<Vec<Self>> {
        use drip_file_repo as t;

        let rows = t::table
            .filter(t::header_id.eq(header_id))
            .order_by((t::tx_index.asc(), t::log_index.asc()))
            .select((t::what, t::data, t::tx_index, t::log_index, t::raw_log))
            .load::<(String, BigDecimal, i32, i32, serde_json::Value)>(conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(what, data, tx_index, log_index, raw_log)| Self {
                what,
                data,
                tx_index,
                log_index,
                raw_log,
            })
            .collect())
    }
}
