use chrono::NaiveDateTime;
use diesel::{Insertable, Queryable, QueryableByName, Selectable};
use serde::Serialize;
use strata_common_types::{self as types, Address, BlockHash, Bytes, Fingerprint, StorageSlot};
use types::{HeaderId, StorageValue, Topic, TxHash};

use super::schema::*;

pub type IntId = i32;
pub type BigIntId = i64;

#[derive(Queryable, QueryableByName, Selectable, Serialize, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = headers)]
pub struct Header {
    pub id: BigIntId,
    pub block_number: i64,
    pub hash: BlockHash,
    pub parent_hash: BlockHash,
    pub fingerprint: Fingerprint,
    pub canonical: bool,
}

impl Header {
    pub fn into_common_type(self) -> types::Header {
        types::Header {
            id: self.id,
            // Never negative, block numbers come from `u64`s.
            block_number: self.block_number as u64,
            hash: self.hash,
            parent_hash: self.parent_hash,
            fingerprint: self.fingerprint,
            canonical: self.canonical,
        }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = headers)]
pub struct NewHeader<'a> {
    pub block_number: i64,
    pub hash: &'a BlockHash,
    pub parent_hash: &'a BlockHash,
    pub fingerprint: &'a Fingerprint,
    pub canonical: bool,
}

#[derive(Queryable, Selectable, Serialize, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = checkpoints)]
pub struct Checkpoint {
    pub header_id: HeaderId,
    pub transformer_kind: String,
    pub checked: bool,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = checkpoints)]
pub struct NewCheckpoint<'a> {
    pub header_id: HeaderId,
    pub transformer_kind: &'a str,
    pub checked: bool,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = receipts)]
pub struct NewReceipt<'a> {
    pub header_id: HeaderId,
    pub tx_hash: &'a TxHash,
    pub tx_index: IntId,
    pub status: i16,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = logs)]
pub struct NewLog {
    pub receipt_id: BigIntId,
    pub address: Address,
    pub topics: Vec<Topic>,
    pub data: Bytes,
    pub tx_index: IntId,
    pub log_index: IntId,
}

/// A log joined with the receipt that contains it.
#[derive(Queryable, Debug)]
pub struct LogRow {
    pub address: Address,
    pub topics: Vec<Topic>,
    pub data: Bytes,
    pub tx_hash: TxHash,
    pub tx_index: IntId,
    pub log_index: IntId,
    pub status: i16,
}

impl LogRow {
    pub fn into_common_type(self) -> types::LogRecord {
        types::LogRecord {
            address: self.address,
            topics: self.topics,
            data: self.data,
            transaction_hash: self.tx_hash,
            transaction_index: self.tx_index as u32,
            log_index: self.log_index as u32,
            receipt_status: self.status as u8,
        }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = storage_diffs)]
pub struct NewStorageDiff<'a> {
    pub header_id: HeaderId,
    pub address: &'a Address,
    pub slot: &'a StorageSlot,
    pub value: &'a StorageValue,
}

/// A storage diff joined with the number of the block it was observed at.
#[derive(Queryable, Debug)]
pub struct StorageDiffRow {
    pub header_id: HeaderId,
    pub block_number: i64,
    pub address: Address,
    pub slot: StorageSlot,
    pub value: StorageValue,
}

impl StorageDiffRow {
    pub fn into_common_type(self) -> types::StorageRecord {
        types::StorageRecord {
            header_id: self.header_id,
            block_number: self.block_number as u64,
            address: self.address,
            slot: self.slot,
            value: self.value,
        }
    }
}
