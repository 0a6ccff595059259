//! Chain primitives shared by the store, the chain client and the
//! ingestion and query library.
//!
//! The same types travel from the upstream node into the database and back
//! out through the query layer, so they are (de)serializable with [`serde`]
//! and the byte-oriented ones are also [`diesel`] expressions.

mod fingerprint;
mod hex_string;
pub mod inputs;

use std::fmt;

pub use fingerprint::Fingerprint;
pub use hex_string::HexString;
use serde::{Deserialize, Serialize};

/// A 32-byte word: block and transaction hashes, log topics, storage slot
/// keys and storage values are all of this shape.
pub type B256 = HexString<[u8; 32]>;

pub type BlockHash = B256;
pub type TxHash = B256;
pub type Topic = B256;
pub type StorageSlot = B256;
pub type StorageValue = B256;

/// Contract addresses are 20 bytes long.
pub type Address = HexString<[u8; 20]>;

/// Arbitrary-length byte payloads, e.g. log data.
pub type Bytes = HexString<Vec<u8>>;

/// Primary key of a stored header.
pub type HeaderId = i64;

/// A block number together with its hash.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
pub struct BlockPointer {
    pub number: u64,
    pub hash: BlockHash,
}

impl fmt::Display for BlockPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.number, self.hash)
    }
}

/// A block header as reported by the upstream node, before it is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHeader {
    pub number: u64,
    pub hash: BlockHash,
    pub parent_hash: BlockHash,
}

impl ChainHeader {
    pub fn pointer(&self) -> BlockPointer {
        BlockPointer {
            number: self.number,
            hash: self.hash,
        }
    }
}

/// A block header as stored by the indexer. Everything but `canonical` is
/// immutable; `canonical` is only a best-effort observation made when the
/// header was inserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub id: HeaderId,
    pub block_number: u64,
    pub hash: BlockHash,
    pub parent_hash: BlockHash,
    pub fingerprint: Fingerprint,
    pub canonical: bool,
}

impl Header {
    pub fn pointer(&self) -> BlockPointer {
        BlockPointer {
            number: self.block_number,
            hash: self.hash,
        }
    }
}

/// A log record exactly as returned by the upstream node's log filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<Topic>,
    pub data: Bytes,
    pub block_number: u64,
    pub block_hash: BlockHash,
    pub transaction_hash: TxHash,
    pub transaction_index: u32,
    pub log_index: u32,
    #[serde(default)]
    pub removed: bool,
}

/// A transaction receipt with the logs it emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub transaction_hash: TxHash,
    pub transaction_index: u32,
    /// `1` for success, `0` for failure (post-Byzantium semantics).
    pub status: u8,
    pub logs: Vec<RawLog>,
}

/// A log as served by the query layer: the log itself, annotated with the
/// status of the receipt that contains it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub address: Address,
    pub topics: Vec<Topic>,
    pub data: Bytes,
    pub transaction_hash: TxHash,
    pub transaction_index: u32,
    pub log_index: u32,
    pub receipt_status: u8,
}

/// A storage slot that changed value at some block. Slots that did not
/// change have no diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageDiff {
    pub address: Address,
    pub slot: StorageSlot,
    pub value: StorageValue,
}

/// A stored [`StorageDiff`], together with the header it was observed at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRecord {
    pub header_id: HeaderId,
    pub block_number: u64,
    pub address: Address,
    pub slot: StorageSlot,
    pub value: StorageValue,
}
