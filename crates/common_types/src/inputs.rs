//! Request and filter types accepted by the store and the query layer.

use std::ops::{Bound, RangeBounds};

use serde::{Deserialize, Serialize};

use crate::{Address, BlockHash, StorageSlot};

/// A block range with an inclusive start and an optional inclusive end.
/// Without an end the range is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl BlockRange {
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }

    /// The inclusive end as a signed database value.
    pub fn end_or_max(&self) -> i64 {
        self.end
            .and_then(|end| i64::try_from(end).ok())
            .unwrap_or(i64::MAX)
    }

    pub fn start_i64(&self) -> i64 {
        i64::try_from(self.start).unwrap_or(i64::MAX)
    }
}

impl RangeBounds<u64> for BlockRange {
    fn start_bound(&self) -> Bound<&u64> {
        Bound::Included(&self.start)
    }

    fn end_bound(&self) -> Bound<&u64> {
        match self.end {
            Some(ref end) => Bound::Included(end),
            None => Bound::Unbounded,
        }
    }
}

/// Parameters of a log lookup for a single block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogsQuery {
    pub block_hash: BlockHash,
    /// Restricts results to logs emitted by this contract.
    pub address: Option<Address>,
}

/// Parameters of a point-in-time storage slot lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageQuery {
    pub block_hash: BlockHash,
    pub address: Address,
    pub slot: StorageSlot,
}
