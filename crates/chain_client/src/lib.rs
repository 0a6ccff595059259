//! The upstream node, as seen by the indexer: something that reports the
//! chain head, hands out block headers and receipts, and answers log
//! filters.

mod json_rpc;

use std::borrow::Cow;
use std::fmt::Debug;

use async_trait::async_trait;
pub use json_rpc::JsonRpcClient;
use serde::Serialize;
use strata_common_types::{Address, BlockHash, ChainHeader, RawLog, Receipt, Topic};

/// A blockchain node that can be queried for headers, receipts and logs.
///
/// Implementations never retry internally. A failed call is returned to the
/// caller, which decides whether to try again.
#[async_trait]
pub trait ChainClient: Send + Sync + Debug {
    /// Human-readable name of the node, used in logs and metrics.
    fn name(&self) -> Cow<str>;

    /// The node's current chain head.
    async fn chain_head(&self) -> anyhow::Result<ChainHeader>;

    /// The header of the canonical block at `number`, as seen by the node,
    /// if it has one.
    async fn header_by_number(&self, number: u64) -> anyhow::Result<Option<ChainHeader>>;

    /// All logs in one block that match `filter`.
    async fn logs(&self, filter: &LogFilter) -> anyhow::Result<Vec<RawLog>>;

    /// All receipts of the block with the given hash, in transaction order.
    async fn block_receipts(&self, block_hash: &BlockHash) -> anyhow::Result<Vec<Receipt>>;
}

/// A log filter scoped to exactly one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    /// Contracts whose logs are wanted. Empty means any contract.
    pub addresses: Vec<Address>,
    pub topics: TopicFilter,
    pub block_hash: BlockHash,
}

/// Positional topic filter: entry `i` constrains topic `i` to one of the
/// listed values. An empty entry, or a missing trailing one, matches
/// anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicFilter(pub Vec<Vec<Topic>>);

impl TopicFilter {
    /// Matches logs whose first topic is the given event signature.
    pub fn event_signature(signature: Topic) -> Self {
        Self(vec![vec![signature]])
    }

    pub fn matches(&self, topics: &[Topic]) -> bool {
        self.0
            .iter()
            .enumerate()
            .all(|(i, allowed)| match topics.get(i) {
                _ if allowed.is_empty() => true,
                Some(topic) => allowed.contains(topic),
                None => false,
            })
    }
}

impl Serialize for TopicFilter {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        // JSON-RPC uses `null` for wildcard positions.
        let positions: Vec<Option<&Vec<Topic>>> = self
            .0
            .iter()
            .map(|allowed| (!allowed.is_empty()).then_some(allowed))
            .collect();
        positions.serialize(serializer)
    }
}

impl LogFilter {
    /// Whether `log` satisfies this filter. Nodes are expected to do this
    /// filtering already; this is used to double-check their answers.
    pub fn matches(&self, log: &RawLog) -> bool {
        log.block_hash == self.block_hash
            && (self.addresses.is_empty() || self.addresses.contains(&log.address))
            && self.topics.matches(&log.topics)
    }
}

#[cfg(test)]
mod tests {
    use strata_common_types::HexString;

    use super::*;

    fn topic(byte: u8) -> Topic {
        HexString([byte; 32])
    }

    #[test]
    fn empty_topic_filter_matches_anything() {
        let filter = TopicFilter::default();
        assert!(filter.matches(&[]));
        assert!(filter.matches(&[topic(1), topic(2)]));
    }

    #[test]
    fn positional_topic_filter() {
        let filter = TopicFilter(vec![vec![topic(1)], vec![], vec![topic(3), topic(4)]]);

        assert!(filter.matches(&[topic(1), topic(9), topic(4)]));
        assert!(!filter.matches(&[topic(1), topic(9), topic(5)]));
        assert!(!filter.matches(&[topic(2), topic(9), topic(3)]));
        // Constrained position missing from the log.
        assert!(!filter.matches(&[topic(1), topic(9)]));
    }

    #[test]
    fn wildcard_positions_serialize_as_null() {
        let filter = TopicFilter(vec![vec![topic(1)], vec![]]);
        let json = serde_json::to_value(&filter).unwrap();

        assert_eq!(
            json,
            serde_json::json!([[topic(1).to_string()], serde_json::Value::Null])
        );
    }
}
