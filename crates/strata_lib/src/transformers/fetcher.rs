use std::sync::Arc;

use itertools::Itertools;
use strata_chain_client::{ChainClient, LogFilter, TopicFilter};
use strata_common_types::{Address, BlockPointer, Header, RawLog};
use thiserror::Error;
use tracing::{trace, warn};

/// The upstream node couldn't answer. Never retried here; the header stays
/// unchecked and is picked up again by the next run.
#[derive(Debug, Error)]
#[error("failed to fetch logs of block {block}")]
pub struct FetchError {
    pub block: BlockPointer,
    #[source]
    pub source: anyhow::Error,
}

#[derive(Debug, Clone)]
pub struct LogFetcher {
    client: Arc<dyn ChainClient>,
}

impl LogFetcher {
    pub fn new(client: Arc<dyn ChainClient>) -> Self {
        Self { client }
    }

    /// Logs of exactly `header` that match `addresses` (empty means any) and
    /// `topics`, ordered by transaction index, then log index.
    ///
    /// Canonicity is not considered. Logs the node reports for another block
    /// with the same number, and logs it flags as removed, are dropped.
    pub async fn fetch_logs(
        &self,
        addresses: &[Address],
        topics: &TopicFilter,
        header: &Header,
    ) -> Result<Vec<RawLog>, FetchError> {
        let filter = LogFilter {
            addresses: addresses.to_vec(),
            topics: topics.clone(),
            block_hash: header.hash,
        };

        let logs = self
            .client
            .logs(&filter)
            .await
            .map_err(|source| FetchError {
                block: header.pointer(),
                source,
            })?;
        let received = logs.len();

        let logs = logs
            .into_iter()
            .filter(|log| {
                if log.block_hash != header.hash {
                    warn!(
                        node = %self.client.name(),
                        block_number = header.block_number,
                        expected = %header.hash,
                        received = %log.block_hash,
                        "Node returned a log of a different block, ignoring it"
                    );
                    return false;
                }
                if log.removed {
                    warn!(
                        node = %self.client.name(),
                        block = %header.pointer(),
                        log_index = log.log_index,
                        "Node returned a removed log, ignoring it"
                    );
                    return false;
                }
                filter.matches(log)
            })
            .sorted_by_key(|log| (log.transaction_index, log.log_index))
            .collect_vec();

        trace!(
            block = %header.pointer(),
            received,
            kept = logs.len(),
            "Fetched logs"
        );
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use strata_common_types::HexString;
    use tracing_test::traced_test;

    use super::*;
    use crate::test_utils::mocks::MockChainClient;
    use crate::test_utils::{chain, raw_log};

    #[tokio::test]
    #[traced_test]
    async fn only_logs_of_the_requested_block() {
        let client = Arc::new(MockChainClient::default());
        let main = chain(3, 0, 0);
        let fork = chain(3, 1, 2);
        let signature = HexString([0x1a; 32]);

        let address = HexString([0xaa; 20]);
        client.add_log(raw_log(&main[2], address, signature, 1, 0));
        client.add_log(raw_log(&main[2], address, signature, 0, 3));
        client.add_log(raw_log(&main[2], address, signature, 0, 1));
        client.add_log(raw_log(&fork[2], address, signature, 0, 2));
        let mut removed = raw_log(&main[2], address, signature, 2, 0);
        removed.removed = true;
        client.add_log(removed);

        let fetcher = LogFetcher::new(client);
        let header = crate::test_utils::stored(&main[2], 1);
        let logs = fetcher
            .fetch_logs(&[], &TopicFilter::event_signature(signature), &header)
            .await
            .unwrap();

        let positions = logs
            .iter()
            .map(|log| (log.transaction_index, log.log_index))
            .collect_vec();
        assert_eq!(positions, vec![(0, 1), (0, 3), (1, 0)]);
        assert!(logs_contain("Node returned a log of a different block"));
        assert!(logs_contain("Node returned a removed log"));
    }

    #[tokio::test]
    async fn filters_by_address_and_signature() {
        let client = Arc::new(MockChainClient::default());
        let main = chain(1, 0, 0);
        let wanted = HexString([0xaa; 20]);
        let other = HexString([0xbb; 20]);
        let signature = HexString([0x1a; 32]);

        client.add_log(raw_log(&main[0], wanted, signature, 0, 0));
        client.add_log(raw_log(&main[0], other, signature, 0, 1));
        client.add_log(raw_log(&main[0], wanted, HexString([0x02; 32]), 0, 2));

        let fetcher = LogFetcher::new(client);
        let logs = fetcher
            .fetch_logs(
                &[wanted],
                &TopicFilter::event_signature(signature),
                &crate::test_utils::stored(&main[0], 1),
            )
            .await
            .unwrap();

        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].log_index, 0);
    }

    #[tokio::test]
    async fn node_failure_is_reported_with_block() {
        let client = Arc::new(MockChainClient::default());
        client.fail_next_calls(1);
        let main = chain(1, 0, 0);

        let fetcher = LogFetcher::new(client);
        let err = fetcher
            .fetch_logs(
                &[],
                &TopicFilter::default(),
                &crate::test_utils::stored(&main[0], 1),
            )
            .await
            .unwrap_err();

        assert_eq!(err.block, main[0].pointer());
    }
}
