use async_trait::async_trait;
use prometheus_exporter::prometheus::IntCounter;
use strata_chain_client::TopicFilter;
use strata_common_types::{BlockPointer, Fingerprint, Header};
use thiserror::Error;
use tracing::{debug, info};

use super::converter::{Converter, DecodeError, EventSchema};
use super::fetcher::{FetchError, LogFetcher};
use super::repository::{PersistenceError, Repository};
use crate::config::TransformerConfig;
use crate::PrometheusMetrics;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("failed to list unchecked headers")]
    MissingHeaders(#[source] PersistenceError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("failed to decode logs of block {block}")]
    Decode {
        block: BlockPointer,
        #[source]
        source: DecodeError,
    },
    #[error("failed to persist block {block}")]
    Persistence {
        block: BlockPointer,
        #[source]
        source: PersistenceError,
    },
}

impl TransformError {
    /// The header that was being processed, if any.
    pub fn block_number(&self) -> Option<u64> {
        match self {
            Self::MissingHeaders(_) => None,
            Self::Fetch(err) => Some(err.block.number),
            Self::Decode { block, .. } | Self::Persistence { block, .. } => Some(block.number),
        }
    }
}

/// What one [`Transformer::execute`] run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteSummary {
    pub headers_checked: usize,
    pub models_persisted: usize,
}

/// A configured transformer, with its converter and model types erased.
#[async_trait]
pub trait Transformer: Send + Sync {
    fn kind(&self) -> &str;

    /// Processes every header in range that isn't checked yet, lowest first.
    /// Stops at the first header that fails; the headers before it remain
    /// checked.
    async fn execute(&self) -> Result<ExecuteSummary, TransformError>;
}

/// Drives the backfill loop of one contract event: for every unchecked
/// header, fetch its matching logs, decode them and persist the result
/// together with the header's checkpoint.
pub struct Orchestrator<C, R> {
    kind: String,
    config: TransformerConfig,
    fingerprint: Fingerprint,
    fetcher: LogFetcher,
    converter: C,
    repository: R,
    schema: EventSchema,
    topics: TopicFilter,
    headers_checked: IntCounter,
    models_persisted: IntCounter,
}

impl<C, R> Orchestrator<C, R>
where
    C: Converter,
    R: Repository<Model = C::Model>,
{
    pub fn new(
        config: TransformerConfig,
        fingerprint: Fingerprint,
        fetcher: LogFetcher,
        converter: C,
        repository: R,
        metrics: &PrometheusMetrics,
    ) -> Self {
        let kind = config.kind.to_string();
        let schema = converter.schema(config.topic);
        Self {
            topics: TopicFilter::event_signature(config.topic),
            headers_checked: metrics.headers_checked.with_label_values(&[&kind]),
            models_persisted: metrics.models_persisted.with_label_values(&[&kind]),
            kind,
            config,
            fingerprint,
            fetcher,
            converter,
            repository,
            schema,
        }
    }

    async fn process(&self, header: &Header) -> Result<usize, TransformError> {
        let logs = self
            .fetcher
            .fetch_logs(&self.config.contract_addresses, &self.topics, header)
            .await?;

        if logs.is_empty() {
            debug!(
                transformer = %self.kind,
                block_number = header.block_number,
                header_id = header.id,
                "No matching logs"
            );
            self.repository
                .mark_header_checked(header.id)
                .await
                .map_err(|source| TransformError::Persistence {
                    block: header.pointer(),
                    source,
                })?;
            return Ok(0);
        }

        let decode_err = |source| TransformError::Decode {
            block: header.pointer(),
            source,
        };
        let entities = self
            .converter
            .to_entities(&self.schema, &logs)
            .map_err(decode_err)?;
        let models = self.converter.to_models(entities).map_err(decode_err)?;
        let count = models.len();

        let inserted = self
            .repository
            .create(header.id, models)
            .await
            .map_err(|source| TransformError::Persistence {
                block: header.pointer(),
                source,
            })?;
        debug!(
            transformer = %self.kind,
            block_number = header.block_number,
            header_id = header.id,
            logs = logs.len(),
            models = count,
            inserted,
            "Persisted event models"
        );
        Ok(count)
    }
}

#[async_trait]
impl<C, R> Transformer for Orchestrator<C, R>
where
    C: Converter + 'static,
    R: Repository<Model = C::Model> + 'static,
{
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn execute(&self) -> Result<ExecuteSummary, TransformError> {
        let headers = self
            .repository
            .missing_headers(self.config.block_range(), &self.fingerprint)
            .await
            .map_err(TransformError::MissingHeaders)?;

        if headers.is_empty() {
            debug!(transformer = %self.kind, "No unchecked headers");
            return Ok(ExecuteSummary::default());
        }
        info!(
            transformer = %self.kind,
            headers = headers.len(),
            from = headers[0].block_number,
            "Found unchecked headers"
        );

        let mut summary = ExecuteSummary::default();
        for header in &headers {
            let models = self.process(header).await?;
            summary.headers_checked += 1;
            summary.models_persisted += models;
            self.headers_checked.inc();
            self.models_persisted.inc_by(models as u64);
        }

        info!(
            transformer = %self.kind,
            headers_checked = summary.headers_checked,
            models_persisted = summary.models_persisted,
            "Checked headers"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use strata_common_types::{ChainHeader, HexString, RawLog, Topic, B256};
    use strata_store::DripFileRepo;

    use super::*;
    use crate::config::TransformerKind;
    use crate::test_utils::mocks::{MockChainClient, MockRepository, MockStore};
    use crate::test_utils::{chain, fingerprint, raw_log, text_topic};
    use crate::transformers::drip_file_repo::DripFileRepoConverter;

    const SIGNATURE: Topic = HexString([0x29; 32]);

    struct Setup {
        client: Arc<MockChainClient>,
        store: Arc<MockStore>,
        repository: MockRepository<DripFileRepo>,
        headers: Vec<Header>,
    }

    impl Setup {
        fn new(len: u64) -> Self {
            let client = Arc::new(MockChainClient::default());
            let store = Arc::new(MockStore::default());
            let blocks = chain(len, 0, 0);
            client.set_chain(&blocks);
            let headers = blocks.iter().map(|b| store.add_header(b, true)).collect();
            let repository = store.repository("drip_file_repo");
            Self {
                client,
                store,
                repository,
                headers,
            }
        }

        fn orchestrator(
            &self,
            ending_block: Option<u64>,
        ) -> Orchestrator<DripFileRepoConverter, MockRepository<DripFileRepo>> {
            let config = TransformerConfig {
                kind: TransformerKind::DripFileRepo,
                contract_addresses: vec![],
                topic: SIGNATURE,
                starting_block: 0,
                ending_block,
            };
            Orchestrator::new(
                config,
                fingerprint(),
                LogFetcher::new(self.client.clone()),
                DripFileRepoConverter,
                self.repository.clone(),
                crate::metrics(),
            )
        }

        fn add_log(&self, number: usize, log_index: u32, what: &str) {
            let block = ChainHeader {
                number: self.headers[number].block_number,
                hash: self.headers[number].hash,
                parent_hash: self.headers[number].parent_hash,
            };
            let mut log: RawLog = raw_log(&block, HexString([0xbb; 20]), SIGNATURE, 0, log_index);
            log.topics.push(HexString([0x11; 32]));
            log.topics.push(text_topic(what));
            log.data = HexString(B256::from_be_slice(&[1]).as_bytes().to_vec());
            self.client.add_log(log);
        }

        fn checked(&self) -> Vec<u64> {
            self.headers
                .iter()
                .filter(|h| self.repository.is_checked(h.id))
                .map(|h| h.block_number)
                .collect()
        }
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let setup = Setup::new(5);
        setup.add_log(2, 0, "repo");
        setup.add_log(2, 1, "repo");
        setup.add_log(4, 0, "repo");
        let orchestrator = setup.orchestrator(None);

        let first = orchestrator.execute().await.unwrap();
        assert_eq!(
            first,
            ExecuteSummary {
                headers_checked: 5,
                models_persisted: 3,
            }
        );
        let models = setup.repository.models();
        let requests = setup.client.log_requests();

        let second = orchestrator.execute().await.unwrap();
        assert_eq!(second, ExecuteSummary::default());
        assert_eq!(setup.repository.models(), models);
        assert_eq!(setup.client.log_requests(), requests);
    }

    #[tokio::test]
    async fn headers_without_logs_are_checked() {
        let setup = Setup::new(3);
        setup.orchestrator(None).execute().await.unwrap();

        assert_eq!(setup.checked(), vec![0, 1, 2]);
        assert!(setup.repository.models().is_empty());
    }

    #[tokio::test]
    async fn decode_error_leaves_header_unchecked() {
        let setup = Setup::new(3);
        setup.add_log(1, 0, "repo");
        setup.add_log(1, 1, "vow");

        let err = setup.orchestrator(None).execute().await.unwrap_err();

        assert!(matches!(err, TransformError::Decode { .. }));
        assert_eq!(err.block_number(), Some(1));
        assert_eq!(setup.checked(), vec![0]);
        assert!(setup.repository.models().is_empty());
    }

    #[tokio::test]
    async fn resumes_after_failed_write() {
        let setup = Setup::new(5);
        setup.add_log(2, 0, "repo");
        setup.repository.fail_next_create();
        let orchestrator = setup.orchestrator(None);

        let err = orchestrator.execute().await.unwrap_err();
        assert!(matches!(err, TransformError::Persistence { .. }));
        assert_eq!(err.block_number(), Some(2));
        assert_eq!(setup.checked(), vec![0, 1]);

        let summary = orchestrator.execute().await.unwrap();
        assert_eq!(summary.headers_checked, 3);
        assert_eq!(setup.checked(), vec![0, 1, 2, 3, 4]);
        assert_eq!(setup.repository.models().len(), 1);
        assert_eq!(setup.repository.models()[0].0, setup.headers[2].id);
    }

    #[tokio::test]
    async fn fetch_errors_are_propagated() {
        let setup = Setup::new(2);
        setup.client.fail_next_calls(1);

        let err = setup.orchestrator(None).execute().await.unwrap_err();

        assert!(matches!(err, TransformError::Fetch(_)));
        assert_eq!(err.block_number(), Some(0));
        assert!(setup.checked().is_empty());
    }

    #[tokio::test]
    async fn stays_within_block_range() {
        let setup = Setup::new(5);
        let summary = setup.orchestrator(Some(2)).execute().await.unwrap();

        assert_eq!(summary.headers_checked, 3);
        assert_eq!(setup.checked(), vec![0, 1, 2]);
        assert!(!setup.store.is_checked(setup.headers[3].id, "drip_file_repo"));
    }

    #[tokio::test]
    async fn reorged_header_is_processed_separately() {
        let setup = Setup::new(3);
        let fork = chain(3, 1, 2);
        let sibling = setup.store.add_header(&fork[2], true);
        setup.client.set_chain(&fork);
        setup.add_log(2, 0, "repo");

        let summary = setup.orchestrator(None).execute().await.unwrap();

        // The node's log index answers for either block at height 2, the
        // fetcher keeps only the logs of the requested one.
        assert_eq!(summary.headers_checked, 4);
        assert_eq!(summary.models_persisted, 1);
        assert!(setup.repository.is_checked(sibling.id));
        assert_eq!(setup.repository.models()[0].0, setup.headers[2].id);
    }
}
