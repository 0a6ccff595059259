//! The ingestion pipeline: fetch the logs of a header, decode them, and
//! persist the result together with the header's checkpoint.

mod converter;
pub mod decoding;
pub mod drip_file_repo;
mod fetcher;
mod orchestrator;
pub mod pit_file_ilk;
mod repository;

use std::sync::Arc;

pub use converter::{Converter, DecodeError, EventSchema};
pub use fetcher::{FetchError, LogFetcher};
pub use orchestrator::{ExecuteSummary, Orchestrator, TransformError, Transformer};
pub use repository::{PersistenceError, Repository, StoreRepository};
use strata_chain_client::ChainClient;
use strata_common_types::{Fingerprint, RawLog};
use strata_store::Store;

use self::drip_file_repo::DripFileRepoConverter;
use self::pit_file_ilk::PitFileIlkConverter;
use crate::config::{TransformerConfig, TransformerKind};
use crate::PrometheusMetrics;

/// Builds the transformer that `config` asks for, bound to the converter and
/// event table of its kind.
pub fn build_transformer(
    config: &TransformerConfig,
    fingerprint: &Fingerprint,
    client: Arc<dyn ChainClient>,
    store: &Store,
    metrics: &PrometheusMetrics,
) -> Box<dyn Transformer> {
    let fetcher = LogFetcher::new(client);
    let kind = config.kind.as_ref();

    match config.kind {
        TransformerKind::PitFileIlk => Box::new(Orchestrator::new(
            config.clone(),
            fingerprint.clone(),
            fetcher,
            PitFileIlkConverter,
            StoreRepository::new(store.clone(), kind),
            metrics,
        )),
        TransformerKind::DripFileRepo => Box::new(Orchestrator::new(
            config.clone(),
            fingerprint.clone(),
            fetcher,
            DripFileRepoConverter,
            StoreRepository::new(store.clone(), kind),
            metrics,
        )),
    }
}

/// Transaction and log index of `log` as event table columns.
fn positions(event: &'static str, log: &RawLog) -> Result<(i32, i32), DecodeError> {
    let convert = |value: u32, what: &str| {
        i32::try_from(value).map_err(|_| DecodeError::OutOfRange {
            event,
            log_index: log.log_index,
            reason: format!("{what} {value} doesn't fit a 32-bit column"),
        })
    };
    Ok((
        convert(log.transaction_index, "transaction index")?,
        convert(log.log_index, "log index")?,
    ))
}
