//! Ingestion and query library of the Strata indexer.
//!
//! The write path keeps block headers in sync with an upstream node
//! ([`header_sync`]) and runs one [`transformers::Orchestrator`] per
//! configured contract event, each of which backfills every stored header it
//! hasn't checked yet. The read path ([`query`]) answers log and storage
//! lookups at arbitrary historical blocks through a coalescing cache, with
//! [`canonicity`] deciding whether a block is still on the main chain.

pub mod canonicity;
pub mod chain_store;
pub mod chain_tip;
mod cli;
pub mod config;
pub mod header_sync;
mod prometheus_metrics;
pub mod query;
pub mod transformers;

#[cfg(any(test, feature = "tests"))]
pub mod test_utils;

pub use cli::CliOptions;
pub use prometheus_metrics::{metrics, PrometheusExporter, PrometheusMetrics};

pub const STRATA_VERSION: &str = env!("CARGO_PKG_VERSION");
