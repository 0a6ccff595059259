//! Strata configuration parsing and validation.

use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

use anyhow::{ensure, Context};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strata_common_types::inputs::BlockRange;
use strata_common_types::{Address, Fingerprint, Topic};
use url::Url;

/// A [`serde`]-compatible representation of Strata's YAML configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// The URL of the PostgreSQL database to use.
    pub database_url: String,
    /// JSON-RPC endpoint of the upstream node.
    pub rpc_url: Url,
    /// Identifies the chain (and node) that headers are synced from. Stored
    /// alongside every header.
    pub fingerprint: Fingerprint,
    /// The port on which the Prometheus exporter should listen.
    #[serde(default = "Config::default_prometheus_port")]
    pub prometheus_port: u16,
    #[serde(default = "Config::default_polling_period_in_seconds")]
    pub polling_period_in_seconds: u64,

    // Indexing options
    // ----------------
    #[serde(default)]
    pub header_sync: HeaderSyncConfig,
    #[serde(default)]
    pub transformers: Vec<TransformerConfig>,

    // Query options
    // -------------
    #[serde(default)]
    pub query: QueryConfig,
}

impl Config {
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path)?;
        let config: Self = serde_yaml::from_reader(file).context("invalid config file")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        // Checkpoints are keyed by kind, so each kind gets a single writer.
        let mut kinds = HashSet::new();
        for transformer in &self.transformers {
            ensure!(
                kinds.insert(transformer.kind),
                "transformer '{}' is configured more than once",
                transformer.kind
            );
            if let Some(ending_block) = transformer.ending_block {
                ensure!(
                    ending_block >= transformer.starting_block,
                    "transformer '{}' ends before it starts",
                    transformer.kind
                );
            }
        }
        ensure!(
            self.query.max_storage_walk_depth > 0,
            "maxStorageWalkDepth must be at least 1"
        );
        Ok(())
    }

    pub fn polling_period(&self) -> Duration {
        Duration::from_secs(self.polling_period_in_seconds)
    }

    fn default_polling_period_in_seconds() -> u64 {
        15
    }

    fn default_prometheus_port() -> u16 {
        9184
    }

    fn default_max_storage_walk_depth() -> u64 {
        256
    }

    fn default_cache_ttl_in_seconds() -> u64 {
        60
    }

    fn default_cache_max_bytes() -> usize {
        64 * 1024 * 1024
    }

    fn default_cache_log_stats_interval_in_seconds() -> u64 {
        300
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HeaderSyncConfig {
    /// First block to sync when no header is stored yet.
    #[serde(default)]
    pub starting_block: u64,
    /// Whether to also store every block's receipts and logs, which is what
    /// log queries are served from.
    #[serde(default)]
    pub sync_receipts: bool,
}

/// The contract events Strata knows how to decode.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransformerKind {
    PitFileIlk,
    DripFileRepo,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransformerConfig {
    /// Selects the decoder, and names the transformer's checkpoints.
    pub kind: TransformerKind,
    /// Contracts whose logs are decoded. Empty means any contract.
    #[serde(default)]
    pub contract_addresses: Vec<Address>,
    /// Event signature hash, i.e. the first topic of matching logs.
    pub topic: Topic,
    #[serde(default)]
    pub starting_block: u64,
    /// Without an ending block the transformer keeps following new headers.
    #[serde(default)]
    pub ending_block: Option<u64>,
}

impl TransformerConfig {
    pub fn block_range(&self) -> BlockRange {
        BlockRange::new(self.starting_block, self.ending_block)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryConfig {
    /// How many headers a storage lookup follows by parent hash before
    /// falling back to headers that were canonical when inserted.
    #[serde(default = "Config::default_max_storage_walk_depth")]
    pub max_storage_walk_depth: u64,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_storage_walk_depth: Config::default_max_storage_walk_depth(),
            cache: CacheConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    #[serde(default = "Config::default_cache_ttl_in_seconds")]
    pub ttl_in_seconds: u64,
    /// Upper bound on the estimated size of all cached entries, split
    /// evenly between log and storage lookups.
    #[serde(default = "Config::default_cache_max_bytes")]
    pub max_bytes: usize,
    /// Set it to 0 to disable periodic logging of cache statistics.
    #[serde(default = "Config::default_cache_log_stats_interval_in_seconds")]
    pub log_stats_interval_in_seconds: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_in_seconds)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_in_seconds: Config::default_cache_ttl_in_seconds(),
            max_bytes: Config::default_cache_max_bytes(),
            log_stats_interval_in_seconds: Config::default_cache_log_stats_interval_in_seconds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
databaseUrl: postgres://localhost/strata
rpcUrl: http://localhost:8545
fingerprint: mainnet-geth-1
"#;

    const FULL: &str = r#"
databaseUrl: postgres://localhost/strata
rpcUrl: http://localhost:8545
fingerprint: mainnet-geth-1
prometheusPort: 9000
pollingPeriodInSeconds: 5
headerSync:
  startingBlock: 8928152
  syncReceipts: true
transformers:
  - kind: pit_file_ilk
    contractAddresses:
      - "0xe7cf3198787c9a4daac73371a38f29aaeeced87e"
    topic: "0x1a0b287e00000000000000000000000000000000000000000000000000000000"
    startingBlock: 8928152
  - kind: drip_file_repo
    topic: "0x29ae811400000000000000000000000000000000000000000000000000000000"
    startingBlock: 8928152
    endingBlock: 9000000
query:
  maxStorageWalkDepth: 64
  cache:
    ttlInSeconds: 10
    maxBytes: 1048576
    logStatsIntervalInSeconds: 0
"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: Config = serde_yaml::from_str(MINIMAL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.prometheus_port, 9184);
        assert_eq!(config.polling_period(), Duration::from_secs(15));
        assert_eq!(config.header_sync.starting_block, 0);
        assert!(!config.header_sync.sync_receipts);
        assert!(config.transformers.is_empty());
        assert_eq!(config.query.max_storage_walk_depth, 256);
        assert_eq!(config.query.cache.ttl(), Duration::from_secs(60));
    }

    #[test]
    fn full_config() {
        let config: Config = serde_yaml::from_str(FULL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.fingerprint.as_str(), "mainnet-geth-1");
        assert!(config.header_sync.sync_receipts);
        assert_eq!(config.transformers.len(), 2);

        let pit = &config.transformers[0];
        assert_eq!(pit.kind, TransformerKind::PitFileIlk);
        assert_eq!(pit.contract_addresses.len(), 1);
        assert_eq!(pit.block_range(), BlockRange::new(8928152, None));

        let drip = &config.transformers[1];
        assert_eq!(drip.kind.as_ref(), "drip_file_repo");
        assert!(drip.contract_addresses.is_empty());
        assert_eq!(drip.block_range(), BlockRange::new(8928152, Some(9000000)));

        assert_eq!(config.query.max_storage_walk_depth, 64);
        assert_eq!(config.query.cache.max_bytes, 1048576);
        assert_eq!(config.query.cache.log_stats_interval_in_seconds, 0);
    }

    #[test]
    fn unknown_transformer_kind_is_rejected() {
        let yaml = format!(
            "{}transformers:\n  - kind: vat_fold\n    topic: \"0x{}\"\n",
            MINIMAL,
            "00".repeat(32)
        );
        assert!(serde_yaml::from_str::<Config>(&yaml).is_err());
    }

    #[test]
    fn inverted_block_range_is_rejected() {
        let mut config: Config = serde_yaml::from_str(FULL).unwrap();
        config.transformers[1].ending_block = Some(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn duplicate_transformer_kind_is_rejected() {
        let mut config: Config = serde_yaml::from_str(FULL).unwrap();
        let mut duplicate = config.transformers[0].clone();
        duplicate.starting_block = 9000000;
        config.transformers.push(duplicate);

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("pit_file_ilk"));
    }

    #[test]
    fn zero_walk_depth_is_rejected() {
        let mut config: Config = serde_yaml::from_str(MINIMAL).unwrap();
        config.query.max_storage_walk_depth = 0;
        assert!(config.validate().is_err());
    }
}
