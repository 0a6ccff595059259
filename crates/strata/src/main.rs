use std::sync::Arc;

use clap::Parser;
use futures::future::join_all;
use prometheus_exporter::prometheus;
use strata_chain_client::{ChainClient, JsonRpcClient};
use strata_lib::chain_tip::ChainTip;
use strata_lib::config::Config;
use strata_lib::header_sync::HeaderSync;
use strata_lib::transformers::build_transformer;
use strata_lib::{metrics, CliOptions, PrometheusExporter, STRATA_VERSION};
use strata_store::Store;
use tracing::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!(version = STRATA_VERSION, "Parse options");
    let cli_options = CliOptions::parse();

    info!("Loading configuration file");
    let config = Config::read(&cli_options.config)?;

    // Prometheus metrics.
    let registry = prometheus::default_registry().clone();
    let exporter = PrometheusExporter::start(config.prometheus_port, registry)?;
    info!(port = exporter.port(), "Exporting Prometheus metrics");

    info!("Initialize store and running migrations");
    let store = Store::new(&config.database_url).await?;
    info!("Store initialization successful");

    let client: Arc<dyn ChainClient> = Arc::new(JsonRpcClient::new(
        config.fingerprint.as_str(),
        config.rpc_url.clone(),
        metrics().rpc_requests.clone(),
    ));
    let header_sync = HeaderSync::new(
        client.clone(),
        Arc::new(store.clone()),
        ChainTip::new(),
        config.fingerprint.clone(),
        config.header_sync.clone(),
    );
    let transformers: Vec<_> = config
        .transformers
        .iter()
        .map(|transformer| {
            build_transformer(
                transformer,
                &config.fingerprint,
                client.clone(),
                &store,
                metrics(),
            )
        })
        .collect();
    info!(transformers = transformers.len(), "Initialized transformers");

    let sleep_duration = config.polling_period();
    loop {
        info!("New main loop iteration");

        if let Err(err) = header_sync.sync().await {
            error!(error = %format!("{err:#}"), "Failed to sync headers");
        }

        // Transformers of different kinds write disjoint checkpoints.
        let results = join_all(transformers.iter().map(|t| t.execute())).await;
        for (transformer, result) in transformers.iter().zip(results) {
            match result {
                Ok(summary) => debug!(
                    transformer = transformer.kind(),
                    headers_checked = summary.headers_checked,
                    models_persisted = summary.models_persisted,
                    "Transformer finished"
                ),
                Err(err) => error!(
                    transformer = transformer.kind(),
                    block_number = err.block_number(),
                    error = %err,
                    "Transformer failed, it will retry on the next iteration"
                ),
            }
        }

        info!(
            sleep_seconds = sleep_duration.as_secs(),
            "Sleeping for a while before next main loop iteration"
        );
        tokio::time::sleep(sleep_duration).await;
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}
