use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::OnceLock;

// It's important to use the exported crate `prometheus_exporter::prometheus`
// instead of `prometheus`, as different versions of that crate have
// incompatible global registries.
use prometheus_exporter::prometheus;

pub struct PrometheusMetrics {
    pub rpc_requests: prometheus::IntCounterVec,
    pub headers_checked: prometheus::IntCounterVec,
    pub models_persisted: prometheus::IntCounterVec,
    pub query_cache_lookups: prometheus::IntCounterVec,
}

static METRICS: OnceLock<PrometheusMetrics> = OnceLock::new();

pub fn metrics() -> &'static PrometheusMetrics {
    METRICS.get_or_init(|| PrometheusMetrics::new(prometheus::default_registry().clone()))
}

impl PrometheusMetrics {
    fn new(registry: prometheus::Registry) -> Self {
        let rpc_requests = prometheus::register_int_counter_vec_with_registry!(
            "rpc_requests",
            "Number of JSON-RPC requests sent to the upstream node",
            &["method", "success"],
            registry
        )
        .unwrap();
        let headers_checked = prometheus::register_int_counter_vec_with_registry!(
            "headers_checked",
            "Number of headers marked as checked by a transformer",
            &["transformer"],
            registry
        )
        .unwrap();
        let models_persisted = prometheus::register_int_counter_vec_with_registry!(
            "models_persisted",
            "Number of decoded event models written by a transformer",
            &["transformer"],
            registry
        )
        .unwrap();
        let query_cache_lookups = prometheus::register_int_counter_vec_with_registry!(
            "query_cache_lookups",
            "Number of query cache lookups by outcome",
            &["outcome"],
            registry
        )
        .unwrap();

        Self {
            rpc_requests,
            headers_checked,
            models_persisted,
            query_cache_lookups,
        }
    }
}

#[derive(Debug)]
pub struct PrometheusExporter {
    binding: SocketAddr,
    _exporter: prometheus_exporter::Exporter,
}

impl PrometheusExporter {
    /// Starts exporting Prometheus metrics at `http://0.0.0.0:{port}/metrics`. The server
    /// will keep running until the returned [`PrometheusExporter`] is dropped.
    pub fn start(port: u16, registry: prometheus::Registry) -> anyhow::Result<Self> {
        let binding = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
        let exporter = {
            let mut builder = prometheus_exporter::Builder::new(binding);
            builder.with_registry(registry);
            builder.start()?
        };

        Ok(Self {
            binding,
            _exporter: exporter,
        })
    }

    /// Returns the port this Prometheus exporter is bound to.
    pub fn port(&self) -> u16 {
        self.binding.port()
    }
}
