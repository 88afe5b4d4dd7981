//! Metrics the core emits; rendering them is the (out-of-scope) metrics
//! sink's job (spec §6). Mirrors the teacher's use of `prometheus-client`
//! for counters/gauges/histograms throughout `agentgateway`/`agent-core`.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry as MetricsRegistry;

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BackendLabel {
	pub backend: String,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RouteLabel {
	pub backend: String,
	pub outcome: &'static str,
}

/// Process-wide metric handles, owned by the [`crate::gateway::GatewayServer`]
/// (not a hidden global — spec §5/§9).
#[derive(Debug, Clone)]
pub struct Metrics {
	pub requests_total: Family<RouteLabel, Counter>,
	pub errors_total: Family<RouteLabel, Counter>,
	pub active_connections: Family<BackendLabel, Gauge>,
	pub active_requests: Family<BackendLabel, Gauge>,
	pub call_duration_seconds: Family<BackendLabel, Histogram>,
}

impl Metrics {
	pub fn new(registry: &mut MetricsRegistry) -> Self {
		let requests_total = Family::<RouteLabel, Counter>::default();
		let errors_total = Family::<RouteLabel, Counter>::default();
		let active_connections = Family::<BackendLabel, Gauge>::default();
		let active_requests = Family::<BackendLabel, Gauge>::default();
		let call_duration_seconds =
			Family::<BackendLabel, Histogram>::new_with_constructor(|| {
				Histogram::new([0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0].into_iter())
			});

		registry.register(
			"gateway_requests",
			"Total routed requests",
			requests_total.clone(),
		);
		registry.register("gateway_errors", "Total routing errors", errors_total.clone());
		registry.register(
			"gateway_active_connections",
			"Transports currently connected per backend",
			active_connections.clone(),
		);
		registry.register(
			"gateway_active_requests",
			"In-flight requests per backend",
			active_requests.clone(),
		);
		registry.register(
			"gateway_call_duration_seconds",
			"Call duration per backend",
			call_duration_seconds.clone(),
		);

		Self {
			requests_total,
			errors_total,
			active_connections,
			active_requests,
			call_duration_seconds,
		}
	}
}

impl Default for Metrics {
	fn default() -> Self {
		let mut registry = MetricsRegistry::default();
		Self::new(&mut registry)
	}
}
