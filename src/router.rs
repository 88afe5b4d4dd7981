//! Router (spec §4.4, component C4): resolves a namespaced id to a
//! backend, dispatches the call through the [`crate::pool::TransportPool`],
//! and enforces the per-call deadline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{instrument, warn};

use crate::config::GatewayPolicy;
use crate::error::RouterError;
use crate::metrics::{Metrics, RouteLabel};
use crate::pool::TransportPool;
use crate::protocol::CapabilityKind;
use crate::registry::Registry;
use crate::transport::CallError;

pub struct Router {
	registry: Arc<Registry>,
	pool: Arc<TransportPool>,
	policy: GatewayPolicy,
	metrics: Metrics,
}

impl Router {
	pub fn new(registry: Arc<Registry>, pool: Arc<TransportPool>, policy: GatewayPolicy, metrics: Metrics) -> Self {
		Self {
			registry,
			pool,
			policy,
			metrics,
		}
	}

	/// Resolves `ns_id`, dials the owning backend's transport, and invokes
	/// `wire_method` on it with params built from the backend's native
	/// name via `build_params`, capping the call at
	/// `min(per_call_timeout, policy.default_timeout)` (spec §4.4 step 3).
	/// Timeouts map to [`RouterError::ToolTimeout`] with JSON-RPC code
	/// `-32001`; the backend's own errors are returned verbatim.
	#[instrument(skip(self, build_params))]
	pub async fn dispatch(
		&self,
		kind: CapabilityKind,
		ns_id: &str,
		wire_method: &str,
		build_params: impl FnOnce(&str) -> Option<serde_json::Value>,
		per_call_timeout: Option<Duration>,
	) -> Result<serde_json::Value, RouterError> {
		let (backend_id, native_name) = self
			.registry
			.resolve(kind, ns_id)
			.ok_or_else(|| RouterError::RouteNotFound(ns_id.to_string()))?;
		let params = build_params(&native_name);

		if self.pool.is_draining(&backend_id).await {
			return Err(RouterError::RouteUnavailable(backend_id));
		}

		let timeout = per_call_timeout
			.unwrap_or(self.policy.default_timeout)
			.min(self.policy.default_timeout);

		let transport = self.pool.get(&backend_id).await.map_err(RouterError::from)?;
		self.pool.increment_active(&backend_id).await;
		let started = Instant::now();

		let result = transport.call(wire_method, params, timeout).await;

		self.pool.decrement_active(&backend_id).await;
		let elapsed = started.elapsed();
		self.metrics
			.call_duration_seconds
			.get_or_create(&crate::metrics::BackendLabel {
				backend: backend_id.clone(),
			})
			.observe(elapsed.as_secs_f64());

		let outcome_label = |outcome: &'static str| RouteLabel {
			backend: backend_id.clone(),
			outcome,
		};

		match result {
			Ok(value) => {
				self.metrics.requests_total.get_or_create(&outcome_label("ok")).inc();
				Ok(value)
			}
			Err(CallError::Timeout) => {
				warn!(backend = %backend_id, ns_id, "tool call timed out");
				self.metrics.errors_total.get_or_create(&outcome_label("timeout")).inc();
				Err(RouterError::ToolTimeout(timeout))
			}
			Err(CallError::Backend(e)) => {
				self.metrics.errors_total.get_or_create(&outcome_label("backend_error")).inc();
				Err(RouterError::Backend(e))
			}
			Err(CallError::Transport(e)) => {
				self.metrics.errors_total.get_or_create(&outcome_label("transport_error")).inc();
				Err(RouterError::Pool(crate::error::PoolError::Transport(e)))
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap as Map;

	use super::*;
	use crate::config::{BackendConfig, BackendMode, TransportKind};
	use crate::pool::TransportFactory;
	use crate::protocol::CapabilityDef;
	use crate::transport::test_support::FakeTransport;
	use crate::transport::DynTransport;

	struct FakeFactory {
		transport: Arc<FakeTransport>,
	}

	impl TransportFactory for FakeFactory {
		fn build(&self, _config: &BackendConfig) -> Result<DynTransport, crate::error::PoolError> {
			Ok(self.transport.clone())
		}
	}

	async fn setup(fake: Arc<FakeTransport>) -> Router {
		let registry = Registry::new();
		registry
			.add_backend(
				"b1",
				CapabilityKind::Tool,
				vec![CapabilityDef {
					native_name: "search".into(),
					description: None,
					raw: serde_json::json!({}),
				}],
			)
			.unwrap();
		let factory = Arc::new(FakeFactory { transport: fake });
		let pool = TransportPool::new(factory, GatewayPolicy::default(), Metrics::default());
		pool
			.add_backend(BackendConfig {
				id: "b1".into(),
				transport: TransportKind::Stdio {
					command: "echo".into(),
					args: vec![],
					env: Map::new(),
				},
				enabled: true,
				mode: BackendMode::Smart,
			})
			.await;
		Router::new(registry, pool, GatewayPolicy::default(), Metrics::default())
	}

	#[tokio::test]
	async fn dispatches_to_resolved_backend() {
		let fake = FakeTransport::new();
		fake.set_response("search", Ok(serde_json::json!({"ok": true})));
		let router = setup(fake).await;
		let result = router
			.dispatch(CapabilityKind::Tool, "b1_search", "search", |_name| None, None)
			.await
			.unwrap();
		assert_eq!(result["ok"], serde_json::json!(true));
	}

	#[tokio::test]
	async fn unknown_ns_id_is_route_not_found() {
		let fake = FakeTransport::new();
		let router = setup(fake).await;
		let err = router
			.dispatch(CapabilityKind::Tool, "nope", "search", |_name| None, None)
			.await
			.unwrap_err();
		assert_matches::assert_matches!(err, RouterError::RouteNotFound(_));
	}

	#[tokio::test]
	async fn timeout_maps_to_tool_timeout_error() {
		let fake = FakeTransport::new();
		fake.set_response("search", Err(crate::transport::CallError::Timeout));
		let router = setup(fake).await;
		let err = router
			.dispatch(
				CapabilityKind::Tool,
				"b1_search",
				"search",
				|_name| None,
				Some(Duration::from_millis(10)),
			)
			.await
			.unwrap_err();
		assert_matches::assert_matches!(err, RouterError::ToolTimeout(_));
		assert_eq!(err.code(), crate::error::code::TOOL_TIMEOUT);
	}
}
