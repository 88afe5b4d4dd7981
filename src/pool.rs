//! Transport Pool (spec §4.2, component C2): owns transport lifecycle
//! per backend — lazy connect, idle eviction for `smart`-mode backends,
//! and graceful drain on removal.
//!
//! Each backend's state lives behind its own `tokio::sync::Mutex`, which
//! doubles as the single-flight guard: concurrent callers asking for the
//! same not-yet-connected backend simply queue on that lock instead of
//! racing to dial twice.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::config::{BackendConfig, BackendMode, GatewayPolicy, TransportKind};
use crate::error::PoolError;
use crate::metrics::{BackendLabel, Metrics};
use crate::transport::streaming::{HttpClient, StreamingKind, StreamingTransport};
use crate::transport::stdio::StdioTransport;
use crate::transport::{DynTransport, Transport};

/// Builds a [`DynTransport`] for a backend's configured [`TransportKind`].
/// A trait rather than a bare closure so it can hold the HTTP client
/// handle streaming backends need.
pub trait TransportFactory: Send + Sync {
	fn build(&self, config: &BackendConfig) -> Result<DynTransport, PoolError>;
}

/// Default factory wiring stdio/HTTP transports the way `config.rs`
/// describes them.
pub struct DefaultTransportFactory {
	pub http_client: Arc<dyn HttpClient>,
}

impl TransportFactory for DefaultTransportFactory {
	fn build(&self, config: &BackendConfig) -> Result<DynTransport, PoolError> {
		let transport: DynTransport = match &config.transport {
			TransportKind::Stdio { command, args, env } => {
				StdioTransport::new(command.clone(), args.clone(), env.clone())
			}
			TransportKind::HttpSse { endpoint } => StreamingTransport::new(
				endpoint.clone(),
				StreamingKind::HttpSse,
				self.http_client.clone(),
			),
			TransportKind::StreamableHttp { endpoint } => StreamingTransport::new(
				endpoint.clone(),
				StreamingKind::StreamableHttp,
				self.http_client.clone(),
			),
		};
		Ok(transport)
	}
}

struct BackendEntry {
	config: BackendConfig,
	transport: Option<DynTransport>,
	last_active: Instant,
	active_requests: u32,
	draining: bool,
}

impl BackendEntry {
	fn new(config: BackendConfig) -> Self {
		Self {
			config,
			transport: None,
			last_active: Instant::now(),
			active_requests: 0,
			draining: false,
		}
	}
}

pub struct TransportPool {
	backends: RwLock<HashMap<String, Arc<AsyncMutex<BackendEntry>>>>,
	factory: Arc<dyn TransportFactory>,
	policy: GatewayPolicy,
	metrics: Metrics,
}

impl TransportPool {
	pub fn new(factory: Arc<dyn TransportFactory>, policy: GatewayPolicy, metrics: Metrics) -> Arc<Self> {
		Arc::new(Self {
			backends: RwLock::new(HashMap::new()),
			factory,
			policy,
			metrics,
		})
	}

	#[instrument(skip(self), fields(backend = %config.id))]
	pub async fn add_backend(&self, config: BackendConfig) {
		let id = config.id.clone();
		let entry = Arc::new(AsyncMutex::new(BackendEntry::new(config)));
		self.backends.write().await.insert(id.clone(), entry);
		info!("backend registered with pool");
	}

	/// Returns a connected transport for `backend_id`, dialing lazily if
	/// necessary (spec §4.2: "connections are established lazily on
	/// first use").
	#[instrument(skip(self))]
	pub async fn get(&self, backend_id: &str) -> Result<DynTransport, PoolError> {
		let entry = self
			.backends
			.read()
			.await
			.get(backend_id)
			.cloned()
			.ok_or_else(|| PoolError::UnknownBackend(backend_id.to_string()))?;

		let mut guard = entry.lock().await;
		if guard.draining {
			return Err(PoolError::Draining(backend_id.to_string()));
		}
		if let Some(t) = &guard.transport {
			if t.is_connected() {
				guard.last_active = Instant::now();
				return Ok(t.clone());
			}
		}
		let transport = self.factory.build(&guard.config)?;
		transport.connect().await?;
		guard.transport = Some(transport.clone());
		guard.last_active = Instant::now();
		self.metrics
			.active_connections
			.get_or_create(&BackendLabel {
				backend: backend_id.to_string(),
			})
			.set(1);
		debug!(backend = backend_id, "transport connected");
		Ok(transport)
	}

	pub async fn increment_active(&self, backend_id: &str) {
		if let Some(entry) = self.backends.read().await.get(backend_id).cloned() {
			let mut guard = entry.lock().await;
			guard.active_requests += 1;
			guard.last_active = Instant::now();
			self.metrics
				.active_requests
				.get_or_create(&BackendLabel {
					backend: backend_id.to_string(),
				})
				.set(guard.active_requests as i64);
		}
	}

	pub async fn decrement_active(&self, backend_id: &str) {
		if let Some(entry) = self.backends.read().await.get(backend_id).cloned() {
			let mut guard = entry.lock().await;
			guard.active_requests = guard.active_requests.saturating_sub(1);
			self.metrics
				.active_requests
				.get_or_create(&BackendLabel {
					backend: backend_id.to_string(),
				})
				.set(guard.active_requests as i64);
		}
	}

	pub async fn is_draining(&self, backend_id: &str) -> bool {
		match self.backends.read().await.get(backend_id).cloned() {
			Some(entry) => entry.lock().await.draining,
			None => false,
		}
	}

	/// Removes a backend, waiting for in-flight requests to finish up to
	/// `drain_deadline` before force-releasing its transport (spec §4.2
	/// "graceful drain").
	#[instrument(skip(self))]
	pub async fn remove_backend(&self, backend_id: &str) {
		let Some(entry) = self.backends.read().await.get(backend_id).cloned() else {
			return;
		};
		{
			let mut guard = entry.lock().await;
			guard.draining = true;
		}

		let deadline = Instant::now() + self.policy.drain_deadline;
		loop {
			let active = entry.lock().await.active_requests;
			if active == 0 || Instant::now() >= deadline {
				break;
			}
			tokio::time::sleep(Duration::from_millis(100)).await;
		}

		let mut guard = entry.lock().await;
		if guard.active_requests > 0 {
			warn!(
				backend = backend_id,
				active = guard.active_requests,
				"drain deadline reached with requests still in flight; force-releasing"
			);
		}
		if let Some(t) = guard.transport.take() {
			t.disconnect().await;
		}
		self.metrics
			.active_connections
			.get_or_create(&BackendLabel {
				backend: backend_id.to_string(),
			})
			.set(0);
		drop(guard);
		self.backends.write().await.remove(backend_id);
		info!("backend removed from pool");
	}

	/// Ids of every backend currently registered with the pool, connected
	/// or not — used by completion fan-out, which queries every backend
	/// rather than one resolved via the Registry.
	pub async fn backend_ids(&self) -> Vec<String> {
		self.backends.read().await.keys().cloned().collect()
	}

	pub async fn close_all(&self) {
		let ids: Vec<String> = self.backends.read().await.keys().cloned().collect();
		for id in ids {
			self.remove_backend(&id).await;
		}
	}

	/// Background ticker evicting idle `smart`-mode transports (spec §3,
	/// §4.2). Runs until the returned handle is dropped or aborted.
	pub fn spawn_idle_eviction(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
		let pool = self.clone();
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(pool.policy.eviction_interval);
			loop {
				ticker.tick().await;
				pool.evict_idle_once().await;
			}
		})
	}

	async fn evict_idle_once(&self) {
		let entries: Vec<Arc<AsyncMutex<BackendEntry>>> =
			self.backends.read().await.values().cloned().collect();
		for entry in entries {
			let mut guard = entry.lock().await;
			if guard.draining || guard.config.mode != BackendMode::Smart {
				continue;
			}
			if guard.active_requests > 0 {
				continue;
			}
			if guard.last_active.elapsed() < self.policy.idle_timeout {
				continue;
			}
			if let Some(t) = guard.transport.take() {
				let id = guard.config.id.clone();
				drop(guard);
				t.disconnect().await;
				self.metrics
					.active_connections
					.get_or_create(&BackendLabel { backend: id.clone() })
					.set(0);
				debug!(backend = id, "idle transport evicted");
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap as Map;

	use super::*;
	use crate::transport::test_support::FakeTransport;

	struct FakeFactory {
		transport: Arc<FakeTransport>,
	}

	impl TransportFactory for FakeFactory {
		fn build(&self, _config: &BackendConfig) -> Result<DynTransport, PoolError> {
			Ok(self.transport.clone())
		}
	}

	fn backend(id: &str, mode: BackendMode) -> BackendConfig {
		BackendConfig {
			id: id.to_string(),
			transport: TransportKind::Stdio {
				command: "echo".into(),
				args: vec![],
				env: Map::new(),
			},
			enabled: true,
			mode,
		}
	}

	#[tokio::test]
	async fn lazily_connects_on_first_get() {
		let fake = FakeTransport::new();
		let factory = Arc::new(FakeFactory { transport: fake.clone() });
		let pool = TransportPool::new(factory, GatewayPolicy::default(), Metrics::default());
		pool.add_backend(backend("b1", BackendMode::Smart)).await;
		assert!(!fake.is_connected());
		let t = pool.get("b1").await.unwrap();
		assert!(t.is_connected());
	}

	#[tokio::test]
	async fn unknown_backend_errors() {
		let fake = FakeTransport::new();
		let factory = Arc::new(FakeFactory { transport: fake });
		let pool = TransportPool::new(factory, GatewayPolicy::default(), Metrics::default());
		let err = pool.get("nope").await.unwrap_err();
		assert_matches::assert_matches!(err, PoolError::UnknownBackend(_));
	}

	#[tokio::test]
	async fn drain_waits_then_disconnects() {
		let fake = FakeTransport::new();
		let factory = Arc::new(FakeFactory { transport: fake.clone() });
		let mut policy = GatewayPolicy::default();
		policy.drain_deadline = Duration::from_millis(200);
		let pool = TransportPool::new(factory, policy, Metrics::default());
		pool.add_backend(backend("b1", BackendMode::Stateful)).await;
		let _t = pool.get("b1").await.unwrap();
		pool.increment_active("b1").await;
		pool.remove_backend("b1").await;
		assert_eq!(fake.state(), crate::transport::TransportState::Disconnected);
	}
}
