//! Gateway Server (spec §4.7, §6, component C7): the JSON-RPC endpoint
//! that glues the Registry, Router, Transport Pool, Subscription Manager,
//! Correlator, and Session Store together.
//!
//! One [`GatewayServer`] instance serves every client; per-client state
//! lives in the [`crate::session::SessionStore`], not as fields here —
//! there is deliberately no global singleton (spec §9).

use std::sync::Arc;

use serde_json::Value;
use tracing::{instrument, warn};

use crate::config::{BackendConfig, GatewayPolicy};
use crate::correlator::{CompletionAggregator, Correlator, RequestKind};
use crate::error::{GatewayError, ProtocolError, RegistryError, RouterError};
use crate::metrics::Metrics;
use crate::notify::NotificationRouter;
use crate::pool::TransportPool;
use crate::protocol::{
	method, CapabilityDef, CapabilityKind, ClientCapabilities, JsonRpcMessage, JsonRpcRequest,
	JsonRpcResponse, LogLevel, RequestId,
};
use crate::registry::Registry;
use crate::session::SessionStore;
use crate::subscription::SubscriptionManager;

pub struct GatewayServer {
	pub registry: Arc<Registry>,
	pub pool: Arc<TransportPool>,
	pub router: crate::router::Router,
	pub subscriptions: Arc<SubscriptionManager>,
	pub correlator: Arc<Correlator>,
	pub completion: CompletionAggregator,
	pub sessions: Arc<SessionStore>,
	pub notifications: NotificationRouter,
	policy: GatewayPolicy,
}

impl GatewayServer {
	pub fn new(pool: Arc<TransportPool>, policy: GatewayPolicy, metrics: Metrics) -> Self {
		let registry = Registry::new();
		let router = crate::router::Router::new(registry.clone(), pool.clone(), policy.clone(), metrics.clone());
		let subscriptions = SubscriptionManager::new(policy.max_subscriptions_per_client);
		let correlator = Correlator::new(policy.correlator_timeout);
		let completion = CompletionAggregator::new(policy.completion_timeout);
		let sessions = SessionStore::new();
		let notifications = NotificationRouter::new(registry.clone(), subscriptions.clone());
		Self {
			registry,
			pool,
			router,
			subscriptions,
			correlator,
			completion,
			sessions,
			notifications,
			policy,
		}
	}

	/// Registers a backend's transport with the pool. Capability
	/// indexing happens separately via [`Self::index_backend_capabilities`]
	/// once the backend's `tools/list` etc. have actually been fetched —
	/// the two are decoupled so discovery can be retried without
	/// recreating the pool entry (spec §4.3/§4.4).
	pub async fn add_backend(&self, config: BackendConfig) {
		self.pool.add_backend(config).await;
	}

	#[instrument(skip(self, defs))]
	pub fn index_backend_capabilities(
		&self,
		backend_id: &str,
		kind: CapabilityKind,
		defs: Vec<CapabilityDef>,
	) -> Result<(), RegistryError> {
		self.registry.add_backend(backend_id, kind, defs)
	}

	/// Drains and removes a backend, dropping its registry entries and
	/// notifying any clients subscribed to its resources that they are
	/// now unavailable (spec §4.2, §4.3, §4.5).
	#[instrument(skip(self))]
	pub async fn remove_backend(&self, backend_id: &str) -> Vec<(String, crate::protocol::WireNotification)> {
		self.pool.remove_backend(backend_id).await;
		self.registry.remove_backend(backend_id);
		let affected = self.subscriptions.on_backend_removed(backend_id);
		let mut out = Vec::new();
		for (resource, clients) in affected {
			let notice = self.notifications.resource_unavailable(&resource);
			for client in clients {
				out.push((client, notice.clone()));
			}
		}
		out
	}

	/// Handles one incoming client message, returning a response to send
	/// back (requests only — notifications produce no reply) (spec §6).
	#[instrument(skip(self, message))]
	pub async fn handle_message(
		&self,
		client_id: &str,
		message: JsonRpcMessage,
	) -> Option<JsonRpcResponse> {
		match message {
			JsonRpcMessage::Request(req) => Some(self.handle_request(client_id, req).await),
			JsonRpcMessage::Notification(note) => {
				if note.method == method::NOTIFICATIONS_INITIALIZED {
					if let Err(e) = self.sessions.complete_initialize(client_id) {
						warn!(client_id, error = %e, "initialized notification for unknown/invalid session");
					}
				}
				None
			}
		}
	}

	async fn handle_request(&self, client_id: &str, req: JsonRpcRequest) -> JsonRpcResponse {
		let result = self.dispatch_method(client_id, &req.method, req.params).await;
		match result {
			Ok(value) => JsonRpcResponse::ok(req.id, value),
			Err(e) => JsonRpcResponse::err(req.id, e.into_wire_error()),
		}
	}

	async fn dispatch_method(
		&self,
		client_id: &str,
		method_name: &str,
		params: Option<Value>,
	) -> Result<Value, GatewayError> {
		if method_name == method::INITIALIZE {
			return self.handle_initialize(client_id, params);
		}
		if method_name == method::PING {
			return Ok(serde_json::json!({}));
		}

		self.sessions.require_initialized(client_id)?;

		match method_name {
			method::TOOLS_LIST => Ok(self.list_capabilities(CapabilityKind::Tool)),
			method::PROMPTS_LIST => Ok(self.list_capabilities(CapabilityKind::Prompt)),
			method::RESOURCES_LIST => Ok(self.list_capabilities(CapabilityKind::Resource)),
			method::RESOURCE_TEMPLATES_LIST => Ok(self.list_capabilities(CapabilityKind::ResourceTemplate)),
			method::TOOLS_CALL => self.call_capability(CapabilityKind::Tool, method::TOOLS_CALL, params).await,
			method::PROMPTS_GET => self.call_capability(CapabilityKind::Prompt, method::PROMPTS_GET, params).await,
			method::RESOURCES_READ => self.call_capability(CapabilityKind::Resource, method::RESOURCES_READ, params).await,
			method::RESOURCES_SUBSCRIBE => self.handle_subscribe(client_id, params, true).await,
			method::RESOURCES_UNSUBSCRIBE => self.handle_subscribe(client_id, params, false).await,
			method::COMPLETION_COMPLETE => self.handle_completion(params).await,
			method::LOGGING_SET_LEVEL => self.handle_set_log_level(client_id, params),
			other => Err(ProtocolError::MethodNotFound(other.to_string()).into()),
		}
	}

	fn handle_initialize(&self, client_id: &str, params: Option<Value>) -> Result<Value, GatewayError> {
		let requested_version = params
			.as_ref()
			.and_then(|p| p.get("protocolVersion"))
			.and_then(Value::as_str)
			.unwrap_or("");
		let capabilities = params
			.as_ref()
			.and_then(|p| p.get("capabilities"))
			.and_then(|c| serde_json::from_value::<ClientCapabilities>(c.clone()).ok())
			.unwrap_or_default();
		let negotiated = self
			.sessions
			.begin_initialize(client_id, requested_version, capabilities)?;
		Ok(serde_json::json!({
			"protocolVersion": negotiated,
			"capabilities": {
				"tools": {"listChanged": true},
				"prompts": {"listChanged": true},
				"resources": {"subscribe": true, "listChanged": true},
				"logging": {},
			},
			"serverInfo": {"name": "mcp-gateway", "version": env!("CARGO_PKG_VERSION")},
		}))
	}

	fn list_capabilities(&self, kind: CapabilityKind) -> Value {
		let entries = self.registry.list_all(kind);
		let items: Vec<Value> = entries
			.into_iter()
			.map(|e| {
				let mut v = serde_json::to_value(&e.def).unwrap_or(Value::Null);
				if let Some(obj) = v.as_object_mut() {
					obj.insert("name".into(), Value::String(e.ns_id));
				}
				v
			})
			.collect();
		serde_json::json!({ capability_list_key(kind): items })
	}

	async fn call_capability(
		&self,
		kind: CapabilityKind,
		wire_method: &str,
		params: Option<Value>,
	) -> Result<Value, GatewayError> {
		let ns_id = params
			.as_ref()
			.and_then(|p| p.get("name").or_else(|| p.get("uri")))
			.and_then(Value::as_str)
			.ok_or_else(|| RouterError::RouteNotFound("missing name/uri".to_string()))?
			.to_string();
		let rest = params
			.as_ref()
			.and_then(|p| p.as_object())
			.cloned()
			.unwrap_or_default();

		let value = self
			.router
			.dispatch(
				kind,
				&ns_id,
				wire_method,
				|native_name| Some(build_native_params(kind, native_name, &rest)),
				None,
			)
			.await?;
		Ok(value)
	}

	async fn handle_subscribe(
		&self,
		client_id: &str,
		params: Option<Value>,
		subscribe: bool,
	) -> Result<Value, GatewayError> {
		let ns_uri = params
			.as_ref()
			.and_then(|p| p.get("uri"))
			.and_then(Value::as_str)
			.ok_or_else(|| RouterError::RouteNotFound("missing uri".to_string()))?
			.to_string();

		// Validated before either Subscription Manager index is touched: a
		// bogus uri must leave no partial subscription state behind (spec
		// §4.5, §8 atomicity).
		let (_, native_uri) = self
			.registry
			.resolve(CapabilityKind::Resource, &ns_uri)
			.ok_or_else(|| crate::error::SubscriptionError::UnknownResource(ns_uri.clone()))?;

		let action = if subscribe {
			self.subscriptions.subscribe(client_id, &ns_uri)?
		} else {
			self.subscriptions.unsubscribe(client_id, &ns_uri)?
		};

		if action == crate::subscription::BackendAction::Forward {
			let wire_method = if subscribe {
				method::RESOURCES_SUBSCRIBE
			} else {
				method::RESOURCES_UNSUBSCRIBE
			};
			self.router
				.dispatch(
					CapabilityKind::Resource,
					&ns_uri,
					wire_method,
					|_| Some(serde_json::json!({"uri": native_uri})),
					None,
				)
				.await?;
		}
		Ok(serde_json::json!({}))
	}

	/// Records a client's declared minimum log level for
	/// `notifications/message` delivery (spec §4.7).
	fn handle_set_log_level(&self, client_id: &str, params: Option<Value>) -> Result<Value, GatewayError> {
		let level = params
			.as_ref()
			.and_then(|p| p.get("level"))
			.cloned()
			.and_then(|v| serde_json::from_value::<LogLevel>(v).ok())
			.ok_or_else(|| RouterError::RouteNotFound("missing or invalid level".to_string()))?;
		self.sessions.set_log_level(client_id, level)?;
		Ok(serde_json::json!({}))
	}

	/// Fans `completion/complete` out to every backend currently in the
	/// pool and merges their replies (spec §4.6 "completion aggregation").
	/// There is no per-backend "exposes completion" flag in the Registry,
	/// so every backend is queried; ones that don't implement the method,
	/// time out, or are unreachable simply contribute nothing.
	async fn handle_completion(&self, params: Option<Value>) -> Result<Value, GatewayError> {
		let params = params.unwrap_or(Value::Null);
		let argument_name = params
			.get("argument")
			.and_then(|a| a.get("name"))
			.and_then(Value::as_str)
			.unwrap_or("")
			.to_string();

		let backend_ids = self.pool.backend_ids().await;
		let pool = self.pool.clone();
		let timeout = self.policy.completion_timeout;

		let merged = self
			.completion
			.aggregate(backend_ids, move |backend_id| {
				let pool = pool.clone();
				let params = params.clone();
				let argument_name = argument_name.clone();
				async move {
					let transport = pool.get(&backend_id).await.ok()?;
					let value = transport.call(method::COMPLETION_COMPLETE, Some(params), timeout).await.ok()?;
					let values = value.get("completion")?.get("values")?.as_array()?.clone();
					Some(values.into_iter().map(|v| (argument_name.clone(), v)).collect())
				}
			})
			.await;

		let values: Vec<Value> = merged.into_iter().filter_map(|m| m.get("value").cloned()).collect();
		Ok(serde_json::json!({
			"completion": {
				"values": values,
				"total": values.len(),
				"hasMore": false,
			}
		}))
	}

	/// Drives a server-initiated request (`sampling/createMessage` or
	/// `elicitation/requestInput`) from `backend_id` out to a chosen
	/// client, returning the gateway-facing correlation id the caller
	/// should attach to the outbound `WireNotification`/request (spec
	/// §4.6).
	pub fn begin_server_initiated(
		&self,
		backend_id: &str,
		backend_corr_id: &str,
		kind: RequestKind,
	) -> Result<(String, String), crate::error::CorrelatorError> {
		self.correlator
			.set_sampling_capable_clients(self.sessions.sampling_capable_client_ids());
		self.correlator
			.begin(backend_id, backend_corr_id, kind, Some(self.policy.correlator_timeout))
	}

	/// Cleans up all state tied to a disconnecting client (spec §4.5,
	/// §4.6, §4.7 "client disconnect").
	#[instrument(skip(self))]
	pub async fn disconnect_client(&self, client_id: &str) {
		self.sessions.terminate(client_id);
		self.sessions.remove(client_id);
		let now_empty = self.subscriptions.cleanup_client(client_id);
		for ns_uri in now_empty {
			if let Some((_, native_uri)) = self.registry.resolve(CapabilityKind::Resource, &ns_uri) {
				let _ = self
					.router
					.dispatch(
						CapabilityKind::Resource,
						&ns_uri,
						method::RESOURCES_UNSUBSCRIBE,
						|_| Some(serde_json::json!({"uri": native_uri})),
						None,
					)
					.await;
			}
		}
		self.correlator.cancel_for_client(client_id);
	}
}

fn capability_list_key(kind: CapabilityKind) -> &'static str {
	match kind {
		CapabilityKind::Tool => "tools",
		CapabilityKind::Prompt => "prompts",
		CapabilityKind::Resource => "resources",
		CapabilityKind::ResourceTemplate => "resourceTemplates",
	}
}

fn build_native_params(kind: CapabilityKind, native_name: &str, rest: &serde_json::Map<String, Value>) -> Value {
	match kind {
		CapabilityKind::Tool => serde_json::json!({
			"name": native_name,
			"arguments": rest.get("arguments").cloned().unwrap_or(Value::Null),
		}),
		CapabilityKind::Prompt => {
			let mut v = serde_json::json!({ "name": native_name });
			if let Some(args) = rest.get("arguments") {
				v["arguments"] = args.clone();
			}
			v
		}
		CapabilityKind::Resource | CapabilityKind::ResourceTemplate => serde_json::json!({ "uri": native_name }),
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap as Map;

	use super::*;
	use crate::config::{BackendMode, TransportKind};
	use crate::pool::TransportFactory;
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

	async fn gateway_with_backend(fake: Arc<FakeTransport>) -> GatewayServer {
		let policy = GatewayPolicy::default();
		let factory = Arc::new(FakeFactory { transport: fake });
		let pool = TransportPool::new(factory, policy.clone(), Metrics::default());
		let gw = GatewayServer::new(pool, policy, Metrics::default());
		gw.add_backend(BackendConfig {
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
		gw.index_backend_capabilities(
			"b1",
			CapabilityKind::Tool,
			vec![CapabilityDef {
				native_name: "search".into(),
				description: Some("search things".into()),
				raw: serde_json::json!({}),
			}],
		)
		.unwrap();
		gw
	}

	fn req(id: i64, method: &str, params: Option<Value>) -> JsonRpcRequest {
		JsonRpcRequest {
			id: RequestId::Number(id),
			method: method.to_string(),
			params,
		}
	}

	#[tokio::test]
	async fn rejects_calls_before_initialize() {
		let gw = gateway_with_backend(FakeTransport::new()).await;
		let resp = gw.handle_request("c1", req(1, method::TOOLS_LIST, None)).await;
		match resp.outcome {
			crate::protocol::Outcome::Error(e) => assert_eq!(e.code, crate::error::code::INVALID_REQUEST),
			_ => panic!("expected error"),
		}
	}

	#[tokio::test]
	async fn initialize_then_list_tools() {
		let gw = gateway_with_backend(FakeTransport::new()).await;
		gw.handle_request(
			"c1",
			req(
				1,
				method::INITIALIZE,
				Some(serde_json::json!({"protocolVersion": "2025-11-25", "capabilities": {}})),
			),
		)
		.await;
		gw.sessions.complete_initialize("c1").unwrap();
		let resp = gw.handle_request("c1", req(2, method::TOOLS_LIST, None)).await;
		match resp.outcome {
			crate::protocol::Outcome::Result(v) => {
				assert_eq!(v["tools"][0]["name"], Value::String("b1_search".into()));
			}
			crate::protocol::Outcome::Error(e) => panic!("unexpected error: {e:?}"),
		}
	}

	#[tokio::test]
	async fn tools_call_dispatches_with_namespaced_name() {
		let fake = FakeTransport::new();
		fake.set_response("tools/call", Ok(serde_json::json!({"content": []})));
		let gw = gateway_with_backend(fake).await;
		gw.sessions
			.begin_initialize("c1", "2025-11-25", ClientCapabilities::default())
			.unwrap();
		gw.sessions.complete_initialize("c1").unwrap();
		let resp = gw
			.handle_request(
				"c1",
				req(
					3,
					method::TOOLS_CALL,
					Some(serde_json::json!({"name": "b1_search", "arguments": {"q": "x"}})),
				),
			)
			.await;
		assert_matches::assert_matches!(resp.outcome, crate::protocol::Outcome::Result(_));
	}

	#[tokio::test]
	async fn subscribe_to_unknown_resource_is_rejected_without_mutating_state() {
		let gw = gateway_with_backend(FakeTransport::new()).await;
		gw.sessions
			.begin_initialize("c1", "2025-11-25", ClientCapabilities::default())
			.unwrap();
		gw.sessions.complete_initialize("c1").unwrap();
		let resp = gw
			.handle_request(
				"c1",
				req(
					4,
					method::RESOURCES_SUBSCRIBE,
					Some(serde_json::json!({"uri": "mcp://ghost/nope"})),
				),
			)
			.await;
		match resp.outcome {
			crate::protocol::Outcome::Error(e) => assert_eq!(e.code, crate::error::code::SUBSCRIPTION_NOT_FOUND + 1),
			_ => panic!("expected error"),
		}
		assert!(gw.subscriptions.subscribers_of("mcp://ghost/nope").is_empty());
	}

	#[tokio::test]
	async fn completion_complete_aggregates_backend_values() {
		let fake = FakeTransport::new();
		fake.set_response(
			"completion/complete",
			Ok(serde_json::json!({"completion": {"values": ["a", "b"], "total": 2, "hasMore": false}})),
		);
		let gw = gateway_with_backend(fake).await;
		gw.sessions
			.begin_initialize("c1", "2025-11-25", ClientCapabilities::default())
			.unwrap();
		gw.sessions.complete_initialize("c1").unwrap();
		let resp = gw
			.handle_request(
				"c1",
				req(
					5,
					method::COMPLETION_COMPLETE,
					Some(serde_json::json!({"argument": {"name": "q", "value": "a"}})),
				),
			)
			.await;
		match resp.outcome {
			crate::protocol::Outcome::Result(v) => {
				assert_eq!(v["completion"]["values"].as_array().unwrap().len(), 2);
			}
			crate::protocol::Outcome::Error(e) => panic!("unexpected error: {e:?}"),
		}
	}

	#[tokio::test]
	async fn logging_set_level_is_recorded_and_invalid_level_rejected() {
		let gw = gateway_with_backend(FakeTransport::new()).await;
		gw.sessions
			.begin_initialize("c1", "2025-11-25", ClientCapabilities::default())
			.unwrap();
		gw.sessions.complete_initialize("c1").unwrap();

		let resp = gw
			.handle_request(
				"c1",
				req(6, method::LOGGING_SET_LEVEL, Some(serde_json::json!({"level": "warning"}))),
			)
			.await;
		assert_matches::assert_matches!(resp.outcome, crate::protocol::Outcome::Result(_));
		assert_eq!(
			gw.sessions.clients_for_log_level(crate::protocol::LogLevel::Error),
			vec!["c1".to_string()]
		);

		let bad = gw
			.handle_request(
				"c1",
				req(7, method::LOGGING_SET_LEVEL, Some(serde_json::json!({"level": "not-a-level"}))),
			)
			.await;
		assert_matches::assert_matches!(bad.outcome, crate::protocol::Outcome::Error(_));
	}
}
