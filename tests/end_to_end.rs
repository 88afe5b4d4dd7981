//! End-to-end scenarios exercising the gateway against fake transports
//! (spec §8): initialization gating, namespaced routing across two
//! same-named-tool backends, and resource fan-out to subscribers.

use std::collections::HashMap;
use std::sync::Arc;

use mcp_gateway::config::{BackendConfig, BackendMode, GatewayPolicy, TransportKind};
use mcp_gateway::error::PoolError;
use mcp_gateway::gateway::GatewayServer;
use mcp_gateway::metrics::Metrics;
use mcp_gateway::pool::{TransportFactory, TransportPool};
use mcp_gateway::protocol::{CapabilityDef, CapabilityKind, ClientCapabilities, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, Outcome, RequestId};
use mcp_gateway::transport::test_support::FakeTransport;
use mcp_gateway::transport::DynTransport;

struct MultiFactory {
	by_id: HashMap<String, Arc<FakeTransport>>,
}

impl TransportFactory for MultiFactory {
	fn build(&self, config: &BackendConfig) -> Result<DynTransport, PoolError> {
		self.by_id
			.get(&config.id)
			.cloned()
			.map(|t| -> DynTransport { t })
			.ok_or_else(|| PoolError::UnknownBackend(config.id.clone()))
	}
}

fn stdio_backend(id: &str) -> BackendConfig {
	BackendConfig {
		id: id.to_string(),
		transport: TransportKind::Stdio {
			command: "echo".into(),
			args: vec![],
			env: HashMap::new(),
		},
		enabled: true,
		mode: BackendMode::Smart,
	}
}

fn request(id: i64, method: &str, params: Option<serde_json::Value>) -> JsonRpcMessage {
	JsonRpcMessage::Request(JsonRpcRequest {
		id: RequestId::Number(id),
		method: method.to_string(),
		params,
	})
}

async fn initialize(gw: &GatewayServer, client_id: &str) {
	gw.handle_message(
		client_id,
		request(
			1,
			mcp_gateway::protocol::method::INITIALIZE,
			Some(serde_json::json!({"protocolVersion": "2025-11-25", "capabilities": {}})),
		),
	)
	.await;
	gw.handle_message(
		client_id,
		JsonRpcMessage::Notification(JsonRpcNotification {
			method: mcp_gateway::protocol::method::NOTIFICATIONS_INITIALIZED.to_string(),
			params: None,
		}),
	)
	.await;
}

#[tokio::test]
async fn calls_before_initialize_are_rejected() {
	let fake_a = FakeTransport::new();
	let factory = Arc::new(MultiFactory {
		by_id: HashMap::from([("a".to_string(), fake_a)]),
	});
	let policy = GatewayPolicy::default();
	let pool = TransportPool::new(factory, policy.clone(), Metrics::default());
	let gw = GatewayServer::new(pool, policy, Metrics::default());

	let resp = gw
		.handle_message("c1", request(1, mcp_gateway::protocol::method::TOOLS_LIST, None))
		.await
		.unwrap();
	match resp.outcome {
		Outcome::Error(e) => assert_eq!(e.code, mcp_gateway::error::code::INVALID_REQUEST),
		Outcome::Result(_) => panic!("expected rejection before initialize"),
	}
}

#[tokio::test]
async fn namespaced_routing_across_two_same_named_tool_backends() {
	let fake_a = FakeTransport::new();
	let fake_b = FakeTransport::new();
	fake_a.set_response("tools/call", Ok(serde_json::json!({"from": "a"})));
	fake_b.set_response("tools/call", Ok(serde_json::json!({"from": "b"})));

	let factory = Arc::new(MultiFactory {
		by_id: HashMap::from([
			("a".to_string(), fake_a.clone()),
			("b".to_string(), fake_b.clone()),
		]),
	});
	let policy = GatewayPolicy::default();
	let pool = TransportPool::new(factory, policy.clone(), Metrics::default());
	let gw = GatewayServer::new(pool, policy, Metrics::default());

	gw.add_backend(stdio_backend("a")).await;
	gw.add_backend(stdio_backend("b")).await;
	let search_def = || CapabilityDef {
		native_name: "search".into(),
		description: None,
		raw: serde_json::json!({}),
	};
	gw.index_backend_capabilities("a", CapabilityKind::Tool, vec![search_def()]).unwrap();
	gw.index_backend_capabilities("b", CapabilityKind::Tool, vec![search_def()]).unwrap();

	initialize(&gw, "c1").await;

	let resp_a = gw
		.handle_message(
			"c1",
			request(
				2,
				mcp_gateway::protocol::method::TOOLS_CALL,
				Some(serde_json::json!({"name": "a_search", "arguments": {}})),
			),
		)
		.await
		.unwrap();
	let resp_b = gw
		.handle_message(
			"c1",
			request(
				3,
				mcp_gateway::protocol::method::TOOLS_CALL,
				Some(serde_json::json!({"name": "b_search", "arguments": {}})),
			),
		)
		.await
		.unwrap();

	match (resp_a.outcome, resp_b.outcome) {
		(Outcome::Result(a), Outcome::Result(b)) => {
			assert_eq!(a["from"], "a");
			assert_eq!(b["from"], "b");
		}
		other => panic!("expected both calls to succeed: {other:?}"),
	}
}

#[tokio::test]
async fn resource_update_fans_out_only_to_subscribers() {
	let fake_a = FakeTransport::new();
	let factory = Arc::new(MultiFactory {
		by_id: HashMap::from([("a".to_string(), fake_a.clone())]),
	});
	let policy = GatewayPolicy::default();
	let pool = TransportPool::new(factory, policy.clone(), Metrics::default());
	let gw = GatewayServer::new(pool, policy, Metrics::default());

	gw.add_backend(stdio_backend("a")).await;
	gw.index_backend_capabilities(
		"a",
		CapabilityKind::Resource,
		vec![CapabilityDef {
			native_name: "file:///doc".into(),
			description: None,
			raw: serde_json::json!({}),
		}],
	)
	.unwrap();

	initialize(&gw, "subscriber").await;
	initialize(&gw, "bystander").await;

	let ns_uri = gw
		.registry
		.list_all(CapabilityKind::Resource)
		.into_iter()
		.next()
		.unwrap()
		.ns_id;

	gw.handle_message(
		"subscriber",
		request(
			2,
			mcp_gateway::protocol::method::RESOURCES_SUBSCRIBE,
			Some(serde_json::json!({"uri": ns_uri})),
		),
	)
	.await;

	let fan = gw.notifications.route(
		"a",
		mcp_gateway::protocol::method::NOTIFICATIONS_RESOURCES_UPDATED,
		Some(serde_json::json!({"uri": "file:///doc"})),
		&gw.sessions.connected_client_ids(),
	);
	let fan = fan.expect("subscriber should receive the update");
	assert_eq!(fan.targets, vec!["subscriber".to_string()]);
}

#[tokio::test]
async fn graceful_drain_waits_for_in_flight_call() {
	let fake_a = FakeTransport::new();
	fake_a.set_response("tools/call", Ok(serde_json::json!({"ok": true})));
	let factory = Arc::new(MultiFactory {
		by_id: HashMap::from([("a".to_string(), fake_a.clone())]),
	});
	let mut policy = GatewayPolicy::default();
	policy.drain_deadline = std::time::Duration::from_millis(200);
	let pool = TransportPool::new(factory, policy.clone(), Metrics::default());
	let gw = GatewayServer::new(pool, policy, Metrics::default());
	gw.add_backend(stdio_backend("a")).await;
	gw.index_backend_capabilities(
		"a",
		CapabilityKind::Tool,
		vec![CapabilityDef {
			native_name: "search".into(),
			description: None,
			raw: serde_json::json!({}),
		}],
	)
	.unwrap();

	gw.pool.get("a").await.unwrap();
	gw.pool.increment_active("a").await;
	let notices = gw.remove_backend("a").await;
	assert!(notices.is_empty());
	assert!(gw.registry.list_all(CapabilityKind::Tool).is_empty());
}
