//! Example front transport (spec §6): a bare-bones HTTP collaborator
//! that POSTs JSON-RPC bodies into a [`mcp_gateway::GatewayServer`] and
//! exposes Prometheus text on `/metrics`. Real deployments are expected
//! to bring their own front transport; this binary exists to prove the
//! core wires up end to end, the way the teacher repo ships a thin
//! `axum` listener alongside its proxy core.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router as AxumRouter};
use clap::Parser;
use mcp_gateway::config::{BackendConfig, BackendMode, GatewayPolicy, TransportKind};
use mcp_gateway::gateway::GatewayServer;
use mcp_gateway::metrics::Metrics;
use mcp_gateway::pool::{DefaultTransportFactory, TransportPool};
use mcp_gateway::protocol::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, RequestId, WireResponse};
use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry as MetricsRegistry;
use serde_json::Value;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "mcp-gatewayd", about = "Aggregates MCP backends behind one endpoint")]
struct Args {
	#[arg(long, default_value = "127.0.0.1:8787")]
	listen: String,
	/// `command:arg1,arg2` stdio backends to spawn lazily, repeatable.
	#[arg(long = "stdio-backend", value_name = "id=command")]
	stdio_backends: Vec<String>,
}

struct AppState {
	gateway: GatewayServer,
	metrics_registry: std::sync::Mutex<MetricsRegistry>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.json()
		.init();

	let args = Args::parse();
	let mut metrics_registry = MetricsRegistry::default();
	let metrics = Metrics::new(&mut metrics_registry);

	let http_client: Arc<dyn mcp_gateway::transport::streaming::HttpClient> = Arc::new(UnimplementedHttpClient);
	let factory = Arc::new(DefaultTransportFactory { http_client });
	let policy = GatewayPolicy::default();
	let pool = TransportPool::new(factory, policy.clone(), metrics.clone());
	pool.spawn_idle_eviction();
	let gateway = GatewayServer::new(pool, policy, metrics);

	for spec in &args.stdio_backends {
		let Some((id, command)) = spec.split_once('=') else {
			anyhow::bail!("--stdio-backend expects id=command, got {spec}");
		};
		gateway
			.add_backend(BackendConfig {
				id: id.to_string(),
				transport: TransportKind::Stdio {
					command: command.to_string(),
					args: vec![],
					env: HashMap::new(),
				},
				enabled: true,
				mode: BackendMode::Smart,
			})
			.await;
		info!(backend = id, "registered stdio backend");
	}

	let state = Arc::new(AppState {
		gateway,
		metrics_registry: std::sync::Mutex::new(metrics_registry),
	});

	let app = AxumRouter::new()
		.route("/mcp", post(handle_rpc))
		.route("/metrics", get(handle_metrics))
		.with_state(state);

	let listener = tokio::net::TcpListener::bind(&args.listen).await?;
	info!(addr = %args.listen, "mcp-gatewayd listening");
	axum::serve(listener, app).await?;
	Ok(())
}

async fn handle_rpc(
	State(state): State<Arc<AppState>>,
	headers: HeaderMap,
	Json(body): Json<Value>,
) -> impl IntoResponse {
	let client_id = headers
		.get("x-client-id")
		.and_then(|v| v.to_str().ok())
		.unwrap_or("anonymous")
		.to_string();

	let message = match parse_message(body) {
		Ok(m) => m,
		Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
	};

	match state.gateway.handle_message(&client_id, message).await {
		Some(response) => {
			let wire = WireResponse::from(&response);
			Json(serde_json::to_value(&wire).unwrap_or(Value::Null)).into_response()
		}
		None => StatusCode::NO_CONTENT.into_response(),
	}
}

fn parse_message(body: Value) -> Result<JsonRpcMessage, String> {
	let obj = body.as_object().ok_or("expected a JSON object")?;
	let method = obj
		.get("method")
		.and_then(Value::as_str)
		.ok_or("missing method")?
		.to_string();
	let params = obj.get("params").cloned();
	match obj.get("id") {
		Some(Value::Number(n)) => Ok(JsonRpcMessage::Request(JsonRpcRequest {
			id: RequestId::Number(n.as_i64().unwrap_or_default()),
			method,
			params,
		})),
		Some(Value::String(s)) => Ok(JsonRpcMessage::Request(JsonRpcRequest {
			id: RequestId::String(s.clone()),
			method,
			params,
		})),
		_ => Ok(JsonRpcMessage::Notification(JsonRpcNotification { method, params })),
	}
}

async fn handle_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
	let mut buffer = String::new();
	let registry = state.metrics_registry.lock().unwrap();
	match encode(&mut buffer, &registry) {
		Ok(()) => (StatusCode::OK, buffer).into_response(),
		Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
	}
}

/// Streamable/SSE backends need a real HTTP client wired in by the
/// embedding deployment; this binary only demonstrates stdio backends.
#[derive(Debug)]
struct UnimplementedHttpClient;

#[async_trait::async_trait]
impl mcp_gateway::transport::streaming::HttpClient for UnimplementedHttpClient {
	async fn post_json(
		&self,
		_endpoint: &str,
		_session_id: Option<&str>,
		_body: Value,
	) -> Result<mcp_gateway::transport::streaming::HttpRpcResponse, mcp_gateway::error::TransportError> {
		Err(mcp_gateway::error::TransportError::ConnectFailed(
			"HTTP/SSE backends require a configured HTTP client; this demo binary only wires stdio".into(),
		))
	}
}
