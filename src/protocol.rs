//! JSON-RPC 2.0 wire shapes and MCP capability types, internalized rather
//! than consumed from a foreign protocol crate (spec §6, §9).
//!
//! Messages are modeled as a tagged variant ([`JsonRpcMessage`]) rather
//! than dispatched by string everywhere; a method-name table
//! ([`Method`]) is kept only for the wire-level `method` field, per
//! spec §9's redesign note.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON-RPC request id: either a number or a string, never null on the wire
/// for a request (notifications simply omit `id`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
	Number(i64),
	String(String),
}

impl fmt::Display for RequestId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RequestId::Number(n) => write!(f, "{n}"),
			RequestId::String(s) => write!(f, "{s}"),
		}
	}
}

/// Method names the gateway recognizes on the wire (spec §6). Kept as a
/// string table for dispatch; the `ClientRequest`/`ClientNotification`
/// enums below are what code actually matches on.
pub mod method {
	pub const INITIALIZE: &str = "initialize";
	pub const PING: &str = "ping";
	pub const TOOLS_LIST: &str = "tools/list";
	pub const TOOLS_CALL: &str = "tools/call";
	pub const PROMPTS_LIST: &str = "prompts/list";
	pub const PROMPTS_GET: &str = "prompts/get";
	pub const RESOURCES_LIST: &str = "resources/list";
	pub const RESOURCES_READ: &str = "resources/read";
	pub const RESOURCES_SUBSCRIBE: &str = "resources/subscribe";
	pub const RESOURCES_UNSUBSCRIBE: &str = "resources/unsubscribe";
	pub const RESOURCE_TEMPLATES_LIST: &str = "resources/templates/list";
	pub const COMPLETION_COMPLETE: &str = "completion/complete";
	pub const ROOTS_LIST: &str = "roots/list";

	pub const NOTIFICATIONS_INITIALIZED: &str = "notifications/initialized";
	pub const NOTIFICATIONS_TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
	pub const NOTIFICATIONS_PROMPTS_LIST_CHANGED: &str = "notifications/prompts/list_changed";
	pub const NOTIFICATIONS_RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";
	pub const NOTIFICATIONS_RESOURCES_UPDATED: &str = "notifications/resources/updated";
	pub const NOTIFICATIONS_MESSAGE: &str = "notifications/message";
	pub const LOGGING_SET_LEVEL: &str = "logging/setLevel";

	// Server-initiated (backend -> gateway -> client)
	pub const SAMPLING_CREATE_MESSAGE: &str = "sampling/createMessage";
	pub const ELICITATION_REQUEST_INPUT: &str = "elicitation/requestInput";
}

/// Protocol version allow-list (spec §6), newest-first so negotiation can
/// pick the first mutually supported entry.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-11-25", "2025-11-05"];

/// Picks the highest mutually supported version, per spec §4.7/§6.
pub fn negotiate_version(requested: &str) -> Option<&'static str> {
	SUPPORTED_PROTOCOL_VERSIONS
		.iter()
		.find(|&&v| v == requested)
		.copied()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
	pub code: i64,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
}

impl JsonRpcError {
	pub fn new(code: i64, message: impl Into<String>) -> Self {
		Self {
			code,
			message: message.into(),
			data: None,
		}
	}

	pub fn with_data(mut self, data: Value) -> Self {
		self.data = Some(data);
		self
	}
}

impl fmt::Display for JsonRpcError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {}", self.code, self.message)
	}
}

/// A parsed incoming request: not yet known to be a handshake call or not.
#[derive(Debug, Clone)]
pub struct JsonRpcRequest {
	pub id: RequestId,
	pub method: String,
	pub params: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct JsonRpcNotification {
	pub method: String,
	pub params: Option<Value>,
}

/// A message arriving from a client (request or notification).
#[derive(Debug, Clone)]
pub enum JsonRpcMessage {
	Request(JsonRpcRequest),
	Notification(JsonRpcNotification),
}

/// A response the gateway sends back for a request (never for a notification).
#[derive(Debug, Clone)]
pub struct JsonRpcResponse {
	pub id: RequestId,
	pub outcome: Outcome,
}

#[derive(Debug, Clone)]
pub enum Outcome {
	Result(Value),
	Error(JsonRpcError),
}

impl JsonRpcResponse {
	pub fn ok(id: RequestId, result: Value) -> Self {
		Self {
			id,
			outcome: Outcome::Result(result),
		}
	}

	pub fn err(id: RequestId, error: JsonRpcError) -> Self {
		Self {
			id,
			outcome: Outcome::Error(error),
		}
	}
}

/// Wire-serializable form of a response, matching spec §6's message shape.
#[derive(Debug, Clone, Serialize)]
pub struct WireResponse<'a> {
	pub jsonrpc: &'static str,
	pub id: &'a RequestId,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub result: Option<&'a Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<&'a JsonRpcError>,
}

impl<'a> From<&'a JsonRpcResponse> for WireResponse<'a> {
	fn from(r: &'a JsonRpcResponse) -> Self {
		match &r.outcome {
			Outcome::Result(v) => WireResponse {
				jsonrpc: "2.0",
				id: &r.id,
				result: Some(v),
				error: None,
			},
			Outcome::Error(e) => WireResponse {
				jsonrpc: "2.0",
				id: &r.id,
				result: None,
				error: Some(e),
			},
		}
	}
}

/// Wire-serializable notification, sent from gateway to client.
#[derive(Debug, Clone, Serialize)]
pub struct WireNotification {
	pub jsonrpc: &'static str,
	pub method: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub params: Option<Value>,
}

impl WireNotification {
	pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
		Self {
			jsonrpc: "2.0",
			method: method.into(),
			params,
		}
	}
}

/// One of the four capability kinds the Registry indexes (spec §3/§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CapabilityKind {
	Tool,
	Prompt,
	Resource,
	ResourceTemplate,
}

impl fmt::Display for CapabilityKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			CapabilityKind::Tool => "tool",
			CapabilityKind::Prompt => "prompt",
			CapabilityKind::Resource => "resource",
			CapabilityKind::ResourceTemplate => "resourceTemplate",
		};
		write!(f, "{s}")
	}
}

/// A capability definition as reported by a backend, kept mostly opaque
/// (schema/argument shapes vary per kind and are not the gateway's concern
/// beyond routing).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDef {
	/// Native name or URI, as the backend calls it.
	pub native_name: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	/// Everything else the backend sent for this entry (input schema,
	/// arguments, mime type, etc), forwarded verbatim to clients.
	#[serde(flatten)]
	pub raw: Value,
}

/// RFC 5424 syslog severities, as used by `logging/setLevel` and
/// `notifications/message` (spec §4.7). Declaration order is severity
/// order, least to most severe, so derived `Ord` gives the comparison
/// the filtering needs directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
	Debug,
	Info,
	Notice,
	Warning,
	Error,
	Critical,
	Alert,
	Emergency,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientCapabilities {
	#[serde(default)]
	pub sampling: bool,
	#[serde(default)]
	pub elicitation: bool,
	#[serde(default)]
	pub roots: bool,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn negotiates_highest_supported() {
		assert_eq!(negotiate_version("2025-11-25"), Some("2025-11-25"));
		assert_eq!(negotiate_version("2025-11-05"), Some("2025-11-05"));
		assert_eq!(negotiate_version("2023-01-01"), None);
	}

	#[test]
	fn request_id_displays_without_quotes() {
		assert_eq!(RequestId::Number(7).to_string(), "7");
		assert_eq!(RequestId::String("abc".into()).to_string(), "abc");
	}
}
