//! Error taxonomy for the gateway core (spec §7).
//!
//! Every error enum here carries a `code()` that maps onto either a
//! standard JSON-RPC error code or one of the reserved ranges in spec §6.
//! Backend-reported errors are never reinterpreted: they flow through
//! [`crate::protocol::JsonRpcError`] untouched.

use thiserror::Error;

use crate::protocol::JsonRpcError;

/// Standard JSON-RPC 2.0 codes plus the ranges this gateway reserves.
pub mod code {
	pub const PARSE_ERROR: i64 = -32700;
	pub const INVALID_REQUEST: i64 = -32600;
	pub const METHOD_NOT_FOUND: i64 = -32601;
	pub const INVALID_PARAMS: i64 = -32602;
	pub const INTERNAL_ERROR: i64 = -32603;

	pub const TOOL_TIMEOUT: i64 = -32001;

	pub const SUBSCRIPTION_NOT_FOUND: i64 = -32010;
	pub const SUBSCRIPTION_LIMIT_EXCEEDED: i64 = -32011;

	pub const SAMPLING_TIMEOUT: i64 = -32020;
	pub const SAMPLING_CANCELLED: i64 = -32021;
	pub const ELICITATION_TIMEOUT: i64 = -32022;
	pub const ELICITATION_CANCELLED: i64 = -32023;

	pub const COMPLETION_FAILED: i64 = -32030;
}

/// Transport-layer errors (spec §7.1).
#[derive(Error, Debug, Clone)]
pub enum TransportError {
	#[error("CONN-001: failed to connect: {0}")]
	ConnectFailed(String),
	#[error("CONN-002: failed to send: {0}")]
	SendFailed(String),
	#[error("CONN-003: failed to receive: {0}")]
	ReceiveFailed(String),
	#[error("CONN-004: connection lost")]
	ConnectionLost,
}

/// Errors surfaced by the [`crate::pool::TransportPool`] (spec §4.2).
#[derive(Error, Debug, Clone)]
pub enum PoolError {
	#[error(transparent)]
	Transport(#[from] TransportError),
	#[error("backend {0} is draining")]
	Draining(String),
	#[error("backend {0} is unknown")]
	UnknownBackend(String),
}

/// Routing errors (spec §4.4, §7.2-§7.3).
#[derive(Error, Debug, Clone)]
pub enum RouterError {
	#[error("ROUTER-001: route-not-found: {0}")]
	RouteNotFound(String),
	#[error("ROUTER-002: route-unavailable: backend {0} is draining")]
	RouteUnavailable(String),
	#[error("ROUTER-003: route-conflict: {0}")]
	RouteConflict(String),
	#[error("TOOL-001: tool-timeout after {0:?}")]
	ToolTimeout(std::time::Duration),
	/// A backend-reported failure, carried verbatim (spec §4.4 outcome 2,
	/// §7 "errors from backends pass through unchanged").
	#[error("backend error {0}")]
	Backend(JsonRpcError),
	#[error(transparent)]
	Pool(#[from] PoolError),
}

impl RouterError {
	pub fn code(&self) -> i64 {
		match self {
			RouterError::RouteNotFound(_) => code::METHOD_NOT_FOUND,
			RouterError::RouteUnavailable(_) => code::INTERNAL_ERROR,
			RouterError::RouteConflict(_) => code::INVALID_REQUEST,
			RouterError::ToolTimeout(_) => code::TOOL_TIMEOUT,
			RouterError::Backend(e) => e.code,
			RouterError::Pool(_) => code::INTERNAL_ERROR,
		}
	}

	/// The exact wire error to hand back to the client: a backend's own
	/// `JsonRpcError` passes through untouched, everything else is
	/// synthesized from this gateway's own code/message.
	pub fn into_wire_error(self) -> JsonRpcError {
		match self {
			RouterError::Backend(e) => e,
			other => {
				let code = other.code();
				JsonRpcError::new(code, other.to_string())
			}
		}
	}
}

/// Registry errors (schema validation, duplicate names — spec §4.3, §3 invariant 2).
#[derive(Error, Debug, Clone)]
pub enum RegistryError {
	#[error("SCHEMA-001: duplicate native name {native} on backend {backend}")]
	DuplicateNativeName { backend: String, native: String },
	#[error("SCHEMA-002: invalid capability entry: {0}")]
	InvalidEntry(String),
	#[error("backend {0} not found")]
	UnknownBackend(String),
}

/// Subscription errors (spec §4.5, §7.5).
#[derive(Error, Debug, Clone)]
pub enum SubscriptionError {
	#[error("SUBSCRIPTION-001: subscription-not-found for {0}")]
	NotFound(String),
	#[error("SUBSCRIPTION-002: subscription-limit-exceeded ({current}/{max})")]
	LimitExceeded { current: usize, max: usize },
	#[error("SUBSCRIPTION-003: unknown resource {0}")]
	UnknownResource(String),
}

impl SubscriptionError {
	pub fn code(&self) -> i64 {
		match self {
			SubscriptionError::NotFound(_) => code::SUBSCRIPTION_NOT_FOUND,
			SubscriptionError::LimitExceeded { .. } => code::SUBSCRIPTION_LIMIT_EXCEEDED,
			SubscriptionError::UnknownResource(_) => code::SUBSCRIPTION_NOT_FOUND + 1,
		}
	}
}

/// Correlation errors (spec §4.6, §7.4).
#[derive(Error, Debug, Clone)]
pub enum CorrelatorError {
	#[error("sampling-timeout")]
	SamplingTimeout,
	#[error("elicitation-timeout")]
	ElicitationTimeout,
	#[error("sampling-cancelled")]
	SamplingCancelled,
	#[error("elicitation-cancelled")]
	ElicitationCancelled,
	#[error("completion-failed: {0}")]
	CompletionFailed(String),
	#[error("no client available to service this request")]
	NoClientAvailable,
	#[error("unknown correlation id {0}")]
	UnknownCorrelation(String),
}

impl CorrelatorError {
	pub fn code(&self) -> i64 {
		match self {
			CorrelatorError::SamplingTimeout => code::SAMPLING_TIMEOUT,
			CorrelatorError::SamplingCancelled => code::SAMPLING_CANCELLED,
			CorrelatorError::ElicitationTimeout => code::ELICITATION_TIMEOUT,
			CorrelatorError::ElicitationCancelled => code::ELICITATION_CANCELLED,
			CorrelatorError::CompletionFailed(_) => code::COMPLETION_FAILED,
			CorrelatorError::NoClientAvailable => code::COMPLETION_FAILED + 1,
			CorrelatorError::UnknownCorrelation(_) => code::INVALID_PARAMS,
		}
	}
}

/// Protocol / session-gating errors (spec §4.7, §7.6).
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
	#[error("version-mismatch: unsupported protocol version {requested}")]
	VersionMismatch {
		requested: String,
		supported: Vec<String>,
	},
	#[error("invalid-request: not initialized")]
	NotInitialized,
	#[error("method-not-found: {0}")]
	MethodNotFound(String),
}

impl ProtocolError {
	pub fn code(&self) -> i64 {
		match self {
			ProtocolError::VersionMismatch { .. } => code::INVALID_PARAMS,
			ProtocolError::NotInitialized => code::INVALID_REQUEST,
			ProtocolError::MethodNotFound(_) => code::METHOD_NOT_FOUND,
		}
	}
}

/// Top-level error returned by the [`crate::gateway::GatewayServer`].
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
	#[error(transparent)]
	Router(#[from] RouterError),
	#[error(transparent)]
	Registry(#[from] RegistryError),
	#[error(transparent)]
	Subscription(#[from] SubscriptionError),
	#[error(transparent)]
	Correlator(#[from] CorrelatorError),
	#[error(transparent)]
	Protocol(#[from] ProtocolError),
	#[error("assertion-failed: {0}")]
	AssertionFailed(String),
	#[error("unexpected-error: {0}")]
	Unexpected(String),
}

impl GatewayError {
	pub fn code(&self) -> i64 {
		match self {
			GatewayError::Router(e) => e.code(),
			GatewayError::Registry(_) => code::INVALID_REQUEST,
			GatewayError::Subscription(e) => e.code(),
			GatewayError::Correlator(e) => e.code(),
			GatewayError::Protocol(e) => e.code(),
			GatewayError::AssertionFailed(_) => code::INTERNAL_ERROR,
			GatewayError::Unexpected(_) => code::INTERNAL_ERROR,
		}
	}

	/// The exact wire error to hand back to the client, preserving a
	/// backend-reported error's original code/message/data verbatim.
	pub fn into_wire_error(self) -> JsonRpcError {
		match self {
			GatewayError::Router(e) => e.into_wire_error(),
			other => {
				let code = other.code();
				JsonRpcError::new(code, other.to_string())
			}
		}
	}
}
