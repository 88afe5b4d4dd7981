//! Per-backend framed JSON-RPC client (spec §4.1, component C1).
//!
//! A [`Transport`] owns exactly one backend connection and moves through
//! `{Disconnected, Connecting, Connected, Error}`. Reconnection is the
//! [`crate::pool::TransportPool`]'s concern, not the transport's — a
//! transport that errors simply settles into `Disconnected` and stays
//! there until the pool asks it to connect again.

pub mod stdio;
pub mod streaming;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::error::TransportError;
use crate::protocol::JsonRpcError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportState {
	Disconnected,
	Connecting,
	Connected,
	Error(String),
}

impl TransportState {
	pub fn is_connected(&self) -> bool {
		matches!(self, TransportState::Connected)
	}
}

/// A notification pushed by the backend outside of any request/response
/// pairing (spec §4.7/§4.8: `listChanged`, `resources/updated`, `message`).
#[derive(Debug, Clone)]
pub struct BackendNotification {
	pub method: String,
	pub params: Option<Value>,
}

/// The three outcomes a call can settle into (spec §4.4 step 4). A
/// `Backend` outcome carries the backend's own error verbatim — the
/// gateway never reinterprets it (spec §7 "Propagation").
#[derive(Debug, Clone)]
pub enum CallError {
	Transport(TransportError),
	Backend(JsonRpcError),
	Timeout,
}

impl From<TransportError> for CallError {
	fn from(e: TransportError) -> Self {
		CallError::Transport(e)
	}
}

/// Contract every concrete transport kind implements (spec §4.1).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
	async fn connect(&self) -> Result<(), TransportError>;
	async fn disconnect(&self);
	fn state(&self) -> TransportState;
	fn is_connected(&self) -> bool {
		self.state().is_connected()
	}
	/// Observers can await state transitions instead of registering a
	/// one-shot `onClose` callback (spec §4.1's `onClose(handler)`,
	/// reimagined per §9 as an explicit channel rather than an implicit
	/// callback registration).
	fn watch_state(&self) -> watch::Receiver<TransportState>;
	/// Backend-pushed notifications arrive on this channel, mirroring
	/// spec §4.1's `onNotification(handler)`.
	fn notifications(&self) -> mpsc::UnboundedReceiver<BackendNotification>;
	async fn call(
		&self,
		method: &str,
		params: Option<Value>,
		timeout: Duration,
	) -> Result<Value, CallError>;
}

pub type DynTransport = Arc<dyn Transport>;

#[cfg(test)]
pub mod test_support {
	use std::sync::Mutex;

	use async_trait::async_trait;

	use super::*;

	/// An in-memory transport for exercising the Pool/Router/Registry
	/// without spawning a real process, matching the teacher's use of
	/// `wiremock`-style fakes for upstream-facing tests.
	#[derive(Debug)]
	pub struct FakeTransport {
		state: watch::Sender<TransportState>,
		state_rx: watch::Receiver<TransportState>,
		notify_tx: Mutex<Option<mpsc::UnboundedSender<BackendNotification>>>,
		pub fail_connect: bool,
		pub responses: Mutex<std::collections::HashMap<String, Result<Value, CallError>>>,
	}

	impl FakeTransport {
		pub fn new() -> Arc<Self> {
			let (tx, rx) = watch::channel(TransportState::Disconnected);
			Arc::new(Self {
				state: tx,
				state_rx: rx,
				notify_tx: Mutex::new(None),
				fail_connect: false,
				responses: Mutex::new(std::collections::HashMap::new()),
			})
		}

		pub fn set_response(&self, method: &str, result: Result<Value, CallError>) {
			self.responses.lock().unwrap().insert(method.to_string(), result);
		}

		pub fn push_notification(&self, n: BackendNotification) {
			if let Some(tx) = self.notify_tx.lock().unwrap().as_ref() {
				let _ = tx.send(n);
			}
		}
	}

	#[async_trait]
	impl Transport for FakeTransport {
		async fn connect(&self) -> Result<(), TransportError> {
			if self.fail_connect {
				let _ = self
					.state
					.send(TransportState::Error("fake connect failure".into()));
				return Err(TransportError::ConnectFailed("fake connect failure".into()));
			}
			let _ = self.state.send(TransportState::Connected);
			Ok(())
		}

		async fn disconnect(&self) {
			let _ = self.state.send(TransportState::Disconnected);
		}

		fn state(&self) -> TransportState {
			self.state_rx.borrow().clone()
		}

		fn watch_state(&self) -> watch::Receiver<TransportState> {
			self.state_rx.clone()
		}

		fn notifications(&self) -> mpsc::UnboundedReceiver<BackendNotification> {
			let (tx, rx) = mpsc::unbounded_channel();
			*self.notify_tx.lock().unwrap() = Some(tx);
			rx
		}

		async fn call(
			&self,
			method: &str,
			_params: Option<Value>,
			_timeout: Duration,
		) -> Result<Value, CallError> {
			match self.responses.lock().unwrap().get(method) {
				Some(r) => r.clone(),
				None => Ok(Value::Null),
			}
		}
	}
}
