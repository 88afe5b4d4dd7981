//! Stdio transport: spawns a backend as a child process and frames
//! JSON-RPC messages over its stdin/stdout using `Content-Length`
//! headers (spec §4.1). Accepts either `\r\n\r\n` or `\n\n` as the
//! header/body separator, since real-world backends are inconsistent
//! about it.

use std::collections::HashMap;
use std::process::Stdio as StdStdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch, Mutex as AsyncMutex};

use super::{BackendNotification, CallError, Transport, TransportState};
use crate::error::TransportError;
use crate::protocol::{JsonRpcError, RequestId};

type Pending = HashMap<String, oneshot::Sender<Result<Value, JsonRpcError>>>;

#[derive(Debug)]
pub struct StdioTransport {
	command: String,
	args: Vec<String>,
	env: HashMap<String, String>,
	state_tx: watch::Sender<TransportState>,
	state_rx: watch::Receiver<TransportState>,
	child: Mutex<Option<Child>>,
	/// A `tokio::sync::Mutex`, not `parking_lot`: the guard is held across
	/// the `write_all(...).await` in `call`, and a `parking_lot` guard is
	/// `!Send`, which would make this trait's futures `!Send`.
	stdin: AsyncMutex<Option<tokio::process::ChildStdin>>,
	pending: Arc<Mutex<Pending>>,
	notify_tx: Mutex<Option<mpsc::UnboundedSender<BackendNotification>>>,
	next_id: Mutex<u64>,
}

impl StdioTransport {
	pub fn new(command: String, args: Vec<String>, env: HashMap<String, String>) -> Arc<Self> {
		let (state_tx, state_rx) = watch::channel(TransportState::Disconnected);
		Arc::new(Self {
			command,
			args,
			env,
			state_tx,
			state_rx,
			child: Mutex::new(None),
			stdin: AsyncMutex::new(None),
			pending: Arc::new(Mutex::new(HashMap::new())),
			notify_tx: Mutex::new(None),
			next_id: Mutex::new(0),
		})
	}

	fn next_request_id(&self) -> String {
		let mut n = self.next_id.lock();
		*n += 1;
		n.to_string()
	}

	fn spawn_reader(&self, mut stdout: BufReader<tokio::process::ChildStdout>) {
		let pending = self.pending.clone();
		let state_tx = self.state_tx.clone();
		let notify_tx = self.notify_tx.lock().clone();
		tokio::spawn(async move {
			loop {
				match read_framed_message(&mut stdout).await {
					Ok(Some(body)) => dispatch_incoming(&body, &pending, &notify_tx),
					Ok(None) => break,
					Err(_) => break,
				}
			}
			let _ = state_tx.send(TransportState::Disconnected);
			for (_, tx) in pending.lock().drain() {
				let _ = tx.send(Err(JsonRpcError::new(
					crate::error::code::INTERNAL_ERROR,
					"backend connection lost",
				)));
			}
		});
	}
}

fn dispatch_incoming(
	body: &[u8],
	pending: &Arc<Mutex<Pending>>,
	notify_tx: &Option<mpsc::UnboundedSender<BackendNotification>>,
) {
	let Ok(value) = serde_json::from_slice::<Value>(body) else {
		return;
	};
	let obj = match value.as_object() {
		Some(o) => o,
		None => return,
	};
	if let Some(id) = obj.get("id") {
		let key = match id {
			Value::Number(n) => n.to_string(),
			Value::String(s) => s.clone(),
			_ => return,
		};
		let Some(tx) = pending.lock().remove(&key) else {
			return;
		};
		if let Some(err) = obj.get("error") {
			let code = err
				.get("code")
				.and_then(Value::as_i64)
				.unwrap_or(crate::error::code::INTERNAL_ERROR);
			let message = err
				.get("message")
				.and_then(Value::as_str)
				.unwrap_or("backend error")
				.to_string();
			let mut e = JsonRpcError::new(code, message);
			if let Some(data) = err.get("data") {
				e = e.with_data(data.clone());
			}
			let _ = tx.send(Err(e));
		} else {
			let _ = tx.send(Ok(obj.get("result").cloned().unwrap_or(Value::Null)));
		}
	} else if let Some(method) = obj.get("method").and_then(Value::as_str) {
		if let Some(tx) = notify_tx {
			let _ = tx.send(BackendNotification {
				method: method.to_string(),
				params: obj.get("params").cloned(),
			});
		}
	}
}

async fn read_framed_message(
	stdout: &mut BufReader<tokio::process::ChildStdout>,
) -> std::io::Result<Option<Vec<u8>>> {
	let mut content_length: Option<usize> = None;
	loop {
		let mut line = String::new();
		let n = stdout.read_line(&mut line).await?;
		if n == 0 {
			return Ok(None);
		}
		let trimmed = line.trim_end_matches(['\r', '\n']);
		if trimmed.is_empty() {
			break;
		}
		if let Some(rest) = trimmed
			.strip_prefix("Content-Length:")
			.or_else(|| trimmed.strip_prefix("content-length:"))
		{
			content_length = rest.trim().parse().ok();
		}
	}
	let len = content_length.unwrap_or(0);
	let mut body = vec![0u8; len];
	tokio::io::AsyncReadExt::read_exact(stdout, &mut body).await?;
	Ok(Some(body))
}

fn frame(body: &[u8]) -> Vec<u8> {
	let mut out = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
	out.extend_from_slice(body);
	out
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
	async fn connect(&self) -> Result<(), TransportError> {
		let _ = self.state_tx.send(TransportState::Connecting);
		let mut cmd = Command::new(&self.command);
		cmd.args(&self.args)
			.envs(&self.env)
			.stdin(StdStdio::piped())
			.stdout(StdStdio::piped())
			.stderr(StdStdio::null())
			.kill_on_drop(true);
		let mut child = cmd.spawn().map_err(|e| {
			let _ = self
				.state_tx
				.send(TransportState::Error(e.to_string()));
			TransportError::ConnectFailed(e.to_string())
		})?;
		let stdout = child
			.stdout
			.take()
			.ok_or_else(|| TransportError::ConnectFailed("no stdout pipe".into()))?;
		let stdin = child
			.stdin
			.take()
			.ok_or_else(|| TransportError::ConnectFailed("no stdin pipe".into()))?;
		*self.stdin.lock().await = Some(stdin);
		*self.child.lock() = Some(child);
		let _ = self.state_tx.send(TransportState::Connected);
		self.spawn_reader(BufReader::new(stdout));
		Ok(())
	}

	async fn disconnect(&self) {
		if let Some(mut child) = self.child.lock().take() {
			let _ = child.kill().await;
		}
		*self.stdin.lock().await = None;
		let _ = self.state_tx.send(TransportState::Disconnected);
		for (_, tx) in self.pending.lock().drain() {
			let _ = tx.send(Err(JsonRpcError::new(
				crate::error::code::INTERNAL_ERROR,
				"transport disconnected",
			)));
		}
	}

	fn state(&self) -> TransportState {
		self.state_rx.borrow().clone()
	}

	fn watch_state(&self) -> watch::Receiver<TransportState> {
		self.state_rx.clone()
	}

	fn notifications(&self) -> mpsc::UnboundedReceiver<BackendNotification> {
		let (tx, rx) = mpsc::unbounded_channel();
		*self.notify_tx.lock() = Some(tx);
		rx
	}

	async fn call(
		&self,
		method: &str,
		params: Option<Value>,
		timeout: Duration,
	) -> Result<Value, CallError> {
		if !self.state().is_connected() {
			return Err(CallError::Transport(TransportError::ConnectionLost));
		}
		let id = self.next_request_id();
		let mut payload = serde_json::json!({
			"jsonrpc": "2.0",
			"id": id.parse::<i64>().unwrap_or(0),
			"method": method,
		});
		if let Some(p) = params {
			payload["params"] = p;
		}
		let (tx, rx) = oneshot::channel();
		self.pending.lock().insert(id.clone(), tx);
		let bytes = frame(&serde_json::to_vec(&payload).map_err(|e| {
			CallError::Transport(TransportError::SendFailed(e.to_string()))
		})?);
		{
			let mut guard = self.stdin.lock().await;
			let Some(stdin) = guard.as_mut() else {
				self.pending.lock().remove(&id);
				return Err(CallError::Transport(TransportError::ConnectionLost));
			};
			if let Err(e) = stdin.write_all(&bytes).await {
				self.pending.lock().remove(&id);
				return Err(CallError::Transport(TransportError::SendFailed(e.to_string())));
			}
		}
		match tokio::time::timeout(timeout, rx).await {
			Ok(Ok(Ok(v))) => Ok(v),
			Ok(Ok(Err(e))) => Err(CallError::Backend(e)),
			Ok(Err(_)) => Err(CallError::Transport(TransportError::ConnectionLost)),
			Err(_) => {
				self.pending.lock().remove(&id);
				Err(CallError::Timeout)
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn frames_with_content_length_header() {
		let framed = frame(br#"{"a":1}"#);
		let s = String::from_utf8(framed).unwrap();
		assert!(s.starts_with("Content-Length: 7\r\n\r\n"));
		assert!(s.ends_with(r#"{"a":1}"#));
	}
}
