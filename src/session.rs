//! Session Store (spec §4.7, §4.9, component C8): per-client handshake
//! state machine gating which methods are accepted before/after
//! `initialize`.
//!
//! `Uninitialized -> Initializing -> Initialized -> Terminated`, matching
//! spec §4.7's gating rules: everything except `initialize` (and `ping`)
//! is rejected before `Initialized`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::instrument;

use crate::error::ProtocolError;
use crate::protocol::{negotiate_version, ClientCapabilities, LogLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
	Uninitialized,
	Initializing,
	Initialized,
	Terminated,
}

#[derive(Debug, Clone)]
pub struct Session {
	pub client_id: String,
	pub state: SessionState,
	pub negotiated_version: Option<String>,
	pub client_capabilities: ClientCapabilities,
	/// `None` until the client calls `logging/setLevel`: it has not
	/// enabled log reception (spec §4.7 "notifications/message" filtering).
	pub log_level: Option<LogLevel>,
}

impl Session {
	fn new(client_id: String) -> Self {
		Self {
			client_id,
			state: SessionState::Uninitialized,
			negotiated_version: None,
			client_capabilities: ClientCapabilities::default(),
			log_level: None,
		}
	}
}

pub struct SessionStore {
	sessions: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
	pub fn new() -> Arc<Self> {
		Arc::new(Self {
			sessions: RwLock::new(HashMap::new()),
		})
	}

	pub fn create(&self, client_id: &str) -> Session {
		let session = Session::new(client_id.to_string());
		self.sessions.write().insert(client_id.to_string(), session.clone());
		session
	}

	pub fn get(&self, client_id: &str) -> Option<Session> {
		self.sessions.read().get(client_id).cloned()
	}

	/// Begins the handshake: negotiates a protocol version and moves
	/// `Uninitialized -> Initializing` (spec §4.7 step 1-2).
	#[instrument(skip(self, capabilities))]
	pub fn begin_initialize(
		&self,
		client_id: &str,
		requested_version: &str,
		capabilities: ClientCapabilities,
	) -> Result<String, ProtocolError> {
		let version = negotiate_version(requested_version).ok_or_else(|| ProtocolError::VersionMismatch {
			requested: requested_version.to_string(),
			supported: crate::protocol::SUPPORTED_PROTOCOL_VERSIONS
				.iter()
				.map(|s| s.to_string())
				.collect(),
		})?;
		let mut sessions = self.sessions.write();
		let session = sessions
			.entry(client_id.to_string())
			.or_insert_with(|| Session::new(client_id.to_string()));
		session.state = SessionState::Initializing;
		session.negotiated_version = Some(version.to_string());
		session.client_capabilities = capabilities;
		Ok(version.to_string())
	}

	/// Completes the handshake on receipt of `notifications/initialized`
	/// (spec §4.7 step 3): `Initializing -> Initialized`.
	#[instrument(skip(self))]
	pub fn complete_initialize(&self, client_id: &str) -> Result<(), ProtocolError> {
		let mut sessions = self.sessions.write();
		let session = sessions.get_mut(client_id).ok_or(ProtocolError::NotInitialized)?;
		if session.state != SessionState::Initializing {
			return Err(ProtocolError::NotInitialized);
		}
		session.state = SessionState::Initialized;
		Ok(())
	}

	/// Gates a non-handshake method: only `Initialized` sessions may call
	/// anything besides `initialize`/`ping` (spec §4.7 invariant).
	pub fn require_initialized(&self, client_id: &str) -> Result<(), ProtocolError> {
		match self.sessions.read().get(client_id) {
			Some(s) if s.state == SessionState::Initialized => Ok(()),
			_ => Err(ProtocolError::NotInitialized),
		}
	}

	#[instrument(skip(self))]
	pub fn terminate(&self, client_id: &str) {
		if let Some(session) = self.sessions.write().get_mut(client_id) {
			session.state = SessionState::Terminated;
		}
	}

	pub fn remove(&self, client_id: &str) -> Option<Session> {
		self.sessions.write().remove(client_id)
	}

	pub fn connected_client_ids(&self) -> Vec<String> {
		self.sessions
			.read()
			.values()
			.filter(|s| s.state == SessionState::Initialized)
			.map(|s| s.client_id.clone())
			.collect()
	}

	pub fn sampling_capable_client_ids(&self) -> Vec<String> {
		self.sessions
			.read()
			.values()
			.filter(|s| s.state == SessionState::Initialized && s.client_capabilities.sampling)
			.map(|s| s.client_id.clone())
			.collect()
	}

	/// Records a client's declared minimum log level (`logging/setLevel`).
	#[instrument(skip(self))]
	pub fn set_log_level(&self, client_id: &str, level: LogLevel) -> Result<(), ProtocolError> {
		let mut sessions = self.sessions.write();
		let session = sessions.get_mut(client_id).ok_or(ProtocolError::NotInitialized)?;
		session.log_level = Some(level);
		Ok(())
	}

	/// Initialized clients eligible to receive a `notifications/message`
	/// at `message_level`: those that enabled log reception and declared
	/// a minimum at or below it (spec §4.7).
	pub fn clients_for_log_level(&self, message_level: LogLevel) -> Vec<String> {
		self.sessions
			.read()
			.values()
			.filter(|s| s.state == SessionState::Initialized)
			.filter_map(|s| s.log_level.filter(|min| *min <= message_level).map(|_| s.client_id.clone()))
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn full_handshake_reaches_initialized() {
		let store = SessionStore::new();
		store
			.begin_initialize("c1", "2025-11-25", ClientCapabilities::default())
			.unwrap();
		assert!(store.require_initialized("c1").is_err());
		store.complete_initialize("c1").unwrap();
		assert!(store.require_initialized("c1").is_ok());
	}

	#[test]
	fn unsupported_version_rejected() {
		let store = SessionStore::new();
		let err = store
			.begin_initialize("c1", "1999-01-01", ClientCapabilities::default())
			.unwrap_err();
		assert_matches::assert_matches!(err, ProtocolError::VersionMismatch { .. });
	}

	#[test]
	fn uninitialized_client_is_gated() {
		let store = SessionStore::new();
		let err = store.require_initialized("ghost").unwrap_err();
		assert_matches::assert_matches!(err, ProtocolError::NotInitialized);
	}

	#[test]
	fn completing_without_begin_errors() {
		let store = SessionStore::new();
		let err = store.complete_initialize("c1").unwrap_err();
		assert_matches::assert_matches!(err, ProtocolError::NotInitialized);
	}

	#[test]
	fn terminate_revokes_access() {
		let store = SessionStore::new();
		store
			.begin_initialize("c1", "2025-11-25", ClientCapabilities::default())
			.unwrap();
		store.complete_initialize("c1").unwrap();
		store.terminate("c1");
		assert!(store.require_initialized("c1").is_err());
	}

	#[test]
	fn clients_without_a_declared_log_level_are_not_eligible() {
		let store = SessionStore::new();
		store
			.begin_initialize("c1", "2025-11-25", ClientCapabilities::default())
			.unwrap();
		store.complete_initialize("c1").unwrap();
		assert!(store.clients_for_log_level(LogLevel::Emergency).is_empty());
	}

	#[test]
	fn clients_are_eligible_at_or_above_their_declared_minimum() {
		let store = SessionStore::new();
		store
			.begin_initialize("c1", "2025-11-25", ClientCapabilities::default())
			.unwrap();
		store.complete_initialize("c1").unwrap();
		store.set_log_level("c1", LogLevel::Warning).unwrap();

		assert!(store.clients_for_log_level(LogLevel::Info).is_empty());
		assert_eq!(store.clients_for_log_level(LogLevel::Error), vec!["c1".to_string()]);
	}
}
