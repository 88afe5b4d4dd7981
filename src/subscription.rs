//! Subscription Manager (spec §4.5, component C5): tracks which clients
//! are subscribed to which namespaced resource uris, forwards the
//! backend-facing `subscribe`/`unsubscribe` call only on the first
//! subscriber / last unsubscriber, and cleans up on client disconnect or
//! backend removal.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::instrument;

use crate::error::SubscriptionError;

struct State {
	/// resource ns-uri -> subscribed client ids
	by_resource: HashMap<String, HashSet<String>>,
	/// client id -> subscribed resource ns-uris
	by_client: HashMap<String, HashSet<String>>,
}

impl State {
	fn new() -> Self {
		Self {
			by_resource: HashMap::new(),
			by_client: HashMap::new(),
		}
	}
}

/// What the caller must do with the backend connection as a result of a
/// subscribe/unsubscribe call (spec §4.5: forward only on first/last).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendAction {
	Forward,
	Skip,
}

pub struct SubscriptionManager {
	state: Mutex<State>,
	max_per_client: usize,
}

impl SubscriptionManager {
	pub fn new(max_per_client: usize) -> Arc<Self> {
		Arc::new(Self {
			state: Mutex::new(State::new()),
			max_per_client,
		})
	}

	#[instrument(skip(self))]
	pub fn subscribe(&self, client_id: &str, resource_ns_uri: &str) -> Result<BackendAction, SubscriptionError> {
		let mut state = self.state.lock();
		let client_set = state.by_client.entry(client_id.to_string()).or_default();
		if client_set.len() >= self.max_per_client && !client_set.contains(resource_ns_uri) {
			return Err(SubscriptionError::LimitExceeded {
				current: client_set.len(),
				max: self.max_per_client,
			});
		}
		let newly_added_for_client = client_set.insert(resource_ns_uri.to_string());

		let subscribers = state.by_resource.entry(resource_ns_uri.to_string()).or_default();
		let first_subscriber = subscribers.is_empty();
		if newly_added_for_client {
			subscribers.insert(client_id.to_string());
		}

		Ok(if first_subscriber {
			BackendAction::Forward
		} else {
			BackendAction::Skip
		})
	}

	#[instrument(skip(self))]
	pub fn unsubscribe(&self, client_id: &str, resource_ns_uri: &str) -> Result<BackendAction, SubscriptionError> {
		let mut state = self.state.lock();
		let had_it = state
			.by_client
			.get_mut(client_id)
			.map(|s| s.remove(resource_ns_uri))
			.unwrap_or(false);
		if !had_it {
			return Err(SubscriptionError::NotFound(resource_ns_uri.to_string()));
		}
		let Some(subscribers) = state.by_resource.get_mut(resource_ns_uri) else {
			return Err(SubscriptionError::NotFound(resource_ns_uri.to_string()));
		};
		subscribers.remove(client_id);
		let last_subscriber_gone = subscribers.is_empty();
		if last_subscriber_gone {
			state.by_resource.remove(resource_ns_uri);
		}
		Ok(if last_subscriber_gone {
			BackendAction::Forward
		} else {
			BackendAction::Skip
		})
	}

	/// Every resource a client is subscribed to, for fan-out (spec §4.5/§4.9).
	pub fn subscribers_of(&self, resource_ns_uri: &str) -> Vec<String> {
		self.state
			.lock()
			.by_resource
			.get(resource_ns_uri)
			.map(|s| s.iter().cloned().collect())
			.unwrap_or_default()
	}

	/// Drops all of a disconnecting client's subscriptions. Returns the
	/// resources whose last subscriber just left, so the caller can
	/// forward `unsubscribe` to the owning backends (spec §4.5 "client
	/// disconnect").
	#[instrument(skip(self))]
	pub fn cleanup_client(&self, client_id: &str) -> Vec<String> {
		let mut state = self.state.lock();
		let Some(resources) = state.by_client.remove(client_id) else {
			return Vec::new();
		};
		let mut now_empty = Vec::new();
		for resource in resources {
			if let Some(subscribers) = state.by_resource.get_mut(&resource) {
				subscribers.remove(client_id);
				if subscribers.is_empty() {
					state.by_resource.remove(&resource);
					now_empty.push(resource);
				}
			}
		}
		now_empty
	}

	/// Drops every subscription pointing at a resource namespaced under a
	/// backend that was removed, returning the affected client ids so the
	/// gateway can notify them the resource became unavailable (spec §4.5
	/// "backend removal").
	#[instrument(skip(self))]
	pub fn on_backend_removed(&self, backend_id: &str) -> Vec<(String, Vec<String>)> {
		let prefix = format!("mcp://{backend_id}/");
		let mut state = self.state.lock();
		let affected_resources: Vec<String> = state
			.by_resource
			.keys()
			.filter(|r| r.starts_with(&prefix))
			.cloned()
			.collect();

		let mut result = Vec::new();
		for resource in affected_resources {
			if let Some(subscribers) = state.by_resource.remove(&resource) {
				let clients: Vec<String> = subscribers.into_iter().collect();
				for client in &clients {
					if let Some(set) = state.by_client.get_mut(client) {
						set.remove(&resource);
					}
				}
				result.push((resource, clients));
			}
		}
		result
	}
}
