//! Notification Fan-in/out (spec §4.9, component C9): decides, for each
//! backend-pushed notification, which connected clients should receive
//! it and rewrites resource uris into their namespaced form on the way
//! out.
//!
//! Stateless by design: it only reads the [`Registry`] and
//! [`SubscriptionManager`], so it holds no state of its own worth
//! testing in isolation beyond its routing decisions. Log-level
//! eligibility for `notifications/message` lives in
//! [`crate::session::SessionStore`]; the caller precomputes that list
//! and hands it in rather than this router owning a `SessionStore`.

use std::sync::Arc;

use serde_json::Value;
use tracing::instrument;

use crate::protocol::{method, WireNotification};
use crate::registry::{namespace, Registry};
use crate::protocol::CapabilityKind;
use crate::subscription::SubscriptionManager;

pub struct NotificationRouter {
	registry: Arc<Registry>,
	subscriptions: Arc<SubscriptionManager>,
}

/// A notification plus the client ids it should be delivered to.
pub struct FanOut {
	pub notification: WireNotification,
	pub targets: Vec<String>,
}

impl NotificationRouter {
	pub fn new(registry: Arc<Registry>, subscriptions: Arc<SubscriptionManager>) -> Self {
		Self {
			registry,
			subscriptions,
		}
	}

	/// Routes a notification pushed by `backend_id` to the clients that
	/// should see it, rewriting uris into namespaced form as needed (spec
	/// §4.9 steps 1-3). `all_connected` are the session ids currently
	/// `Initialized`, used for list-changed broadcasts. `log_eligible` is
	/// the subset of those clients that enabled log reception at or below
	/// this message's level (spec §4.7), used only for
	/// `notifications/message`.
	#[instrument(skip(self, params, all_connected, log_eligible))]
	pub fn route(
		&self,
		backend_id: &str,
		native_method: &str,
		params: Option<Value>,
		all_connected: &[String],
		log_eligible: &[String],
	) -> Option<FanOut> {
		match native_method {
			method::NOTIFICATIONS_TOOLS_LIST_CHANGED
			| method::NOTIFICATIONS_PROMPTS_LIST_CHANGED
			| method::NOTIFICATIONS_RESOURCES_LIST_CHANGED => Some(FanOut {
				notification: WireNotification::new(native_method, params),
				targets: all_connected.to_vec(),
			}),
			method::NOTIFICATIONS_RESOURCES_UPDATED => {
				let uri = params.as_ref()?.get("uri")?.as_str()?;
				let ns_uri = namespace(CapabilityKind::Resource, backend_id, uri);
				let targets = self.subscriptions.subscribers_of(&ns_uri);
				if targets.is_empty() {
					return None;
				}
				let rewritten = serde_json::json!({"uri": ns_uri});
				Some(FanOut {
					notification: WireNotification::new(native_method, Some(rewritten)),
					targets,
				})
			}
			method::NOTIFICATIONS_MESSAGE => {
				if log_eligible.is_empty() {
					return None;
				}
				Some(FanOut {
					notification: WireNotification::new(native_method, params),
					targets: log_eligible.to_vec(),
				})
			}
			_ => None,
		}
	}

	/// A synthetic `resources/updated`-style unavailability notice sent
	/// when a backend is removed out from under subscribed clients (spec
	/// §4.5 "backend removal").
	pub fn resource_unavailable(&self, resource_ns_uri: &str) -> WireNotification {
		WireNotification::new(
			method::NOTIFICATIONS_RESOURCES_UPDATED,
			Some(serde_json::json!({"uri": resource_ns_uri, "unavailable": true})),
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::protocol::CapabilityDef;

	fn router() -> NotificationRouter {
		let registry = Registry::new();
		registry
			.add_backend(
				"b1",
				CapabilityKind::Resource,
				vec![CapabilityDef {
					native_name: "file:///a".into(),
					description: None,
					raw: serde_json::json!({}),
				}],
			)
			.unwrap();
		let subs = SubscriptionManager::new(10);
		NotificationRouter::new(registry, subs)
	}

	#[test]
	fn list_changed_broadcasts_to_all_connected() {
		let r = router();
		let fan = r
			.route(
				"b1",
				method::NOTIFICATIONS_TOOLS_LIST_CHANGED,
				None,
				&["c1".to_string(), "c2".to_string()],
				&[],
			)
			.unwrap();
		assert_eq!(fan.targets, vec!["c1".to_string(), "c2".to_string()]);
	}

	#[test]
	fn resources_updated_only_reaches_subscribers() {
		let r = router();
		r.subscriptions.subscribe("c1", "mcp://b1/file%3A%2F%2F%2Fa").unwrap();
		let fan = r.route(
			"b1",
			method::NOTIFICATIONS_RESOURCES_UPDATED,
			Some(serde_json::json!({"uri": "file:///a"})),
			&["c1".to_string(), "c2".to_string()],
			&[],
		);
		assert!(fan.is_some());
		let fan = fan.unwrap();
		assert_eq!(fan.targets, vec!["c1".to_string()]);
	}

	#[test]
	fn resources_updated_with_no_subscribers_is_dropped() {
		let r = router();
		let fan = r.route(
			"b1",
			method::NOTIFICATIONS_RESOURCES_UPDATED,
			Some(serde_json::json!({"uri": "file:///a"})),
			&["c1".to_string()],
			&[],
		);
		assert!(fan.is_none());
	}

	#[test]
	fn message_notifications_only_reach_log_eligible_clients() {
		let r = router();
		let fan = r.route(
			"b1",
			method::NOTIFICATIONS_MESSAGE,
			Some(serde_json::json!({"level": "error", "data": "disk full"})),
			&["c1".to_string(), "c2".to_string()],
			&["c1".to_string()],
		);
		assert!(fan.is_some());
		assert_eq!(fan.unwrap().targets, vec!["c1".to_string()]);
	}

	#[test]
	fn message_notifications_with_no_log_eligible_clients_are_dropped() {
		let r = router();
		let fan = r.route(
			"b1",
			method::NOTIFICATIONS_MESSAGE,
			Some(serde_json::json!({"level": "error", "data": "disk full"})),
			&["c1".to_string(), "c2".to_string()],
			&[],
		);
		assert!(fan.is_none());
	}
}
