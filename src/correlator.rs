//! Elicitation/Sampling Correlator (spec §4.6, component C6): tracks
//! server-initiated requests a backend issues (`sampling/createMessage`,
//! `elicitation/requestInput`) while they wait on a client reply, and
//! aggregates `completion/complete` fan-out across backends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::error::CorrelatorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
	Sampling,
	Elicitation,
}

struct PendingEntry {
	backend_id: String,
	backend_corr_id: String,
	kind: RequestKind,
	selected_client_id: String,
	deadline: Instant,
}

struct State {
	by_gateway_id: HashMap<String, PendingEntry>,
	/// backend id -> list of still-connected client ids known to support
	/// the relevant capability, used for round-robin selection.
	sampling_clients: Vec<String>,
	elicitation_chain_hint: HashMap<String, Vec<String>>,
	round_robin_cursor: AtomicU64,
}

pub struct Correlator {
	state: Mutex<State>,
	default_timeout: Duration,
}

impl Correlator {
	pub fn new(default_timeout: Duration) -> Arc<Self> {
		Arc::new(Self {
			state: Mutex::new(State {
				by_gateway_id: HashMap::new(),
				sampling_clients: Vec::new(),
				elicitation_chain_hint: HashMap::new(),
				round_robin_cursor: AtomicU64::new(0),
			}),
			default_timeout,
		})
	}

	pub fn set_sampling_capable_clients(&self, clients: Vec<String>) {
		self.state.lock().sampling_clients = clients;
	}

	/// Records which client chain originated a request, used as the
	/// preferred elicitation target with round-robin fallback (spec
	/// §4.6 "elicitation routing").
	pub fn set_elicitation_chain(&self, backend_id: &str, chain: Vec<String>) {
		self.state
			.lock()
			.elicitation_chain_hint
			.insert(backend_id.to_string(), chain);
	}

	/// Registers a new server-initiated request, choosing a target client
	/// and minting a gateway-facing correlation id (spec §4.6 step 1-2).
	#[instrument(skip(self))]
	pub fn begin(
		&self,
		backend_id: &str,
		backend_corr_id: &str,
		kind: RequestKind,
		timeout: Option<Duration>,
	) -> Result<(String, String), CorrelatorError> {
		let mut state = self.state.lock();
		let client = match kind {
			RequestKind::Sampling => round_robin_pick(&state.sampling_clients, &state.round_robin_cursor),
			RequestKind::Elicitation => {
				let chain = state.elicitation_chain_hint.get(backend_id).cloned().unwrap_or_default();
				chain
					.first()
					.cloned()
					.or_else(|| round_robin_pick(&state.sampling_clients, &state.round_robin_cursor))
			}
		}
		.ok_or(CorrelatorError::NoClientAvailable)?;

		let gateway_id = Uuid::new_v4().to_string();
		state.by_gateway_id.insert(
			gateway_id.clone(),
			PendingEntry {
				backend_id: backend_id.to_string(),
				backend_corr_id: backend_corr_id.to_string(),
				kind,
				selected_client_id: client.clone(),
				deadline: Instant::now() + timeout.unwrap_or(self.default_timeout),
			},
		);
		Ok((gateway_id, client))
	}

	/// Resolves a client's reply back to the originating backend
	/// correlation id (spec §4.6 step 4), failing if the deadline has
	/// already passed so a late arrival is discarded rather than
	/// delivered (spec §4.6 invariant).
	#[instrument(skip(self))]
	pub fn resolve(&self, gateway_id: &str) -> Result<(String, String), CorrelatorError> {
		let mut state = self.state.lock();
		let entry = state
			.by_gateway_id
			.remove(gateway_id)
			.ok_or_else(|| CorrelatorError::UnknownCorrelation(gateway_id.to_string()))?;
		if Instant::now() > entry.deadline {
			let err = match entry.kind {
				RequestKind::Sampling => CorrelatorError::SamplingTimeout,
				RequestKind::Elicitation => CorrelatorError::ElicitationTimeout,
			};
			warn!(gateway_id, "correlation resolved after deadline, discarding");
			return Err(err);
		}
		Ok((entry.backend_id, entry.backend_corr_id))
	}

	/// Cancels every pending correlation belonging to a client that
	/// disconnected (spec §4.6 "client disconnect").
	#[instrument(skip(self))]
	pub fn cancel_for_client(&self, client_id: &str) -> Vec<(String, RequestKind)> {
		let mut state = self.state.lock();
		let cancelled: Vec<String> = state
			.by_gateway_id
			.iter()
			.filter(|(_, e)| e.selected_client_id == client_id)
			.map(|(id, _)| id.clone())
			.collect();
		let mut out = Vec::new();
		for id in cancelled {
			if let Some(entry) = state.by_gateway_id.remove(&id) {
				out.push((id, entry.kind));
			}
		}
		out
	}

	pub fn pending_count(&self) -> usize {
		self.state.lock().by_gateway_id.len()
	}
}

fn round_robin_pick(candidates: &[String], cursor: &AtomicU64) -> Option<String> {
	if candidates.is_empty() {
		return None;
	}
	let i = cursor.fetch_add(1, Ordering::Relaxed) as usize % candidates.len();
	Some(candidates[i].clone())
}

/// Aggregates `completion/complete` replies across backends within a
/// timeout window, deduplicating by `(argument_name, value)` pairs and
/// discarding anything that arrives after the window closes (spec §4.6
/// "completion aggregation").
pub struct CompletionAggregator {
	timeout: Duration,
}

impl CompletionAggregator {
	pub fn new(timeout: Duration) -> Self {
		Self { timeout }
	}

	pub async fn aggregate<F, Fut>(&self, backend_ids: Vec<String>, call: F) -> Vec<Value>
	where
		F: Fn(String) -> Fut,
		Fut: std::future::Future<Output = Option<Vec<(String, Value)>>>,
	{
		let mut futures = Vec::new();
		for id in backend_ids {
			futures.push(tokio::time::timeout(self.timeout, call(id)));
		}
		let results = futures::future::join_all(futures).await;

		let mut seen = std::collections::HashSet::new();
		let mut merged = Vec::new();
		for result in results.into_iter().flatten().flatten() {
			for (arg_name, value) in result {
				let key = (arg_name, value.to_string());
				if seen.insert(key.clone()) {
					merged.push(serde_json::json!({"argumentName": key.0, "value": value}));
				}
			}
		}
		merged
	}
}
