//! Types the (external, out-of-scope) configuration provider hands the
//! core, per spec §6: "yields a list of Backend records and a policy
//! block ... may signal hot-reload events." Parsing a file format is not
//! this crate's concern; only the shapes are.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a backend is reached (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum TransportKind {
	Stdio {
		command: String,
		#[serde(default)]
		args: Vec<String>,
		#[serde(default)]
		env: HashMap<String, String>,
	},
	HttpSse {
		endpoint: String,
	},
	StreamableHttp {
		endpoint: String,
	},
}

/// Eviction/refresh behavior for a backend's transport (spec §3, §4.2).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum BackendMode {
	/// Never evicted by the idle ticker.
	Stateful,
	/// Evicted after `idleTimeout` of inactivity.
	#[default]
	Smart,
	/// Reconnected fresh for every call (not a Pool concern here beyond
	/// being exempt from idle eviction bookkeeping).
	Stateless,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendConfig {
	pub id: String,
	pub transport: TransportKind,
	#[serde(default = "default_true")]
	pub enabled: bool,
	#[serde(default)]
	pub mode: BackendMode,
}

fn default_true() -> bool {
	true
}

/// Gateway-wide policy knobs the configuration provider supplies (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayPolicy {
	pub output_size_limit: usize,
	#[serde(with = "duration_millis")]
	pub default_timeout: Duration,
	pub max_subscriptions_per_client: usize,
	#[serde(with = "duration_millis")]
	pub idle_timeout: Duration,
	#[serde(with = "duration_millis")]
	pub eviction_interval: Duration,
	#[serde(with = "duration_millis")]
	pub drain_deadline: Duration,
	#[serde(with = "duration_millis")]
	pub correlator_timeout: Duration,
	/// Per-backend bound on a `completion/complete` fan-out call (spec
	/// §4.6 "completion aggregation"); late responses are discarded.
	#[serde(with = "duration_millis")]
	pub completion_timeout: Duration,
}

impl Default for GatewayPolicy {
	fn default() -> Self {
		Self {
			output_size_limit: 10 * 1024 * 1024,
			default_timeout: Duration::from_secs(30),
			max_subscriptions_per_client: 100,
			idle_timeout: Duration::from_secs(60),
			eviction_interval: Duration::from_secs(30),
			drain_deadline: Duration::from_secs(30),
			correlator_timeout: Duration::from_secs(30),
			completion_timeout: Duration::from_secs(5),
		}
	}
}

mod duration_millis {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
		s.serialize_u64(d.as_millis() as u64)
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
		let millis = u64::deserialize(d)?;
		Ok(Duration::from_millis(millis))
	}
}

/// A hot-reload event the (out-of-scope) configuration provider signals;
/// the gateway responds by drain-removing absent backends and adding new
/// ones (spec §6).
#[derive(Debug, Clone)]
pub enum ConfigEvent {
	BackendAdded(BackendConfig),
	BackendRemoved(String),
	PolicyChanged(GatewayPolicy),
}
