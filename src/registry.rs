//! Capability Registry (spec §4.3, component C3): indexes every backend's
//! tools/prompts/resources/resource-templates under namespaced ids and
//! answers lookups and fuzzy search.
//!
//! Reads are lock-free: mutations build a new [`Snapshot`] and publish it
//! through an [`arc_swap::ArcSwap`], so concurrent `tools/list` calls never
//! block on a writer (spec §3 concurrency note: "copy-on-write snapshot
//! reads"). Mutations themselves are serialized behind `write_lock`.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::RegistryError;
use crate::protocol::{CapabilityDef, CapabilityKind};

/// A fully namespaced capability, as clients see it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
	/// `{backendId}_{nativeName}` for tools/prompts, `mcp://{backendId}/{encodedUri}` for resources.
	pub ns_id: String,
	pub backend_id: String,
	pub kind: CapabilityKind,
	pub def: CapabilityDef,
}

fn namespace_tool_or_prompt(backend_id: &str, native_name: &str) -> String {
	format!("{backend_id}_{native_name}")
}

fn namespace_resource(backend_id: &str, uri: &str) -> String {
	format!(
		"mcp://{backend_id}/{}",
		percent_encoding::utf8_percent_encode(uri, percent_encoding::NON_ALPHANUMERIC)
	)
}

pub fn namespace(kind: CapabilityKind, backend_id: &str, native_name: &str) -> String {
	match kind {
		CapabilityKind::Resource => namespace_resource(backend_id, native_name),
		_ => namespace_tool_or_prompt(backend_id, native_name),
	}
}

#[derive(Default, Clone)]
struct Snapshot {
	by_kind: HashMap<CapabilityKind, IndexMap<String, Entry>>,
}

impl Snapshot {
	fn kind_map(&self, kind: CapabilityKind) -> &IndexMap<String, Entry> {
		static EMPTY: std::sync::OnceLock<IndexMap<String, Entry>> = std::sync::OnceLock::new();
		self.by_kind.get(&kind).unwrap_or_else(|| EMPTY.get_or_init(IndexMap::new))
	}
}

pub struct Registry {
	snapshot: ArcSwap<Snapshot>,
	write_lock: Mutex<()>,
}

impl Registry {
	pub fn new() -> Arc<Self> {
		Arc::new(Self {
			snapshot: ArcSwap::from_pointee(Snapshot::default()),
			write_lock: Mutex::new(()),
		})
	}

	/// Adds a backend's advertised capabilities, dropping any entry whose
	/// native name duplicates one already seen for this backend+kind rather
	/// than failing the whole batch (spec §3 invariant 2, §4.3, §8: invalid
	/// items are skipped with a log, the connection proceeds).
	pub fn add_backend(
		&self,
		backend_id: &str,
		kind: CapabilityKind,
		defs: Vec<CapabilityDef>,
	) -> Result<(), RegistryError> {
		let _guard = self.write_lock.lock();
		let mut seen = std::collections::HashSet::new();
		let mut accepted = Vec::with_capacity(defs.len());
		for d in defs {
			if !seen.insert(d.native_name.clone()) {
				warn!(backend = backend_id, native = %d.native_name, "duplicate native name, dropping entry");
				continue;
			}
			accepted.push(d);
		}

		let current = self.snapshot.load();
		let mut next = (**current).clone();
		let map = next.by_kind.entry(kind).or_default();
		// Replace any prior entries this backend contributed to this kind,
		// then insert the fresh set — mirrors a full re-list on reconnect.
		map.retain(|_, e| e.backend_id != backend_id);
		for d in accepted {
			let ns_id = namespace(kind, backend_id, &d.native_name);
			map.insert(
				ns_id.clone(),
				Entry {
					ns_id,
					backend_id: backend_id.to_string(),
					kind,
					def: d,
				},
			);
		}
		map.sort_unstable_keys();
		self.snapshot.store(Arc::new(next));
		Ok(())
	}

	/// Drops every entry a removed backend contributed (spec §4.3, §4.4
	/// "backend removal").
	pub fn remove_backend(&self, backend_id: &str) {
		let _guard = self.write_lock.lock();
		let current = self.snapshot.load();
		let mut next = (**current).clone();
		for map in next.by_kind.values_mut() {
			map.retain(|_, e| e.backend_id != backend_id);
		}
		self.snapshot.store(Arc::new(next));
	}

	pub fn get(&self, kind: CapabilityKind, ns_id: &str) -> Option<Entry> {
		self.snapshot.load().kind_map(kind).get(ns_id).cloned()
	}

	/// Resolves a namespaced id back to `(backendId, nativeName)` for
	/// dispatch (spec §4.4 step 1).
	pub fn resolve(&self, kind: CapabilityKind, ns_id: &str) -> Option<(String, String)> {
		self.get(kind, ns_id)
			.map(|e| (e.backend_id, e.def.native_name))
	}

	/// Deterministic lexicographic-by-nsId listing (spec §4.3 "listAll").
	pub fn list_all(&self, kind: CapabilityKind) -> Vec<Entry> {
		self.snapshot.load().kind_map(kind).values().cloned().collect()
	}

	/// Fuzzy search across name and description using edit distance,
	/// boosting name-field matches (spec §4.3's "search" operation — no
	/// crate in the surrounding stack already does this, so it's rolled
	/// by hand rather than fabricating a dependency).
	pub fn search(&self, kind: CapabilityKind, query: &str, limit: usize) -> Vec<Entry> {
		let query = query.to_lowercase();
		if query.is_empty() {
			return self.list_all(kind).into_iter().take(limit).collect();
		}
		let threshold = ((query.len() as f64) * 0.2).ceil() as usize;
		let map = self.snapshot.load();
		let mut scored: Vec<(usize, Entry)> = map
			.kind_map(kind)
			.values()
			.filter_map(|entry| score_entry(&query, entry, threshold).map(|score| (score, entry.clone())))
			.collect();
		scored.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.ns_id.cmp(&b.1.ns_id)));
		scored.into_iter().take(limit).map(|(_, e)| e).collect()
	}
}

/// Lower score is a better match. Matches against the native name are
/// weighted roughly 2x over description matches.
fn score_entry(query: &str, entry: &Entry, threshold: usize) -> Option<usize> {
	let name = entry.def.native_name.to_lowercase();
	if let Some(d) = bounded_levenshtein(query, &name, threshold) {
		return Some(d);
	}
	if name.contains(query) {
		return Some(threshold.max(1));
	}
	let desc = entry
		.def
		.description
		.as_deref()
		.unwrap_or("")
		.to_lowercase();
	if desc.contains(query) {
		return Some(threshold.max(1) * 2);
	}
	bounded_levenshtein(query, &desc, threshold).map(|d| d * 2)
}

/// Levenshtein edit distance, short-circuiting once the running minimum
/// in a row exceeds `threshold` (the corpus never depends on a fuzzy
/// matching crate, so this stays a small hand-rolled routine rather than
/// reaching for one).
fn bounded_levenshtein(a: &str, b: &str, threshold: usize) -> Option<usize> {
	let a: Vec<char> = a.chars().collect();
	let b: Vec<char> = b.chars().collect();
	if a.is_empty() || b.is_empty() {
		return None;
	}
	if a.len().abs_diff(b.len()) > threshold {
		return None;
	}
	let mut prev: Vec<usize> = (0..=b.len()).collect();
	let mut curr = vec![0usize; b.len() + 1];
	for i in 1..=a.len() {
		curr[0] = i;
		let mut row_min = curr[0];
		for j in 1..=b.len() {
			let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
			curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
			row_min = row_min.min(curr[j]);
		}
		if row_min > threshold {
			return None;
		}
		std::mem::swap(&mut prev, &mut curr);
	}
	let dist = prev[b.len()];
	(dist <= threshold).then_some(dist)
}
