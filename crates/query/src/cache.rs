//! Per-key query cache.
//!
//! Each entry carries its published [`QueryState`] plus the bookkeeping that
//! decides whether a completed request may still write to it:
//!
//! - `issued`: sequence number of the latest request started for the key.
//! - `applied`: sequence number of the result currently shown.
//! - `floor`: results at or below this sequence are stale. Raised by
//!   invalidation, by disabling, and by connection generation changes.
//! - `generation`: connection generation the shown data was fetched under.
//!
//! Sequence numbers come from one cache-wide counter, so ordering by
//! issuance is well defined across invalidations.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::{Cacheable, QueryData, QueryError, QueryKey, QueryOp, QueryState};

type EntryState = QueryState<QueryData>;

struct Entry {
	state: watch::Sender<EntryState>,
	generation: u64,
	issued: u64,
	applied: u64,
	floor: u64,
}

impl Entry {
	fn new() -> Self {
		let (state, _) = watch::channel(QueryState::Disabled);
		Self {
			state,
			generation: 0,
			issued: 0,
			applied: 0,
			floor: 0,
		}
	}

	fn publish(&self, next: EntryState) {
		self.state.send_replace(next);
	}

	/// Drops anything in flight and shows `next`.
	fn reset(&mut self, next: EntryState) {
		self.floor = self.issued;
		self.publish(next);
	}
}

struct Inner {
	entries: HashMap<QueryKey, Entry>,
	next_seq: u64,
	/// Generation of the ready connection, `None` while there is none.
	generation: Option<u64>,
}

impl Inner {
	fn entry(&mut self, key: &QueryKey) -> &mut Entry {
		self.entries.entry(key.clone()).or_insert_with(Entry::new)
	}
}

/// Proof that a request was issued for a key; redeemed by [`QueryCache::settle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
	key: QueryKey,
	seq: u64,
	generation: u64,
}

impl Ticket {
	pub fn key(&self) -> &QueryKey {
		&self.key
	}

	pub fn seq(&self) -> u64 {
		self.seq
	}

	pub fn generation(&self) -> u64 {
		self.generation
	}
}

/// Keyed cache of read results.
pub struct QueryCache {
	inner: Mutex<Inner>,
}

impl Default for QueryCache {
	fn default() -> Self {
		Self::new()
	}
}

impl QueryCache {
	pub fn new() -> Self {
		Self {
			inner: Mutex::new(Inner {
				entries: HashMap::new(),
				next_seq: 0,
				generation: None,
			}),
		}
	}

	/// Subscribes to the state of `key`, creating a disabled entry if needed.
	pub fn subscribe(&self, key: &QueryKey) -> watch::Receiver<QueryState<QueryData>> {
		self.inner.lock().entry(key).state.subscribe()
	}

	/// Current untyped state of `key`.
	pub fn peek(&self, key: &QueryKey) -> QueryState<QueryData> {
		self.inner
			.lock()
			.entries
			.get(key)
			.map_or(QueryState::Disabled, |e| e.state.borrow().clone())
	}

	/// Current state of `key` as `T`.
	pub fn get<T: Cacheable>(&self, key: &QueryKey) -> QueryState<T> {
		self.peek(key).typed()
	}

	/// A successful result for `key` fetched under `generation`, if still valid.
	pub fn fresh<T: Cacheable>(&self, key: &QueryKey, generation: u64) -> Option<T> {
		let inner = self.inner.lock();
		if inner.generation != Some(generation) {
			return None;
		}
		let entry = inner.entries.get(key)?;
		if entry.generation != generation {
			return None;
		}
		let state = entry.state.borrow();
		match &*state {
			QueryState::Success(data) => T::peek(data).cloned(),
			_ => None,
		}
	}

	/// Records the generation of the ready connection (`None` when there is none).
	///
	/// On change, every entry is disabled and its in-flight requests become
	/// stale: data fetched for another identity must not be shown.
	pub fn observe_generation(&self, generation: Option<u64>) {
		let mut inner = self.inner.lock();
		if inner.generation == generation {
			return;
		}
		debug!(
			from = ?inner.generation,
			to = ?generation,
			entries = inner.entries.len(),
			"connection generation changed; disabling queries"
		);
		inner.generation = generation;
		for entry in inner.entries.values_mut() {
			entry.reset(QueryState::Disabled);
		}
	}

	/// Starts a request for `key` under connection `generation`.
	pub fn begin(&self, key: &QueryKey, generation: u64) -> Ticket {
		let mut inner = self.inner.lock();
		inner.next_seq += 1;
		let seq = inner.next_seq;
		let entry = inner.entry(key);
		entry.issued = seq;
		entry.publish(QueryState::Pending);
		debug!(%key, seq, generation, "query issued");
		Ticket {
			key: key.clone(),
			seq,
			generation,
		}
	}

	/// Applies a completed request unless it has gone stale.
	///
	/// Returns whether the result was applied. A result is stale when the
	/// connection generation moved on, when the key was invalidated or
	/// disabled after issuance, or when a later-issued request already
	/// applied its result.
	pub fn settle(&self, ticket: Ticket, result: Result<QueryData, QueryError>) -> bool {
		let mut inner = self.inner.lock();
		let current = inner.generation;
		let Some(entry) = inner.entries.get_mut(&ticket.key) else {
			debug!(key = %ticket.key, seq = ticket.seq, "entry cleared; dropping result");
			return false;
		};

		let stale = current != Some(ticket.generation)
			|| ticket.seq <= entry.floor
			|| ticket.seq <= entry.applied;
		if stale {
			debug!(
				key = %ticket.key,
				seq = ticket.seq,
				floor = entry.floor,
				applied = entry.applied,
				generation = ticket.generation,
				current = ?current,
				"discarding stale query result"
			);
			return false;
		}

		entry.applied = ticket.seq;
		entry.generation = ticket.generation;
		entry.publish(match result {
			Ok(data) => QueryState::Success(data),
			Err(error) => QueryState::Error(error),
		});
		true
	}

	/// Marks `key` as disabled and drops its in-flight requests.
	pub fn disable(&self, key: &QueryKey) {
		let mut inner = self.inner.lock();
		let entry = inner.entry(key);
		if !entry.state.borrow().is_disabled() || entry.issued > entry.floor {
			entry.reset(QueryState::Disabled);
		}
	}

	/// Attaches an error to `key` without a request, dropping in-flight ones.
	pub fn reject(&self, key: &QueryKey, error: QueryError) {
		self.inner.lock().entry(key).reset(QueryState::Error(error));
	}

	/// Marks `key` stale so the next read refetches. Returns whether it existed.
	pub fn invalidate(&self, key: &QueryKey) -> bool {
		let mut inner = self.inner.lock();
		let Some(entry) = inner.entries.get_mut(key) else {
			return false;
		};
		debug!(%key, "query invalidated");
		let next = if entry.state.borrow().is_disabled() {
			QueryState::Disabled
		} else {
			QueryState::Pending
		};
		entry.reset(next);
		true
	}

	/// Invalidates every key of `op`. Returns how many keys were affected.
	pub fn invalidate_op(&self, op: QueryOp) -> usize {
		let mut inner = self.inner.lock();
		let mut count = 0;
		for (key, entry) in inner.entries.iter_mut().filter(|(k, _)| k.op() == op) {
			debug!(%key, "query invalidated");
			let next = if entry.state.borrow().is_disabled() {
				QueryState::Disabled
			} else {
				QueryState::Pending
			};
			entry.reset(next);
			count += 1;
		}
		count
	}

	/// Disables every entry. Subscriptions stay valid.
	pub fn clear(&self) {
		let mut inner = self.inner.lock();
		for entry in inner.entries.values_mut() {
			entry.reset(QueryState::Disabled);
		}
	}

	/// Number of keys that have ever been read or subscribed.
	pub fn len(&self) -> usize {
		self.inner.lock().entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
