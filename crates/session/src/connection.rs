//! Per-identity backend connection.
//!
//! Manages the lifecycle of the single authenticated [`FarmBackend`] handle,
//! rebuilding it only when the signed-in identity changes.

use std::fmt;
use std::sync::Arc;

use furrow_backend::{BackendError, Connector, FarmBackend, Identity, Principal};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::SessionSnapshot;

/// Building a handle for an identity failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to connect as {principal}: {source}")]
pub struct ConnectError {
	/// Principal the construction was for.
	pub principal: Principal,
	/// Underlying transport or bootstrap failure.
	#[source]
	pub source: BackendError,
}

/// Authenticated binding to the backend for one identity.
///
/// Cheap to clone; all clones share the same underlying backend.
#[derive(Clone)]
pub struct ConnectionHandle {
	generation: u64,
	principal: Principal,
	backend: Arc<dyn FarmBackend>,
}

impl ConnectionHandle {
	/// Generation this handle was published under.
	pub fn generation(&self) -> u64 {
		self.generation
	}

	/// Principal the handle authenticates as.
	pub fn principal(&self) -> &Principal {
		&self.principal
	}

	pub fn backend(&self) -> &Arc<dyn FarmBackend> {
		&self.backend
	}
}

impl fmt::Debug for ConnectionHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ConnectionHandle")
			.field("generation", &self.generation)
			.field("principal", &self.principal)
			.finish_non_exhaustive()
	}
}

/// Published connection state.
#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
	/// Bumped on every identity change.
	pub generation: u64,
	pub handle: Option<ConnectionHandle>,
	/// A construction for `generation` is in flight.
	pub establishing: bool,
	/// Why the last construction for `generation` failed.
	pub error: Option<ConnectError>,
}

impl ConnectionState {
	/// The handle, if present and not mid-establishment.
	pub fn ready(&self) -> Option<&ConnectionHandle> {
		if self.establishing {
			None
		} else {
			self.handle.as_ref()
		}
	}
}

/// What `ConnectionManager::begin` decided for an identity.
enum Step {
	/// Already the target under this generation.
	Reuse(u64),
	/// Signed out; nothing to construct.
	Cleared,
	/// New generation; a handle must be constructed.
	Connect(u64, Identity),
}

/// Identity the current generation was created for.
struct Target {
	generation: u64,
	identity: Option<Identity>,
}

/// Owns the single live [`ConnectionHandle`].
///
/// `target` and the published state are only changed together under the
/// `target` lock, so a reader never sees a handle from an older generation
/// than the one `target` names.
pub struct ConnectionManager {
	connector: Arc<dyn Connector>,
	target: Mutex<Target>,
	state: watch::Sender<ConnectionState>,
}

impl ConnectionManager {
	pub fn new(connector: Arc<dyn Connector>) -> Self {
		let (state, _) = watch::channel(ConnectionState::default());
		Self {
			connector,
			target: Mutex::new(Target {
				generation: 0,
				identity: None,
			}),
			state,
		}
	}

	/// Current published state.
	pub fn state(&self) -> ConnectionState {
		self.state.borrow().clone()
	}

	/// Ready handle, if any.
	pub fn handle(&self) -> Option<ConnectionHandle> {
		self.state.borrow().ready().cloned()
	}

	/// Generation of the latest identity change.
	pub fn generation(&self) -> u64 {
		self.target.lock().generation
	}

	pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
		self.state.subscribe()
	}

	/// Points the manager at `identity` and returns the settled state.
	///
	/// - `None` drops the handle immediately.
	/// - The identity already connected (or connecting) is reused; the call
	///   waits for the in-flight construction instead of starting another.
	/// - Anything else starts a new generation and constructs a handle. If a
	///   newer identity arrives while this construction is in flight, its
	///   result is discarded and the returned state reflects the newer one.
	pub async fn set_identity(&self, identity: Option<Identity>) -> ConnectionState {
		match self.begin(identity) {
			Step::Reuse(generation) => self.settled(generation).await,
			Step::Cleared => self.state(),
			Step::Connect(generation, identity) => self.establish(generation, identity).await,
		}
	}

	/// Follows identity changes from an [`crate::IdentityProvider`].
	///
	/// Generations are minted here, in observation order; only the
	/// construction runs on its own task, so a slow one never delays a newer
	/// identity and can never publish over it.
	pub fn follow(
		self: &Arc<Self>,
		mut session: watch::Receiver<SessionSnapshot>,
	) -> JoinHandle<()> {
		let manager = Arc::clone(self);
		tokio::spawn(async move {
			let mut last = None;
			loop {
				let identity = session.borrow_and_update().identity.clone();
				if identity != last {
					last = identity.clone();
					if let Step::Connect(generation, identity) = manager.begin(identity) {
						let manager = Arc::clone(&manager);
						tokio::spawn(async move {
							manager.establish(generation, identity).await;
						});
					}
				}
				if session.changed().await.is_err() {
					debug!("identity provider dropped; connection follower stopping");
					return;
				}
			}
		})
	}

	/// Records `identity` as the target, bumping the generation unless it is
	/// already the target.
	fn begin(&self, identity: Option<Identity>) -> Step {
		let mut target = self.target.lock();
		let failed = self.state.borrow().error.is_some();
		if target.identity == identity && !failed && target.generation != 0 {
			return Step::Reuse(target.generation);
		}

		target.generation += 1;
		target.identity = identity.clone();
		let generation = target.generation;
		self.state.send_replace(ConnectionState {
			generation,
			handle: None,
			establishing: identity.is_some(),
			error: None,
		});

		match identity {
			Some(identity) => Step::Connect(generation, identity),
			None => {
				info!(generation, "no identity; connection dropped");
				Step::Cleared
			}
		}
	}

	/// Constructs the handle for `generation` and publishes it if still current.
	async fn establish(&self, generation: u64, identity: Identity) -> ConnectionState {
		debug!(generation, principal = %identity.principal(), "establishing connection");
		let result = self.connector.connect(&identity).await;
		match self.publish(generation, &identity, result) {
			Some(state) => state,
			None => self.settled_latest().await,
		}
	}

	/// Publishes a construction result. `None` if `generation` is stale.
	fn publish(
		&self,
		generation: u64,
		identity: &Identity,
		result: furrow_backend::Result<Arc<dyn FarmBackend>>,
	) -> Option<ConnectionState> {
		let target = self.target.lock();
		if target.generation != generation {
			debug!(
				generation,
				current = target.generation,
				principal = %identity.principal(),
				"discarding stale connection"
			);
			return None;
		}

		let next = match result {
			Ok(backend) => {
				info!(generation, principal = %identity.principal(), "connection ready");
				ConnectionState {
					generation,
					handle: Some(ConnectionHandle {
						generation,
						principal: identity.principal().clone(),
						backend,
					}),
					establishing: false,
					error: None,
				}
			}
			Err(source) => {
				warn!(
					generation,
					principal = %identity.principal(),
					error = %source,
					"connection failed"
				);
				ConnectionState {
					generation,
					handle: None,
					establishing: false,
					error: Some(ConnectError {
						principal: identity.principal().clone(),
						source,
					}),
				}
			}
		};
		self.state.send_replace(next.clone());
		Some(next)
	}

	/// Waits until `generation` is no longer establishing, or a newer one exists.
	async fn settled(&self, generation: u64) -> ConnectionState {
		let mut rx = self.state.subscribe();
		loop {
			{
				let state = rx.borrow_and_update();
				if state.generation != generation || !state.establishing {
					return state.clone();
				}
			}
			if rx.changed().await.is_err() {
				return self.state();
			}
		}
	}

	/// Waits until whatever generation is current stops establishing.
	async fn settled_latest(&self) -> ConnectionState {
		let mut rx = self.state.subscribe();
		loop {
			{
				let state = rx.borrow_and_update();
				if !state.establishing {
					return state.clone();
				}
			}
			if rx.changed().await.is_err() {
				return self.state();
			}
		}
	}
}

#[cfg(test)]
mod tests;
