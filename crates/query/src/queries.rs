//! Typed reads and writes over the current connection.

use std::future::Future;
use std::sync::Arc;

use furrow_backend::{
	ChatMessage, CropPrediction, DiseaseScan, FarmBackend, Field, FieldId, ImageBlob, Location,
	Principal, ProgressReporter, UserProfile,
};
use furrow_session::{ConnectionHandle, ConnectionManager, ConnectionState};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::validate::{check_image, check_profile, non_empty};
use crate::{Cacheable, NewField, ProfileSetupGate, QueryCache, QueryError, QueryKey, QueryState};

/// Starter prompts offered by the farm assistant chat.
pub const SUGGESTED_QUESTIONS: [&str; 4] = [
	"What is the best time to plant wheat?",
	"How do I control aphids on my crops?",
	"What are the signs of nitrogen deficiency in soil?",
	"How often should I irrigate corn fields?",
];

/// Reads and writes against the farm backend, cached per [`QueryKey`].
///
/// Reads return the settled [`QueryState`] of their key. A read whose result
/// was discarded (superseded, invalidated, or issued before an identity
/// change) returns whatever the entry shows instead, which may be
/// `Pending` or `Disabled`.
pub struct FarmQueries {
	connections: Arc<ConnectionManager>,
	cache: Arc<QueryCache>,
	profile_gate: ProfileSetupGate,
}

impl FarmQueries {
	pub fn new(connections: Arc<ConnectionManager>) -> Self {
		Self::with_cache(connections, Arc::new(QueryCache::new()))
	}

	/// Binds to an existing cache, e.g. one shared with views that subscribe to it.
	pub fn with_cache(connections: Arc<ConnectionManager>, cache: Arc<QueryCache>) -> Self {
		Self {
			connections,
			cache,
			profile_gate: ProfileSetupGate::new(),
		}
	}

	pub fn cache(&self) -> &Arc<QueryCache> {
		&self.cache
	}

	pub fn connections(&self) -> &Arc<ConnectionManager> {
		&self.connections
	}

	/// Keeps the cache in step with the connection.
	///
	/// Every published connection change is forwarded to
	/// [`QueryCache::observe_generation`], so entries of a previous identity
	/// are disabled even when no read runs in between.
	pub fn watch_connection(&self) -> JoinHandle<()> {
		let cache = Arc::clone(&self.cache);
		let mut rx = self.connections.subscribe();
		tokio::spawn(async move {
			loop {
				let generation = rx.borrow_and_update().ready().map(ConnectionHandle::generation);
				cache.observe_generation(generation);
				if rx.changed().await.is_err() {
					debug!("connection manager dropped; cache watcher stopping");
					return;
				}
			}
		})
	}

	pub async fn caller_profile(&self) -> QueryState<Option<UserProfile>> {
		self.read(QueryKey::caller_profile(), |backend| async move {
			backend.get_caller_user_profile().await
		})
		.await
	}

	pub async fn fields_by_user(&self, user: Option<&Principal>) -> QueryState<Vec<Field>> {
		let Some(user) = user.cloned() else {
			return QueryState::Disabled;
		};
		self.read(QueryKey::fields_by_user(&user), move |backend| async move {
			backend.get_fields_by_user(&user).await
		})
		.await
	}

	pub async fn predictions_by_field(
		&self,
		field: Option<FieldId>,
	) -> QueryState<Vec<CropPrediction>> {
		let Some(field) = field else {
			return QueryState::Disabled;
		};
		self.read(QueryKey::predictions_by_field(field), move |backend| async move {
			backend.get_predictions_by_field(field).await
		})
		.await
	}

	pub async fn disease_scans_by_user(
		&self,
		user: Option<&Principal>,
	) -> QueryState<Vec<DiseaseScan>> {
		let Some(user) = user.cloned() else {
			return QueryState::Disabled;
		};
		self.read(QueryKey::disease_scans_by_user(&user), move |backend| async move {
			backend.get_diseases_by_user(&user).await
		})
		.await
	}

	pub async fn chat_history(&self, user: Option<&Principal>) -> QueryState<Vec<ChatMessage>> {
		let Some(user) = user.cloned() else {
			return QueryState::Disabled;
		};
		self.read(QueryKey::chat_history(&user), move |backend| async move {
			backend.get_chat_history(&user).await
		})
		.await
	}

	/// Saves the caller's profile. Invalidates the caller profile read.
	pub async fn save_profile(&self, profile: UserProfile) -> Result<(), QueryError> {
		let profile = check_profile(profile)?;
		self.mutate(
			"saveCallerUserProfile",
			|backend| async move { backend.save_caller_user_profile(profile).await },
			|_| QueryKey::caller_profile(),
		)
		.await
	}

	/// Adds a field owned by the caller. Invalidates the caller's field list.
	pub async fn add_field(
		&self,
		name: &str,
		location: Location,
		notes: &str,
	) -> Result<Field, QueryError> {
		let field = NewField::new(name, location, notes)?;
		self.mutate(
			"addField",
			|backend| async move {
				backend
					.add_field(&field.name, field.location, &field.notes)
					.await
			},
			QueryKey::fields_by_user,
		)
		.await
	}

	/// Requests a crop prediction. Invalidates only that field's predictions.
	pub async fn make_prediction(
		&self,
		field: FieldId,
		crop: &str,
	) -> Result<CropPrediction, QueryError> {
		let crop = non_empty("crop", crop)?;
		self.mutate(
			"makePrediction",
			move |backend| async move { backend.make_prediction(field, &crop).await },
			move |_| QueryKey::predictions_by_field(field),
		)
		.await
	}

	/// Uploads a plant image for disease detection.
	///
	/// `progress` sees `0` before the transfer, whatever the transport reports
	/// while bytes leave, and `100` once the scan is stored. Nothing is
	/// reported when the upload fails before starting. Invalidates the
	/// caller's disease scans.
	pub async fn upload_scan(
		&self,
		field: FieldId,
		plant_type: &str,
		image: ImageBlob,
		progress: ProgressReporter,
	) -> Result<DiseaseScan, QueryError> {
		let plant_type = non_empty("plant type", plant_type)?;
		check_image(&image)?;
		let reporter = progress.clone();
		let scan = self
			.mutate(
				"uploadScan",
				move |backend| async move {
					reporter.report(0);
					backend.upload_scan(field, &plant_type, image, &reporter).await
				},
				QueryKey::disease_scans_by_user,
			)
			.await?;
		progress.report(100);
		Ok(scan)
	}

	/// Posts a chat message. Invalidates the caller's chat history.
	pub async fn send_message(&self, text: &str) -> Result<ChatMessage, QueryError> {
		let text = non_empty("message", text)?;
		self.mutate(
			"sendMessage",
			|backend| async move { backend.send_message(&text).await },
			QueryKey::chat_history,
		)
		.await
	}

	/// Whether the profile setup prompt should open now.
	///
	/// True once per sign-in, when the cached caller profile read has
	/// completed with no profile.
	pub fn needs_profile_setup(&self) -> bool {
		let state = self.sync_generation();
		let Some(handle) = state.ready() else {
			return self.profile_gate.observe(None, &QueryState::Disabled);
		};
		let profile = self.cache.get::<Option<UserProfile>>(&QueryKey::caller_profile());
		self.profile_gate
			.observe(Some((handle.principal(), handle.generation())), &profile)
	}

	async fn read<T, F, Fut>(&self, key: QueryKey, fetch: F) -> QueryState<T>
	where
		T: Cacheable,
		F: FnOnce(Arc<dyn FarmBackend>) -> Fut,
		Fut: Future<Output = furrow_backend::Result<T>>,
	{
		let state = self.sync_generation();
		let Some(handle) = state.ready().cloned() else {
			match &state.error {
				Some(error) => self.cache.reject(&key, QueryError::ConnectionFailed(error.clone())),
				None => self.cache.disable(&key),
			}
			return self.cache.get(&key);
		};

		let generation = handle.generation();
		if let Some(data) = self.cache.fresh::<T>(&key, generation) {
			trace!(%key, generation, "query cache hit");
			return QueryState::Success(data);
		}

		let ticket = self.cache.begin(&key, generation);
		let result = fetch(Arc::clone(handle.backend()))
			.await
			.map(Cacheable::wrap)
			.map_err(|source| {
				warn!(%key, error = %source, "query failed");
				QueryError::RemoteCallFailed {
					operation: key.op().method(),
					source,
				}
			});

		self.sync_generation();
		self.cache.settle(ticket, result);
		self.cache.get(&key)
	}

	async fn mutate<T, F, Fut>(
		&self,
		operation: &'static str,
		call: F,
		affected: impl FnOnce(&Principal) -> QueryKey,
	) -> Result<T, QueryError>
	where
		F: FnOnce(Arc<dyn FarmBackend>) -> Fut,
		Fut: Future<Output = furrow_backend::Result<T>>,
	{
		let handle = self.ready_handle()?;
		let value = call(Arc::clone(handle.backend())).await.map_err(|source| {
			warn!(operation, principal = %handle.principal(), error = %source, "mutation failed");
			QueryError::RemoteCallFailed { operation, source }
		})?;

		let key = affected(handle.principal());
		let cached = self.cache.invalidate(&key);
		debug!(operation, %key, cached, "mutation applied");
		Ok(value)
	}

	fn ready_handle(&self) -> Result<ConnectionHandle, QueryError> {
		let state = self.connections.state();
		if let Some(handle) = state.ready() {
			return Ok(handle.clone());
		}
		Err(match state.error {
			Some(error) => QueryError::ConnectionFailed(error),
			None => QueryError::ConnectionUnavailable,
		})
	}

	fn sync_generation(&self) -> ConnectionState {
		let state = self.connections.state();
		self.cache
			.observe_generation(state.ready().map(ConnectionHandle::generation));
		state
	}
}
