use std::sync::Arc;

use async_trait::async_trait;

use crate::{
	ChatMessage, CropPrediction, DiseaseScan, Field, FieldId, Identity, ImageBlob, Location,
	Principal, ProgressReporter, Result, UserProfile,
};

/// The remote farm service, one method per backend operation.
///
/// Implementations are bound to exactly one [`Identity`]; "caller" methods act
/// on behalf of that identity. The production implementation is
/// [`crate::HttpBackend`]; tests substitute in-memory doubles.
#[async_trait]
pub trait FarmBackend: Send + Sync + 'static {
	/// Profile of the calling identity, `None` if it has never been saved.
	async fn get_caller_user_profile(&self) -> Result<Option<UserProfile>>;

	async fn save_caller_user_profile(&self, profile: UserProfile) -> Result<()>;

	async fn get_fields_by_user(&self, user: &Principal) -> Result<Vec<Field>>;

	async fn add_field(&self, name: &str, location: Location, notes: &str) -> Result<Field>;

	async fn get_predictions_by_field(&self, field: FieldId) -> Result<Vec<CropPrediction>>;

	async fn make_prediction(&self, field: FieldId, crop: &str) -> Result<CropPrediction>;

	async fn get_diseases_by_user(&self, user: &Principal) -> Result<Vec<DiseaseScan>>;

	/// Uploads an image and returns the scan the service produced for it.
	///
	/// Progress is best-effort: implementations report into `progress` as bytes
	/// leave, but a dropped or ignored report never fails the upload.
	async fn upload_scan(
		&self,
		field: FieldId,
		plant_type: &str,
		image: ImageBlob,
		progress: &ProgressReporter,
	) -> Result<DiseaseScan>;

	async fn get_chat_history(&self, user: &Principal) -> Result<Vec<ChatMessage>>;

	/// Appends a message to the caller's chat history. Any assistant reply is
	/// produced by the service and shows up in later history reads.
	async fn send_message(&self, text: &str) -> Result<ChatMessage>;
}

/// Builds an authenticated [`FarmBackend`] for one identity.
///
/// Construction may involve network round-trips (trust bootstrap) and must
/// finish them before returning.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
	async fn connect(&self, identity: &Identity) -> Result<Arc<dyn FarmBackend>>;
}
