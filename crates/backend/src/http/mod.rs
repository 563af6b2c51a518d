//! HTTP transport for the farm backend.
//!
//! Calls are `POST {host}/api/v2/canister/{canister}/call/{method}` with the
//! positional arguments as a JSON array and the identity's delegation as a
//! bearer token. Replies are `{"ok": value}` or `{"err": message}`. Image
//! uploads stream the raw bytes to `.../upload/uploadScan` in chunks so that
//! progress can be reported while the body is being sent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use futures::stream;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info};
use url::Url;

use crate::{
	BackendError, ChatMessage, ConnectionConfig, Connector, CropPrediction, DiseaseScan,
	FarmBackend, Field, FieldId, Identity, ImageBlob, Location, Principal, ProgressReporter,
	Result, UserProfile,
};

/// Reply envelope used by every backend method.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Reply<T> {
	Ok(T),
	Err(String),
}

/// Replica status document, only the part the trust bootstrap needs.
#[derive(Debug, Deserialize)]
struct ReplicaStatus {
	root_key: String,
}

/// Builds [`HttpBackend`] handles from a [`ConnectionConfig`].
#[derive(Debug, Clone)]
pub struct HttpConnector {
	config: ConnectionConfig,
	host: Url,
	client: Client,
}

impl HttpConnector {
	/// Creates a connector, validating the configured host.
	pub fn new(config: ConnectionConfig) -> std::result::Result<Self, crate::ConfigError> {
		let host = config.host_url()?;
		Ok(Self {
			config,
			host,
			client: Client::new(),
		})
	}

	pub fn config(&self) -> &ConnectionConfig {
		&self.config
	}

	async fn fetch_root_key(&self) -> Result<Vec<u8>> {
		let url = join(&self.host, &["api", "v2", "status"])?;
		let mut request = self.client.get(url);
		if let Some(timeout) = self.config.request_timeout() {
			request = request.timeout(timeout);
		}
		let response = request
			.send()
			.await
			.map_err(|e| BackendError::Bootstrap(e.to_string()))?;
		if !response.status().is_success() {
			return Err(BackendError::Bootstrap(format!("status {}", response.status())));
		}
		let status: ReplicaStatus = response
			.json()
			.await
			.map_err(|e| BackendError::Bootstrap(format!("invalid status document: {e}")))?;
		STANDARD
			.decode(status.root_key.as_bytes())
			.map_err(|e| BackendError::Bootstrap(format!("invalid root key: {e}")))
	}
}

#[async_trait]
impl Connector for HttpConnector {
	async fn connect(&self, identity: &Identity) -> Result<Arc<dyn FarmBackend>> {
		let root_key = if self.config.network.needs_trust_bootstrap() {
			let key = self.fetch_root_key().await?;
			debug!(len = key.len(), "fetched replica root key");
			Some(key)
		} else {
			None
		};

		info!(
			principal = %identity.principal(),
			canister = %self.config.canister_id,
			host = %self.host,
			"connected to farm backend"
		);

		Ok(Arc::new(HttpBackend {
			client: self.client.clone(),
			host: self.host.clone(),
			canister_id: self.config.canister_id.clone(),
			identity: identity.clone(),
			root_key,
			timeout: self.config.request_timeout(),
			chunk_size: self.config.chunk_size(),
		}))
	}
}

/// Authenticated HTTP handle for one identity.
pub struct HttpBackend {
	client: Client,
	host: Url,
	canister_id: String,
	identity: Identity,
	root_key: Option<Vec<u8>>,
	timeout: Option<Duration>,
	chunk_size: usize,
}

impl std::fmt::Debug for HttpBackend {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("HttpBackend")
			.field("host", &self.host.as_str())
			.field("canister_id", &self.canister_id)
			.field("principal", self.identity.principal())
			.field("bootstrapped", &self.root_key.is_some())
			.finish_non_exhaustive()
	}
}

impl HttpBackend {
	/// Root key obtained by the trust bootstrap, if the network needed one.
	pub fn root_key(&self) -> Option<&[u8]> {
		self.root_key.as_deref()
	}

	fn endpoint(&self, kind: &str, method: &str) -> Result<Url> {
		join(
			&self.host,
			&["api", "v2", "canister", &self.canister_id, kind, method],
		)
	}

	async fn call<T: DeserializeOwned>(&self, method: &str, args: Value) -> Result<T> {
		let url = self.endpoint("call", method)?;
		let mut request = self
			.client
			.post(url)
			.header(AUTHORIZATION, format!("Bearer {}", self.identity.delegation()))
			.json(&args);
		if let Some(timeout) = self.timeout {
			request = request.timeout(timeout);
		}
		let response = request.send().await?;
		decode_response(method, response).await
	}
}

#[async_trait]
impl FarmBackend for HttpBackend {
	async fn get_caller_user_profile(&self) -> Result<Option<UserProfile>> {
		self.call("getCallerUserProfile", json!([])).await
	}

	async fn save_caller_user_profile(&self, profile: UserProfile) -> Result<()> {
		self.call("saveCallerUserProfile", json!([profile])).await
	}

	async fn get_fields_by_user(&self, user: &Principal) -> Result<Vec<Field>> {
		self.call("getFieldsByUser", json!([user])).await
	}

	async fn add_field(&self, name: &str, location: Location, notes: &str) -> Result<Field> {
		self.call("addField", json!([name, location, notes])).await
	}

	async fn get_predictions_by_field(&self, field: FieldId) -> Result<Vec<CropPrediction>> {
		self.call("getPredictionsByField", json!([field])).await
	}

	async fn make_prediction(&self, field: FieldId, crop: &str) -> Result<CropPrediction> {
		self.call("makePrediction", json!([field, crop])).await
	}

	async fn get_diseases_by_user(&self, user: &Principal) -> Result<Vec<DiseaseScan>> {
		self.call("getDiseasesByUser", json!([user])).await
	}

	async fn upload_scan(
		&self,
		field: FieldId,
		plant_type: &str,
		image: ImageBlob,
		progress: &ProgressReporter,
	) -> Result<DiseaseScan> {
		const METHOD: &str = "uploadScan";

		let mut url = self.endpoint("upload", METHOD)?;
		url.query_pairs_mut()
			.append_pair("fieldId", &field.to_string())
			.append_pair("plantType", plant_type);

		let total = image.len();
		let chunks = split_chunks(image.bytes(), self.chunk_size);
		let reporter = progress.clone();
		let mut sent = 0usize;
		let body = stream::iter(chunks.into_iter().map(move |chunk| {
			sent += chunk.len();
			reporter.report_bytes(sent, total);
			Ok::<Bytes, std::io::Error>(chunk)
		}));

		let mut request = self
			.client
			.post(url)
			.header(AUTHORIZATION, format!("Bearer {}", self.identity.delegation()))
			.header(CONTENT_TYPE, image.content_type())
			.body(reqwest::Body::wrap_stream(body));
		if let Some(timeout) = self.timeout {
			request = request.timeout(timeout);
		}
		debug!(%field, total, "uploading scan image");
		let response = request.send().await?;
		decode_response(METHOD, response).await
	}

	async fn get_chat_history(&self, user: &Principal) -> Result<Vec<ChatMessage>> {
		self.call("getChatHistory", json!([user])).await
	}

	async fn send_message(&self, text: &str) -> Result<ChatMessage> {
		self.call("sendMessage", json!([text])).await
	}
}

async fn decode_response<T: DeserializeOwned>(
	method: &str,
	response: reqwest::Response,
) -> Result<T> {
	let status = response.status();
	let body = response.bytes().await?;
	if !status.is_success() {
		return Err(BackendError::Rejected {
			method: method.to_string(),
			message: format!("status {status}: {}", String::from_utf8_lossy(&body)),
		});
	}
	decode_reply(method, &body)
}

fn decode_reply<T: DeserializeOwned>(method: &str, body: &[u8]) -> Result<T> {
	let reply: Reply<T> = serde_json::from_slice(body).map_err(|e| BackendError::Malformed {
		method: method.to_string(),
		detail: e.to_string(),
	})?;
	match reply {
		Reply::Ok(value) => Ok(value),
		Reply::Err(message) => Err(BackendError::Rejected {
			method: method.to_string(),
			message,
		}),
	}
}

fn join(base: &Url, segments: &[&str]) -> Result<Url> {
	let mut url = base.clone();
	url.path_segments_mut()
		.map_err(|()| BackendError::Transport(format!("host cannot be a base: {base}")))?
		.pop_if_empty()
		.extend(segments);
	Ok(url)
}

fn split_chunks(bytes: &Bytes, chunk_size: usize) -> Vec<Bytes> {
	let chunk_size = chunk_size.max(1);
	(0..bytes.len())
		.step_by(chunk_size)
		.map(|start| bytes.slice(start..(start + chunk_size).min(bytes.len())))
		.collect()
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn reply_ok_decodes_payload() {
		let fields: Vec<Field> = decode_reply(
			"getFieldsByUser",
			br#"{"ok":[{"id":1,"owner":"u","name":"A","location":{"latitude":1.0,"longitude":2.0},"notes":""}]}"#,
		)
		.unwrap();
		assert_eq!(fields.len(), 1);
		assert_eq!(fields[0].id, FieldId(1));
	}

	#[test]
	fn reply_err_is_rejection() {
		let err = decode_reply::<Field>("addField", br#"{"err":"unauthorized"}"#).unwrap_err();
		match err {
			BackendError::Rejected { method, message } => {
				assert_eq!(method, "addField");
				assert_eq!(message, "unauthorized");
			}
			other => panic!("unexpected error: {other}"),
		}
	}

	#[test]
	fn null_profile_is_none() {
		let profile: Option<UserProfile> =
			decode_reply("getCallerUserProfile", br#"{"ok":null}"#).unwrap();
		assert_eq!(profile, None);
	}

	#[test]
	fn garbage_is_malformed() {
		let err = decode_reply::<Vec<Field>>("getFieldsByUser", b"<html>").unwrap_err();
		assert!(matches!(err, BackendError::Malformed { .. }));
	}

	#[test]
	fn call_urls_keep_host_path() {
		let base = Url::parse("http://127.0.0.1:8080/").unwrap();
		let url = join(&base, &["api", "v2", "canister", "abc", "call", "addField"]).unwrap();
		assert_eq!(url.as_str(), "http://127.0.0.1:8080/api/v2/canister/abc/call/addField");

		let proxied = Url::parse("https://example.org/farm/").unwrap();
		let url = join(&proxied, &["api", "v2", "status"]).unwrap();
		assert_eq!(url.as_str(), "https://example.org/farm/api/v2/status");
	}

	#[test]
	fn chunks_cover_every_byte() {
		let bytes = Bytes::from(vec![7u8; 10]);
		let chunks = split_chunks(&bytes, 4);
		assert_eq!(chunks.iter().map(Bytes::len).collect::<Vec<_>>(), vec![4, 4, 2]);
		assert!(split_chunks(&Bytes::new(), 4).is_empty());
	}

	#[tokio::test]
	async fn connect_without_bootstrap_builds_handle() {
		let connector = HttpConnector::new(ConnectionConfig::default()).unwrap();
		let identity = Identity::new(Principal::new("2vxsx-fae"), "token");
		let backend = connector.connect(&identity).await;
		assert!(backend.is_ok());
	}
}
