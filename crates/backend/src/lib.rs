//! Client-side contract for the farm dashboard backend service.
//!
//! The backend is an external actor-style service that owns every durable
//! record (profiles, fields, predictions, disease scans, chat). This crate
//! only describes how the dashboard talks to it:
//!
//! - [`FarmBackend`]: one async method per remote operation.
//! - [`Connector`]: builds an authenticated [`FarmBackend`] for one [`Identity`].
//! - [`HttpConnector`] / [`HttpBackend`]: the production transport over HTTP.
//! - [`ConnectionConfig`]: endpoint and network selection.
//! - [`ProgressReporter`]: upload progress sink for [`FarmBackend::upload_scan`].
//!
//! Prediction scoring, disease detection and assistant replies all happen
//! behind the remote boundary; nothing here computes them.

mod config;
mod http;
mod principal;
mod progress;
mod records;
mod service;

pub use config::{ConfigError, ConnectionConfig, Network};
pub use http::{HttpBackend, HttpConnector};
pub use principal::{Identity, Principal};
pub use progress::ProgressReporter;
pub use records::{
	BlobRef, ChatMessage, CropPrediction, DiseaseScan, Field, FieldId, ImageBlob, Location,
	Timestamp, UserProfile,
};
pub use service::{Connector, FarmBackend};

/// A convenient type alias for `Result` with `E` = [`enum@BackendError`].
pub type Result<T, E = BackendError> = std::result::Result<T, E>;

/// Failures reported by a backend call or by building a connection.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum BackendError {
	/// The request never produced a usable response (DNS, TLS, timeout, reset).
	#[error("transport error: {0}")]
	Transport(String),
	/// The service answered with an explicit rejection.
	#[error("{method} rejected: {message}")]
	Rejected {
		/// Remote method name.
		method: String,
		/// Rejection message from the service.
		message: String,
	},
	/// The service answered, but not with something this client can decode.
	#[error("malformed response from {method}: {detail}")]
	Malformed {
		/// Remote method name.
		method: String,
		/// Decoder error.
		detail: String,
	},
	/// The trust bootstrap for a local replica failed.
	#[error("trust bootstrap failed: {0}")]
	Bootstrap(String),
}

impl From<reqwest::Error> for BackendError {
	fn from(err: reqwest::Error) -> Self {
		Self::Transport(err.to_string())
	}
}
