//! Record types exchanged with the backend.
//!
//! These mirror the service's own types. The client treats them as opaque
//! payloads keyed by their ids; validation of stored data happens remotely.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Principal;

/// Nanoseconds since the Unix epoch, as stamped by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
	/// Converts to a UTC date-time, truncating nothing below the nanosecond.
	pub fn to_datetime(self) -> DateTime<Utc> {
		DateTime::from_timestamp_nanos(self.0)
	}
}

/// Backend-assigned field id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldId(pub u64);

impl fmt::Display for FieldId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Caller profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
	pub name: String,
}

/// Geographic coordinates in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
	pub latitude: f64,
	pub longitude: f64,
}

/// A farm field owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
	pub id: FieldId,
	pub owner: Principal,
	pub name: String,
	pub location: Location,
	pub notes: String,
	#[serde(default)]
	pub weather_data: Option<String>,
}

/// Crop-suitability prediction for one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CropPrediction {
	pub id: u64,
	pub field_id: FieldId,
	pub crop: String,
	/// Suitability in percent.
	pub suitability_score: u64,
	pub recommendations: String,
	pub timestamp: Timestamp,
}

/// Reference to an image stored by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
	/// Direct URL the image can be fetched from.
	pub url: String,
}

/// Result of a disease scan on an uploaded crop image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiseaseScan {
	pub id: u64,
	pub field_id: FieldId,
	pub plant_type: String,
	pub image: BlobRef,
	#[serde(default)]
	pub disease: Option<String>,
	#[serde(default)]
	pub severity: Option<String>,
	pub timestamp: Timestamp,
}

/// One chat message in a user's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
	pub id: u64,
	pub sender: Principal,
	pub message: String,
	pub timestamp: Timestamp,
}

/// Image bytes queued for upload.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageBlob {
	bytes: Bytes,
	content_type: String,
}

impl ImageBlob {
	/// Wraps raw image bytes with their MIME type.
	pub fn new(bytes: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
		Self {
			bytes: bytes.into(),
			content_type: content_type.into(),
		}
	}

	pub fn bytes(&self) -> &Bytes {
		&self.bytes
	}

	pub fn content_type(&self) -> &str {
		&self.content_type
	}

	pub fn len(&self) -> usize {
		self.bytes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.bytes.is_empty()
	}
}

impl fmt::Debug for ImageBlob {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ImageBlob")
			.field("len", &self.bytes.len())
			.field("content_type", &self.content_type)
			.finish()
	}
}
