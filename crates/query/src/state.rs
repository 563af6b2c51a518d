//! Query states and the values a cache entry can hold.

use furrow_backend::{BackendError, ChatMessage, CropPrediction, DiseaseScan, Field, UserProfile};
use furrow_session::ConnectError;

use crate::ValidationError;

/// Failures surfaced by reads and writes.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum QueryError {
	/// No authenticated handle is ready.
	#[error("backend connection unavailable")]
	ConnectionUnavailable,
	/// Building the handle failed.
	#[error("backend connection unavailable: {0}")]
	ConnectionFailed(#[source] ConnectError),
	/// The backend rejected the call or the transport failed.
	#[error("{operation} failed: {source}")]
	RemoteCallFailed {
		operation: &'static str,
		#[source]
		source: BackendError,
	},
	/// Caller input violated a precondition; the backend was not called.
	#[error("invalid input: {0}")]
	ValidationFailed(#[from] ValidationError),
}

impl QueryError {
	/// Either connection variant.
	pub fn is_connection_unavailable(&self) -> bool {
		matches!(self, Self::ConnectionUnavailable | Self::ConnectionFailed(_))
	}
}

/// State of one read.
#[derive(Debug, Clone)]
pub enum QueryState<T> {
	/// A dependency is unmet; the read did not and will not execute.
	Disabled,
	/// In flight, or invalidated and waiting for the next read.
	Pending,
	Success(T),
	Error(QueryError),
}

impl<T> QueryState<T> {
	/// `Disabled` or `Pending`: no data to show yet.
	pub fn is_pending(&self) -> bool {
		matches!(self, Self::Disabled | Self::Pending)
	}

	pub fn is_disabled(&self) -> bool {
		matches!(self, Self::Disabled)
	}

	pub fn is_success(&self) -> bool {
		matches!(self, Self::Success(_))
	}

	pub fn data(&self) -> Option<&T> {
		match self {
			Self::Success(data) => Some(data),
			_ => None,
		}
	}

	pub fn error(&self) -> Option<&QueryError> {
		match self {
			Self::Error(error) => Some(error),
			_ => None,
		}
	}

	pub fn into_data(self) -> Option<T> {
		match self {
			Self::Success(data) => Some(data),
			_ => None,
		}
	}

	pub fn map<U>(self, f: impl FnOnce(T) -> U) -> QueryState<U> {
		match self {
			Self::Disabled => QueryState::Disabled,
			Self::Pending => QueryState::Pending,
			Self::Success(data) => QueryState::Success(f(data)),
			Self::Error(error) => QueryState::Error(error),
		}
	}
}

impl QueryState<QueryData> {
	/// Narrows an untyped entry state to `T`.
	///
	/// A payload of another type reads as `Disabled`.
	pub fn typed<T: Cacheable>(&self) -> QueryState<T> {
		match self {
			Self::Disabled => QueryState::Disabled,
			Self::Pending => QueryState::Pending,
			Self::Success(data) => T::peek(data)
				.cloned()
				.map_or(QueryState::Disabled, QueryState::Success),
			Self::Error(error) => QueryState::Error(error.clone()),
		}
	}
}

/// Any value a cache entry can hold.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryData {
	Profile(Option<UserProfile>),
	Fields(Vec<Field>),
	Predictions(Vec<CropPrediction>),
	Scans(Vec<DiseaseScan>),
	Chat(Vec<ChatMessage>),
}

/// Types that can be stored in [`QueryData`].
pub trait Cacheable: Clone + Send + 'static {
	fn wrap(self) -> QueryData;

	fn peek(data: &QueryData) -> Option<&Self>;
}

macro_rules! cacheable {
	($($ty:ty => $variant:ident),* $(,)?) => {
		$(
			impl Cacheable for $ty {
				fn wrap(self) -> QueryData {
					QueryData::$variant(self)
				}

				fn peek(data: &QueryData) -> Option<&Self> {
					match data {
						QueryData::$variant(value) => Some(value),
						_ => None,
					}
				}
			}
		)*
	};
}

cacheable! {
	Option<UserProfile> => Profile,
	Vec<Field> => Fields,
	Vec<CropPrediction> => Predictions,
	Vec<DiseaseScan> => Scans,
	Vec<ChatMessage> => Chat,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn disabled_differs_from_loaded_empty() {
		let disabled: QueryState<Vec<Field>> = QueryState::Disabled;
		let empty: QueryState<Vec<Field>> = QueryState::Success(Vec::new());

		assert!(disabled.is_pending());
		assert!(disabled.data().is_none());
		assert!(!empty.is_pending());
		assert_eq!(empty.data().map(Vec::len), Some(0));
	}

	#[test]
	fn typed_narrows_matching_payload() {
		let state = QueryState::Success(QueryData::Profile(None));
		let profile = state.typed::<Option<UserProfile>>();
		assert!(matches!(profile, QueryState::Success(None)));

		let mismatched = state.typed::<Vec<Field>>();
		assert!(mismatched.is_disabled());
	}
}
