use std::fmt;

use furrow_backend::{FieldId, Principal};

/// Cacheable backend reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryOp {
	CallerProfile,
	FieldsByUser,
	PredictionsByField,
	DiseaseScansByUser,
	ChatHistoryByUser,
}

impl QueryOp {
	/// Cache key prefix.
	pub const fn name(self) -> &'static str {
		match self {
			Self::CallerProfile => "currentUserProfile",
			Self::FieldsByUser => "fields",
			Self::PredictionsByField => "predictions",
			Self::DiseaseScansByUser => "diseaseScans",
			Self::ChatHistoryByUser => "chatHistory",
		}
	}

	/// Remote method backing this read.
	pub const fn method(self) -> &'static str {
		match self {
			Self::CallerProfile => "getCallerUserProfile",
			Self::FieldsByUser => "getFieldsByUser",
			Self::PredictionsByField => "getPredictionsByField",
			Self::DiseaseScansByUser => "getDiseasesByUser",
			Self::ChatHistoryByUser => "getChatHistory",
		}
	}
}

/// Operation plus the ordered parameters that discriminate its result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
	op: QueryOp,
	params: Vec<String>,
}

impl QueryKey {
	pub fn caller_profile() -> Self {
		Self {
			op: QueryOp::CallerProfile,
			params: Vec::new(),
		}
	}

	pub fn fields_by_user(user: &Principal) -> Self {
		Self::with_param(QueryOp::FieldsByUser, user.to_string())
	}

	pub fn predictions_by_field(field: FieldId) -> Self {
		Self::with_param(QueryOp::PredictionsByField, field.to_string())
	}

	pub fn disease_scans_by_user(user: &Principal) -> Self {
		Self::with_param(QueryOp::DiseaseScansByUser, user.to_string())
	}

	pub fn chat_history(user: &Principal) -> Self {
		Self::with_param(QueryOp::ChatHistoryByUser, user.to_string())
	}

	fn with_param(op: QueryOp, param: String) -> Self {
		Self {
			op,
			params: vec![param],
		}
	}

	pub fn op(&self) -> QueryOp {
		self.op
	}

	pub fn params(&self) -> &[String] {
		&self.params
	}
}

impl fmt::Display for QueryKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.op.name())?;
		for param in &self.params {
			write!(f, "/{param}")?;
		}
		Ok(())
	}
}
