//! Input checks run before any write reaches the backend.

use furrow_backend::{ImageBlob, Location, UserProfile};

/// Caller input that violates a write precondition.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
	#[error("{0} must not be empty")]
	Empty(&'static str),
	#[error("coordinates out of range: ({latitude}, {longitude})")]
	InvalidCoordinates { latitude: f64, longitude: f64 },
	#[error("expected an image, got {0}")]
	NotAnImage(String),
}

/// A field ready to be added: trimmed name and notes, checked coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct NewField {
	pub name: String,
	pub location: Location,
	pub notes: String,
}

impl NewField {
	pub fn new(name: &str, location: Location, notes: &str) -> Result<Self, ValidationError> {
		Ok(Self {
			name: non_empty("field name", name)?,
			location: check_location(location)?,
			notes: notes.trim().to_string(),
		})
	}
}

pub(crate) fn non_empty(what: &'static str, value: &str) -> Result<String, ValidationError> {
	let trimmed = value.trim();
	if trimmed.is_empty() {
		return Err(ValidationError::Empty(what));
	}
	Ok(trimmed.to_string())
}

pub(crate) fn check_location(location: Location) -> Result<Location, ValidationError> {
	let Location {
		latitude,
		longitude,
	} = location;
	let valid = latitude.is_finite()
		&& longitude.is_finite()
		&& (-90.0..=90.0).contains(&latitude)
		&& (-180.0..=180.0).contains(&longitude);
	if valid {
		Ok(location)
	} else {
		Err(ValidationError::InvalidCoordinates {
			latitude,
			longitude,
		})
	}
}

pub(crate) fn check_image(image: &ImageBlob) -> Result<(), ValidationError> {
	if image.is_empty() {
		return Err(ValidationError::Empty("image"));
	}
	if !image.content_type().starts_with("image/") {
		return Err(ValidationError::NotAnImage(image.content_type().to_string()));
	}
	Ok(())
}

pub(crate) fn check_profile(profile: UserProfile) -> Result<UserProfile, ValidationError> {
	Ok(UserProfile {
		name: non_empty("profile name", &profile.name)?,
	})
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	fn at(latitude: f64, longitude: f64) -> Location {
		Location {
			latitude,
			longitude,
		}
	}

	#[test]
	fn new_field_trims() {
		let field = NewField::new("  North Field ", at(20.59, 78.96), "  loam  ").unwrap();
		assert_eq!(
			field,
			NewField {
				name: "North Field".into(),
				location: at(20.59, 78.96),
				notes: "loam".into(),
			}
		);
	}

	#[test]
	fn blank_name_rejected() {
		assert_eq!(
			NewField::new("   ", at(0.0, 0.0), ""),
			Err(ValidationError::Empty("field name"))
		);
	}

	#[test]
	fn coordinate_bounds() {
		assert!(NewField::new("a", at(90.0, 180.0), "").is_ok());
		assert!(NewField::new("a", at(-90.0, -180.0), "").is_ok());
		assert!(NewField::new("a", at(90.5, 0.0), "").is_err());
		assert!(NewField::new("a", at(0.0, -180.1), "").is_err());
		assert!(NewField::new("a", at(f64::NAN, 0.0), "").is_err());
	}

	#[test]
	fn images_need_bytes_and_image_type() {
		assert!(check_image(&ImageBlob::new(vec![1, 2, 3], "image/png")).is_ok());
		assert_eq!(
			check_image(&ImageBlob::new(Vec::new(), "image/png")),
			Err(ValidationError::Empty("image"))
		);
		assert_eq!(
			check_image(&ImageBlob::new(vec![1], "application/pdf")),
			Err(ValidationError::NotAnImage("application/pdf".into()))
		);
	}
}
