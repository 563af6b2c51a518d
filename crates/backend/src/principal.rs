//! Principals and signed-in identities.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Textual id of a signed-in user as understood by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
	/// Wraps a textual principal id.
	pub fn new(text: impl Into<String>) -> Self {
		Self(text.into())
	}

	/// Returns the textual form.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for Principal {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// A signed-in identity: the principal plus the delegation used to authenticate calls.
///
/// Two sign-ins of the same principal carry different delegations and therefore
/// compare unequal, which is what forces a fresh connection after re-login.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
	principal: Principal,
	delegation: String,
}

impl Identity {
	/// Creates an identity from a principal and its bearer delegation.
	pub fn new(principal: Principal, delegation: impl Into<String>) -> Self {
		Self {
			principal,
			delegation: delegation.into(),
		}
	}

	/// The principal this identity authenticates as.
	pub fn principal(&self) -> &Principal {
		&self.principal
	}

	/// Bearer delegation sent with every authenticated call.
	pub fn delegation(&self) -> &str {
		&self.delegation
	}
}

impl fmt::Debug for Identity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Identity")
			.field("principal", &self.principal)
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn identity_debug_hides_delegation() {
		let identity = Identity::new(Principal::new("aaaaa-aa"), "secret-token");
		let rendered = format!("{identity:?}");
		assert!(rendered.contains("aaaaa-aa"));
		assert!(!rendered.contains("secret-token"));
	}

	#[test]
	fn relogin_is_a_different_identity() {
		let principal = Principal::new("2vxsx-fae");
		let first = Identity::new(principal.clone(), "d1");
		let second = Identity::new(principal, "d2");
		assert_ne!(first, second);
		assert_eq!(first.principal(), second.principal());
	}
}
