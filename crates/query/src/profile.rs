use furrow_backend::{Principal, UserProfile};
use parking_lot::Mutex;
use tracing::debug;

use crate::QueryState;

/// One sign-in: the principal and the connection generation it was made under.
pub type SignIn<'a> = (&'a Principal, u64);

/// Detects a signed-in user with no saved profile.
///
/// Fires at most once per sign-in. Signing in again, even as the same
/// principal, starts a new connection generation and re-arms it.
#[derive(Debug, Default)]
pub struct ProfileSetupGate {
	prompted: Mutex<Option<(Principal, u64)>>,
}

impl ProfileSetupGate {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns true when the profile setup prompt should be shown now.
	///
	/// Only a loaded `None` profile counts; pending, disabled and failed reads
	/// never prompt.
	pub fn observe(
		&self,
		session: Option<SignIn<'_>>,
		profile: &QueryState<Option<UserProfile>>,
	) -> bool {
		let mut prompted = self.prompted.lock();
		let Some((user, generation)) = session else {
			*prompted = None;
			return false;
		};
		if !matches!(profile, QueryState::Success(None)) {
			return false;
		}
		if prompted
			.as_ref()
			.is_some_and(|(p, g)| p == user && *g == generation)
		{
			return false;
		}
		debug!(principal = %user, generation, "no profile on record; prompting for setup");
		*prompted = Some((user.clone(), generation));
		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fires_once_per_sign_in() {
		let gate = ProfileSetupGate::new();
		let user = Principal::new("u");
		let missing = QueryState::Success(None);

		assert!(!gate.observe(Some((&user, 1)), &QueryState::Pending));
		assert!(gate.observe(Some((&user, 1)), &missing));
		assert!(!gate.observe(Some((&user, 1)), &missing));

		let other = Principal::new("v");
		assert!(gate.observe(Some((&other, 2)), &missing));
	}

	#[test]
	fn existing_profile_never_prompts() {
		let gate = ProfileSetupGate::new();
		let user = Principal::new("u");
		let saved = QueryState::Success(Some(UserProfile {
			name: "Ravi".into(),
		}));
		let failed = QueryState::Error(crate::QueryError::ConnectionUnavailable);
		assert!(!gate.observe(Some((&user, 1)), &saved));
		assert!(!gate.observe(Some((&user, 1)), &failed));
	}

	#[test]
	fn sign_out_rearms() {
		let gate = ProfileSetupGate::new();
		let user = Principal::new("u");
		let missing = QueryState::Success(None);

		assert!(gate.observe(Some((&user, 1)), &missing));
		assert!(!gate.observe(None, &missing));
		assert!(gate.observe(Some((&user, 1)), &missing));
	}

	#[test]
	fn same_principal_signing_in_again_rearms() {
		let gate = ProfileSetupGate::new();
		let user = Principal::new("u");
		let missing = QueryState::Success(None);

		assert!(gate.observe(Some((&user, 1)), &missing));
		// Signed out and back in with no observation in between.
		assert!(gate.observe(Some((&user, 3)), &missing));
		assert!(!gate.observe(Some((&user, 3)), &missing));
	}
}
