//! Delegated sign-in.

use std::sync::Arc;

use async_trait::async_trait;
use furrow_backend::{ConnectionConfig, Identity};
use tokio::sync::watch;
use tracing::{info, warn};

/// Errors from the sign-in lifecycle.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
	/// The provider has not finished restoring a previous session.
	#[error("identity provider is still initializing")]
	NotReady,
	/// A login is already running.
	#[error("login already in progress")]
	LoginInProgress,
	/// The delegated login service reported a failure.
	#[error("login provider error: {0}")]
	Provider(String),
}

/// Options passed to the delegated login service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOptions {
	/// URL of the identity provider's login page.
	pub identity_provider: String,
}

impl From<&ConnectionConfig> for LoginOptions {
	fn from(config: &ConnectionConfig) -> Self {
		Self {
			identity_provider: config.identity_provider.clone(),
		}
	}
}

/// The delegated authentication service.
#[async_trait]
pub trait AuthClient: Send + Sync + 'static {
	/// Restores a persisted session, if one is still valid.
	async fn restore(&self) -> Result<Option<Identity>, AuthError>;

	/// Runs the interactive login flow.
	async fn login(&self, options: &LoginOptions) -> Result<Identity, AuthError>;

	/// Ends the persisted session.
	async fn logout(&self) -> Result<(), AuthError>;
}

/// Login lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoginStatus {
	/// Restoring a previous session.
	#[default]
	Initializing,
	LoggedIn,
	LoggedOut,
}

/// What subscribers of [`IdentityProvider::subscribe`] observe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
	pub identity: Option<Identity>,
	pub status: LoginStatus,
	pub logging_in: bool,
}

/// Owns the current identity and publishes changes to it.
pub struct IdentityProvider {
	client: Arc<dyn AuthClient>,
	options: LoginOptions,
	state: watch::Sender<SessionSnapshot>,
}

impl IdentityProvider {
	pub fn new(client: Arc<dyn AuthClient>, options: LoginOptions) -> Self {
		let (state, _) = watch::channel(SessionSnapshot::default());
		Self {
			client,
			options,
			state,
		}
	}

	/// Restores a persisted session and leaves the `Initializing` status.
	///
	/// Restore failures are logged and treated as signed out.
	pub async fn init(&self) {
		let restored = match self.client.restore().await {
			Ok(identity) => identity,
			Err(error) => {
				warn!(%error, "failed to restore session");
				None
			}
		};

		if let Some(identity) = &restored {
			info!(principal = %identity.principal(), "restored session");
		}

		self.state.send_modify(|s| {
			s.status = if restored.is_some() {
				LoginStatus::LoggedIn
			} else {
				LoginStatus::LoggedOut
			};
			s.identity = restored;
		});
	}

	/// Runs the login flow and publishes the new identity on success.
	pub async fn login(&self) -> Result<Identity, AuthError> {
		let mut rejected = None;
		self.state.send_if_modified(|s| {
			if s.status == LoginStatus::Initializing {
				rejected = Some(AuthError::NotReady);
				false
			} else if s.logging_in {
				rejected = Some(AuthError::LoginInProgress);
				false
			} else {
				s.logging_in = true;
				true
			}
		});
		if let Some(error) = rejected {
			return Err(error);
		}

		match self.client.login(&self.options).await {
			Ok(identity) => {
				info!(principal = %identity.principal(), "signed in");
				self.state.send_modify(|s| {
					s.identity = Some(identity.clone());
					s.status = LoginStatus::LoggedIn;
					s.logging_in = false;
				});
				Ok(identity)
			}
			Err(error) => {
				warn!(%error, "login failed");
				self.state.send_modify(|s| s.logging_in = false);
				Err(error)
			}
		}
	}

	/// Signs out. The local identity is cleared even if the provider call fails.
	pub async fn logout(&self) -> Result<(), AuthError> {
		if self.status() == LoginStatus::Initializing {
			return Err(AuthError::NotReady);
		}
		let result = self.client.logout().await;
		if let Err(error) = &result {
			warn!(%error, "provider logout failed; clearing local session anyway");
		}
		self.clear();
		info!("signed out");
		result
	}

	/// Drops the identity after the provider reports the session expired.
	pub fn expire(&self) {
		if self.current_identity().is_some() {
			info!("session expired");
			self.clear();
		}
	}

	pub fn current_identity(&self) -> Option<Identity> {
		self.state.borrow().identity.clone()
	}

	pub fn status(&self) -> LoginStatus {
		self.state.borrow().status
	}

	pub fn is_logging_in(&self) -> bool {
		self.state.borrow().logging_in
	}

	pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
		self.state.subscribe()
	}

	fn clear(&self) {
		self.state.send_modify(|s| {
			s.identity = None;
			s.status = LoginStatus::LoggedOut;
		});
	}
}
