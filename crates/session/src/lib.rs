//! Sign-in lifecycle and backend connection management.
//!
//! # Mental model
//!
//! - [`IdentityProvider`] wraps the delegated login service ([`AuthClient`]) and
//!   publishes a [`SessionSnapshot`] whenever the signed-in identity or login
//!   status changes.
//! - [`ConnectionManager`] turns the current identity into at most one live
//!   [`ConnectionHandle`]. It is the only writer of that handle.
//! - [`ConnectionManager::follow`] wires the two together.
//!
//! # Invariants
//!
//! - At most one handle is published at a time, and it belongs to the latest
//!   identity passed to [`ConnectionManager::set_identity`].
//! - Every identity change bumps the connection generation; a construction
//!   started under an older generation never publishes.
//! - Re-setting the identity that is already connected or connecting does not
//!   construct a second handle.
//! - Construction failure publishes `(no handle, not establishing, error)`.

mod connection;
mod identity;

pub use connection::{ConnectError, ConnectionHandle, ConnectionManager, ConnectionState};
pub use identity::{
	AuthClient, AuthError, IdentityProvider, LoginOptions, LoginStatus, SessionSnapshot,
};
