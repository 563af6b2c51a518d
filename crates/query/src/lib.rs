//! Keyed query cache and invalidating mutations for the farm dashboard.
//!
//! # Purpose
//!
//! - Wrap every backend read as a cacheable query keyed by operation and its
//!   discriminating parameters.
//! - Wrap every backend write as a one-shot mutation that invalidates the
//!   reads it affects.
//!
//! # Mental model
//!
//! - [`FarmQueries`] is the entry point. It reads the current
//!   [`furrow_session::ConnectionHandle`] from a
//!   [`furrow_session::ConnectionManager`] and issues calls through it.
//! - [`QueryCache`] holds one entry per [`QueryKey`]. Views subscribe to an
//!   entry with [`QueryCache::subscribe`] and re-read when it goes back to
//!   pending.
//! - Missing parameters (no user id, no field id) never reach the backend:
//!   the read reports [`QueryState::Disabled`].
//!
//! # Key types
//!
//! | Type | Meaning | Constraints |
//! |---|---|---|
//! | [`QueryKey`] | Operation + ordered parameters | Equal keys share one cache entry |
//! | [`QueryState`] | Disabled, pending, success, error | Disabled is not loaded-empty |
//! | [`QueryCache`] | Per-key state + request bookkeeping | Written only by [`FarmQueries`] |
//! | [`FarmQueries`] | Typed reads and writes | Writes fail fast without a ready connection |
//! | [`ProfileSetupGate`] | "No profile yet" detector | Fires once per sign-in |
//!
//! # Invariants
//!
//! - A read with an unmet dependency never invokes the backend.
//! - A fresh `Success` entry for the current connection generation is served
//!   without a backend call until invalidated.
//! - For one key, a result issued earlier never overwrites one issued later.
//! - Results issued before an invalidation, an identity change or a sign-out
//!   are discarded.
//! - Failed writes leave the cache untouched.

mod cache;
mod key;
mod profile;
mod queries;
mod state;
mod validate;

pub use cache::{QueryCache, Ticket};
pub use key::{QueryKey, QueryOp};
pub use profile::{ProfileSetupGate, SignIn};
pub use queries::{FarmQueries, SUGGESTED_QUESTIONS};
pub use state::{Cacheable, QueryData, QueryError, QueryState};
pub use validate::{NewField, ValidationError};
