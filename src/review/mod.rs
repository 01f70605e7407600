//! Review workflow: per-group state machine, persisted store and HTTP API.
//!
//! - [`state`]: `ReviewState` transitions (keep set, finish confirmations,
//!   auto-finish) and the on-disk document layout
//! - [`store`]: lock-serialized whole-document persistence
//! - [`api`]: typed request/response contracts over the store
//! - [`server`]: axum adapter for the API

pub mod api;
pub mod server;
pub mod state;
pub mod store;

pub use api::{ApiError, GroupView, ReviewApi};
pub use server::{start as start_server, ServerError, ServerHandle};
pub use state::{ActiveGroup, ReviewError, ReviewPhase, ReviewState, StateDocument};
pub use store::{ReviewStateStore, StoreError, STATE_FILE};
