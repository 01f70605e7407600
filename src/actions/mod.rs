//! File actions applied once a group is decided.
//!
//! - [`delete`]: permanent or trash deletion with bounded retry, linear
//!   backoff and `*.pending_delete` quarantine
//! - [`restore`]: collision-safe restore of kept files, removal of the
//!   group folder and of the emptied decision area
//!
//! ```no_run
//! use dupetriage::actions::{RestoreEngine, RetryPolicy};
//!
//! let engine = RestoreEngine::new(RetryPolicy::default()).with_trash(true);
//! # let _ = engine;
//! ```

pub mod delete;
pub mod restore;

pub use delete::{
    delete_to_trash, delete_with_retry, pending_delete_path, permanent_delete,
    remove_dir_with_retry, DeleteError, DeleteOutcome, RetryPolicy, PENDING_DELETE_SUFFIX,
};
pub use restore::{RestoreEngine, RestoreError, RestoreReport};
