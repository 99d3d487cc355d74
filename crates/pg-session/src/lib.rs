//! Durable, lock-guarded session state for pg.
//!
//! A session records the operator's goal, the patches the model has proposed, and an
//! audit trail of every tool call. Sessions live as JSON documents under the
//! repository's `.pg/` directory.

pub mod errors;
pub mod lock;
pub mod store;
pub mod types;

pub use errors::*;
pub use lock::*;
pub use store::*;
pub use types::*;
