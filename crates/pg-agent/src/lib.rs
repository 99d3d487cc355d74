//! Agent loop and patch safety subsystem for pg.
//!
//! The model never writes files. It reads the repository through a fixed set of tools
//! and proposes unified diffs, which are validated against the current file contents and
//! queued on the session until the operator applies them.

pub mod agent;
pub mod approval;
pub mod config;
pub mod errors;
pub mod events;
pub mod execution;
pub mod parser;
pub mod patch;
pub mod plan;
pub mod prompts;
pub mod tools;

pub use agent::*;
pub use approval::*;
pub use config::*;
pub use errors::*;
pub use events::*;
pub use execution::*;
pub use parser::*;
pub use patch::*;
pub use plan::*;
pub use tools::*;
