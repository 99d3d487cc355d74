//! Validation and application of unified diffs.

mod apply;
mod hunk;
mod validate;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use apply::{BackendFailure, HostPatchCommand, InProcessPatcher, PatchApplicator, PatchBackend};
pub use hunk::{NULL_DEVICE, ParsedDiff, PatchHunk, PatchHunkLine, parse_unified_diff};
pub use validate::{resolve_target, validate_patch};

/// Which backend `pg apply` uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchBackendKind {
    /// The system `patch` program.
    #[default]
    Host,
    /// [`InProcessPatcher`].
    Builtin,
}

impl PatchBackendKind {
    pub fn backend(self) -> Arc<dyn PatchBackend> {
        match self {
            Self::Host => Arc::new(HostPatchCommand::default()),
            Self::Builtin => Arc::new(InProcessPatcher),
        }
    }
}
