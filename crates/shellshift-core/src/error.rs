use std::time::Duration;

use thiserror::Error;

/// Failure kinds surfaced by the orchestration engine.
///
/// Every variant carries the attempted operation and what the system reported
/// so the message can be copied verbatim into the installation report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShiftError {
    #[error("PowerShell 7 installation not found; probed: {}", .candidates.join(", "))]
    InstallationNotFound { candidates: Vec<String> },

    #[error("package manager provisioning failed: {0}")]
    ProvisioningFailed(String),

    #[error("prerequisite step '{name}' failed: {reason}")]
    PrerequisiteMutationFailed { name: String, reason: String },

    #[error("optional step '{name}' failed: {reason}")]
    OptionalMutationFailed { name: String, reason: String },

    #[error("old runtime already demoted: backup exists at {backup}")]
    AlreadyDemoted { backup: String },

    #[error("failed to write restoration script {path}: {reason}")]
    RestorationWriteFailed { path: String, reason: String },

    #[error("step '{name}' timed out after {timeout:?}")]
    MutatorTimedOut { name: String, timeout: Duration },
}
