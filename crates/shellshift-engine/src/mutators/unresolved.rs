use anyhow::{anyhow, Result};
use shellshift_core::InstallationTarget;

use super::{MutationOutput, Mutator};

/// Takes the place of a mutator whose configured location could not be
/// expanded, so the step still shows up in the report.
pub struct UnresolvedMutator {
    id: String,
    reason: String,
    skip: bool,
}

impl UnresolvedMutator {
    /// The step fails: its target is required.
    pub fn failing(id: &str, reason: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            reason: reason.into(),
            skip: false,
        }
    }

    /// The step is skipped: its target is optional on this machine.
    pub fn skipping(id: &str, reason: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            reason: reason.into(),
            skip: true,
        }
    }
}

impl Mutator for UnresolvedMutator {
    fn id(&self) -> &str {
        &self.id
    }

    fn apply(&self, _target: &InstallationTarget) -> Result<MutationOutput> {
        if self.skip {
            return Ok(MutationOutput::skipped(self.reason.clone()));
        }
        Err(anyhow!("{}", self.reason))
    }
}
