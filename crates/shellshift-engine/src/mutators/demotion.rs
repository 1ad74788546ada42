use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use shellshift_core::{InstallationTarget, ShiftError};
use tracing::info;

use super::{DemotionRecord, MutationOutput, Mutator};

pub const DEMOTION_STEP: &str = "old-runtime-demotion";

/// Renames the old runtime's executable to a backup name in place.
///
/// Never deletes. An existing backup means the work is already done.
pub struct DemotionMutator {
    original_path: PathBuf,
    backup_path: PathBuf,
}

impl DemotionMutator {
    pub fn new(directory: impl Into<PathBuf>, executable: &str, backup_name: &str) -> Self {
        let directory = directory.into();
        Self {
            original_path: directory.join(executable),
            backup_path: directory.join(backup_name),
        }
    }

    fn record(&self, already_demoted: bool) -> DemotionRecord {
        DemotionRecord {
            original_path: self.original_path.clone(),
            backup_path: self.backup_path.clone(),
            already_demoted,
        }
    }
}

impl Mutator for DemotionMutator {
    fn id(&self) -> &str {
        DEMOTION_STEP
    }

    fn apply(&self, _target: &InstallationTarget) -> Result<MutationOutput> {
        if self.backup_path.exists() {
            let reason = ShiftError::AlreadyDemoted {
                backup: self.backup_path.display().to_string(),
            };
            return Ok(MutationOutput::skipped(reason.to_string()).with_demotion(self.record(true)));
        }

        if !self.original_path.exists() {
            return Ok(MutationOutput::skipped(format!(
                "nothing to demote: {} not found",
                self.original_path.display()
            )));
        }

        fs::rename(&self.original_path, &self.backup_path).with_context(|| {
            format!(
                "failed to rename {} to {}",
                self.original_path.display(),
                self.backup_path.display()
            )
        })?;

        info!(backup = %self.backup_path.display(), "old runtime demoted");
        Ok(MutationOutput::success(format!(
            "{} -> {}",
            self.original_path.display(),
            self.backup_path.display()
        ))
        .with_demotion(self.record(false)))
    }
}
