use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use shellshift_core::{AssociationConfig, InstallationTarget};
use shellshift_system::ConfigStore;
use tracing::{info, warn};

use super::{MutationOutput, Mutator};

pub const ASSOCIATION_STEP: &str = "file-association";

/// Points the `.ps1` open verb at the new runtime.
pub struct FileAssociationMutator {
    store: Arc<dyn ConfigStore>,
    extension_key: String,
    command_key: String,
    prog_id: String,
}

impl FileAssociationMutator {
    pub fn new(store: Arc<dyn ConfigStore>, config: &AssociationConfig) -> Self {
        Self {
            store,
            extension_key: config.extension_key.clone(),
            command_key: config.command_key.clone(),
            prog_id: config.prog_id.clone(),
        }
    }

    /// Best effort: a command key that did not exist before cannot be removed
    /// through the store and is left pointing at the new runtime.
    fn roll_back_command(&self, previous: Option<&str>) {
        let Some(previous) = previous else {
            warn!(key = %self.command_key, "no previous open command to restore");
            return;
        };
        match self.store.write(&self.command_key, previous) {
            Ok(()) => info!(key = %self.command_key, "open command restored"),
            Err(err) => warn!(
                key = %self.command_key,
                error = %format!("{err:#}"),
                "failed to restore open command"
            ),
        }
    }
}

impl Mutator for FileAssociationMutator {
    fn id(&self) -> &str {
        ASSOCIATION_STEP
    }

    fn apply(&self, target: &InstallationTarget) -> Result<MutationOutput> {
        let desired = open_command_for(&target.executable_path);

        let previous_command = self
            .store
            .read(&self.command_key)
            .with_context(|| format!("failed to read open command {}", self.command_key))?;
        let previous_prog_id = self
            .store
            .read(&self.extension_key)
            .with_context(|| format!("failed to read extension mapping {}", self.extension_key))?;

        let command_current = previous_command.as_deref() == Some(desired.as_str());
        let mapping_current = previous_prog_id
            .as_deref()
            .is_some_and(|prog_id| prog_id.eq_ignore_ascii_case(&self.prog_id));
        if command_current && mapping_current {
            return Ok(MutationOutput::skipped(
                ".ps1 files already open with PowerShell 7",
            ));
        }

        if !command_current {
            self.store
                .write(&self.command_key, &desired)
                .with_context(|| format!("failed to set open command {}", self.command_key))?;
        }
        if !mapping_current {
            if let Err(err) = self.store.write(&self.extension_key, &self.prog_id) {
                if !command_current {
                    self.roll_back_command(previous_command.as_deref());
                }
                return Err(err).with_context(|| {
                    format!("failed to map {} to {}", self.extension_key, self.prog_id)
                });
            }
        }

        let previous = previous_command.unwrap_or_else(|| "<none>".to_string());
        info!(previous = %previous, command = %desired, "file association updated");
        Ok(MutationOutput::success(format!(
            "open command set to {desired}; previous handler: {previous}"
        )))
    }
}

pub fn open_command_for(executable: &Path) -> String {
    format!("\"{}\" -File \"%1\"", executable.display())
}
