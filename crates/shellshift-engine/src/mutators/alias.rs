use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use shellshift_core::InstallationTarget;

use super::{MutationOutput, Mutator};

pub const ALIAS_STEP: &str = "default-alias";

/// Writes a `<name>.cmd` shim so the bare command starts the new runtime.
pub struct DefaultAliasMutator {
    directory: PathBuf,
    command_name: String,
}

impl DefaultAliasMutator {
    pub fn new(directory: impl Into<PathBuf>, command_name: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            command_name: command_name.into(),
        }
    }

    pub fn shim_path(&self) -> PathBuf {
        self.directory.join(format!("{}.cmd", self.command_name))
    }
}

impl Mutator for DefaultAliasMutator {
    fn id(&self) -> &str {
        ALIAS_STEP
    }

    fn apply(&self, target: &InstallationTarget) -> Result<MutationOutput> {
        let shim_path = self.shim_path();
        let shim = render_alias_shim(&target.executable_path);

        match fs::read_to_string(&shim_path) {
            Ok(existing) if existing == shim => {
                return Ok(MutationOutput::skipped(format!(
                    "{} already starts PowerShell 7",
                    shim_path.display()
                )));
            }
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read shim: {}", shim_path.display()));
            }
        }

        fs::write(&shim_path, shim.as_bytes())
            .with_context(|| format!("failed to write shim: {}", shim_path.display()))?;
        Ok(MutationOutput::success(format!(
            "{} -> {}",
            shim_path.display(),
            target.executable_path.display()
        )))
    }
}

pub fn render_alias_shim(executable: &Path) -> String {
    format!("@echo off\r\n\"{}\" %*\r\n", executable.display())
}
