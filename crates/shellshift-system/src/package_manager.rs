use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use shellshift_core::{InstallConfig, ShiftError, StepOutcome, StepRecord, StepSink};
use tracing::{info, warn};

use crate::{CommandOutput, CommandRunner};

pub const INSTALL_STEP: &str = "install-runtime";

const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStatus {
    Installed,
    AlreadyInstalled,
}

/// Opaque package-manager invocation that installs the new runtime.
///
/// Output is never parsed beyond searching for the configured marker strings.
pub struct PackageManager {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    failure_markers: Vec<String>,
    already_installed_markers: Vec<String>,
    runner: Arc<dyn CommandRunner>,
}

impl PackageManager {
    pub fn from_config(config: &InstallConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            failure_markers: config.failure_markers.clone(),
            already_installed_markers: config.already_installed_markers.clone(),
            runner,
        }
    }

    pub fn command_line(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }

    pub fn provision(&self, sink: &dyn StepSink) -> Result<ProvisionStatus, ShiftError> {
        let started_at = Local::now();
        let result = self.run_install();

        let (outcome, detail) = match &result {
            Ok((ProvisionStatus::Installed, manager_version)) => (
                StepOutcome::Success,
                format!("{} ({manager_version})", self.command_line()),
            ),
            Ok((ProvisionStatus::AlreadyInstalled, manager_version)) => (
                StepOutcome::skipped("PowerShell 7 is already installed and current"),
                format!("{} ({manager_version})", self.command_line()),
            ),
            Err(err) => (StepOutcome::failure(err.to_string()), self.command_line()),
        };
        sink.record(StepRecord::finish(INSTALL_STEP, started_at, outcome, detail));

        result.map(|(status, _)| status)
    }

    fn run_install(&self) -> Result<(ProvisionStatus, String), ShiftError> {
        let manager_version = self.check_available()?;

        let mut command = Command::new(&self.program);
        command.args(&self.args);
        info!(command = %self.command_line(), "running package manager");
        let output = self.runner.run(command, self.timeout).map_err(|err| {
            ShiftError::ProvisioningFailed(format!("{}: {err:#}", self.command_line()))
        })?;

        let status = self.classify(&output)?;
        Ok((status, manager_version))
    }

    fn check_available(&self) -> Result<String, ShiftError> {
        let mut command = Command::new(&self.program);
        command.arg("--version");
        let output = self
            .runner
            .run(command, AVAILABILITY_TIMEOUT)
            .map_err(|err| {
                ShiftError::ProvisioningFailed(format!(
                    "{} is not available: {err:#}",
                    self.program
                ))
            })?;
        if !output.success {
            return Err(ShiftError::ProvisioningFailed(format!(
                "{} is not available: {}",
                self.program,
                output.describe()
            )));
        }
        Ok(format!("{} {}", self.program, output.stdout.trim()))
    }

    pub fn classify(&self, output: &CommandOutput) -> Result<ProvisionStatus, ShiftError> {
        let text = output.combined_text();
        if output.timed_out {
            return Err(ShiftError::ProvisioningFailed(format!(
                "{} timed out after {}s",
                self.command_line(),
                self.timeout.as_secs()
            )));
        }

        if let Some(marker) = find_marker(&text, &self.already_installed_markers) {
            info!(marker, "package already installed");
            return Ok(ProvisionStatus::AlreadyInstalled);
        }

        if let Some(marker) = find_marker(&text, &self.failure_markers) {
            warn!(marker, "package manager reported failure");
            return Err(ShiftError::ProvisioningFailed(format!(
                "{} reported '{marker}': {}",
                self.command_line(),
                output.describe()
            )));
        }

        if !output.success {
            return Err(ShiftError::ProvisioningFailed(format!(
                "{}: {}",
                self.command_line(),
                output.describe()
            )));
        }

        Ok(ProvisionStatus::Installed)
    }
}

fn find_marker<'a>(text: &str, markers: &'a [String]) -> Option<&'a str> {
    let haystack = text.to_ascii_lowercase();
    markers
        .iter()
        .map(String::as_str)
        .filter(|marker| !marker.trim().is_empty())
        .find(|marker| haystack.contains(&marker.to_ascii_lowercase()))
}
