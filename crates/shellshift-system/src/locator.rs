use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::Local;
use semver::Version;
use shellshift_core::{InstallationTarget, ShiftError, StepOutcome, StepRecord, StepSink};
use tracing::{debug, info, warn};

use crate::CommandRunner;

pub const LOCATE_STEP: &str = "locate-runtime";

const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Finds the PowerShell 7 executable among an ordered list of candidates.
///
/// Never mutates anything. Each call to [`InstallationLocator::locate`] emits
/// exactly one step record, whatever the outcome.
pub struct InstallationLocator {
    candidates: Vec<PathBuf>,
    version_probe: Option<Arc<dyn CommandRunner>>,
}

impl InstallationLocator {
    pub fn new(candidates: Vec<PathBuf>) -> Self {
        Self {
            candidates,
            version_probe: None,
        }
    }

    /// Runs `<executable> --version` after a match to fill in the version.
    pub fn with_version_probe(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.version_probe = Some(runner);
        self
    }

    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    /// First candidate that exists and is executable, without side effects.
    pub fn find_first(&self) -> Option<&Path> {
        self.candidates
            .iter()
            .map(PathBuf::as_path)
            .find(|candidate| {
                let found = is_executable_file(candidate);
                debug!(candidate = %candidate.display(), found, "probed candidate");
                found
            })
    }

    pub fn locate(&self, sink: &dyn StepSink) -> Result<InstallationTarget, ShiftError> {
        let started_at = Local::now();

        let Some(executable) = self.find_first() else {
            let candidates: Vec<String> = self
                .candidates
                .iter()
                .map(|candidate| candidate.display().to_string())
                .collect();
            let err = ShiftError::InstallationNotFound { candidates };
            warn!(%err, "runtime not located");
            sink.record(StepRecord::finish(
                LOCATE_STEP,
                started_at,
                StepOutcome::failure(err.to_string()),
                "",
            ));
            return Err(err);
        };

        let version = match &self.version_probe {
            Some(runner) => match probe_version(runner.as_ref(), executable) {
                Ok(version) => version,
                Err(err) => {
                    warn!(error = %format!("{err:#}"), "version probe failed");
                    None
                }
            },
            None => None,
        };

        let target = InstallationTarget::new(executable, version);
        let mut detail = format!("found at {}", target.executable_path.display());
        if let Some(version) = &target.version {
            detail.push_str(&format!(", version {version}"));
        }
        info!(executable = %target.executable_path.display(), version = ?target.version, "runtime located");
        sink.record(StepRecord::finish(
            LOCATE_STEP,
            started_at,
            StepOutcome::Success,
            detail,
        ));
        Ok(target)
    }
}

fn probe_version(runner: &dyn CommandRunner, executable: &Path) -> Result<Option<String>> {
    let mut command = Command::new(executable);
    command.arg("--version");
    let output = runner.run(command, VERSION_PROBE_TIMEOUT)?;
    if !output.success {
        return Err(anyhow!(
            "version probe of {} failed: {}",
            executable.display(),
            output.describe()
        ));
    }
    Ok(parse_version_output(&output.stdout))
}

/// First semantic version in `pwsh --version` style output
/// (`PowerShell 7.4.1`, `v7.5.0-preview.2`, `7.4`).
pub fn parse_version_output(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .map(|token| token.trim_start_matches(['v', 'V']))
        .find_map(|token| {
            Version::parse(token)
                .or_else(|_| Version::parse(&format!("{token}.0")))
                .ok()
        })
        .map(|version| version.to_string())
}

pub fn is_executable_file(path: &Path) -> bool {
    let Ok(metadata) = fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }

    #[cfg(not(unix))]
    {
        true
    }
}
