use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use sha2::{Digest, Sha256};
use shellshift_core::{RestorationPlan, ShiftError, StepOutcome, StepRecord, StepSink};
use tracing::info;

use crate::mutators::DemotionRecord;

pub const RESTORATION_STEP: &str = "restoration-script";

const PLAN_SUFFIX: &str = ".plan.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored,
    BackupMissing,
    OriginalPresent,
}

impl RestoreOutcome {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Restored => "Windows PowerShell 5.1 restored",
            Self::BackupMissing => "nothing to restore: backup not found",
            Self::OriginalPresent => "nothing to restore: original already present",
        }
    }
}

/// PowerShell script that moves the backup back under its original name.
///
/// Paths are embedded as absolute single-quoted literals. The script does
/// nothing when the backup is gone or the original already exists.
pub fn render_restore_script(original_path: &Path, backup_path: &Path) -> String {
    let lines = [
        "# Restores Windows PowerShell 5.1 renamed by shellshift.".to_string(),
        "# Run from an elevated prompt.".to_string(),
        String::new(),
        format!("$backup = '{}'", escape_ps_single_quote(backup_path)),
        format!("$original = '{}'", escape_ps_single_quote(original_path)),
        String::new(),
        "if (-not (Test-Path -LiteralPath $backup)) {".to_string(),
        "    Write-Host \"Nothing to restore: backup not found at $backup\"".to_string(),
        "    exit 0".to_string(),
        "}".to_string(),
        "if (Test-Path -LiteralPath $original) {".to_string(),
        "    Write-Host \"Nothing to restore: $original already exists\"".to_string(),
        "    exit 0".to_string(),
        "}".to_string(),
        "Move-Item -LiteralPath $backup -Destination $original -ErrorAction Stop".to_string(),
        "Write-Host \"Windows PowerShell 5.1 restored to $original\"".to_string(),
        String::new(),
    ];
    lines.join("\r\n")
}

pub fn plan_path_for(script_path: &Path) -> PathBuf {
    let mut raw = OsString::from(script_path.as_os_str());
    raw.push(PLAN_SUFFIX);
    PathBuf::from(raw)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Writes the script and its `.plan.json` companion.
pub fn write_restoration_artifacts(
    script_path: &Path,
    demotion: &DemotionRecord,
) -> Result<RestorationPlan> {
    let script_path = absolute_path(script_path)?;
    if let Some(parent) = script_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }

    let script = render_restore_script(&demotion.original_path, &demotion.backup_path);
    fs::write(&script_path, script.as_bytes())
        .with_context(|| format!("failed to write restoration script: {}", script_path.display()))?;

    let plan = RestorationPlan {
        old_runtime_backup_path: demotion.backup_path.clone(),
        old_runtime_original_path: demotion.original_path.clone(),
        generated_script_path: script_path.clone(),
        script_sha256: sha256_hex(script.as_bytes()),
        created_at: Local::now(),
    };
    let plan_path = plan_path_for(&script_path);
    let payload =
        serde_json::to_string_pretty(&plan).context("failed to serialize restoration plan")?;
    fs::write(&plan_path, payload.as_bytes())
        .with_context(|| format!("failed to write restoration plan: {}", plan_path.display()))?;

    Ok(plan)
}

/// Tracked restoration step: one record, success or failure.
pub fn generate_restoration(
    script_path: &Path,
    demotion: &DemotionRecord,
    sink: &dyn StepSink,
) -> Result<RestorationPlan, ShiftError> {
    let started_at = Local::now();
    match write_restoration_artifacts(script_path, demotion) {
        Ok(plan) => {
            info!(script = %plan.generated_script_path.display(), "restoration script written");
            sink.record(StepRecord::finish(
                RESTORATION_STEP,
                started_at,
                StepOutcome::Success,
                restoration_detail(&plan, demotion),
            ));
            Ok(plan)
        }
        Err(err) => Err(record_restoration_failure(
            &script_path.display().to_string(),
            format!("{err:#}"),
            started_at,
            sink,
        )),
    }
}

/// Records the restoration step as failed without touching the filesystem.
pub fn record_restoration_failure(
    path: &str,
    reason: String,
    started_at: DateTime<Local>,
    sink: &dyn StepSink,
) -> ShiftError {
    let err = ShiftError::RestorationWriteFailed {
        path: path.to_string(),
        reason,
    };
    sink.record(StepRecord::finish(
        RESTORATION_STEP,
        started_at,
        StepOutcome::failure(err.to_string()),
        "",
    ));
    err
}

fn restoration_detail(plan: &RestorationPlan, demotion: &DemotionRecord) -> String {
    let mut detail = format!(
        "{} (sha256 {})",
        plan.generated_script_path.display(),
        plan.script_sha256
    );
    if demotion.already_demoted {
        detail.push_str("; backup predates this run");
    }
    detail
}

pub fn load_plan(path: &Path) -> Result<RestorationPlan> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read restoration plan: {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse restoration plan: {}", path.display()))
}

/// Same guard as the generated script, performed in-process.
pub fn restore_old_runtime(original_path: &Path, backup_path: &Path) -> Result<RestoreOutcome> {
    if !backup_path.exists() {
        return Ok(RestoreOutcome::BackupMissing);
    }
    if original_path.exists() {
        return Ok(RestoreOutcome::OriginalPresent);
    }
    fs::rename(backup_path, original_path).with_context(|| {
        format!(
            "failed to rename {} to {}",
            backup_path.display(),
            original_path.display()
        )
    })?;
    Ok(RestoreOutcome::Restored)
}

pub fn restore_from_plan(plan: &RestorationPlan) -> Result<RestoreOutcome> {
    restore_old_runtime(&plan.old_runtime_original_path, &plan.old_runtime_backup_path)
}

fn absolute_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("failed to resolve current directory")?;
    Ok(cwd.join(path))
}

fn escape_ps_single_quote(path: &Path) -> String {
    path.to_string_lossy().replace('\'', "''")
}
