use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::{StepOutcome, StepRecord};

pub const REPORT_TITLE: &str = "PowerShell 7 Installation and Configuration Report";

const RULE_WIDTH: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverallOutcome {
    Success,
    PartialSuccess,
    Failure,
}

impl OverallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::PartialSuccess => "partial-success",
            Self::Failure => "failure",
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Success | Self::PartialSuccess => 0,
            Self::Failure => 1,
        }
    }
}

/// Sealed record of one run: ordered steps plus the overall verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationReport {
    pub generated_at: DateTime<Local>,
    pub runtime_path: Option<PathBuf>,
    pub outcome: OverallOutcome,
    pub records: Vec<StepRecord>,
}

impl InstallationReport {
    pub fn new(
        records: Vec<StepRecord>,
        runtime_path: Option<PathBuf>,
        outcome: OverallOutcome,
    ) -> Self {
        Self {
            generated_at: Local::now(),
            runtime_path,
            outcome,
            records,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.outcome.exit_code()
    }

    pub fn record(&self, name: &str) -> Option<&StepRecord> {
        self.records.iter().find(|record| record.name == name)
    }

    pub fn success_count(&self) -> usize {
        self.count_matching(StepOutcome::is_success)
    }

    pub fn skipped_count(&self) -> usize {
        self.count_matching(StepOutcome::is_skipped)
    }

    pub fn failure_count(&self) -> usize {
        self.count_matching(StepOutcome::is_failure)
    }

    fn count_matching(&self, predicate: fn(&StepOutcome) -> bool) -> usize {
        self.records
            .iter()
            .filter(|record| predicate(&record.outcome))
            .count()
    }

    pub fn render_text(&self) -> String {
        let rule = "=".repeat(RULE_WIDTH);
        let mut out = String::new();
        out.push_str(REPORT_TITLE);
        out.push('\n');
        out.push_str(&rule);
        out.push_str("\n\n");

        for record in &self.records {
            out.push_str(&record.render_line());
            out.push('\n');
        }

        out.push('\n');
        out.push_str(&rule);
        out.push('\n');
        out.push_str("Installation Summary:\n");
        let runtime = self
            .runtime_path
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "not found".to_string());
        out.push_str(&format!("PowerShell 7 Path: {runtime}\n"));
        out.push_str(&format!("Overall Outcome: {}\n", self.outcome.as_str()));
        out.push_str(&format!("Total Actions: {}\n", self.records.len()));
        out.push_str(&format!("Successful Actions: {}\n", self.success_count()));
        out.push_str(&format!("Skipped Actions: {}\n", self.skipped_count()));
        out.push_str(&format!("Failed Actions: {}\n", self.failure_count()));
        out
    }

    pub fn write_text(&self, path: &Path) -> Result<()> {
        ensure_parent_dir(path)?;
        fs::write(path, self.render_text().as_bytes())
            .with_context(|| format!("failed to write installation report: {}", path.display()))
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        ensure_parent_dir(path)?;
        let payload =
            serde_json::to_string_pretty(self).context("failed to serialize installation report")?;
        fs::write(path, payload.as_bytes()).with_context(|| {
            format!(
                "failed to write installation report json: {}",
                path.display()
            )
        })
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(())
}
