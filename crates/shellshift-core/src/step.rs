use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Result of a single tracked step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum StepOutcome {
    Success,
    Skipped(String),
    Failure(String),
}

impl StepOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped(reason.into())
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure(reason.into())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Skipped(_) => "SKIPPED",
            Self::Failure(_) => "FAILED",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Success => None,
            Self::Skipped(reason) | Self::Failure(reason) => Some(reason),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }
}

/// One immutable line of the installation report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub outcome: StepOutcome,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

impl StepRecord {
    /// Closes a step that began at `started_at`, stamping the finish time now.
    pub fn finish(
        name: impl Into<String>,
        started_at: DateTime<Local>,
        outcome: StepOutcome,
        detail: impl Into<String>,
    ) -> Self {
        let finished_at = Local::now().max(started_at);
        Self {
            name: name.into(),
            started_at,
            finished_at,
            outcome,
            detail: detail.into(),
        }
    }

    /// Renders the record as a single report line:
    /// `[YYYY-MM-DD HH:MM:SS] STATUS: name - reason; detail`.
    pub fn render_line(&self) -> String {
        let mut line = format!(
            "[{}] {}: {}",
            self.finished_at.format("%Y-%m-%d %H:%M:%S"),
            self.outcome.as_str(),
            self.name
        );

        let mut notes = Vec::new();
        if let Some(reason) = self.outcome.reason() {
            if !reason.trim().is_empty() {
                notes.push(reason.trim().replace('\n', " "));
            }
        }
        if !self.detail.trim().is_empty() {
            notes.push(self.detail.trim().replace('\n', " "));
        }
        if !notes.is_empty() {
            line.push_str(" - ");
            line.push_str(&notes.join("; "));
        }
        line
    }
}

/// Anything that accepts finished step records.
pub trait StepSink: Send + Sync {
    fn record(&self, record: StepRecord);
}
