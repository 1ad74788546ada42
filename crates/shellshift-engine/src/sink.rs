use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use shellshift_core::{InstallationReport, OverallOutcome, StepRecord, StepSink};
use tracing::{debug, warn};

/// Append-only log of step records for one run.
///
/// Appends are serialized by a mutex. The sink is consumed by [`ReportSink::seal`];
/// if it is dropped unsealed and a flush path was configured, whatever was
/// recorded so far is written there as a failed report.
#[derive(Debug, Default)]
pub struct ReportSink {
    records: Mutex<Vec<StepRecord>>,
    flush_path: Option<PathBuf>,
    sealed: bool,
}

impl ReportSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flush_path(path: impl Into<PathBuf>) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            flush_path: Some(path.into()),
            sealed: false,
        }
    }

    pub fn snapshot(&self) -> Vec<StepRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes the records gathered so far without sealing.
    pub fn flush_to(&self, path: &Path) -> Result<()> {
        let report = InstallationReport::new(self.snapshot(), None, OverallOutcome::Failure);
        report.write_text(path)
    }

    pub fn seal(mut self, runtime_path: Option<PathBuf>, outcome: OverallOutcome) -> InstallationReport {
        self.sealed = true;
        let records = match self.records.get_mut() {
            Ok(records) => std::mem::take(records),
            Err(poisoned) => std::mem::take(poisoned.into_inner()),
        };
        InstallationReport::new(records, runtime_path, outcome)
    }

    fn append(&self, record: StepRecord) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow!("report sink lock poisoned"))?;
        debug!(step = %record.name, status = record.outcome.as_str(), "step recorded");
        records.push(record);
        Ok(())
    }
}

impl StepSink for ReportSink {
    fn record(&self, record: StepRecord) {
        if let Err(err) = self.append(record) {
            warn!(error = %err, "dropping step record");
        }
    }
}

impl Drop for ReportSink {
    fn drop(&mut self) {
        if self.sealed {
            return;
        }
        let Some(path) = self.flush_path.clone() else {
            return;
        };
        if let Err(err) = self.flush_to(&path) {
            warn!(path = %path.display(), error = %format!("{err:#}"), "failed to flush unsealed report");
        }
    }
}
