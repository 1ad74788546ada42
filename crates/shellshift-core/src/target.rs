use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// The located PowerShell 7 installation. Read-only once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationTarget {
    pub root_path: PathBuf,
    pub executable_path: PathBuf,
    pub version: Option<String>,
}

impl InstallationTarget {
    pub fn new(executable_path: impl Into<PathBuf>, version: Option<String>) -> Self {
        let executable_path = executable_path.into();
        let root_path = executable_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self {
            root_path,
            executable_path,
            version,
        }
    }

    /// Directory entry inserted into PATH, as a string the way PATH stores it.
    pub fn path_entry(&self) -> String {
        self.root_path.display().to_string()
    }
}

/// Everything needed to undo the old-runtime demotion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestorationPlan {
    pub old_runtime_backup_path: PathBuf,
    pub old_runtime_original_path: PathBuf,
    pub generated_script_path: PathBuf,
    pub script_sha256: String,
    pub created_at: DateTime<Local>,
}
