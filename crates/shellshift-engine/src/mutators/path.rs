use std::sync::Arc;

use anyhow::{Context, Result};
use shellshift_core::InstallationTarget;
use shellshift_system::ConfigStore;
use tracing::info;

use super::{MutationOutput, Mutator};

pub const PATH_STEP: &str = "path-priority";

const PATH_SEPARATOR: char = ';';

/// Moves the runtime directory to the front of the machine PATH.
pub struct PathMutator {
    store: Arc<dyn ConfigStore>,
    key: String,
}

impl PathMutator {
    /// `key` is the store key of the PATH value, e.g.
    /// `HKLM\SYSTEM\...\Environment::Path` for the registry store.
    pub fn new(store: Arc<dyn ConfigStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }
}

impl Mutator for PathMutator {
    fn id(&self) -> &str {
        PATH_STEP
    }

    fn apply(&self, target: &InstallationTarget) -> Result<MutationOutput> {
        let entry = target.path_entry();
        let current = self
            .store
            .read(&self.key)
            .with_context(|| format!("failed to read PATH from {}", self.store.describe()))?
            .unwrap_or_default();

        let updated = prioritize_path_entry(&current, &entry);
        if updated == current {
            return Ok(MutationOutput::skipped(format!(
                "{entry} is already first in PATH"
            )));
        }

        let removed = current
            .split(PATH_SEPARATOR)
            .filter(|existing| same_directory(existing, &entry))
            .count();
        self.store
            .write(&self.key, &updated)
            .with_context(|| format!("failed to write PATH to {}", self.store.describe()))?;

        info!(entry = %entry, removed, "PATH reordered");
        Ok(MutationOutput::success(format!(
            "moved {entry} to the front of PATH (replaced {removed} existing entries)"
        )))
    }
}

/// Returns `path_value` with `dir` first and every other reference to it removed.
///
/// Entries are trimmed and empty entries dropped, so the result is a fixed
/// point: applying it again yields the same string.
pub fn prioritize_path_entry(path_value: &str, dir: &str) -> String {
    let dir = dir.trim();
    let mut entries = vec![dir];
    entries.extend(
        path_value
            .split(PATH_SEPARATOR)
            .map(str::trim)
            .filter(|existing| !existing.is_empty())
            .filter(|existing| !same_directory(existing, dir)),
    );
    entries.join(&PATH_SEPARATOR.to_string())
}

/// Case-insensitive directory comparison ignoring trailing separators and
/// the separator style.
pub fn same_directory(left: &str, right: &str) -> bool {
    normalize_dir(left).eq_ignore_ascii_case(&normalize_dir(right))
}

fn normalize_dir(value: &str) -> String {
    let unified = value.trim().trim_matches('"').replace('/', "\\");
    let trimmed = unified.trim_end_matches('\\');
    if trimmed.is_empty() {
        unified
    } else {
        trimmed.to_string()
    }
}
