mod alias;
mod association;
mod demotion;
mod path;
mod terminal;
mod unresolved;

use std::path::PathBuf;

use anyhow::Result;
use shellshift_core::{InstallationTarget, StepOutcome};

pub use alias::{render_alias_shim, DefaultAliasMutator, ALIAS_STEP};
pub use association::{open_command_for, FileAssociationMutator, ASSOCIATION_STEP};
pub use demotion::{DemotionMutator, DEMOTION_STEP};
pub use path::{prioritize_path_entry, same_directory, PathMutator, PATH_STEP};
pub use terminal::{find_profile_guid, TerminalProfileMutator, POWERSHELL_CORE_SOURCE, TERMINAL_STEP};
pub use unresolved::UnresolvedMutator;

/// A unit of system-state change.
///
/// `apply` either reports an outcome or returns an error, which the caller
/// records as a failure with the full context chain.
pub trait Mutator: Send + Sync {
    fn id(&self) -> &str;

    fn apply(&self, target: &InstallationTarget) -> Result<MutationOutput>;
}

/// Where the old runtime ended up after demotion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemotionRecord {
    pub original_path: PathBuf,
    pub backup_path: PathBuf,
    pub already_demoted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationOutput {
    pub outcome: StepOutcome,
    pub detail: String,
    pub demotion: Option<DemotionRecord>,
}

impl MutationOutput {
    pub fn success(detail: impl Into<String>) -> Self {
        Self {
            outcome: StepOutcome::Success,
            detail: detail.into(),
            demotion: None,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            outcome: StepOutcome::skipped(reason),
            detail: String::new(),
            demotion: None,
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            outcome: StepOutcome::failure(reason),
            detail: String::new(),
            demotion: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn with_demotion(mut self, demotion: DemotionRecord) -> Self {
        self.demotion = Some(demotion);
        self
    }
}
