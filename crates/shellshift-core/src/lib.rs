mod config;
mod error;
mod report;
mod step;
mod target;

pub use config::{
    expand_env_vars, AliasConfig, AssociationConfig, DemotionConfig, InstallConfig,
    LocatorConfig, OutputConfig, PathConfig, ShiftConfig, TerminalConfig,
};
pub use error::ShiftError;
pub use report::{InstallationReport, OverallOutcome, REPORT_TITLE};
pub use step::{StepOutcome, StepRecord, StepSink};
pub use target::{InstallationTarget, RestorationPlan};
