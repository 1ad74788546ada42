mod executor;
mod mutators;
mod orchestrator;
mod restoration;
mod sink;

pub use executor::{apply_guarded, run_parallel_batch, BatchOutcome};
pub use mutators::{
    find_profile_guid, open_command_for, prioritize_path_entry, render_alias_shim,
    same_directory, DefaultAliasMutator, DemotionMutator, DemotionRecord, FileAssociationMutator,
    MutationOutput, Mutator, PathMutator, TerminalProfileMutator, UnresolvedMutator, ALIAS_STEP, ASSOCIATION_STEP,
    DEMOTION_STEP, PATH_STEP, POWERSHELL_CORE_SOURCE, TERMINAL_STEP,
};
pub use orchestrator::{Orchestrator, RunState, RunSummary};
pub use restoration::{
    generate_restoration, load_plan, record_restoration_failure, plan_path_for, render_restore_script, restore_from_plan,
    restore_old_runtime, sha256_hex, write_restoration_artifacts, RestoreOutcome,
    RESTORATION_STEP,
};
pub use sink::ReportSink;

#[cfg(test)]
mod tests;
