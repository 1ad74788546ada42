use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::Local;
use shellshift_core::{
    InstallationReport, InstallationTarget, OverallOutcome, RestorationPlan, ShiftConfig,
    ShiftError, StepOutcome, StepRecord, StepSink,
};
use shellshift_system::{
    CommandRunner, ConfigStore, InstallationLocator, JsonDocumentStore, PackageManager,
    RegistryStore, INSTALL_STEP,
};
use tracing::{info, info_span, warn};

use crate::executor::{apply_guarded, run_parallel_batch};
use crate::mutators::{
    DefaultAliasMutator, DemotionMutator, FileAssociationMutator, MutationOutput, Mutator,
    PathMutator, TerminalProfileMutator, UnresolvedMutator, ALIAS_STEP, DEMOTION_STEP,
    TERMINAL_STEP,
};
use crate::restoration::{generate_restoration, record_restoration_failure};
use crate::ReportSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Start,
    Provisioning,
    Locating,
    PrerequisitesRunning,
    ParallelBatchRunning,
    Demoting,
    RestorationPending,
    Reporting,
    Done(OverallOutcome),
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Start => "starting",
            Self::Provisioning => "installing PowerShell 7",
            Self::Locating => "locating PowerShell 7",
            Self::PrerequisitesRunning => "running prerequisite steps",
            Self::ParallelBatchRunning => "updating PATH, associations, alias and terminal profile",
            Self::Demoting => "demoting Windows PowerShell 5.1",
            Self::RestorationPending => "writing restoration script",
            Self::Reporting => "sealing report",
            Self::Done(outcome) => return write!(f, "done ({})", outcome.as_str()),
        };
        f.write_str(label)
    }
}

/// Everything a finished run produced. The report is sealed.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub report: InstallationReport,
    pub errors: Vec<ShiftError>,
    pub target: Option<InstallationTarget>,
    pub restoration: Option<RestorationPlan>,
    pub states: Vec<RunState>,
}

impl RunSummary {
    pub fn outcome(&self) -> OverallOutcome {
        self.report.outcome
    }

    pub fn exit_code(&self) -> i32 {
        self.report.exit_code()
    }
}

enum RestoreScript {
    Resolved(PathBuf),
    Unresolved { template: String, reason: String },
}

pub struct Orchestrator {
    package_manager: Option<PackageManager>,
    locator: InstallationLocator,
    prerequisites: Vec<Arc<dyn Mutator>>,
    batch: Vec<Arc<dyn Mutator>>,
    demotion: Option<Arc<dyn Mutator>>,
    restore_script: RestoreScript,
    mutator_timeout: Duration,
}

impl Orchestrator {
    pub fn new(locator: InstallationLocator, restore_script_path: impl Into<PathBuf>) -> Self {
        Self {
            package_manager: None,
            locator,
            prerequisites: Vec::new(),
            batch: Vec::new(),
            demotion: None,
            restore_script: RestoreScript::Resolved(restore_script_path.into()),
            mutator_timeout: Duration::from_secs(ShiftConfig::default().mutator_timeout_secs),
        }
    }

    /// Assembles the production pipeline: `reg.exe` for the registry, the
    /// terminal settings file, and the configured package manager.
    ///
    /// Locations that name unset variables do not fail assembly; the affected
    /// step reports the problem when the run reaches it. Only an invalid
    /// `prerequisite_steps` list is rejected here.
    pub fn from_config<F>(
        config: &ShiftConfig,
        lookup: F,
        runner: Arc<dyn CommandRunner>,
        skip_install: bool,
    ) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut locator = InstallationLocator::new(config.candidate_paths(&lookup));
        if config.locator.probe_version {
            locator = locator.with_version_probe(Arc::clone(&runner));
        }

        let registry: Arc<dyn ConfigStore> = Arc::new(RegistryStore::new(Arc::clone(&runner)));
        let path_key = format!("{}::{}", config.path.registry_key, config.path.value_name);

        let alias: Arc<dyn Mutator> =
            match ShiftConfig::expand_path(&config.alias.directory, &lookup) {
                Ok(directory) => Arc::new(DefaultAliasMutator::new(
                    directory,
                    config.alias.command_name.clone(),
                )),
                Err(err) => Arc::new(UnresolvedMutator::failing(
                    ALIAS_STEP,
                    format!("alias directory unavailable: {err:#}"),
                )),
            };
        let terminal: Arc<dyn Mutator> =
            match ShiftConfig::expand_path(&config.terminal.settings_path, &lookup) {
                Ok(settings_path) => Arc::new(TerminalProfileMutator::new(
                    Arc::new(JsonDocumentStore::new(settings_path)),
                    config.terminal.profile_guid.clone(),
                )),
                Err(err) => Arc::new(UnresolvedMutator::skipping(
                    TERMINAL_STEP,
                    format!("Windows Terminal settings location unavailable: {err:#}"),
                )),
            };
        let demotion: Arc<dyn Mutator> =
            match ShiftConfig::expand_path(&config.demotion.directory, &lookup) {
                Ok(directory) => Arc::new(DemotionMutator::new(
                    directory,
                    &config.demotion.executable,
                    &config.demotion.backup_name,
                )),
                Err(err) => Arc::new(UnresolvedMutator::failing(
                    DEMOTION_STEP,
                    format!("Windows PowerShell 5.1 directory unavailable: {err:#}"),
                )),
            };

        let configured: Vec<Arc<dyn Mutator>> = vec![
            Arc::new(PathMutator::new(Arc::clone(&registry), path_key)),
            Arc::new(FileAssociationMutator::new(registry, &config.association)),
            alias,
            terminal,
        ];
        for step in &config.prerequisite_steps {
            if step == DEMOTION_STEP {
                return Err(anyhow!(
                    "prerequisite_steps cannot include '{DEMOTION_STEP}': it always runs after the batch"
                ));
            }
            if !configured.iter().any(|mutator| mutator.id() == step) {
                return Err(anyhow!("prerequisite_steps names unknown step '{step}'"));
            }
        }
        let position = |mutator: &Arc<dyn Mutator>| {
            config
                .prerequisite_steps
                .iter()
                .position(|step| step == mutator.id())
        };
        let (mut prerequisites, batch): (Vec<_>, Vec<_>) = configured
            .into_iter()
            .partition(|mutator| position(mutator).is_some());
        prerequisites.sort_by_key(|mutator| position(mutator));

        let mut orchestrator = Self::new(locator, PathBuf::new())
            .with_mutator_timeout(Duration::from_secs(config.mutator_timeout_secs))
            .with_demotion(demotion);
        orchestrator.restore_script =
            match ShiftConfig::expand_path(&config.output.restore_script_path, &lookup) {
                Ok(path) => RestoreScript::Resolved(path),
                Err(err) => RestoreScript::Unresolved {
                    template: config.output.restore_script_path.clone(),
                    reason: format!("{err:#}"),
                },
            };
        for mutator in prerequisites {
            orchestrator = orchestrator.with_prerequisite(mutator);
        }
        for mutator in batch {
            orchestrator = orchestrator.with_batch_mutator(mutator);
        }

        if config.install.enabled && !skip_install {
            orchestrator = orchestrator.with_package_manager(PackageManager::from_config(
                &config.install,
                runner,
            ));
        }
        Ok(orchestrator)
    }

    pub fn with_package_manager(mut self, package_manager: PackageManager) -> Self {
        self.package_manager = Some(package_manager);
        self
    }

    pub fn with_prerequisite(mut self, mutator: Arc<dyn Mutator>) -> Self {
        self.prerequisites.push(mutator);
        self
    }

    pub fn with_batch_mutator(mut self, mutator: Arc<dyn Mutator>) -> Self {
        self.batch.push(mutator);
        self
    }

    /// Runs alone after the batch; its record decides whether a restoration
    /// script is written.
    pub fn with_demotion(mut self, mutator: Arc<dyn Mutator>) -> Self {
        self.demotion = Some(mutator);
        self
    }

    pub fn with_mutator_timeout(mut self, timeout: Duration) -> Self {
        self.mutator_timeout = timeout;
        self
    }

    pub fn prerequisite_names(&self) -> Vec<&str> {
        self.prerequisites.iter().map(|mutator| mutator.id()).collect()
    }

    pub fn batch_names(&self) -> Vec<&str> {
        self.batch.iter().map(|mutator| mutator.id()).collect()
    }

    pub fn run(&self, sink: ReportSink) -> RunSummary {
        self.run_with_progress(sink, |_| {})
    }

    /// Drives the run to completion. Never fails: every outcome, fatal or
    /// not, ends up in the sealed report.
    pub fn run_with_progress<P>(&self, sink: ReportSink, mut progress: P) -> RunSummary
    where
        P: FnMut(RunState),
    {
        let span = info_span!("run");
        let _entered = span.enter();

        info!(
            prerequisites = ?self.prerequisite_names(),
            batch = ?self.batch_names(),
            demotion = self.demotion.is_some(),
            "run planned"
        );
        let mut run = RunProgress::default();
        run.enter(RunState::Start, &mut progress);

        let fatal = self.drive(&sink, &mut run, &mut progress);

        run.enter(RunState::Reporting, &mut progress);
        let outcome = if fatal {
            OverallOutcome::Failure
        } else if sink.snapshot().iter().any(|record| record.outcome.is_failure()) {
            OverallOutcome::PartialSuccess
        } else {
            OverallOutcome::Success
        };
        let runtime_path = run
            .target
            .as_ref()
            .map(|target| target.executable_path.clone());
        let report = sink.seal(runtime_path, outcome);
        run.enter(RunState::Done(outcome), &mut progress);
        info!(outcome = outcome.as_str(), steps = report.records.len(), "run finished");

        RunSummary {
            report,
            errors: run.errors,
            target: run.target,
            restoration: run.restoration,
            states: run.states,
        }
    }

    /// Returns true when the run must end in overall failure.
    fn drive<P>(&self, sink: &ReportSink, run: &mut RunProgress, progress: &mut P) -> bool
    where
        P: FnMut(RunState),
    {
        run.enter(RunState::Provisioning, progress);
        match &self.package_manager {
            Some(package_manager) => {
                if let Err(err) = package_manager.provision(sink) {
                    warn!(%err, "provisioning failed");
                    run.errors.push(err);
                    return true;
                }
            }
            None => sink.record(StepRecord::finish(
                INSTALL_STEP,
                Local::now(),
                StepOutcome::skipped("package installation disabled"),
                "",
            )),
        }

        run.enter(RunState::Locating, progress);
        let target = match self.locator.locate(sink) {
            Ok(target) => target,
            Err(err) => {
                run.errors.push(err);
                return true;
            }
        };
        run.target = Some(target.clone());

        run.enter(RunState::PrerequisitesRunning, progress);
        for mutator in &self.prerequisites {
            let output = apply_and_record(mutator.as_ref(), &target, sink);
            if let StepOutcome::Failure(reason) = output.outcome {
                let err = ShiftError::PrerequisiteMutationFailed {
                    name: mutator.id().to_string(),
                    reason,
                };
                warn!(%err, "prerequisite failed, aborting");
                run.errors.push(err);
                return true;
            }
        }

        run.enter(RunState::ParallelBatchRunning, progress);
        let outcomes = run_parallel_batch(&self.batch, &target, self.mutator_timeout, sink);
        let mut demotion = None;
        for outcome in outcomes {
            if let Some(err) = outcome.error {
                run.errors.push(err);
            }
            if outcome.demotion.is_some() {
                demotion = outcome.demotion;
            }
        }

        if let Some(mutator) = &self.demotion {
            run.enter(RunState::Demoting, progress);
            let output = apply_and_record(mutator.as_ref(), &target, sink);
            if let StepOutcome::Failure(reason) = &output.outcome {
                run.errors.push(ShiftError::OptionalMutationFailed {
                    name: mutator.id().to_string(),
                    reason: reason.clone(),
                });
            }
            if output.demotion.is_some() {
                demotion = output.demotion;
            }
        }

        let Some(demotion) = demotion else {
            return false;
        };
        run.enter(RunState::RestorationPending, progress);
        match &self.restore_script {
            RestoreScript::Resolved(path) => match generate_restoration(path, &demotion, sink) {
                Ok(plan) => run.restoration = Some(plan),
                Err(err) => run.errors.push(err),
            },
            RestoreScript::Unresolved { template, reason } => {
                run.errors.push(record_restoration_failure(
                    template,
                    reason.clone(),
                    Local::now(),
                    sink,
                ));
            }
        }

        false
    }
}

/// Applies one mutator on the calling thread and records its outcome.
fn apply_and_record(
    mutator: &dyn Mutator,
    target: &InstallationTarget,
    sink: &dyn StepSink,
) -> MutationOutput {
    let started_at = Local::now();
    let output = apply_guarded(mutator, target);
    sink.record(StepRecord::finish(
        mutator.id(),
        started_at,
        output.outcome.clone(),
        output.detail.clone(),
    ));
    output
}

#[derive(Default)]
struct RunProgress {
    states: Vec<RunState>,
    errors: Vec<ShiftError>,
    target: Option<InstallationTarget>,
    restoration: Option<RestorationPlan>,
}

impl RunProgress {
    fn enter<P>(&mut self, state: RunState, progress: &mut P)
    where
        P: FnMut(RunState),
    {
        self.states.push(state);
        progress(state);
    }
}
