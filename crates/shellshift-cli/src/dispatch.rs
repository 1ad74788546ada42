use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use shellshift_core::{InstallationReport, OverallOutcome, ShiftConfig};
use shellshift_engine::{
    load_plan, plan_path_for, restore_old_runtime, Orchestrator, ReportSink, RestoreOutcome,
};
use shellshift_system::{CommandRunner, InstallationLocator, SystemCommandRunner};
use tracing::warn;

use crate::render::{format_report_lines, TerminalRenderer};
use crate::{Cli, Commands};

pub(crate) fn run_cli(cli: Cli) -> Result<u8> {
    let config = load_config(cli.config.as_deref())?;
    let renderer = TerminalRenderer::current();

    match cli.command {
        Commands::Apply {
            skip_install,
            report,
            report_json,
        } => run_apply(&config, renderer, skip_install, report, report_json),
        Commands::Locate => run_locate(&config, renderer),
        Commands::Restore { plan } => run_restore(&config, renderer, plan),
        Commands::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(0)
        }
    }
}

pub(crate) fn load_config(path: Option<&Path>) -> Result<ShiftConfig> {
    let Some(path) = path else {
        return Ok(ShiftConfig::default());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;
    ShiftConfig::from_toml_str(&raw)
        .with_context(|| format!("invalid config: {}", path.display()))
}

pub(crate) fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn run_apply(
    config: &ShiftConfig,
    renderer: TerminalRenderer,
    skip_install: bool,
    report_path: Option<PathBuf>,
    report_json: Option<PathBuf>,
) -> Result<u8> {
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner);
    let orchestrator = Orchestrator::from_config(config, env_lookup, runner, skip_install)?;
    let report_path = match report_path {
        Some(path) => path,
        None => resolve_report_path(config, env_lookup),
    };

    let spinner = renderer.start_spinner("apply");
    let summary = orchestrator.run_with_progress(ReportSink::with_flush_path(&report_path), |state| {
        spinner.set_message(state.to_string());
    });
    spinner.finish();

    renderer.print_section("steps");
    renderer.print_lines(&format_report_lines(&summary.report, renderer.style()));

    let mut exit_code = exit_code_for(summary.exit_code());
    if let Err(err) = persist_report(&summary.report, &report_path, report_json.as_deref()) {
        warn!(error = %format!("{err:#}"), "report not persisted");
        renderer.print_status("err", &format!("{err:#}"));
        exit_code = exit_code.max(1);
    } else {
        renderer.print_status("ok", &format!("report written to {}", report_path.display()));
    }

    if let Some(plan) = &summary.restoration {
        renderer.print_status(
            "ok",
            &format!(
                "to restore Windows PowerShell 5.1 run '{}' as Administrator or `shellshift restore`",
                plan.generated_script_path.display()
            ),
        );
    }
    if summary.report.outcome != OverallOutcome::Failure {
        renderer.print_status("ok", "restart your terminal to pick up PowerShell 7");
    }

    Ok(exit_code)
}

/// The configured report location, or the built-in file name when it names
/// an unset variable. A run always leaves a report behind.
pub(crate) fn resolve_report_path<F>(config: &ShiftConfig, lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    match ShiftConfig::expand_path(&config.output.report_path, lookup) {
        Ok(path) => path,
        Err(err) => {
            let fallback = PathBuf::from(ShiftConfig::default().output.report_path);
            warn!(
                error = %format!("{err:#}"),
                fallback = %fallback.display(),
                "report path unavailable, using fallback"
            );
            fallback
        }
    }
}

pub(crate) fn persist_report(
    report: &InstallationReport,
    text_path: &Path,
    json_path: Option<&Path>,
) -> Result<()> {
    report.write_text(text_path)?;
    if let Some(json_path) = json_path {
        report.write_json(json_path)?;
    }
    Ok(())
}

fn run_locate(config: &ShiftConfig, renderer: TerminalRenderer) -> Result<u8> {
    let mut locator = InstallationLocator::new(config.candidate_paths(env_lookup));
    if config.locator.probe_version {
        locator = locator.with_version_probe(Arc::new(SystemCommandRunner));
    }

    let sink = ReportSink::new();
    match locator.locate(&sink) {
        Ok(target) => {
            let version = target.version.as_deref().unwrap_or("unknown version");
            renderer.print_status(
                "ok",
                &format!("{} ({version})", target.executable_path.display()),
            );
            Ok(0)
        }
        Err(err) => {
            renderer.print_status("err", &err.to_string());
            for candidate in locator.candidates() {
                renderer.print_status("skip", &format!("probed {}", candidate.display()));
            }
            Ok(1)
        }
    }
}

fn run_restore(
    config: &ShiftConfig,
    renderer: TerminalRenderer,
    plan_path: Option<PathBuf>,
) -> Result<u8> {
    let (original, backup) = restore_targets(config, plan_path)?;
    let outcome = restore_old_runtime(&original, &backup)?;
    let status = match outcome {
        RestoreOutcome::Restored => "ok",
        RestoreOutcome::BackupMissing | RestoreOutcome::OriginalPresent => "skip",
    };
    renderer.print_status(status, &format!("{} ({})", outcome.describe(), original.display()));
    Ok(0)
}

/// Original and backup paths from the restoration plan; without a plan file
/// they come from the configured demotion directory.
pub(crate) fn restore_targets(
    config: &ShiftConfig,
    plan_path: Option<PathBuf>,
) -> Result<(PathBuf, PathBuf)> {
    let plan_path = match plan_path {
        Some(path) => Some(path),
        None => {
            let script = ShiftConfig::expand_path(&config.output.restore_script_path, env_lookup)?;
            let default_plan = plan_path_for(&script);
            default_plan.is_file().then_some(default_plan)
        }
    };

    if let Some(plan_path) = plan_path {
        let plan = load_plan(&plan_path)?;
        return Ok((plan.old_runtime_original_path, plan.old_runtime_backup_path));
    }

    let directory = ShiftConfig::expand_path(&config.demotion.directory, env_lookup)?;
    Ok((
        directory.join(&config.demotion.executable),
        directory.join(&config.demotion.backup_name),
    ))
}

fn exit_code_for(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}
