mod dispatch;
mod logging;
mod render;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use crate::dispatch::run_cli;

pub(crate) const USAGE_EXIT_CODE: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "shellshift")]
#[command(about = "Install PowerShell 7 and make it the system default shell", long_about = None)]
struct Cli {
    /// TOML file overriding the built-in locations and markers.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install, activate and report.
    Apply {
        #[arg(long)]
        skip_install: bool,
        #[arg(long)]
        report: Option<PathBuf>,
        #[arg(long)]
        report_json: Option<PathBuf>,
    },
    /// Show where PowerShell 7 would be found, without changing anything.
    Locate,
    /// Move the renamed Windows PowerShell 5.1 executable back.
    Restore {
        #[arg(long)]
        plan: Option<PathBuf>,
    },
    /// Print the effective configuration as TOML.
    Config,
}

fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();

    match run_cli(cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(USAGE_EXIT_CODE)
        }
    }
}
