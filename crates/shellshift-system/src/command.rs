use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Captured result of an external command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn combined_text(&self) -> String {
        match (self.stdout.trim(), self.stderr.trim()) {
            ("", stderr) => stderr.to_string(),
            (stdout, "") => stdout.to_string(),
            (stdout, stderr) => format!("{stdout}\n{stderr}"),
        }
    }

    /// One-line description used in report details and error chains.
    pub fn describe(&self) -> String {
        let status = match (self.timed_out, self.code) {
            (true, _) => "timed out".to_string(),
            (false, Some(code)) => format!("exit code {code}"),
            (false, None) => "terminated by signal".to_string(),
        };
        format!(
            "{status} stdout='{}' stderr='{}'",
            self.stdout.trim(),
            self.stderr.trim()
        )
    }
}

/// The external command boundary. Everything that spawns a process goes
/// through this so tests can substitute a scripted runner.
pub trait CommandRunner: Send + Sync {
    fn run(&self, command: Command, timeout: Duration) -> Result<CommandOutput>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    #[instrument(skip_all, fields(program = ?command.get_program(), timeout_secs = timeout.as_secs()))]
    fn run(&self, mut command: Command, timeout: Duration) -> Result<CommandOutput> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let program = command.get_program().to_string_lossy().into_owned();
        let mut child = command
            .spawn()
            .with_context(|| format!("failed to start command '{program}'"))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("stderr was not piped"))?;
        let stdout_handle = thread::spawn(move || read_stream(stdout));
        let stderr_handle = thread::spawn(move || read_stream(stderr));

        let mut timed_out = false;
        let status = match child
            .wait_timeout(timeout)
            .with_context(|| format!("failed waiting for command '{program}'"))?
        {
            Some(status) => status,
            None => {
                warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
                timed_out = true;
                child
                    .kill()
                    .with_context(|| format!("failed to kill command '{program}'"))?;
                child
                    .wait()
                    .with_context(|| format!("failed to reap command '{program}'"))?
            }
        };

        let stdout = join_stream(stdout_handle).context("failed to read command stdout")?;
        let stderr = join_stream(stderr_handle).context("failed to read command stderr")?;

        debug!(exit_code = ?status.code(), timed_out, "command finished");
        Ok(CommandOutput {
            code: status.code(),
            success: status.success() && !timed_out,
            stdout,
            stderr,
            timed_out,
        })
    }
}

fn read_stream(mut stream: impl Read) -> std::io::Result<String> {
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn join_stream(handle: thread::JoinHandle<std::io::Result<String>>) -> Result<String> {
    match handle.join() {
        Ok(result) => result.context("stream read failed"),
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}
