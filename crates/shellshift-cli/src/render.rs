use std::io::IsTerminal;
use std::time::{Duration, Instant};

use anstyle::{AnsiColor, Effects, Style};
use indicatif::{ProgressBar, ProgressStyle};
use shellshift_core::{InstallationReport, OverallOutcome, StepOutcome, StepRecord};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

pub(crate) fn current_output_style() -> OutputStyle {
    if std::env::var_os("NO_COLOR").is_some() || !std::io::stdout().is_terminal() {
        OutputStyle::Plain
    } else {
        OutputStyle::Rich
    }
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct TerminalRenderer {
    style: OutputStyle,
}

pub(crate) struct TerminalSpinner {
    style: OutputStyle,
    label: String,
    spinner: Option<ProgressBar>,
    started_at: Instant,
}

impl TerminalRenderer {
    pub(crate) fn from_style(style: OutputStyle) -> Self {
        Self { style }
    }

    pub(crate) fn current() -> Self {
        Self::from_style(current_output_style())
    }

    pub(crate) fn style(self) -> OutputStyle {
        self.style
    }

    pub(crate) fn print_status(self, status: &str, message: &str) {
        println!("{}", render_status_line(self.style, status, message));
    }

    pub(crate) fn print_section(self, title: &str) {
        if self.style == OutputStyle::Plain {
            return;
        }
        println!();
        println!("{}", colorize(section_style(), &format!("== {title} ==")));
    }

    pub(crate) fn print_lines(self, lines: &[String]) {
        for line in lines {
            println!("{line}");
        }
    }

    pub(crate) fn start_spinner(self, label: &str) -> TerminalSpinner {
        let spinner = if self.style == OutputStyle::Rich {
            let spinner = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan.bold} {prefix} {msg} {elapsed}") {
                spinner.set_style(style.tick_chars(".oO@* "));
            }
            spinner.set_prefix(label.to_string());
            spinner.enable_steady_tick(Duration::from_millis(80));
            Some(spinner)
        } else {
            None
        };

        TerminalSpinner {
            style: self.style,
            label: label.to_string(),
            spinner,
            started_at: Instant::now(),
        }
    }
}

impl TerminalSpinner {
    pub(crate) fn set_message(&self, message: impl Into<String>) {
        if let Some(spinner) = &self.spinner {
            spinner.set_message(message.into());
        }
    }

    pub(crate) fn finish(mut self) {
        let Some(spinner) = self.spinner.take() else {
            return;
        };
        spinner.finish_and_clear();
        if self.style == OutputStyle::Rich {
            println!(
                "{} complete in {}",
                colorize(progress_label_style(), &self.label),
                format_elapsed(self.started_at.elapsed())
            );
        }
    }
}

/// `[OK] message` in rich mode, the bare message in plain mode.
pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => {
            let (badge, badge_style) = status_badge(status);
            format!("{} {message}", colorize(badge_style, badge))
        }
    }
}

pub(crate) fn status_for_outcome(outcome: &StepOutcome) -> &'static str {
    match outcome {
        StepOutcome::Success => "ok",
        StepOutcome::Skipped(_) => "skip",
        StepOutcome::Failure(_) => "err",
    }
}

pub(crate) fn status_for_overall(outcome: OverallOutcome) -> &'static str {
    match outcome {
        OverallOutcome::Success => "ok",
        OverallOutcome::PartialSuccess => "warn",
        OverallOutcome::Failure => "err",
    }
}

pub(crate) fn format_step_line(record: &StepRecord) -> String {
    let mut line = record.name.clone();
    match record.outcome.reason() {
        Some(reason) if !reason.trim().is_empty() => {
            line.push_str(": ");
            line.push_str(reason.trim());
        }
        _ => {
            if !record.detail.trim().is_empty() {
                line.push_str(": ");
                line.push_str(record.detail.trim());
            }
        }
    }
    line
}

pub(crate) fn format_report_lines(report: &InstallationReport, style: OutputStyle) -> Vec<String> {
    let mut lines: Vec<String> = report
        .records
        .iter()
        .map(|record| {
            render_status_line(
                style,
                status_for_outcome(&record.outcome),
                &format_step_line(record),
            )
        })
        .collect();

    lines.push(render_status_line(
        style,
        status_for_overall(report.outcome),
        &format!(
            "overall: {} ({} succeeded, {} skipped, {} failed)",
            report.outcome.as_str(),
            report.success_count(),
            report.skipped_count(),
            report.failure_count()
        ),
    ));
    lines
}

fn status_badge(status: &str) -> (&'static str, Style) {
    match status {
        "ok" => ("[OK]", badge_style(AnsiColor::BrightGreen)),
        "skip" => ("[..]", badge_style(AnsiColor::BrightBlack)),
        "warn" => ("[WARN]", badge_style(AnsiColor::BrightYellow)),
        "err" => ("[ERR]", badge_style(AnsiColor::BrightRed)),
        _ => ("[--]", Style::new()),
    }
}

fn badge_style(color: AnsiColor) -> Style {
    Style::new().fg_color(Some(color.into())).effects(Effects::BOLD)
}

fn section_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightBlue.into()))
        .effects(Effects::BOLD)
}

fn progress_label_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightCyan.into()))
        .effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let millis = elapsed.subsec_millis();
    format!("{secs}.{millis:03}s")
}
