use std::io::{self, Write};

use serde::Serialize;

use crate::pipeline::{ProgressEvent, ProgressLevel, ProgressSink, RunOutcome, RunReport};
use crate::project::StepStatus;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_run(result: &RunReport) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Narrates progress on stderr, one line per event.
pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn event(&self, event: ProgressEvent) {
        let elapsed = event
            .elapsed
            .map(|elapsed| format!(" [{} ms]", elapsed.as_millis()))
            .unwrap_or_default();
        let line = match event.level {
            ProgressLevel::Info => format!("{CYAN}•{RESET} {}{elapsed}", event.message),
            ProgressLevel::Warn => format!("{YELLOW}⚠ {}{RESET}", event.message),
            ProgressLevel::Error => format!("{RED}✖ FAILED: {}{RESET}", event.message),
        };
        eprintln!("{line}");
    }
}

pub fn print_run_summary(report: &RunReport) {
    println!("{CYAN}bench-prep summary{RESET}");
    println!("dataset root: {}", report.dataset_root);
    if report.outcome == RunOutcome::AlreadyNormalized {
        println!("{GREEN}already populated; nothing was changed{RESET}");
        return;
    }

    let failed = report.failed_projects();
    println!(
        "{GREEN}projects normalized: {}{RESET}",
        report.projects.len() - failed
    );
    let color = if failed == 0 { GREEN } else { RED };
    println!("{color}projects with failures: {failed}{RESET}");

    for project in &report.projects {
        for step in &project.steps {
            let (icon, color) = match step.status {
                StepStatus::Done => ("✔", GREEN),
                StepStatus::Skipped => continue,
                StepStatus::Failed => ("✖", RED),
                StepStatus::Warned => ("⚠", YELLOW),
            };
            let source = step.source.as_deref().unwrap_or("-");
            let detail = step.detail.as_deref().unwrap_or("");
            println!(
                "{color}{icon} {} {} {source} {detail}{RESET}",
                project.name, step.step
            );
        }
    }
}
