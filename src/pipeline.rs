use std::time::{Duration, Instant};

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use chrono::Utc;
use serde::Serialize;

use crate::archive::{extract_zip, validate_zip};
use crate::error::PrepError;
use crate::fs_util::{EntryKind, Filesystem};
use crate::project::{ProjectNormalizer, ProjectReport};
use crate::toolchain::ToolchainLink;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Re-normalize even when the dataset root is already populated.
    pub force: bool,
    pub toolchain: Option<ToolchainLink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Container,
    Directory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Normalized,
    AlreadyNormalized,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub input: Utf8PathBuf,
    pub input_kind: InputKind,
    pub dataset_root: Utf8PathBuf,
    pub outcome: RunOutcome,
    pub projects: Vec<ProjectReport>,
    pub started_at: String,
    pub finished_at: String,
}

impl RunReport {
    pub fn failed_projects(&self) -> usize {
        self.projects
            .iter()
            .filter(|project| project.has_failures())
            .count()
    }

    pub fn project(&self, name: &str) -> Option<&ProjectReport> {
        self.projects.iter().find(|project| project.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
    pub level: ProgressLevel,
}

impl ProgressEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            elapsed: None,
            level: ProgressLevel::Info,
        }
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct DatasetPipeline<F: Filesystem> {
    fs: F,
    options: RunOptions,
}

impl<F: Filesystem> DatasetPipeline<F> {
    pub fn new(fs: F, options: RunOptions) -> Self {
        Self { fs, options }
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    /// Resolves `input` to a dataset root and normalizes every project in it.
    ///
    /// A `.zip` input is validated and extracted into `dataset_root`; a directory
    /// input is the dataset root itself. A populated root is left alone unless
    /// [`RunOptions::force`] is set. Only input resolution errors are returned:
    /// per-project failures end up in the report.
    pub fn run(
        &self,
        input: &Utf8Path,
        dataset_root: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, PrepError> {
        let started_at = Utc::now().to_rfc3339();
        sink.event(ProgressEvent::info(format!("phase=Resolve; input {input}")));

        let (input_kind, root) = match self.fs.kind(input) {
            Some(EntryKind::Dir) => (InputKind::Directory, input.to_path_buf()),
            Some(_) if input.extension() == Some("zip") => {
                (InputKind::Container, dataset_root.to_path_buf())
            }
            _ => {
                return Err(PrepError::Usage(format!(
                    "{input} is neither a .zip container nor a directory"
                )));
            }
        };

        if input_kind == InputKind::Container {
            sink.event(ProgressEvent::info(format!("phase=Verify; checking {input}")));
            validate_zip(&self.fs, input)?;
        }

        let mut report = RunReport {
            input: input.to_path_buf(),
            input_kind,
            dataset_root: root.clone(),
            outcome: RunOutcome::AlreadyNormalized,
            projects: Vec::new(),
            started_at,
            finished_at: String::new(),
        };

        if !self.options.force && self.fs.is_dir(&root) && !self.fs.is_empty_dir(&root)? {
            tracing::info!(root = %root, "dataset root already populated; nothing to do");
            sink.event(ProgressEvent::info(format!(
                "phase=Done; {root} is already populated, skipping"
            )));
            report.finished_at = Utc::now().to_rfc3339();
            return Ok(report);
        }

        if input_kind == InputKind::Container {
            if is_within(input, &root) {
                return Err(PrepError::Usage(format!(
                    "{input} lies inside the dataset root {root}; extracting would delete it"
                )));
            }
            let start = Instant::now();
            self.fs.remove_all(&root)?;
            self.fs.create_dir_all(&root)?;
            extract_zip(&self.fs, input, &root)?;
            tracing::info!(input = %input, root = %root, "dataset extracted");
            sink.event(ProgressEvent {
                message: format!("phase=Extract; {input} -> {root}"),
                elapsed: Some(start.elapsed()),
                level: ProgressLevel::Info,
            });
        }

        let normalizer = ProjectNormalizer::new(&self.fs, self.options.toolchain.as_ref());
        for entry in self.fs.read_dir(&root)? {
            if entry.name.starts_with('.') || !self.fs.is_dir(&entry.path) {
                continue;
            }
            let project = normalizer.normalize(&entry.path, sink);
            if project.has_failures() {
                tracing::warn!(project = %project.name, "project normalized with failures");
            }
            report.projects.push(project);
        }

        report.outcome = RunOutcome::Normalized;
        report.finished_at = Utc::now().to_rfc3339();
        sink.event(ProgressEvent::info(format!(
            "phase=Done; {} projects, {} with failures",
            report.projects.len(),
            report.failed_projects()
        )));
        Ok(report)
    }
}

fn is_within(path: &Utf8Path, root: &Utf8Path) -> bool {
    significant(path).starts_with(&significant(root))
}

fn significant(path: &Utf8Path) -> Vec<Utf8Component<'_>> {
    path.components()
        .filter(|component| *component != Utf8Component::CurDir)
        .collect()
}
