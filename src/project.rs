use std::fmt;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::archive::{extract_zip, validate_zip};
use crate::domain::{CANONICAL_CSV, PROJECT_REPO_DIR, PatchKind, ProjectInventory};
use crate::error::PrepError;
use crate::fs_util::Filesystem;
use crate::layout::{FlattenOutcome, flatten_one_level};
use crate::pipeline::{ProgressEvent, ProgressLevel, ProgressSink};
use crate::toolchain::{LinkOutcome, ToolchainLink};

/// Progress of one project through normalization. Every transition is
/// attempted even when the previous step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStage {
    Unprocessed,
    CsvRenamed,
    PatchesUnpacked,
    RepoUnpacked,
    Done,
}

impl ProjectStage {
    pub fn next(self) -> Option<Self> {
        match self {
            ProjectStage::Unprocessed => Some(ProjectStage::CsvRenamed),
            ProjectStage::CsvRenamed => Some(ProjectStage::PatchesUnpacked),
            ProjectStage::PatchesUnpacked => Some(ProjectStage::RepoUnpacked),
            ProjectStage::RepoUnpacked => Some(ProjectStage::Done),
            ProjectStage::Done => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Scan,
    Csv,
    PatchesNeg,
    PatchesPos,
    Repository,
    Toolchain,
}

impl Step {
    pub fn patches(kind: PatchKind) -> Self {
        match kind {
            PatchKind::Neg => Step::PatchesNeg,
            PatchKind::Pos => Step::PatchesPos,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Scan => write!(f, "scan"),
            Step::Csv => write!(f, "csv"),
            Step::PatchesNeg => write!(f, "patches_neg"),
            Step::PatchesPos => write!(f, "patches_pos"),
            Step::Repository => write!(f, "repository"),
            Step::Toolchain => write!(f, "toolchain"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Done,
    /// No matching input; not an error.
    Skipped,
    Failed,
    /// Failed without affecting the project outcome.
    Warned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub step: Step,
    pub status: StepStatus,
    pub source: Option<String>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectReport {
    pub name: String,
    pub path: Utf8PathBuf,
    pub stage: ProjectStage,
    pub inventory: ProjectInventory,
    pub steps: Vec<StepReport>,
}

impl ProjectReport {
    pub fn has_failures(&self) -> bool {
        self.steps
            .iter()
            .any(|step| step.status == StepStatus::Failed)
    }

    pub fn step(&self, step: Step) -> impl Iterator<Item = &StepReport> {
        self.steps.iter().filter(move |report| report.step == step)
    }
}

pub struct ProjectNormalizer<'a> {
    fs: &'a dyn Filesystem,
    toolchain: Option<&'a ToolchainLink>,
}

impl<'a> ProjectNormalizer<'a> {
    pub fn new(fs: &'a dyn Filesystem, toolchain: Option<&'a ToolchainLink>) -> Self {
        Self { fs, toolchain }
    }

    /// Brings one project directory into the canonical layout. Never fails as a
    /// whole: each step's outcome is recorded in the returned report.
    pub fn normalize(&self, project_dir: &Utf8Path, sink: &dyn ProgressSink) -> ProjectReport {
        let name = project_dir.file_name().unwrap_or(project_dir.as_str()).to_string();
        let mut report = ProjectReport {
            name: name.clone(),
            path: project_dir.to_path_buf(),
            stage: ProjectStage::Unprocessed,
            inventory: ProjectInventory::default(),
            steps: Vec::new(),
        };

        sink.event(ProgressEvent::info(format!("phase=Resolve; project {name}")));
        match self.fs.read_dir(project_dir) {
            Ok(entries) => report.inventory = ProjectInventory::from_entries(&entries),
            Err(err) => {
                self.record_failure(&mut report, Step::Scan, None, &err, sink);
                return report;
            }
        }

        let inventory = report.inventory.clone();
        let mut stage = ProjectStage::Unprocessed;
        while let Some(next) = stage.next() {
            match next {
                ProjectStage::CsvRenamed => {
                    self.rename_csv(project_dir, &inventory, &mut report, sink)
                }
                ProjectStage::PatchesUnpacked => {
                    for kind in PatchKind::ALL {
                        self.unpack_all(
                            project_dir,
                            inventory.patches(kind),
                            kind.dir_name(),
                            Step::patches(kind),
                            &mut report,
                            sink,
                        );
                    }
                }
                ProjectStage::RepoUnpacked => self.unpack_all(
                    project_dir,
                    &inventory.repositories,
                    PROJECT_REPO_DIR,
                    Step::Repository,
                    &mut report,
                    sink,
                ),
                ProjectStage::Done => self.link_toolchain(project_dir, &mut report, sink),
                ProjectStage::Unprocessed => {}
            }
            stage = next;
            report.stage = stage;
        }
        report
    }

    fn rename_csv(
        &self,
        project_dir: &Utf8Path,
        inventory: &ProjectInventory,
        report: &mut ProjectReport,
        sink: &dyn ProgressSink,
    ) {
        let pending = inventory.pending_csv().collect::<Vec<_>>();
        if pending.is_empty() {
            report.steps.push(skipped(Step::Csv));
            return;
        }
        if pending.len() > 1 {
            tracing::warn!(
                project = %report.name,
                count = pending.len(),
                "several CSV files found; the last one renamed wins"
            );
        }

        let canonical = project_dir.join(CANONICAL_CSV);
        for csv in pending {
            match self.fs.rename(&project_dir.join(csv), &canonical) {
                Ok(()) => {
                    tracing::info!(
                        project = %report.name,
                        from = csv,
                        "renamed to {CANONICAL_CSV}"
                    );
                    sink.event(ProgressEvent::info(format!(
                        "phase=Rename; {}: {csv} -> {CANONICAL_CSV}",
                        report.name
                    )));
                    report.steps.push(StepReport {
                        step: Step::Csv,
                        status: StepStatus::Done,
                        source: Some(csv.to_string()),
                        detail: None,
                    });
                }
                Err(err) => self.record_failure(report, Step::Csv, Some(csv), &err, sink),
            }
        }
    }

    fn unpack_all(
        &self,
        project_dir: &Utf8Path,
        archives: &[String],
        target_name: &str,
        step: Step,
        report: &mut ProjectReport,
        sink: &dyn ProgressSink,
    ) {
        if archives.is_empty() {
            report.steps.push(skipped(step));
            return;
        }
        if archives.len() > 1 {
            tracing::warn!(
                project = %report.name,
                step = %step,
                count = archives.len(),
                "several archives match; {target_name}/ keeps the last one"
            );
        }

        let target = project_dir.join(target_name);
        for archive in archives {
            let start = Instant::now();
            match self.unpack(&project_dir.join(archive), &target) {
                Ok(outcome) => {
                    let detail = describe_flatten(&outcome);
                    tracing::info!(
                        project = %report.name,
                        archive = %archive,
                        dir = target_name,
                        "{detail}"
                    );
                    sink.event(ProgressEvent {
                        message: format!(
                            "phase=Unpack; {}: {archive} -> {target_name}/ ({detail})",
                            report.name
                        ),
                        elapsed: Some(start.elapsed()),
                        level: ProgressLevel::Info,
                    });
                    report.steps.push(StepReport {
                        step,
                        status: StepStatus::Done,
                        source: Some(archive.clone()),
                        detail: Some(detail),
                    });
                }
                Err(err) => self.record_failure(report, step, Some(archive), &err, sink),
            }
        }
    }

    /// The archive is checked before the canonical target is touched, so a
    /// corrupt archive leaves a previously unpacked target in place.
    fn unpack(&self, archive: &Utf8Path, target: &Utf8Path) -> Result<FlattenOutcome, PrepError> {
        validate_zip(self.fs, archive).map_err(|err| match err {
            PrepError::InvalidContainer { path, reason } => PrepError::Extraction { path, reason },
            other => other,
        })?;
        self.fs.remove_all(target)?;
        self.fs.create_dir_all(target)?;
        extract_zip(self.fs, archive, target)?;
        flatten_one_level(self.fs, target)
    }

    fn link_toolchain(
        &self,
        project_dir: &Utf8Path,
        report: &mut ProjectReport,
        sink: &dyn ProgressSink,
    ) {
        let Some(toolchain) = self.toolchain else {
            report.steps.push(skipped(Step::Toolchain));
            return;
        };
        match toolchain.apply(self.fs, project_dir) {
            Ok(outcome) => {
                let detail = match outcome {
                    LinkOutcome::Created => {
                        format!("linked {} -> {}", toolchain.link_name, toolchain.target)
                    }
                    LinkOutcome::AlreadyPresent => {
                        format!("{} already present", toolchain.link_name)
                    }
                };
                sink.event(ProgressEvent::info(format!("phase=Link; {}: {detail}", report.name)));
                report.steps.push(StepReport {
                    step: Step::Toolchain,
                    status: StepStatus::Done,
                    source: None,
                    detail: Some(detail),
                });
            }
            Err(err) => {
                tracing::warn!(project = %report.name, error = %err, "toolchain link skipped");
                sink.event(ProgressEvent {
                    message: format!("{}: toolchain link skipped: {err}", report.name),
                    elapsed: None,
                    level: ProgressLevel::Warn,
                });
                report.steps.push(StepReport {
                    step: Step::Toolchain,
                    status: StepStatus::Warned,
                    source: None,
                    detail: Some(err.to_string()),
                });
            }
        }
    }

    fn record_failure(
        &self,
        report: &mut ProjectReport,
        step: Step,
        source: Option<&str>,
        err: &PrepError,
        sink: &dyn ProgressSink,
    ) {
        tracing::warn!(project = %report.name, step = %step, source, error = %err, "step failed");
        sink.event(ProgressEvent {
            message: format!(
                "{}: {step} failed{}: {err}",
                report.name,
                source.map(|s| format!(" for {s}")).unwrap_or_default()
            ),
            elapsed: None,
            level: ProgressLevel::Error,
        });
        report.steps.push(StepReport {
            step,
            status: StepStatus::Failed,
            source: source.map(str::to_string),
            detail: Some(err.to_string()),
        });
    }
}

fn skipped(step: Step) -> StepReport {
    StepReport {
        step,
        status: StepStatus::Skipped,
        source: None,
        detail: None,
    }
}

fn describe_flatten(outcome: &FlattenOutcome) -> String {
    match outcome {
        FlattenOutcome::Flattened { wrapper } => format!("unwrapped {wrapper}/"),
        FlattenOutcome::AlreadyFlat => "already flat".to_string(),
        FlattenOutcome::Ambiguous { dirs, files } => {
            format!("left as-is ({dirs} dirs, {files} files at top level)")
        }
    }
}
