use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PrepError;
use crate::fs_util::{DirEntry, EntryKind};

pub const CANONICAL_CSV: &str = "pr_states.csv";
pub const PROJECT_REPO_DIR: &str = "project_repo";

static PATCH_BUNDLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^patches_(neg|pos)-.*\.zip$").expect("patch bundle pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchKind {
    Neg,
    Pos,
}

impl PatchKind {
    pub const ALL: [PatchKind; 2] = [PatchKind::Neg, PatchKind::Pos];

    pub fn dir_name(self) -> &'static str {
        match self {
            PatchKind::Neg => "patches_neg",
            PatchKind::Pos => "patches_pos",
        }
    }
}

impl fmt::Display for PatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchKind::Neg => write!(f, "neg"),
            PatchKind::Pos => write!(f, "pos"),
        }
    }
}

impl FromStr for PatchKind {
    type Err = PrepError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "neg" => Ok(PatchKind::Neg),
            "pos" => Ok(PatchKind::Pos),
            other => Err(PrepError::Usage(format!("unknown patch kind: {other}"))),
        }
    }
}

/// What a file inside a project directory is used for, decided from its name alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "role", content = "kind")]
pub enum ArchiveRole {
    TabularMapping,
    PatchBundle(PatchKind),
    MainRepository,
    Excluded,
}

impl ArchiveRole {
    /// Names starting with a dot never match, the same way `*` skips them in a shell glob.
    pub fn classify(name: &str) -> ArchiveRole {
        if name.starts_with('.') {
            return ArchiveRole::Excluded;
        }
        if name.ends_with(".csv") {
            return ArchiveRole::TabularMapping;
        }
        if let Some(captures) = PATCH_BUNDLE.captures(name) {
            return match &captures[1] {
                "neg" => ArchiveRole::PatchBundle(PatchKind::Neg),
                _ => ArchiveRole::PatchBundle(PatchKind::Pos),
            };
        }
        if name.ends_with(".zip") && !name.ends_with("-mock.zip") && !name.starts_with("patches_")
        {
            return ArchiveRole::MainRepository;
        }
        ArchiveRole::Excluded
    }
}

/// Every non-directory file of a project, grouped by role. Each list is in
/// lexicographic order, so the last element is the one whose contents survive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProjectInventory {
    pub csv_files: Vec<String>,
    pub patches_neg: Vec<String>,
    pub patches_pos: Vec<String>,
    pub repositories: Vec<String>,
    pub excluded: Vec<String>,
}

impl ProjectInventory {
    pub fn from_entries(entries: &[DirEntry]) -> Self {
        let mut inventory = Self::default();
        let mut names = entries
            .iter()
            .filter(|entry| entry.kind != EntryKind::Dir)
            .map(|entry| entry.name.clone())
            .collect::<Vec<_>>();
        names.sort();

        for name in names {
            match ArchiveRole::classify(&name) {
                ArchiveRole::TabularMapping => inventory.csv_files.push(name),
                ArchiveRole::PatchBundle(PatchKind::Neg) => inventory.patches_neg.push(name),
                ArchiveRole::PatchBundle(PatchKind::Pos) => inventory.patches_pos.push(name),
                ArchiveRole::MainRepository => inventory.repositories.push(name),
                ArchiveRole::Excluded => inventory.excluded.push(name),
            }
        }
        inventory
    }

    pub fn patches(&self, kind: PatchKind) -> &[String] {
        match kind {
            PatchKind::Neg => &self.patches_neg,
            PatchKind::Pos => &self.patches_pos,
        }
    }

    /// CSV files that still need renaming to the canonical name.
    pub fn pending_csv(&self) -> impl Iterator<Item = &str> {
        self.csv_files
            .iter()
            .map(String::as_str)
            .filter(|name| *name != CANONICAL_CSV)
    }
}
