use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::error::PrepError;
use crate::fs_util::Filesystem;

pub const DEFAULT_LINK_NAME: &str = "jvm";

/// Where the locally installed toolchains live and what the per-project link is called.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolchainLink {
    pub target: Utf8PathBuf,
    pub link_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkOutcome {
    Created,
    AlreadyPresent,
}

impl ToolchainLink {
    pub fn new(target: impl Into<Utf8PathBuf>) -> Self {
        Self {
            target: target.into(),
            link_name: DEFAULT_LINK_NAME.to_string(),
        }
    }

    pub fn with_link_name(mut self, link_name: impl Into<String>) -> Self {
        self.link_name = link_name.into();
        self
    }

    pub fn link_path(&self, project_dir: &Utf8Path) -> Utf8PathBuf {
        project_dir.join(&self.link_name)
    }

    /// Links `<project_dir>/<link_name>` to the toolchain root. Anything already
    /// at the link path is kept as is.
    pub fn apply(
        &self,
        fs: &dyn Filesystem,
        project_dir: &Utf8Path,
    ) -> Result<LinkOutcome, PrepError> {
        let link = self.link_path(project_dir);
        let occupied = fs.exists(&link)
            || fs
                .read_dir(project_dir)?
                .iter()
                .any(|entry| entry.name == self.link_name);
        if occupied {
            return Ok(LinkOutcome::AlreadyPresent);
        }
        if !fs.is_dir(&self.target) {
            return Err(PrepError::ToolchainLink(format!(
                "toolchain directory {} does not exist",
                self.target
            )));
        }
        fs.symlink_dir(&self.target, &link)
            .map_err(|err| PrepError::ToolchainLink(err.to_string()))?;
        Ok(LinkOutcome::Created)
    }
}
