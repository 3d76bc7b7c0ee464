use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::archive::list_top_level;
use crate::error::PrepError;
use crate::fs_util::Filesystem;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum FlattenOutcome {
    Flattened { wrapper: String },
    AlreadyFlat,
    /// More than one directory, or files next to a directory: left untouched.
    Ambiguous { dirs: usize, files: usize },
}

/// Removes one redundant wrapping directory from `dir`.
///
/// Only acts when `dir` holds exactly one directory and no files. The wrapper's
/// children, dot-files included, move up into `dir` and the wrapper is removed.
/// This never recurses: a doubly wrapped tree keeps its inner directory.
pub fn flatten_one_level(
    fs: &dyn Filesystem,
    dir: &Utf8Path,
) -> Result<FlattenOutcome, PrepError> {
    let top = list_top_level(fs, dir)?;
    if top.dirs == 0 {
        return Ok(FlattenOutcome::AlreadyFlat);
    }
    if !top.is_single_wrapper() {
        return Ok(FlattenOutcome::Ambiguous {
            dirs: top.dirs,
            files: top.files,
        });
    }

    let wrapper = fs
        .read_dir(dir)?
        .into_iter()
        .find(|entry| entry.is_dir())
        .ok_or_else(|| PrepError::Filesystem(format!("wrapper directory vanished from {dir}")))?;

    let children = fs.read_dir(&wrapper.path)?;
    let staging = staging_path(dir, &wrapper.name, children.iter().map(|c| c.name.as_str()));
    fs.rename(&wrapper.path, &staging)?;
    for child in &children {
        fs.rename(&staging.join(&child.name), &dir.join(&child.name))?;
    }
    fs.remove_dir_all(&staging)?;

    tracing::debug!(dir = %dir, wrapper = %wrapper.name, moved = children.len(), "flattened");
    Ok(FlattenOutcome::Flattened {
        wrapper: wrapper.name,
    })
}

/// Picks a name for the wrapper that no child will be moved onto, so a child
/// sharing the wrapper's own name can still move up.
fn staging_path<'a>(
    dir: &Utf8Path,
    wrapper: &str,
    children: impl Iterator<Item = &'a str> + Clone,
) -> Utf8PathBuf {
    let mut candidate = format!(".{wrapper}.unwrap");
    let mut counter = 0usize;
    while children.clone().any(|name| name == candidate) {
        counter += 1;
        candidate = format!(".{wrapper}.unwrap{counter}");
    }
    dir.join(candidate)
}
