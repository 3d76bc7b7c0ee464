use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use zip::ZipArchive;

use crate::error::PrepError;
use crate::fs_util::{EntryKind, Filesystem, ReadSeek};

/// Metadata directory macOS adds at the root of archives it creates.
pub const MACOS_METADATA_DIR: &str = "__MACOSX";
/// Prefix of AppleDouble resource-fork shadow files.
pub const APPLE_DOUBLE_PREFIX: &str = "._";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TopLevel {
    pub dirs: usize,
    pub files: usize,
}

impl TopLevel {
    pub fn is_single_wrapper(&self) -> bool {
        self.dirs == 1 && self.files == 0
    }
}

fn open_archive(
    fs: &dyn Filesystem,
    zip_path: &Utf8Path,
) -> Result<ZipArchive<Box<dyn ReadSeek>>, String> {
    let reader = fs.open(zip_path).map_err(|err| err.to_string())?;
    ZipArchive::new(reader).map_err(|err| err.to_string())
}

/// Reads every entry to the end so the per-entry CRC checks run.
pub fn validate_zip(fs: &dyn Filesystem, zip_path: &Utf8Path) -> Result<(), PrepError> {
    let invalid = |reason: String| PrepError::InvalidContainer {
        path: zip_path.to_path_buf(),
        reason,
    };
    let mut archive = open_archive(fs, zip_path).map_err(invalid)?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| invalid(err.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        io::copy(&mut entry, &mut io::sink()).map_err(|err| invalid(err.to_string()))?;
    }
    Ok(())
}

pub fn is_valid_zip(fs: &dyn Filesystem, zip_path: &Utf8Path) -> bool {
    validate_zip(fs, zip_path).is_ok()
}

/// Counts the immediate children of an extracted directory. Symlinks count as files.
pub fn list_top_level(fs: &dyn Filesystem, dir: &Utf8Path) -> Result<TopLevel, PrepError> {
    let mut top = TopLevel::default();
    for entry in fs.read_dir(dir)? {
        if entry.is_dir() {
            top.dirs += 1;
        } else {
            top.files += 1;
        }
    }
    Ok(top)
}

/// Extracts `zip_path` into the empty directory `target_dir`, then strips cruft.
pub fn extract_zip(
    fs: &dyn Filesystem,
    zip_path: &Utf8Path,
    target_dir: &Utf8Path,
) -> Result<(), PrepError> {
    let failed = |reason: String| PrepError::Extraction {
        path: zip_path.to_path_buf(),
        reason,
    };

    if !fs.is_empty_dir(target_dir)? {
        return Err(failed(format!("destination {target_dir} is not empty")));
    }

    let mut archive = open_archive(fs, zip_path).map_err(failed)?;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| failed(err.to_string()))?;
        let relative = match entry.enclosed_name() {
            Some(path) => Utf8PathBuf::from_path_buf(path)
                .map_err(|raw| failed(format!("non-utf8 entry name {}", raw.display())))?,
            None => {
                return Err(failed("zip entry path traversal detected".to_string()));
            }
        };
        if relative.as_str().is_empty() {
            continue;
        }
        let entry_path = target_dir.join(&relative);

        if entry.is_dir() {
            fs.create_dir_all(&entry_path)?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs.create_dir_all(parent)?;
        }
        let mut outfile = fs.create(&entry_path)?;
        io::copy(&mut entry, &mut outfile)
            .and_then(|_| outfile.flush())
            .map_err(|err| failed(format!("{relative}: {err}")))?;
        drop(outfile);
        if let Some(mode) = entry.unix_mode() {
            // Owner keeps read/write so a later run can replace the tree.
            fs.set_mode(&entry_path, (mode & 0o777) | 0o600)?;
        }
        tracing::debug!(archive = %zip_path, entry = %relative, "extracted");
    }

    strip_cruft(fs, target_dir)
}

/// Removes every `__MACOSX` directory and every `._*` file below `dir`.
pub fn strip_cruft(fs: &dyn Filesystem, dir: &Utf8Path) -> Result<(), PrepError> {
    let mut stack = vec![dir.to_path_buf()];
    while let Some(path) = stack.pop() {
        for entry in fs.read_dir(&path)? {
            match entry.kind {
                EntryKind::Dir if entry.name == MACOS_METADATA_DIR => {
                    fs.remove_dir_all(&entry.path)?;
                }
                EntryKind::Dir => stack.push(entry.path),
                _ if entry.name.starts_with(APPLE_DOUBLE_PREFIX) => {
                    fs.remove_file(&entry.path)?;
                }
                _ => {}
            }
        }
    }
    Ok(())
}
