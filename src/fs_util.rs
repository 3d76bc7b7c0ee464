use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{self, BufReader, BufWriter, Cursor, Read, Seek, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::error::PrepError;

pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub path: Utf8PathBuf,
    pub kind: EntryKind,
}

impl DirEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }
}

/// The narrow set of filesystem operations the normalization pipeline relies on.
///
/// `kind` follows symbolic links; `read_dir` reports each entry's own kind and
/// returns entries sorted by name so every caller sees a deterministic order.
pub trait Filesystem: Send + Sync {
    fn kind(&self, path: &Utf8Path) -> Option<EntryKind>;
    fn read_dir(&self, path: &Utf8Path) -> Result<Vec<DirEntry>, PrepError>;
    fn create_dir_all(&self, path: &Utf8Path) -> Result<(), PrepError>;
    fn remove_dir_all(&self, path: &Utf8Path) -> Result<(), PrepError>;
    fn remove_file(&self, path: &Utf8Path) -> Result<(), PrepError>;
    fn rename(&self, from: &Utf8Path, to: &Utf8Path) -> Result<(), PrepError>;
    fn open(&self, path: &Utf8Path) -> Result<Box<dyn ReadSeek>, PrepError>;
    fn create(&self, path: &Utf8Path) -> Result<Box<dyn Write>, PrepError>;
    fn symlink_dir(&self, target: &Utf8Path, link: &Utf8Path) -> Result<(), PrepError>;

    /// Applies Unix permission bits. Filesystems without them ignore the call.
    fn set_mode(&self, _path: &Utf8Path, _mode: u32) -> Result<(), PrepError> {
        Ok(())
    }

    fn exists(&self, path: &Utf8Path) -> bool {
        self.kind(path).is_some()
    }

    fn is_dir(&self, path: &Utf8Path) -> bool {
        self.kind(path) == Some(EntryKind::Dir)
    }

    fn is_empty_dir(&self, path: &Utf8Path) -> Result<bool, PrepError> {
        Ok(self.read_dir(path)?.is_empty())
    }

    /// Removes whatever lives at `path`; a missing path is not an error.
    fn remove_all(&self, path: &Utf8Path) -> Result<(), PrepError> {
        match self.kind(path) {
            Some(EntryKind::Dir) => self.remove_dir_all(path),
            Some(_) => self.remove_file(path),
            None => Ok(()),
        }
    }

    fn read(&self, path: &Utf8Path) -> Result<Vec<u8>, PrepError> {
        let mut reader = self.open(path)?;
        let mut content = Vec::new();
        reader
            .read_to_end(&mut content)
            .map_err(|err| fs_error("read", path, err))?;
        Ok(content)
    }

    fn write(&self, path: &Utf8Path, content: &[u8]) -> Result<(), PrepError> {
        let mut writer = self.create(path)?;
        writer
            .write_all(content)
            .and_then(|_| writer.flush())
            .map_err(|err| fs_error("write", path, err))
    }
}

pub(crate) fn fs_error(action: &str, path: &Utf8Path, err: impl fmt::Display) -> PrepError {
    PrepError::Filesystem(format!("{action} {path}: {err}"))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OsFilesystem;

impl Filesystem for OsFilesystem {
    fn kind(&self, path: &Utf8Path) -> Option<EntryKind> {
        let metadata = fs::metadata(path.as_std_path()).ok()?;
        if metadata.is_dir() {
            Some(EntryKind::Dir)
        } else {
            Some(EntryKind::File)
        }
    }

    fn read_dir(&self, path: &Utf8Path) -> Result<Vec<DirEntry>, PrepError> {
        let entries =
            fs::read_dir(path.as_std_path()).map_err(|err| fs_error("read dir", path, err))?;
        let mut items = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| fs_error("read dir", path, err))?;
            let entry_path = Utf8PathBuf::from_path_buf(entry.path()).map_err(|raw| {
                PrepError::Filesystem(format!("non-utf8 path: {}", raw.display()))
            })?;
            let name = entry_path
                .file_name()
                .map(str::to_string)
                .ok_or_else(|| fs_error("read dir", path, "entry without a name"))?;
            let file_type = entry
                .file_type()
                .map_err(|err| fs_error("stat", &entry_path, err))?;
            let kind = if file_type.is_symlink() {
                EntryKind::Symlink
            } else if file_type.is_dir() {
                EntryKind::Dir
            } else {
                EntryKind::File
            };
            items.push(DirEntry {
                name,
                path: entry_path,
                kind,
            });
        }
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    fn create_dir_all(&self, path: &Utf8Path) -> Result<(), PrepError> {
        fs::create_dir_all(path.as_std_path()).map_err(|err| fs_error("create dir", path, err))
    }

    fn remove_dir_all(&self, path: &Utf8Path) -> Result<(), PrepError> {
        fs::remove_dir_all(path.as_std_path()).map_err(|err| fs_error("remove dir", path, err))
    }

    fn remove_file(&self, path: &Utf8Path) -> Result<(), PrepError> {
        fs::remove_file(path.as_std_path()).map_err(|err| fs_error("remove file", path, err))
    }

    fn rename(&self, from: &Utf8Path, to: &Utf8Path) -> Result<(), PrepError> {
        fs::rename(from.as_std_path(), to.as_std_path())
            .map_err(|err| fs_error("rename", from, format!("-> {to}: {err}")))
    }

    fn open(&self, path: &Utf8Path) -> Result<Box<dyn ReadSeek>, PrepError> {
        let file = fs::File::open(path.as_std_path()).map_err(|err| fs_error("open", path, err))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn create(&self, path: &Utf8Path) -> Result<Box<dyn Write>, PrepError> {
        let file =
            fs::File::create(path.as_std_path()).map_err(|err| fs_error("create", path, err))?;
        Ok(Box::new(BufWriter::new(file)))
    }

    #[cfg(unix)]
    fn symlink_dir(&self, target: &Utf8Path, link: &Utf8Path) -> Result<(), PrepError> {
        std::os::unix::fs::symlink(target.as_std_path(), link.as_std_path())
            .map_err(|err| fs_error("symlink", link, err))
    }

    #[cfg(windows)]
    fn symlink_dir(&self, target: &Utf8Path, link: &Utf8Path) -> Result<(), PrepError> {
        std::os::windows::fs::symlink_dir(target.as_std_path(), link.as_std_path())
            .map_err(|err| fs_error("symlink", link, err))
    }

    #[cfg(unix)]
    fn set_mode(&self, path: &Utf8Path, mode: u32) -> Result<(), PrepError> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path.as_std_path(), fs::Permissions::from_mode(mode))
            .map_err(|err| fs_error("chmod", path, err))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Dir,
    File(Vec<u8>),
    Symlink(Utf8PathBuf),
}

type NodeMap = BTreeMap<Utf8PathBuf, Node>;

/// Opaque copy of a [`MemoryFilesystem`] tree, used to assert that a run left
/// nothing changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemorySnapshot(NodeMap);

/// In-memory filesystem. Clones share the same tree.
#[derive(Debug, Clone)]
pub struct MemoryFilesystem {
    nodes: Arc<Mutex<NodeMap>>,
}

impl Default for MemoryFilesystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFilesystem {
    pub fn new() -> Self {
        let mut nodes = NodeMap::new();
        nodes.insert(Utf8PathBuf::from("/"), Node::Dir);
        Self {
            nodes: Arc::new(Mutex::new(nodes)),
        }
    }

    pub fn snapshot(&self) -> Result<MemorySnapshot, PrepError> {
        Ok(MemorySnapshot(self.lock()?.clone()))
    }

    fn lock(&self) -> Result<MutexGuard<'_, NodeMap>, PrepError> {
        self.nodes
            .lock()
            .map_err(|_| PrepError::Filesystem("memory filesystem lock poisoned".to_string()))
    }
}

const MAX_LINK_HOPS: usize = 16;

/// Follows symbolic links in every component of `path`, returning the
/// resolved location and the node stored there.
fn resolve<'a>(nodes: &'a NodeMap, path: &Utf8Path) -> Option<(Utf8PathBuf, &'a Node)> {
    let mut hops = 0;
    resolve_with(nodes, path, &mut hops)
}

fn resolve_with<'a>(
    nodes: &'a NodeMap,
    path: &Utf8Path,
    hops: &mut usize,
) -> Option<(Utf8PathBuf, &'a Node)> {
    let mut current = Utf8PathBuf::new();
    let mut found = None;
    for component in path.components() {
        current.push(component.as_str());
        let mut node = nodes.get(&current)?;
        while let Node::Symlink(target) = node {
            *hops += 1;
            if *hops > MAX_LINK_HOPS {
                return None;
            }
            let target = match current.parent() {
                Some(parent) if target.is_relative() => parent.join(target),
                _ => target.clone(),
            };
            let (resolved, resolved_node) = resolve_with(nodes, &target, hops)?;
            current = resolved;
            node = resolved_node;
        }
        found = Some(node);
    }
    found.map(|node| (current, node))
}

/// Where the entry named by `path` itself is stored: links in the parent are
/// followed, the last component is not.
fn locate(nodes: &NodeMap, path: &Utf8Path) -> Utf8PathBuf {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_str().is_empty() => {
            match resolve(nodes, parent) {
                Some((resolved, Node::Dir)) => resolved.join(name),
                _ => path.to_path_buf(),
            }
        }
        _ => path.to_path_buf(),
    }
}

fn parent_is_dir(nodes: &NodeMap, path: &Utf8Path) -> bool {
    match path.parent() {
        None => true,
        Some(parent) if parent.as_str().is_empty() => true,
        Some(parent) => matches!(resolve(nodes, parent), Some((_, Node::Dir))),
    }
}

fn has_children(nodes: &NodeMap, path: &Utf8Path) -> bool {
    nodes.keys().any(|key| key.parent() == Some(path))
}

impl Filesystem for MemoryFilesystem {
    fn kind(&self, path: &Utf8Path) -> Option<EntryKind> {
        let nodes = self.lock().ok()?;
        match resolve(&nodes, path)?.1 {
            Node::Dir => Some(EntryKind::Dir),
            _ => Some(EntryKind::File),
        }
    }

    fn read_dir(&self, path: &Utf8Path) -> Result<Vec<DirEntry>, PrepError> {
        let nodes = self.lock()?;
        let dir = match resolve(&nodes, path) {
            Some((resolved, Node::Dir)) => resolved,
            Some(_) => return Err(fs_error("read dir", path, "not a directory")),
            None => return Err(fs_error("read dir", path, "no such directory")),
        };
        let mut items = nodes
            .iter()
            .filter(|(key, _)| key.parent() == Some(dir.as_path()))
            .filter_map(|(key, node)| {
                let name = key.file_name()?.to_string();
                let kind = match node {
                    Node::Dir => EntryKind::Dir,
                    Node::File(_) => EntryKind::File,
                    Node::Symlink(_) => EntryKind::Symlink,
                };
                Some(DirEntry {
                    name: name.clone(),
                    path: path.join(name),
                    kind,
                })
            })
            .collect::<Vec<_>>();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    fn create_dir_all(&self, path: &Utf8Path) -> Result<(), PrepError> {
        let mut nodes = self.lock()?;
        let mut missing = Vec::new();
        let mut base = None;
        for ancestor in path.ancestors() {
            if ancestor.as_str().is_empty() {
                continue;
            }
            match resolve(&nodes, ancestor) {
                Some((resolved, Node::Dir)) => {
                    base = Some((ancestor, resolved));
                    break;
                }
                Some(_) => return Err(fs_error("create dir", ancestor, "not a directory")),
                None => missing.push(ancestor),
            }
        }
        for dir in missing {
            let key = match &base {
                Some((ancestor, resolved)) => match dir.strip_prefix(ancestor) {
                    Ok(relative) => resolved.join(relative),
                    Err(_) => dir.to_path_buf(),
                },
                None => dir.to_path_buf(),
            };
            nodes.insert(key, Node::Dir);
        }
        Ok(())
    }

    fn remove_dir_all(&self, path: &Utf8Path) -> Result<(), PrepError> {
        let mut nodes = self.lock()?;
        let stored = locate(&nodes, path);
        match nodes.get(&stored) {
            Some(Node::Dir) | Some(Node::Symlink(_)) => {}
            Some(Node::File(_)) => return Err(fs_error("remove dir", path, "not a directory")),
            None => return Err(fs_error("remove dir", path, "no such directory")),
        }
        nodes.retain(|key, _| !key.starts_with(&stored));
        Ok(())
    }

    fn remove_file(&self, path: &Utf8Path) -> Result<(), PrepError> {
        let mut nodes = self.lock()?;
        let stored = locate(&nodes, path);
        match nodes.get(&stored) {
            Some(Node::File(_)) | Some(Node::Symlink(_)) => {
                nodes.remove(&stored);
                Ok(())
            }
            Some(Node::Dir) => Err(fs_error("remove file", path, "is a directory")),
            None => Err(fs_error("remove file", path, "no such file")),
        }
    }

    fn rename(&self, from: &Utf8Path, to: &Utf8Path) -> Result<(), PrepError> {
        let mut nodes = self.lock()?;
        let (from, to) = (locate(&nodes, from), locate(&nodes, to));
        let (from, to) = (from.as_path(), to.as_path());
        let source_is_dir = match nodes.get(from) {
            Some(node) => *node == Node::Dir,
            None => return Err(fs_error("rename", from, "no such file or directory")),
        };
        if from == to {
            return Ok(());
        }
        if to.starts_with(from) {
            return Err(fs_error("rename", from, format!("-> {to}: target inside source")));
        }
        if !parent_is_dir(&nodes, to) {
            return Err(fs_error("rename", from, format!("-> {to}: missing parent")));
        }
        match nodes.get(to) {
            Some(Node::Dir) if !source_is_dir => {
                return Err(fs_error("rename", from, format!("-> {to}: target is a directory")));
            }
            Some(Node::Dir) if has_children(&nodes, to) => {
                return Err(fs_error("rename", from, format!("-> {to}: directory not empty")));
            }
            Some(Node::File(_)) | Some(Node::Symlink(_)) if source_is_dir => {
                return Err(fs_error("rename", from, format!("-> {to}: not a directory")));
            }
            _ => {}
        }
        nodes.remove(to);
        let moved = nodes
            .keys()
            .filter(|key| key.starts_with(from))
            .cloned()
            .collect::<Vec<_>>();
        for key in moved {
            if let Some(node) = nodes.remove(&key) {
                let relative = key.strip_prefix(from).unwrap_or(Utf8Path::new(""));
                let target = if relative.as_str().is_empty() {
                    to.to_path_buf()
                } else {
                    to.join(relative)
                };
                nodes.insert(target, node);
            }
        }
        Ok(())
    }

    fn open(&self, path: &Utf8Path) -> Result<Box<dyn ReadSeek>, PrepError> {
        let nodes = self.lock()?;
        match resolve(&nodes, path) {
            Some((_, Node::File(content))) => Ok(Box::new(Cursor::new(content.clone()))),
            Some(_) => Err(fs_error("open", path, "is a directory")),
            None => Err(fs_error("open", path, "no such file")),
        }
    }

    fn create(&self, path: &Utf8Path) -> Result<Box<dyn Write>, PrepError> {
        let mut nodes = self.lock()?;
        if !parent_is_dir(&nodes, path) {
            return Err(fs_error("create", path, "missing parent directory"));
        }
        let stored = match resolve(&nodes, path) {
            Some((_, Node::Dir)) => return Err(fs_error("create", path, "is a directory")),
            Some((resolved, _)) => resolved,
            None => locate(&nodes, path),
        };
        nodes.insert(stored.clone(), Node::File(Vec::new()));
        Ok(Box::new(MemoryWriter {
            nodes: Arc::clone(&self.nodes),
            path: stored,
        }))
    }

    fn symlink_dir(&self, target: &Utf8Path, link: &Utf8Path) -> Result<(), PrepError> {
        let mut nodes = self.lock()?;
        if !parent_is_dir(&nodes, link) {
            return Err(fs_error("symlink", link, "missing parent directory"));
        }
        let stored = locate(&nodes, link);
        if nodes.contains_key(&stored) {
            return Err(fs_error("symlink", link, "already exists"));
        }
        nodes.insert(stored, Node::Symlink(target.to_path_buf()));
        Ok(())
    }
}

struct MemoryWriter {
    nodes: Arc<Mutex<NodeMap>>,
    path: Utf8PathBuf,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut nodes = self
            .nodes
            .lock()
            .map_err(|_| io::Error::other("memory filesystem lock poisoned"))?;
        match nodes.get_mut(&self.path) {
            Some(Node::File(content)) => {
                content.extend_from_slice(buf);
                Ok(buf.len())
            }
            _ => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} was removed while open", self.path),
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
