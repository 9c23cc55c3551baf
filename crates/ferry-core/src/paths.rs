//! Filesystem helpers shared by the stores.

use std::ffi::OsString;
use std::io;
use std::path::{Component, Path, PathBuf};

/// `path` with `suffix` appended to its file name (`a.crate` -> `a.crate.sha256`).
pub fn path_append(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// Sibling temp path used while a download is in flight.
pub fn tmp_path_for(path: &Path) -> PathBuf {
    path_append(path, ".tmp")
}

/// Create the parent directory of `path` if needed.
///
/// `create_dir_all` treats a directory created concurrently by another
/// worker as success, so shared prefix directories need no locking.
pub fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Remove empty ancestors of `path`, stopping at (and never removing) `root`.
pub fn remove_empty_parents(path: &Path, root: &Path) {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        // Fails on non-empty directories, which ends the walk.
        if std::fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}

/// Whether the filesystem holding `dir` folds case.
///
/// Creates a lowercase probe file and checks whether its uppercase spelling
/// resolves to it.
pub fn is_case_insensitive(dir: &Path) -> io::Result<bool> {
    std::fs::create_dir_all(dir)?;
    let probe = tempfile::Builder::new()
        .prefix(".ferry-case-probe-")
        .rand_bytes(8)
        .tempfile_in(dir)?;
    let name = probe
        .path()
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_ascii_uppercase)
        .ok_or_else(|| io::Error::other("probe file has no name"))?;
    Ok(dir.join(name).exists())
}

/// Join a `/`-separated relative path onto `root`, refusing absolute paths
/// and parent-directory components.
pub fn join_relative(root: &Path, rel: &str) -> Option<PathBuf> {
    let rel_path = Path::new(rel);
    let mut out = root.to_path_buf();
    for component in rel_path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if out == root { None } else { Some(out) }
}

/// `path` relative to `root` with `/` separators on every platform.
pub fn rel_path_string(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
