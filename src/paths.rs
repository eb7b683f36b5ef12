//! Bundle roots, path normalization and system library lookup.

use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{ResolveError, Result};

/// Library directories searched by the default dynamic loader, relative to a system root.
const SYSTEM_LIBRARY_DIRS: &[&str] = &[
    "lib64",
    "lib",
    "usr/lib64",
    "usr/lib",
    "usr/local/lib",
    "lib/x86_64-linux-gnu",
    "usr/lib/x86_64-linux-gnu",
    "lib/aarch64-linux-gnu",
    "usr/lib/aarch64-linux-gnu",
];

/// A directory holding one unpacked distribution.
///
/// The path is canonicalized once on open; every node produced by a walker
/// is derived from it, so containment checks are plain prefix checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleRoot {
    path: PathBuf,
}

impl BundleRoot {
    pub fn open(path: &Path) -> Result<Self> {
        let path = path.canonicalize().map_err(|e| ResolveError::io(path, e))?;
        if !path.is_dir() {
            return Err(ResolveError::io(
                &path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "bundle root is not a directory"),
            ));
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `path` lies inside this bundle. `path` must already be normalized.
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.path)
    }

    /// Every regular file in the bundle (symlinks to files included), sorted by path.
    pub fn files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.path).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(&self.path).to_path_buf();
                ResolveError::io(&path, e.into())
            })?;
            if entry.path().is_file() {
                files.push(normalize(entry.path()));
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Lexically normalize a path: drop `.` and fold `..` without touching the filesystem.
///
/// Symlinks are kept as named; the loader looks libraries up by the name
/// the dependent declares, not by what the link points to.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Find a library in the default loader search paths below `system_root`.
///
/// Returns `None` if the library is not found in any search path.
#[must_use = "found library path should be used"]
pub fn find_system_library(system_root: &Path, lib_name: &str) -> Option<PathBuf> {
    SYSTEM_LIBRARY_DIRS
        .iter()
        .map(|dir| system_root.join(dir).join(lib_name))
        .find(|p| p.exists() || p.is_symlink())
}
