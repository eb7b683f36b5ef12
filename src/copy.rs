//! Staging a resolved closure into a flat `binaries` directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::info;

use crate::error::{ResolveError, Result};
use crate::graph::ResolutionResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageOptions {
    /// Remove an existing staging directory before copying.
    pub replace_existing: bool,
}

/// Files placed by [`stage_closure`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagedFiles {
    /// Destination paths, in basename order.
    pub files: Vec<PathBuf>,
    /// Total size in bytes of all files copied.
    pub total_size: u64,
}

/// Make a file executable (chmod 755).
#[cfg(unix)]
pub fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = fs::metadata(path)
        .map_err(|e| ResolveError::io(path, e))?
        .permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).map_err(|e| ResolveError::io(path, e))
}

#[cfg(not(unix))]
pub fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Copy every file of `result` by basename into `binaries_dir`.
///
/// Copies run in parallel and have all completed when this returns. Two
/// closure files sharing a basename fail with
/// [`ResolveError::StagingCollision`] before anything is written. Symlinks
/// are copied as the file they point to, under the link's name.
pub fn stage_closure(
    result: &ResolutionResult,
    binaries_dir: &Path,
    options: StageOptions,
) -> Result<StagedFiles> {
    let mut plan: BTreeMap<String, &Path> = BTreeMap::new();
    for src in result.files() {
        let name = src
            .file_name()
            .ok_or_else(|| {
                ResolveError::io(
                    src,
                    std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"),
                )
            })?
            .to_string_lossy()
            .into_owned();
        if let Some(first) = plan.get(&name) {
            return Err(ResolveError::StagingCollision {
                name,
                first: first.to_path_buf(),
                second: src.to_path_buf(),
            });
        }
        plan.insert(name, src);
    }

    if options.replace_existing && binaries_dir.exists() {
        fs::remove_dir_all(binaries_dir).map_err(|e| ResolveError::io(binaries_dir, e))?;
    }
    fs::create_dir_all(binaries_dir).map_err(|e| ResolveError::io(binaries_dir, e))?;

    let copied: Vec<(PathBuf, u64)> = plan
        .par_iter()
        .map(|(name, src)| {
            let dest = binaries_dir.join(name);
            let size = fs::copy(src, &dest).map_err(|e| ResolveError::io(src, e))?;
            Ok((dest, size))
        })
        .collect::<Result<_>>()?;

    if let Some(name) = result.root.file_name() {
        make_executable(&binaries_dir.join(name))?;
    }

    let staged = StagedFiles {
        total_size: copied.iter().map(|(_, size)| size).sum(),
        files: copied.into_iter().map(|(dest, _)| dest).collect(),
    };
    info!(
        dir = %binaries_dir.display(),
        files = staged.files.len(),
        bytes = staged.total_size,
        "staged closure"
    );
    Ok(staged)
}
