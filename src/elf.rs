//! ELF private-dependency walker.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::analyze::{BinaryIntrospector, LoaderStatus};
use crate::config::UnresolvedPolicy;
use crate::error::{ResolveError, Result, UnresolvedDependency};
use crate::graph::{traverse, ResolutionResult};
use crate::paths::normalize;
use crate::platform::BinaryFormat;

/// Recursively collect the libraries the loader cannot find on its own.
///
/// Only dependencies the introspector reports as [`LoaderStatus::NotFound`]
/// are followed; they are expected next to the file that declares them.
/// Everything the loader resolves is a system library and is left out.
pub fn walk_elf(
    root: &Path,
    introspector: &dyn BinaryIntrospector,
    policy: UnresolvedPolicy,
) -> Result<ResolutionResult> {
    let root = normalize(root);
    let mut unresolved = Vec::new();

    let graph = traverse(&root, |node| -> Result<Vec<PathBuf>> {
        let declared = introspector
            .declared_dependencies(node)
            .map_err(|err| ResolveError::introspection(node, err))?;
        let dir = node.parent().unwrap_or(Path::new("/"));

        let mut private: Vec<PathBuf> = Vec::new();
        for dep in declared {
            if dep.status != LoaderStatus::NotFound {
                continue;
            }
            let candidate = normalize(&dir.join(&dep.name));
            if candidate.is_file() {
                private.push(candidate);
            } else {
                policy.handle(UnresolvedDependency::new(dep.name, node), &mut unresolved)?;
            }
        }
        debug!(node = %node.display(), private = private.len(), "introspected");
        Ok(private)
    })?;

    info!(root = %root.display(), files = graph.node_count(), "resolved ELF closure");
    Ok(ResolutionResult {
        format: BinaryFormat::Elf,
        root,
        graph,
        unresolved,
    })
}
