//! PE import walker.
//!
//! Import tables name DLLs by file name only, and rarely in the case the
//! archive stores them in (`KERNEL32.dll`, `libz3.DLL`, ...). Lookups go
//! through a [`CaseFoldedIndex`] built once per bundle.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::analyze::BinaryIntrospector;
use crate::error::{ResolveError, Result};
use crate::graph::{traverse, ResolutionResult};
use crate::paths::{normalize, BundleRoot};
use crate::platform::BinaryFormat;

fn fold(s: &str) -> String {
    s.to_uppercase()
}

/// Read-only map from upper-cased names to bundle files.
#[derive(Debug, Clone, Default)]
pub struct CaseFoldedIndex {
    by_path: BTreeMap<String, PathBuf>,
    by_name: BTreeMap<String, PathBuf>,
}

impl CaseFoldedIndex {
    pub fn build(bundle: &BundleRoot) -> Result<Self> {
        Ok(Self::from_files(bundle.files()?))
    }

    /// Index `files`; when a name occurs in several directories the
    /// lexicographically first path wins the name-only lookup.
    pub fn from_files(files: impl IntoIterator<Item = PathBuf>) -> Self {
        let mut index = Self::default();
        for file in files {
            if let Some(name) = file.file_name() {
                index
                    .by_name
                    .entry(fold(&name.to_string_lossy()))
                    .and_modify(|existing| {
                        if file < *existing {
                            *existing = file.clone();
                        }
                    })
                    .or_insert_with(|| file.clone());
            }
            index.by_path.insert(fold(&file.to_string_lossy()), file);
        }
        index
    }

    /// Resolve an import declared by a file in `dir`: the dependent's own
    /// directory first, then anywhere in the bundle.
    pub fn resolve(&self, dir: &Path, dll: &str) -> Option<&Path> {
        let local = normalize(&dir.join(dll));
        self.by_path
            .get(&fold(&local.to_string_lossy()))
            .or_else(|| self.by_name.get(&fold(dll)))
            .map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

/// Recursively collect the DLLs `root` imports from the bundle.
///
/// Imports that match no bundle file are taken to be system DLLs.
pub fn walk_pe(
    root: &Path,
    index: &CaseFoldedIndex,
    introspector: &dyn BinaryIntrospector,
) -> Result<ResolutionResult> {
    let root = normalize(root);

    let graph = traverse(&root, |node| -> Result<Vec<PathBuf>> {
        let declared = introspector
            .declared_dependencies(node)
            .map_err(|err| ResolveError::introspection(node, err))?;
        let dir = node.parent().unwrap_or(Path::new("/"));

        let mut bundled = Vec::new();
        for dep in declared {
            match index.resolve(dir, &dep.name) {
                Some(path) => bundled.push(path.to_path_buf()),
                None => debug!(dll = %dep.name, "assuming system DLL"),
            }
        }
        Ok(bundled)
    })?;

    info!(root = %root.display(), files = graph.node_count(), "resolved PE closure");
    Ok(ResolutionResult {
        format: BinaryFormat::Pe,
        root,
        graph,
        unresolved: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::{DeclaredDependency, LoaderStatus};
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    struct FakeImports(HashMap<&'static str, Vec<&'static str>>);

    impl BinaryIntrospector for FakeImports {
        fn declared_dependencies(&self, path: &Path) -> anyhow::Result<Vec<DeclaredDependency>> {
            let name = path.file_name().unwrap().to_str().unwrap();
            Ok(self
                .0
                .get(name)
                .into_iter()
                .flatten()
                .map(|dll| DeclaredDependency::new(*dll, LoaderStatus::Unknown))
                .collect())
        }
    }

    fn bundle_with(files: &[&str]) -> (TempDir, BundleRoot) {
        let temp = TempDir::new().unwrap();
        for file in files {
            let path = temp.path().join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, "MZ").unwrap();
        }
        let bundle = BundleRoot::open(temp.path()).unwrap();
        (temp, bundle)
    }

    #[test]
    fn test_case_insensitive_import() {
        let (_temp, bundle) = bundle_with(&["bin/z3.exe", "bin/foo.dll"]);
        let bin = bundle.path().join("bin");
        let index = CaseFoldedIndex::build(&bundle).unwrap();
        let imports = FakeImports(HashMap::from([("z3.exe", vec!["FOO.DLL", "KERNEL32.dll"])]));

        let result = walk_pe(&bin.join("z3.exe"), &index, &imports).unwrap();
        let files: Vec<_> = result.files().map(Path::to_path_buf).collect();
        // The staged file keeps the on-disk casing
        assert_eq!(files, vec![bin.join("foo.dll"), bin.join("z3.exe")]);
    }

    #[test]
    fn test_transitive_and_cyclic_imports() {
        let (_temp, bundle) = bundle_with(&["bin/z3.exe", "bin/libz3.dll", "bin/libgomp.dll"]);
        let bin = bundle.path().join("bin");
        let index = CaseFoldedIndex::build(&bundle).unwrap();
        let imports = FakeImports(HashMap::from([
            ("z3.exe", vec!["libz3.dll", "MSVCP140.dll"]),
            ("libz3.dll", vec!["LIBGOMP.dll", "KERNEL32.dll"]),
            ("libgomp.dll", vec!["libz3.dll"]),
        ]));

        let result = walk_pe(&bin.join("z3.exe"), &index, &imports).unwrap();
        assert_eq!(result.len(), 3);
        assert!(result.contains(&bin.join("libgomp.dll")));
        assert!(result.unresolved.is_empty());
    }

    #[test]
    fn test_index_prefers_dependent_directory() {
        let files = vec![
            PathBuf::from("/b/a/LIBZ3.DLL"),
            PathBuf::from("/b/bin/libz3.dll"),
        ];
        let index = CaseFoldedIndex::from_files(files);

        assert_eq!(
            index.resolve(Path::new("/b/bin"), "libZ3.dll"),
            Some(Path::new("/b/bin/libz3.dll"))
        );
        // Falls back to the first match anywhere in the bundle
        assert_eq!(
            index.resolve(Path::new("/b/other"), "libz3.dll"),
            Some(Path::new("/b/a/LIBZ3.DLL"))
        );
        assert_eq!(index.resolve(Path::new("/b/bin"), "user32.dll"), None);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_root_without_imports() {
        let (_temp, bundle) = bundle_with(&["z3.exe", "README.txt"]);
        let index = CaseFoldedIndex::build(&bundle).unwrap();
        let imports = FakeImports(HashMap::new());

        let result = walk_pe(&bundle.path().join("z3.exe"), &index, &imports).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.root, bundle.path().join("z3.exe"));
    }
}
