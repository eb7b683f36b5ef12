//! Mach-O reference-graph walker.
//!
//! Mach-O load commands name libraries by install name (`@rpath/libz3.dylib`,
//! `/usr/lib/libSystem.B.dylib`, ...), which only map onto bundle files after
//! cross-referencing every binary in the bundle. So the whole bundle is
//! parsed first into one global graph, and the closure is the part of that
//! graph reachable from the root executable without leaving the bundle.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result as AnyResult};
use goblin::mach::{Mach, MachO, SingleArch};
use tracing::{debug, info};

use crate::config::UnresolvedPolicy;
use crate::error::{ResolveError, Result, UnresolvedDependency};
use crate::graph::{DependencyGraph, ResolutionResult};
use crate::paths::{normalize, BundleRoot};
use crate::platform::BinaryFormat;

/// The dependency-relevant load commands of one Mach-O file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadCommands {
    /// `LC_ID_DYLIB`, present for dylibs.
    pub install_name: Option<String>,
    /// Every dylib load command, in declaration order.
    pub dylibs: Vec<String>,
    /// `LC_RPATH` entries, unexpanded.
    pub rpaths: Vec<String>,
}

/// Source of [`LoadCommands`] for a file. Errors mean "not a Mach-O file".
pub trait LoadCommandReader: Send + Sync {
    fn read(&self, path: &Path) -> AnyResult<LoadCommands>;
}

/// Parses load commands in-process with goblin. Fat binaries contribute the
/// union over all their architectures.
#[derive(Debug, Clone, Copy, Default)]
pub struct MachOParser;

impl LoadCommandReader for MachOParser {
    fn read(&self, path: &Path) -> AnyResult<LoadCommands> {
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        parse_load_commands(&bytes)
            .with_context(|| format!("{} is not a Mach-O binary", path.display()))
    }
}

pub fn parse_load_commands(bytes: &[u8]) -> AnyResult<LoadCommands> {
    let mut commands = LoadCommands::default();
    match Mach::parse(bytes)? {
        Mach::Binary(macho) => merge(&mut commands, &macho),
        Mach::Fat(multi) => {
            for index in 0..multi.narches {
                if let SingleArch::MachO(macho) = multi.get(index)? {
                    merge(&mut commands, &macho);
                }
            }
        }
    }
    Ok(commands)
}

fn merge(commands: &mut LoadCommands, macho: &MachO<'_>) {
    if commands.install_name.is_none() {
        commands.install_name = macho.name.map(str::to_string);
    }
    // goblin reports the file itself as "self" at index 0
    for lib in macho.libs.iter().filter(|lib| **lib != "self") {
        if !commands.dylibs.iter().any(|d| d == lib) {
            commands.dylibs.push((*lib).to_string());
        }
    }
    for rpath in &macho.rpaths {
        if !commands.rpaths.iter().any(|r| r == rpath) {
            commands.rpaths.push((*rpath).to_string());
        }
    }
}

/// Where a load command reference points.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Reference {
    Path(PathBuf),
    Unresolved,
}

struct ReferenceResolver<'a> {
    install_names: BTreeMap<&'a str, &'a Path>,
    executable_dir: &'a Path,
    executable_rpaths: &'a [String],
}

impl ReferenceResolver<'_> {
    fn resolve(&self, reference: &str, loader: &Path, loader_rpaths: &[String]) -> Reference {
        if let Some(path) = self.install_names.get(reference) {
            return Reference::Path(path.to_path_buf());
        }

        let loader_dir = loader.parent().unwrap_or(Path::new("/"));
        let existing = |candidate: PathBuf| {
            let candidate = normalize(&candidate);
            if candidate.is_file() {
                Reference::Path(candidate)
            } else {
                Reference::Unresolved
            }
        };

        if let Some(rest) = reference.strip_prefix("@executable_path/") {
            existing(self.executable_dir.join(rest))
        } else if let Some(rest) = reference.strip_prefix("@loader_path/") {
            existing(loader_dir.join(rest))
        } else if let Some(rest) = reference.strip_prefix("@rpath/") {
            // Each rpath expands relative to the image that declares it
            let own = loader_rpaths
                .iter()
                .map(|rpath| self.expand(rpath, loader_dir));
            let inherited = self
                .executable_rpaths
                .iter()
                .map(|rpath| self.expand(rpath, self.executable_dir));
            own.chain(inherited)
                .map(|dir| dir.join(rest))
                .map(existing)
                .find(|r| matches!(r, Reference::Path(_)))
                .unwrap_or(Reference::Unresolved)
        } else if reference.starts_with('/') {
            Reference::Path(normalize(Path::new(reference)))
        } else {
            existing(loader_dir.join(reference))
        }
    }

    fn expand(&self, rpath: &str, loader_dir: &Path) -> PathBuf {
        if let Some(rest) = rpath.strip_prefix("@loader_path") {
            loader_dir.join(rest.trim_start_matches('/'))
        } else if let Some(rest) = rpath.strip_prefix("@executable_path") {
            self.executable_dir.join(rest.trim_start_matches('/'))
        } else {
            PathBuf::from(rpath)
        }
    }
}

/// Compute the Mach-O closure of `root` within `bundle`.
///
/// Files that fail to parse are skipped, except for the root itself, which
/// fails with [`ResolveError::IntrospectionFailed`]. References that leave
/// the bundle are system libraries and never appear in the result.
pub fn walk_macho(
    bundle: &BundleRoot,
    root: &Path,
    reader: &dyn LoadCommandReader,
    policy: UnresolvedPolicy,
) -> Result<ResolutionResult> {
    let root = normalize(root);

    let mut parsed: BTreeMap<PathBuf, LoadCommands> = BTreeMap::new();
    for file in bundle.files()? {
        match reader.read(&file) {
            Ok(commands) => {
                parsed.insert(file, commands);
            }
            Err(err) if file == root => return Err(ResolveError::introspection(&file, err)),
            Err(err) => debug!(file = %file.display(), "skipping: {err:#}"),
        }
    }
    // The root is normally found by the walk above, but it may sit outside the bundle.
    if !parsed.contains_key(&root) {
        let commands = reader
            .read(&root)
            .map_err(|err| ResolveError::introspection(&root, err))?;
        parsed.insert(root.clone(), commands);
    }

    let executable_rpaths = parsed
        .get(&root)
        .map(|c| c.rpaths.as_slice())
        .unwrap_or_default();
    let resolver = ReferenceResolver {
        install_names: parsed
            .iter()
            .filter_map(|(path, c)| Some((c.install_name.as_deref()?, path.as_path())))
            .collect(),
        executable_dir: root.parent().unwrap_or(Path::new("/")),
        executable_rpaths,
    };

    let mut global = DependencyGraph::new();
    let mut dangling: BTreeMap<&Path, Vec<&str>> = BTreeMap::new();
    for (file, commands) in &parsed {
        global.add_node(file);
        for dylib in &commands.dylibs {
            match resolver.resolve(dylib, file, &commands.rpaths) {
                Reference::Path(target) => global.add_edge(file, &target),
                Reference::Unresolved => dangling.entry(file.as_path()).or_default().push(dylib),
            }
        }
    }
    debug!(
        files = global.node_count(),
        references = global.edge_count(),
        "built Mach-O reference graph"
    );

    let graph = global.reachable_from(&root, |node| bundle.contains(node));

    let mut unresolved = Vec::new();
    for node in graph.nodes() {
        for name in dangling.get(node).into_iter().flatten() {
            policy.handle(UnresolvedDependency::new(*name, node), &mut unresolved)?;
        }
    }

    info!(root = %root.display(), files = graph.node_count(), "resolved Mach-O closure");
    Ok(ResolutionResult {
        format: BinaryFormat::MachO,
        root,
        graph,
        unresolved,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    /// Fixture reader: files listed in the map are Mach-O, everything else is not.
    struct FakeReader(HashMap<PathBuf, LoadCommands>);

    impl LoadCommandReader for FakeReader {
        fn read(&self, path: &Path) -> AnyResult<LoadCommands> {
            match self.0.get(path) {
                Some(commands) => Ok(commands.clone()),
                None => bail!("bad magic"),
            }
        }
    }

    fn commands(install_name: Option<&str>, dylibs: &[&str], rpaths: &[&str]) -> LoadCommands {
        LoadCommands {
            install_name: install_name.map(str::to_string),
            dylibs: dylibs.iter().map(|s| s.to_string()).collect(),
            rpaths: rpaths.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn bundle_with(files: &[&str]) -> (TempDir, BundleRoot) {
        let temp = TempDir::new().unwrap();
        for file in files {
            let path = temp.path().join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, "binary").unwrap();
        }
        let bundle = BundleRoot::open(temp.path()).unwrap();
        (temp, bundle)
    }

    fn names(result: &ResolutionResult, bundle: &BundleRoot) -> Vec<String> {
        result
            .files()
            .map(|f| f.strip_prefix(bundle.path()).unwrap().display().to_string())
            .collect()
    }

    #[test]
    fn test_rpath_and_loader_path_references() {
        let (_temp, bundle) = bundle_with(&[
            "z3-osx/bin/z3",
            "z3-osx/lib/libz3.dylib",
            "z3-osx/lib/libgmp.10.dylib",
            "z3-osx/lib/libunused.dylib",
            "z3-osx/include/z3.h",
        ]);
        let root = bundle.path().join("z3-osx/bin/z3");
        let lib = bundle.path().join("z3-osx/lib");
        let reader = FakeReader(HashMap::from([
            (
                root.clone(),
                commands(
                    None,
                    &["@rpath/libz3.dylib", "/usr/lib/libSystem.B.dylib"],
                    &["@executable_path/../lib"],
                ),
            ),
            (
                lib.join("libz3.dylib"),
                commands(
                    Some("@rpath/libz3.dylib"),
                    &["@loader_path/libgmp.10.dylib", "/usr/lib/libc++.1.dylib"],
                    &[],
                ),
            ),
            (lib.join("libgmp.10.dylib"), commands(None, &[], &[])),
            (lib.join("libunused.dylib"), commands(None, &[], &[])),
        ]));

        let result = walk_macho(&bundle, &root, &reader, UnresolvedPolicy::Warn).unwrap();
        assert_eq!(
            names(&result, &bundle),
            vec!["z3-osx/bin/z3", "z3-osx/lib/libgmp.10.dylib", "z3-osx/lib/libz3.dylib"]
        );
        assert!(result.unresolved.is_empty());
    }

    #[test]
    fn test_executable_rpath_expands_from_executable() {
        let (_temp, bundle) = bundle_with(&[
            "bin/z3",
            "Frameworks/sub/libz3.dylib",
            "Frameworks/libgmp.dylib",
        ]);
        let root = bundle.path().join("bin/z3");
        let frameworks = bundle.path().join("Frameworks");
        let reader = FakeReader(HashMap::from([
            (
                root.clone(),
                commands(None, &["@rpath/sub/libz3.dylib"], &["@loader_path/../Frameworks"]),
            ),
            (
                frameworks.join("sub/libz3.dylib"),
                commands(None, &["@rpath/libgmp.dylib"], &[]),
            ),
            (frameworks.join("libgmp.dylib"), commands(None, &[], &[])),
        ]));

        let result = walk_macho(&bundle, &root, &reader, UnresolvedPolicy::Fail).unwrap();
        assert_eq!(
            names(&result, &bundle),
            vec!["Frameworks/libgmp.dylib", "Frameworks/sub/libz3.dylib", "bin/z3"]
        );
        assert!(result.unresolved.is_empty());
    }

    #[test]
    fn test_system_libraries_never_leak() {
        let (_temp, bundle) = bundle_with(&["bin/z3"]);
        let root = bundle.path().join("bin/z3");
        let reader = FakeReader(HashMap::from([(
            root.clone(),
            commands(None, &["/usr/lib/libSystem.B.dylib", "/usr/lib/libc++.1.dylib"], &[]),
        )]));

        let result = walk_macho(&bundle, &root, &reader, UnresolvedPolicy::Warn).unwrap();
        assert!(result.files().all(|f| bundle.contains(f)));
        assert_eq!(result.len(), 1);
        assert!(result.unresolved.is_empty());
    }

    #[test]
    fn test_absolute_install_name_cross_referenced() {
        // The executable was linked against the build-tree path of libz3.
        let (_temp, bundle) = bundle_with(&["bin/z3", "bin/libz3.dylib"]);
        let root = bundle.path().join("bin/z3");
        let reader = FakeReader(HashMap::from([
            (
                root.clone(),
                commands(None, &["/Users/build/z3/build/libz3.dylib"], &[]),
            ),
            (
                bundle.path().join("bin/libz3.dylib"),
                commands(Some("/Users/build/z3/build/libz3.dylib"), &[], &[]),
            ),
        ]));

        let result = walk_macho(&bundle, &root, &reader, UnresolvedPolicy::Warn).unwrap();
        assert_eq!(names(&result, &bundle), vec!["bin/libz3.dylib", "bin/z3"]);
    }

    #[test]
    fn test_bare_name_next_to_loader() {
        let (_temp, bundle) = bundle_with(&["bin/z3", "bin/libz3.dylib"]);
        let root = bundle.path().join("bin/z3");
        let reader = FakeReader(HashMap::from([
            (root.clone(), commands(None, &["libz3.dylib"], &[])),
            (bundle.path().join("bin/libz3.dylib"), commands(None, &[], &[])),
        ]));

        let result = walk_macho(&bundle, &root, &reader, UnresolvedPolicy::Warn).unwrap();
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_cycle_between_dylibs() {
        let (_temp, bundle) = bundle_with(&["bin/z3", "bin/libA.dylib", "bin/libB.dylib"]);
        let root = bundle.path().join("bin/z3");
        let bin = bundle.path().join("bin");
        let reader = FakeReader(HashMap::from([
            (root.clone(), commands(None, &["@loader_path/libA.dylib"], &[])),
            (bin.join("libA.dylib"), commands(None, &["@loader_path/libB.dylib"], &[])),
            (bin.join("libB.dylib"), commands(None, &["@loader_path/libA.dylib"], &[])),
        ]));

        let result = walk_macho(&bundle, &root, &reader, UnresolvedPolicy::Warn).unwrap();
        assert_eq!(names(&result, &bundle), vec!["bin/libA.dylib", "bin/libB.dylib", "bin/z3"]);
    }

    #[test]
    fn test_dangling_rpath_reference() {
        let (_temp, bundle) = bundle_with(&["bin/z3"]);
        let root = bundle.path().join("bin/z3");
        let reader = FakeReader(HashMap::from([(
            root.clone(),
            commands(None, &["@rpath/libmissing.dylib"], &["@executable_path/../lib"]),
        )]));

        let result = walk_macho(&bundle, &root, &reader, UnresolvedPolicy::Warn).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.unresolved.len(), 1);
        assert_eq!(result.unresolved[0].name, "@rpath/libmissing.dylib");

        let err = walk_macho(&bundle, &root, &reader, UnresolvedPolicy::Fail).unwrap_err();
        assert!(matches!(err, ResolveError::UnresolvedDependency(_)));
    }

    #[test]
    fn test_unparseable_root_is_fatal() {
        let (_temp, bundle) = bundle_with(&["bin/z3"]);
        let root = bundle.path().join("bin/z3");
        let reader = FakeReader(HashMap::new());

        let err = walk_macho(&bundle, &root, &reader, UnresolvedPolicy::Warn).unwrap_err();
        assert!(matches!(err, ResolveError::IntrospectionFailed { .. }));
    }

    #[test]
    fn test_parse_rejects_non_macho() {
        assert!(parse_load_commands(b"#!/bin/sh\necho not a binary\n").is_err());
        assert!(MachOParser.read(Path::new("/nonexistent/z3")).is_err());
    }
}
