//! Root executable discovery and walker selection.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{info, warn};

use crate::analyze::BinaryIntrospector;
use crate::config::ResolverConfig;
use crate::elf::walk_elf;
use crate::error::{ResolveError, Result};
use crate::graph::ResolutionResult;
use crate::macho::{walk_macho, LoadCommandReader, MachOParser};
use crate::paths::BundleRoot;
use crate::pe::{walk_pe, CaseFoldedIndex};
use crate::platform::{BinaryFormat, Platform};

/// Find the root executable named `name` anywhere in the bundle.
///
/// When several files match, the shallowest wins, then the first in path order.
pub fn find_root_executable(bundle: &BundleRoot, name: &str) -> Result<PathBuf> {
    bundle
        .files()?
        .into_iter()
        .filter(|p| p.file_name().is_some_and(|f| f == name))
        .min_by(|a, b| {
            a.components()
                .count()
                .cmp(&b.components().count())
                .then_with(|| a.cmp(b))
        })
        .ok_or_else(|| ResolveError::RootExecutableNotFound {
            name: name.to_string(),
            root: bundle.path().to_path_buf(),
        })
}

/// Resolves the private dependency closure of an unpacked distribution.
///
/// One resolver serves all three container formats; the walker is chosen
/// from the root executable's magic bytes.
pub struct Resolver {
    config: ResolverConfig,
    elf: Box<dyn BinaryIntrospector>,
    pe: Box<dyn BinaryIntrospector>,
    macho: Box<dyn LoadCommandReader>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(ResolverConfig::default())
    }
}

impl Resolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            elf: config.elf_backend.introspector(),
            pe: config.pe_backend.introspector(),
            macho: Box::new(MachOParser),
            config,
        }
    }

    pub fn with_elf_introspector(
        mut self,
        introspector: impl BinaryIntrospector + 'static,
    ) -> Self {
        self.elf = Box::new(introspector);
        self
    }

    pub fn with_pe_introspector(
        mut self,
        introspector: impl BinaryIntrospector + 'static,
    ) -> Self {
        self.pe = Box::new(introspector);
        self
    }

    pub fn with_macho_reader(mut self, reader: impl LoadCommandReader + 'static) -> Self {
        self.macho = Box::new(reader);
        self
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve the closure of the `platform` executable below `bundle_root`.
    pub fn resolve(&self, bundle_root: &Path, platform: Platform) -> Result<ResolutionResult> {
        let bundle = BundleRoot::open(bundle_root)?;
        let name = self
            .config
            .executable_name
            .as_deref()
            .unwrap_or(platform.executable_name());
        let root = find_root_executable(&bundle, name)?;

        let format = BinaryFormat::detect(&root)?;
        if format != platform.expected_format() {
            warn!(
                %platform,
                %format,
                root = %root.display(),
                "root executable format does not match platform"
            );
        }
        info!(%platform, %format, root = %root.display(), "resolving closure");

        let policy = self.config.unresolved;
        match format {
            BinaryFormat::Elf => walk_elf(&root, self.elf.as_ref(), policy),
            BinaryFormat::MachO => walk_macho(&bundle, &root, self.macho.as_ref(), policy),
            BinaryFormat::Pe => {
                let index = CaseFoldedIndex::build(&bundle)?;
                walk_pe(&root, &index, self.pe.as_ref())
            }
        }
    }

    /// Resolve several independent bundles in parallel.
    ///
    /// Results come back in the order of `jobs`.
    pub fn resolve_all(&self, jobs: &[(Platform, PathBuf)]) -> Vec<Result<ResolutionResult>> {
        jobs.par_iter()
            .map(|(platform, root)| self.resolve(root, *platform))
            .collect()
    }
}
