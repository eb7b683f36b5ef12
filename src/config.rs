//! Resolver configuration.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

use crate::analyze::{BinaryIntrospector, Ldd, Objdump, PeImports, Readelf};
use crate::error::{ResolveError, Result, UnresolvedDependency};

/// What to do with a declared dependency that cannot be found in the bundle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnresolvedPolicy {
    /// Log a warning, record it in the result and keep going.
    #[default]
    Warn,
    /// Abort resolution with [`ResolveError::UnresolvedDependency`].
    Fail,
}

impl UnresolvedPolicy {
    pub(crate) fn handle(
        self,
        dependency: UnresolvedDependency,
        warnings: &mut Vec<UnresolvedDependency>,
    ) -> Result<()> {
        match self {
            UnresolvedPolicy::Warn => {
                warn!(
                    name = %dependency.name,
                    dependent = %dependency.dependent.display(),
                    "dependency not found in bundle"
                );
                warnings.push(dependency);
                Ok(())
            }
            UnresolvedPolicy::Fail => Err(ResolveError::UnresolvedDependency(dependency)),
        }
    }
}

impl FromStr for UnresolvedPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "warn" => Ok(UnresolvedPolicy::Warn),
            "fail" => Ok(UnresolvedPolicy::Fail),
            other => Err(format!("unknown unresolved-dependency policy '{other}'")),
        }
    }
}

impl fmt::Display for UnresolvedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnresolvedPolicy::Warn => "warn",
            UnresolvedPolicy::Fail => "fail",
        })
    }
}

/// How ELF files are introspected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ElfBackend {
    /// Ask the host dynamic linker (`ldd`). Host-native binaries only.
    #[default]
    Ldd,
    /// Read `NEEDED` entries with `readelf` and look them up below `system_root`.
    Readelf { system_root: PathBuf },
}

impl ElfBackend {
    pub(crate) fn introspector(&self) -> Box<dyn BinaryIntrospector> {
        match self {
            ElfBackend::Ldd => Box::new(Ldd),
            ElfBackend::Readelf { system_root } => Box::new(Readelf {
                system_root: system_root.clone(),
            }),
        }
    }
}

/// How PE import tables are read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PeBackend {
    /// Parse in-process.
    #[default]
    Imports,
    /// Shell out to `objdump -p`.
    Objdump,
}

impl PeBackend {
    pub(crate) fn introspector(self) -> Box<dyn BinaryIntrospector> {
        match self {
            PeBackend::Imports => Box::new(PeImports),
            PeBackend::Objdump => Box::new(Objdump),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverConfig {
    pub unresolved: UnresolvedPolicy,
    /// Root executable file name; defaults to the platform convention.
    pub executable_name: Option<String>,
    pub elf_backend: ElfBackend,
    pub pe_backend: PeBackend,
}
