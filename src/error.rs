//! Error types for closure resolution and staging.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub type Result<T, E = ResolveError> = std::result::Result<T, E>;

/// A declared dependency that could not be located inside the bundle.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnresolvedDependency {
    /// The name as declared by the dependent (e.g. `libgmp.so.10`, `@rpath/libz3.dylib`).
    pub name: String,
    /// The file that declared it.
    pub dependent: PathBuf,
}

impl UnresolvedDependency {
    pub fn new(name: impl Into<String>, dependent: &Path) -> Self {
        Self {
            name: name.into(),
            dependent: dependent.to_path_buf(),
        }
    }
}

impl fmt::Display for UnresolvedDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' required by {} could not be located in the bundle",
            self.name,
            self.dependent.display()
        )
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    /// No file with the expected executable name exists in the bundle.
    #[error("no '{name}' executable found under {}", root.display())]
    RootExecutableNotFound { name: String, root: PathBuf },

    /// The backend could not read the dependency list of a file.
    #[error("failed to introspect {}", path.display())]
    IntrospectionFailed {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// A private dependency is missing and the policy is `Fail`.
    #[error("{0}")]
    UnresolvedDependency(UnresolvedDependency),

    /// The root executable's magic bytes match no supported format.
    #[error("{} is not an ELF, Mach-O or PE binary", path.display())]
    UnknownFormat { path: PathBuf },

    /// Two closure files share a basename in the flat staging directory.
    #[error(
        "{} and {} would both be staged as '{name}'",
        first.display(),
        second.display()
    )]
    StagingCollision {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    /// Filesystem failure while scanning or staging.
    #[error("I/O error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ResolveError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn introspection(path: &Path, source: anyhow::Error) -> Self {
        Self::IntrospectionFailed {
            path: path.to_path_buf(),
            source: source.into(),
        }
    }
}
