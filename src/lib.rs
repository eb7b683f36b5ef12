//! Private dependency closure resolution for unpacked binary distributions.
//!
//! Given the extracted archive of a native executable, finds the executable
//! and every shared library it bundles privately, transitively, so the set
//! can be relocated and run without the original tree. System libraries are
//! never part of the closure.
//!
//! - ELF: the host loader (`ldd`) or `readelf` tells which `NEEDED` entries
//!   the default search path cannot satisfy; those are looked up next to
//!   their dependent.
//! - Mach-O: every file in the bundle is parsed and the load-command graph
//!   is cut down to what the root reaches inside the bundle.
//! - PE: import tables are matched case-insensitively against bundle files.

mod analyze;
mod config;
mod copy;
mod elf;
mod error;
mod graph;
mod macho;
mod paths;
mod pe;
mod platform;
mod probe;

pub use analyze::{
    elf_is_dynamic, get_needed_libraries, parse_ldd_output, parse_objdump_imports,
    parse_readelf_output, BinaryIntrospector, DeclaredDependency, Ldd, LoaderStatus, Objdump,
    PeImports, Readelf,
};
pub use config::{ElfBackend, PeBackend, ResolverConfig, UnresolvedPolicy};
pub use copy::{make_executable, stage_closure, StageOptions, StagedFiles};
pub use elf::walk_elf;
pub use error::{ResolveError, Result, UnresolvedDependency};
pub use graph::{traverse, DependencyGraph, NodeState, ResolutionResult};
pub use macho::{parse_load_commands, walk_macho, LoadCommandReader, LoadCommands, MachOParser};
pub use paths::{find_system_library, normalize, BundleRoot};
pub use pe::{walk_pe, CaseFoldedIndex};
pub use platform::{BinaryFormat, Platform};
pub use probe::{find_root_executable, Resolver};
