//! Per-file dependency introspection.
//!
//! ELF and PE walkers ask a [`BinaryIntrospector`] for the libraries a file
//! declares. The external-tool backends shell out to `ldd`, `readelf` or
//! `objdump`; [`PeImports`] parses the import table in-process.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use crate::paths::find_system_library;

/// What the platform loader would do with a declared dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderStatus {
    /// Found through the default search path.
    Resolved,
    /// Explicitly reported as not found.
    NotFound,
    /// The backend cannot tell (import tables only carry names).
    Unknown,
}

/// One dependency name declared by a binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredDependency {
    pub name: String,
    pub status: LoaderStatus,
}

impl DeclaredDependency {
    pub fn new(name: impl Into<String>, status: LoaderStatus) -> Self {
        Self {
            name: name.into(),
            status,
        }
    }
}

/// Source of the declared dependencies of a single binary.
///
/// Implementations must be deterministic for an unmodified file; errors are
/// fatal for the whole resolution.
pub trait BinaryIntrospector: Send + Sync {
    fn declared_dependencies(&self, path: &Path) -> Result<Vec<DeclaredDependency>>;
}

fn run_tool(tool: &str, args: &[&str], path: &Path, install_hint: &str) -> Result<Output> {
    // Check file exists first for a clear error message
    if !path.exists() {
        bail!("File does not exist: {}", path.display());
    }
    Command::new(tool)
        .args(args)
        .arg(path)
        .output()
        .with_context(|| format!("{tool} command not found - {install_hint}"))
}

/// Whether `path` is a well-formed ELF file that needs the dynamic loader.
///
/// Fails for anything goblin cannot parse as ELF, including truncated files.
pub fn elf_is_dynamic(path: &Path) -> Result<bool> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let elf = goblin::elf::Elf::parse(&bytes)
        .with_context(|| format!("{} is not a valid ELF file", path.display()))?;
    Ok(elf.interpreter.is_some() || elf.dynamic.is_some())
}

/// Queries the host dynamic linker through `ldd`.
///
/// Only meaningful for binaries native to the host; `ldd` reports exactly
/// the libraries the loader could not find as `name => not found`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ldd;

impl BinaryIntrospector for Ldd {
    fn declared_dependencies(&self, path: &Path) -> Result<Vec<DeclaredDependency>> {
        let output = run_tool("ldd", &[], path, "install the C library utilities")?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        // ldd says the same for static binaries and for corrupt or foreign ones
        if stdout.contains("not a dynamic executable")
            || stderr.contains("not a dynamic executable")
            || stdout.contains("statically linked")
        {
            if elf_is_dynamic(path)? {
                bail!(
                    "ldd could not inspect {}: {}",
                    path.display(),
                    stderr.trim()
                );
            }
            return Ok(Vec::new());
        }
        if !output.status.success() {
            bail!("ldd failed on {}: {}", path.display(), stderr.trim());
        }

        Ok(parse_ldd_output(&stdout))
    }
}

/// Parse `ldd` output into declared dependencies.
///
/// Example ldd output:
/// ```text
///     linux-vdso.so.1 (0x00007ffc8d5e6000)
///     libz3.so => not found
///     libc.so.6 => /lib/x86_64-linux-gnu/libc.so.6 (0x00007f2a1c000000)
///     /lib64/ld-linux-x86-64.so.2 (0x00007f2a1c400000)
/// ```
pub fn parse_ldd_output(output: &str) -> Vec<DeclaredDependency> {
    let mut deps = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.split_once("=>") {
            Some((name, target)) => {
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                let status = if target.trim_start().starts_with("not found") {
                    LoaderStatus::NotFound
                } else {
                    LoaderStatus::Resolved
                };
                deps.push(DeclaredDependency::new(name, status));
            }
            None => {
                if let Some(name) = line.split_whitespace().next() {
                    deps.push(DeclaredDependency::new(name, LoaderStatus::Resolved));
                }
            }
        }
    }

    deps
}

/// Reads `(NEEDED)` entries with `readelf -d`.
///
/// This is architecture-independent - readelf reads the ELF headers directly
/// without executing the binary, unlike ldd which uses the host dynamic linker.
/// A name counts as resolved when it exists in the standard library
/// directories below `system_root`.
#[derive(Debug, Clone)]
pub struct Readelf {
    pub system_root: PathBuf,
}

impl Default for Readelf {
    fn default() -> Self {
        Self {
            system_root: PathBuf::from("/"),
        }
    }
}

impl BinaryIntrospector for Readelf {
    fn declared_dependencies(&self, path: &Path) -> Result<Vec<DeclaredDependency>> {
        let needed = get_needed_libraries(path)?;
        Ok(needed
            .into_iter()
            .map(|name| {
                let status = if find_system_library(&self.system_root, &name).is_some() {
                    LoaderStatus::Resolved
                } else {
                    LoaderStatus::NotFound
                };
                DeclaredDependency::new(name, status)
            })
            .collect())
    }
}

/// Extract NEEDED library names from an ELF binary using readelf.
///
/// # Errors
///
/// Returns an error if:
/// - The file does not exist
/// - `readelf` is not installed (install binutils)
/// - The file is not a well-formed ELF binary (text files, truncated images)
/// - `readelf` fails
///
/// Returns `Ok(Vec::new())` for a valid ELF binary without a dynamic section.
#[must_use = "library dependencies should be processed"]
pub fn get_needed_libraries(binary_path: &Path) -> Result<Vec<String>> {
    // Check file exists first for a clear error message
    if !binary_path.exists() {
        bail!("File does not exist: {}", binary_path.display());
    }
    if !elf_is_dynamic(binary_path)? {
        return Ok(Vec::new());
    }

    let output = run_tool("readelf", &["-d"], binary_path, "install binutils")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "readelf failed on {}: {}",
            binary_path.display(),
            stderr.trim()
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_readelf_output(&stdout))
}

/// Parse readelf -d output to extract NEEDED library names.
///
/// Example readelf output:
/// ```text
/// Dynamic section at offset 0x2d0e0 contains 28 entries:
///   Tag        Type                         Name/Value
///  0x0000000000000001 (NEEDED)             Shared library: [libz3.so]
///  0x0000000000000001 (NEEDED)             Shared library: [libc.so.6]
/// ```
pub fn parse_readelf_output(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| line.contains("(NEEDED)") && line.contains("Shared library:"))
        .filter_map(bracketed)
        .map(str::to_string)
        .collect()
}

fn bracketed(line: &str) -> Option<&str> {
    let start = line.find('[')?;
    let end = line[start..].find(']')? + start;
    Some(&line[start + 1..end])
}

/// Lists PE imports with `objdump -p`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Objdump;

impl BinaryIntrospector for Objdump {
    fn declared_dependencies(&self, path: &Path) -> Result<Vec<DeclaredDependency>> {
        let output = run_tool("objdump", &["-p"], path, "install binutils")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("objdump failed on {}: {}", path.display(), stderr.trim());
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_objdump_imports(&stdout)
            .into_iter()
            .map(|name| DeclaredDependency::new(name, LoaderStatus::Unknown))
            .collect())
    }
}

/// Parse the `DLL Name:` lines of `objdump -p` output.
///
/// ```text
/// The Import Tables (interpreted .idata section contents)
///  vma:            Hint/Ord Member-Name Bound-To
///  ...
///         DLL Name: libz3.dll
/// ```
pub fn parse_objdump_imports(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_once("DLL Name:"))
        .filter_map(|(_, rest)| rest.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// Reads the PE import table in-process with goblin.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeImports;

impl BinaryIntrospector for PeImports {
    fn declared_dependencies(&self, path: &Path) -> Result<Vec<DeclaredDependency>> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let pe = goblin::pe::PE::parse(&bytes)
            .with_context(|| format!("{} is not a valid PE image", path.display()))?;
        Ok(pe
            .libraries
            .iter()
            .map(|name| DeclaredDependency::new(*name, LoaderStatus::Unknown))
            .collect())
    }
}
