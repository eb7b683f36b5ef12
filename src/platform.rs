//! Target platforms and binary container detection.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use goblin::Hint;

use crate::error::{ResolveError, Result};

/// The platform a distribution archive was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Linux, Platform::MacOs, Platform::Windows];

    /// Conventional file name of the root executable.
    pub fn executable_name(self) -> &'static str {
        match self {
            Platform::Linux | Platform::MacOs => "z3",
            Platform::Windows => "z3.exe",
        }
    }

    pub fn expected_format(self) -> BinaryFormat {
        match self {
            Platform::Linux => BinaryFormat::Elf,
            Platform::MacOs => BinaryFormat::MachO,
            Platform::Windows => BinaryFormat::Pe,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Platform::Linux => "linux",
            Platform::MacOs => "macos",
            Platform::Windows => "windows",
        })
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linux" => Ok(Platform::Linux),
            "macos" | "osx" | "macosx" | "darwin" => Ok(Platform::MacOs),
            "windows" | "win32" | "win64" => Ok(Platform::Windows),
            other => Err(format!("unknown platform '{other}'")),
        }
    }
}

/// Binary container of an executable or shared library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryFormat {
    Elf,
    MachO,
    Pe,
}

impl BinaryFormat {
    /// Identify the container of `path` from its leading magic bytes.
    ///
    /// Files that are too short or carry no known magic fail with
    /// [`ResolveError::UnknownFormat`].
    pub fn detect(path: &Path) -> Result<Self> {
        let mut header = [0u8; 16];
        let mut file = File::open(path).map_err(|e| ResolveError::io(path, e))?;
        let mut filled = 0;
        while filled < header.len() {
            let n = file
                .read(&mut header[filled..])
                .map_err(|e| ResolveError::io(path, e))?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        Self::from_magic(&header).ok_or_else(|| ResolveError::UnknownFormat {
            path: path.to_path_buf(),
        })
    }

    pub fn from_magic(header: &[u8; 16]) -> Option<Self> {
        match goblin::peek_bytes(header).ok()? {
            Hint::Elf(_) => Some(BinaryFormat::Elf),
            Hint::Mach(_) | Hint::MachFat(_) => Some(BinaryFormat::MachO),
            Hint::PE => Some(BinaryFormat::Pe),
            _ => None,
        }
    }
}

impl fmt::Display for BinaryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinaryFormat::Elf => "ELF",
            BinaryFormat::MachO => "Mach-O",
            BinaryFormat::Pe => "PE",
        })
    }
}
