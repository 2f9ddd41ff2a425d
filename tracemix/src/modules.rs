//! Resolves code addresses to the bytes loaded there.
//!
//! The module list is plain text, one module per line:
//!
//! ```text
//! # start      end        offset  path
//! 0x400000     0x401000   0x0     /usr/bin/true
//! 7f0000001000 7f0000003000 1000  lib/libc.so.6
//! ```
//!
//! Numbers are hex, the `0x` is optional. Relative paths are looked up next
//! to the module list. Each module's bytes are read once and live as long as
//! the map does.

use lazy_static::lazy_static;
use regex::Regex;
use std::{
    fs,
    io,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

/// Gives out the instruction bytes at an address
pub trait ModuleMapper {
    /// Builds the mapper from a module list file
    fn open(list: &Path) -> Result<Self, MapError>
    where
        Self: Sized;

    /// Bytes from `pc` to the end of whatever module holds it
    fn find_bytes(&self, pc: u64) -> Result<&[u8], MapError>;
}

#[derive(thiserror::Error, Debug)]
pub enum MapError {
    #[error("Module list path is empty")]
    EmptyPath,
    #[error("failed to read module list {}: {source}", path.display())]
    List { path: PathBuf, source: io::Error },
    #[error("{}:{line}: malformed module entry {text:?}", path.display())]
    Malformed {
        path: PathBuf,
        line: usize,
        text: String,
    },
    #[error("failed to read module {}: {source}", path.display())]
    Module { path: PathBuf, source: io::Error },
    #[error("module {0} has no bytes")]
    Empty(String),
    #[error("module {0} runs past the end of the address space")]
    OutOfRange(String),
    #[error("module {0} overlaps module {1}")]
    Overlap(String, String),
    #[error("no module contains {0:#x}")]
    Unmapped(u64),
}

#[derive(Clone, Debug)]
pub struct Module {
    pub name: String,
    pub from: u64,
    bytes: Vec<u8>,
}

impl Module {
    pub fn new(name: impl Into<String>, from: u64, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            from,
            bytes,
        }
    }

    /// exclusive, saturates for modules a map would reject
    pub fn to(&self) -> u64 {
        self.from.saturating_add(self.bytes.len() as u64)
    }

    pub fn contains(&self, pc: u64) -> bool {
        pc >= self.from && pc - self.from < self.bytes.len() as u64
    }
}

#[derive(Debug)]
pub struct ModuleMap {
    /// sorted by start, never overlapping
    modules: Vec<Module>,
}

struct Entry {
    from: u64,
    to: u64,
    offset: u64,
    path: PathBuf,
}

fn parse_line(line: &str) -> Option<Entry> {
    lazy_static! {
        static ref RE: Regex = Regex::new(
            r"^(?:0x)?([0-9a-fA-F]+)\s+(?:0x)?([0-9a-fA-F]+)\s+(?:0x)?([0-9a-fA-F]+)\s+(.+)$"
        )
        .unwrap();
    }

    let caps = RE.captures(line)?;
    let hex = |i: usize| u64::from_str_radix(caps.get(i)?.as_str(), 16).ok();

    Some(Entry {
        from: hex(1)?,
        to: hex(2)?,
        offset: hex(3)?,
        path: PathBuf::from(caps.get(4)?.as_str()),
    })
}

impl ModuleMap {
    pub fn load(list: &Path) -> Result<Self, MapError> {
        if list.as_os_str().is_empty() {
            return Err(MapError::EmptyPath);
        }

        let text = fs::read_to_string(list).map_err(|source| MapError::List {
            path: list.to_path_buf(),
            source,
        })?;
        let base = list.parent().unwrap_or_else(|| Path::new(""));

        let mut modules = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let malformed = || MapError::Malformed {
                path: list.to_path_buf(),
                line: idx + 1,
                text: line.to_string(),
            };

            let entry = parse_line(line).ok_or_else(malformed)?;
            if entry.from >= entry.to {
                return Err(malformed());
            }

            let path = if entry.path.is_relative() {
                base.join(&entry.path)
            } else {
                entry.path
            };

            let mut bytes = fs::read(&path).map_err(|source| MapError::Module {
                path: path.clone(),
                source,
            })?;

            let start = (entry.offset as usize).min(bytes.len());
            let want = (entry.to - entry.from) as usize;
            let end = start.saturating_add(want).min(bytes.len());
            if end - start < want {
                warn!(
                    "{} is short: wanted {:#x} bytes at {:#x}, have {:#x}",
                    path.display(),
                    want,
                    entry.offset,
                    end - start
                );
            }
            bytes.truncate(end);
            bytes.drain(..start);

            debug!(
                "module {} at {:#x}..{:#x}",
                path.display(),
                entry.from,
                entry.from + bytes.len() as u64
            );

            modules.push(Module::new(path.to_string_lossy(), entry.from, bytes));
        }

        let map = Self::from_modules(modules)?;
        info!("Loaded {} modules from {}", map.modules.len(), list.display());

        Ok(map)
    }

    pub fn from_modules(mut modules: Vec<Module>) -> Result<Self, MapError> {
        if let Some(m) = modules.iter().find(|m| m.bytes.is_empty()) {
            return Err(MapError::Empty(m.name.clone()));
        }
        if let Some(m) = modules
            .iter()
            .find(|m| m.from.checked_add(m.bytes.len() as u64).is_none())
        {
            return Err(MapError::OutOfRange(m.name.clone()));
        }

        modules.sort_by_key(|m| m.from);

        for pair in modules.windows(2) {
            if pair[1].from < pair[0].to() {
                return Err(MapError::Overlap(
                    pair[0].name.clone(),
                    pair[1].name.clone(),
                ));
            }
        }

        Ok(Self { modules })
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn lookup(&self, pc: u64) -> Option<&Module> {
        // first module starting after pc, the one before it is the candidate
        let idx = self.modules.partition_point(|m| m.from <= pc);
        let module = self.modules.get(idx.checked_sub(1)?)?;

        module.contains(pc).then_some(module)
    }
}

impl ModuleMapper for ModuleMap {
    fn open(list: &Path) -> Result<Self, MapError> {
        Self::load(list)
    }

    fn find_bytes(&self, pc: u64) -> Result<&[u8], MapError> {
        let module = self.lookup(pc).ok_or(MapError::Unmapped(pc))?;
        Ok(&module.bytes[(pc - module.from) as usize..])
    }
}
