//! Cross-process registry of preserve-none functions.
//!
//! The registry is a plain text file holding one function name per line. It is
//! only ever appended to. Several compiler processes may append concurrently,
//! each append being serialised by an exclusive advisory lock (see [`lock`]).
//! Readers treat the content as a set: surrounding whitespace is trimmed, blank
//! lines are skipped and duplicates collapse.
use std::{collections::BTreeSet, path::Path};

use crate::utils::error::{PnError, PnResult};

pub mod loader;
pub mod lock;
pub mod writer;

pub use loader::RegistryLoader;
pub use writer::RegistryWriter;

/// Iterate over the function names of registry content.
pub fn registry_entries(content: &str) -> impl Iterator<Item = &str> {
    content
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
}

/// Set of function names known to carry the preserve-none attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameSet {
    names: BTreeSet<String>,
}

impl NameSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse registry content into a fresh set.
    pub fn from_registry(content: &str) -> Self {
        let mut set = Self::new();
        set.extend_from_registry(content);
        set
    }

    /// Read the registry file at `path`.
    ///
    /// Fails if the file does not exist or is not a regular file. Bytes that
    /// are not valid UTF-8 are replaced rather than rejected.
    pub fn load(path: &Path) -> PnResult<Self> {
        if !lock::ensure_regular_or_absent(path)? {
            return Err(PnError::RegistryNotFound {
                path: path.to_path_buf(),
            });
        }

        let bytes = std::fs::read(path).map_err(|e| PnError::PathIoError {
            source: e,
            path: path.to_path_buf(),
        })?;

        Ok(Self::from_registry(&String::from_utf8_lossy(&bytes)))
    }

    /// Insert every entry of `content`. Returns the number of new names.
    pub fn extend_from_registry(&mut self, content: &str) -> usize {
        registry_entries(content)
            .filter(|name| self.insert(name))
            .count()
    }

    /// Insert a name. Returns false if it was already present.
    pub fn insert(&mut self, name: &str) -> bool {
        if self.names.contains(name) {
            return false;
        }
        self.names.insert(name.to_string())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}
