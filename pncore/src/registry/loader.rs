use std::path::PathBuf;

use log::{debug, info, warn};
use pninstr::modules::Function;

use crate::{infection::apply_preserve_none, registry::NameSet};

#[derive(Debug)]
enum LoadState {
    /// The registry has not been read yet.
    Pending,
    Loaded(NameSet),
    /// Reading failed; the set stays empty for the lifetime of the loader.
    Unavailable,
}

/// Applies the preserve-none attribute to functions listed in the registry.
///
/// The registry file is read once, on the first function that needs it, and
/// never again whatever the outcome.
#[derive(Debug)]
pub struct RegistryLoader {
    path: PathBuf,
    state: LoadState,
}

impl RegistryLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: LoadState::Pending,
        }
    }

    /// The loaded names, or `None` before the first load or after a failed one.
    pub fn names(&self) -> Option<&NameSet> {
        match &self.state {
            LoadState::Loaded(names) => Some(names),
            _ => None,
        }
    }

    /// Returns true once a read has been attempted.
    pub fn is_attempted(&self) -> bool {
        !matches!(self.state, LoadState::Pending)
    }

    fn ensure_loaded(&mut self) -> Option<&NameSet> {
        if let LoadState::Pending = self.state {
            self.state = match NameSet::load(&self.path) {
                Ok(names) => {
                    info!(
                        "Loaded {} preserve-none function name(s) from '{}'",
                        names.len(),
                        self.path.display()
                    );
                    LoadState::Loaded(names)
                }
                Err(e) => {
                    warn!("Failed to load preserve-none registry: {}", e);
                    LoadState::Unavailable
                }
            };
        }

        self.names()
    }

    /// Apply the attribute to `function` if its name is registered. Returns
    /// true when the name was found.
    ///
    /// Declarations are never touched.
    pub fn apply(&mut self, function: &mut Function) -> bool {
        if function.is_declaration() {
            return false;
        }

        let Some(names) = self.ensure_loaded() else {
            return false;
        };

        if !names.contains(&function.name) {
            return false;
        }

        if apply_preserve_none(function) {
            debug!("Function `{}` marked preserve-none from registry", function.name);
        }
        true
    }
}
