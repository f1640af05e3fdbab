//! Pass configuration.
//!
//! The registry passes run in exactly one of three modes. Hosts that expose two
//! path options with a `"-"` sentinel can go through
//! [`PassConfig::from_legacy_paths`]; everything else builds a [`PassConfig`]
//! directly or loads it from TOML:
//!
//! ```toml
//! infect = true
//! record_policy = "attributed_only"
//!
//! [registry]
//! mode = "write"
//! path = "/tmp/preserve-none.list"
//! ```
use std::path::{Path, PathBuf};

use log::warn;
use serde::Deserialize;
use strum::EnumIs;

use crate::{
    magic::{DISABLED_PATH, ENV_PASS_CONFIG_PATH},
    utils::error::{PnError, PnResult},
};

/// Which side of the registry the per-function pass drives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, EnumIs)]
#[serde(tag = "mode", content = "path", rename_all = "snake_case")]
pub enum RegistryMode {
    /// The per-function pass does nothing.
    #[default]
    Off,
    /// Append function names to the registry file.
    Write(PathBuf),
    /// Apply the attribute to functions listed in the registry file.
    Load(PathBuf),
}

impl RegistryMode {
    fn active(path: Option<&str>) -> Option<PathBuf> {
        path.filter(|p| !p.is_empty() && *p != DISABLED_PATH)
            .map(PathBuf::from)
    }

    /// Resolve the mode from a pair of optional paths, `"-"` meaning disabled.
    /// When both are active the write path wins and a warning is logged.
    pub fn from_paths(write: Option<&str>, load: Option<&str>) -> Self {
        match (Self::active(write), Self::active(load)) {
            (Some(write), Some(load)) => {
                warn!(
                    "Both write path '{}' and load path '{}' are set, the load path is ignored",
                    write.display(),
                    load.display()
                );
                RegistryMode::Write(write)
            }
            (Some(write), None) => RegistryMode::Write(write),
            (None, Some(load)) => RegistryMode::Load(load),
            (None, None) => RegistryMode::Off,
        }
    }

    /// Like [`RegistryMode::from_paths`] but refuses ambiguous configurations.
    pub fn from_paths_strict(write: Option<&str>, load: Option<&str>) -> PnResult<Self> {
        match (Self::active(write), Self::active(load)) {
            (Some(write), Some(load)) => Err(PnError::ConflictingModes { write, load }),
            _ => Ok(Self::from_paths(write, load)),
        }
    }

    /// Path of the registry file, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            RegistryMode::Off => None,
            RegistryMode::Write(path) | RegistryMode::Load(path) => Some(path),
        }
    }
}

/// Which functions the registry writer records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, EnumIs)]
#[serde(rename_all = "snake_case")]
pub enum RecordPolicy {
    /// Every function definition that reaches the pass.
    #[default]
    AllDefinitions,
    /// Only definitions that already carry the preserve-none attribute.
    AttributedOnly,
}

/// Configuration of the preserve-none passes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PassConfig {
    /// Propagate the attribute from callees to eligible callers.
    pub infect: bool,

    pub record_policy: RecordPolicy,

    pub registry: RegistryMode,
}

impl PassConfig {
    /// Build a configuration from the host's path options.
    pub fn from_legacy_paths(write: &str, load: &str, infect: bool) -> Self {
        Self {
            registry: RegistryMode::from_paths(Some(write), Some(load)),
            infect,
            record_policy: RecordPolicy::default(),
        }
    }

    /// Parse a configuration from TOML text. `file` only labels errors.
    pub fn from_toml_str(toml_str: &str, file: &str) -> PnResult<Self> {
        toml::from_str(toml_str).map_err(|e| PnError::ConfigParseError {
            source: e,
            file: file.to_string(),
        })
    }

    /// Load a configuration from a TOML file.
    pub fn load_from_toml(path: &Path) -> PnResult<Self> {
        let toml_str = std::fs::read_to_string(path).map_err(|e| PnError::PathIoError {
            source: e,
            path: path.to_path_buf(),
        })?;

        Self::from_toml_str(&toml_str, &path.display().to_string())
    }

    /// Load the configuration named by the `PN_CONFIG_PATH` environment
    /// variable. Returns `Ok(None)` when the variable is not set.
    pub fn from_env() -> PnResult<Option<Self>> {
        match std::env::var_os(ENV_PASS_CONFIG_PATH) {
            Some(path) => Self::load_from_toml(Path::new(&path)).map(Some),
            None => Ok(None),
        }
    }
}
