use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PnError {
    #[error("I/O error on '{}': {source}", path.display())]
    PathIoError {
        source: std::io::Error,
        path: PathBuf,
    },

    #[error("Refusing to use '{}': it exists but is not a regular file", path.display())]
    NotRegularFile { path: PathBuf },

    #[error("Registry file '{}' does not exist", path.display())]
    RegistryNotFound { path: PathBuf },

    #[error("Unable to {action} registry file '{}': {source}", path.display())]
    LockError {
        action: &'static str,
        source: std::io::Error,
        path: PathBuf,
    },

    #[error("Failed to parse configuration file '{file}': {source}")]
    ConfigParseError {
        source: toml::de::Error,
        file: String,
    },

    #[error(
        "Both a write path ('{}') and a load path ('{}') are configured; exactly one registry mode may be active",
        write.display(),
        load.display()
    )]
    ConflictingModes { write: PathBuf, load: PathBuf },
}

pub type PnResult<T> = Result<T, PnError>;
