// Installer error type
//
// Only the provisioning phase (persistence, migrations, seeding, job dispatch) surfaces these.
// Requirement checks and database validation report failures as data instead.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstallerError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration key '{0}'")]
    InvalidConfigKey(String),

    #[error("value for configuration key '{0}' must be a single line")]
    InvalidConfigValue(String),

    #[error("failed to load installer settings: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("unsupported database driver '{0}' (expected mysql or pgsql)")]
    UnsupportedDriver(String),

    #[error("connection profile '{0}' is not registered")]
    UnknownProfile(String),

    #[error("connection profile '{0}' is already registered")]
    ProfileInUse(String),

    #[error("database connection failed: {0}")]
    Connect(String),

    #[error("command failed ({operation}): {message}")]
    Command { operation: String, message: String },

    #[error("schema provisioning exceeded its time budget of {0}s")]
    BudgetExceeded(u64),

    #[error("environment requirements not met ({0} issue(s))")]
    RequirementsNotMet(usize),

    #[error("database settings rejected: {0}")]
    DatabaseRejected(String),

    #[error("job dispatch failed ({job}): {message}")]
    Job { job: String, message: String },

    #[error("secure random source failed")]
    Random,
}

impl InstallerError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        InstallerError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = InstallerError> = std::result::Result<T, E>;
