use std::path::PathBuf;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum RecurError {
    #[error("Config directory not found at {0}. Run 'recur init' to create it.")]
    ConfigNotFound(PathBuf),

    #[error("Config file not found: {0}")]
    ConfigFileNotFound(PathBuf),

    #[error("Failed to parse config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Config directory already exists at {0}")]
    AlreadyInitialized(PathBuf),

    #[error("Definition '{0}' not found in definitions.toml")]
    DefinitionNotFound(String),

    #[error("Invalid definition '{id}': {reason}")]
    InvalidDefinition { id: String, reason: String },

    #[error("Invalid instant '{0}'. Expected YYYY-MM-DD or an RFC 3339 timestamp.")]
    InvalidInstant(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RecurError>;
