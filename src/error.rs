//! Error types for configuration loading and validation.
//!
//! Runtime errors flow through `anyhow`; load-time problems get typed
//! variants so callers can report which entity and field is at fault and
//! map failures to the right process exit code.

use std::path::PathBuf;
use thiserror::Error;

/// Process exit codes.
pub const EXIT_CONFIG: i32 = 1;
pub const EXIT_IO: i32 = 2;
pub const EXIT_VALIDATION: i32 = 3;
pub const EXIT_RUNTIME: i32 = 4;

/// A problem found while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{config_type} '{config_id}': missing required field '{field}'")]
    MissingField {
        config_type: &'static str,
        config_id: String,
        field: &'static str,
    },

    #[error("{config_type} '{config_id}': invalid value for '{field}': {reason}")]
    InvalidValue {
        config_type: &'static str,
        config_id: String,
        field: String,
        reason: String,
    },

    #[error("{config_type} '{config_id}': invalid regex in '{field}': {source}")]
    InvalidRegex {
        config_type: &'static str,
        config_id: String,
        field: String,
        #[source]
        source: regex::Error,
    },

    #[error("{config_type} '{config_id}': {source}")]
    Filter {
        config_type: &'static str,
        config_id: String,
        #[source]
        source: FilterError,
    },

    #[error("unresolved environment variable '{name}' in {}", path.display())]
    Environment { name: String, path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A problem found while compiling a filter tree.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("empty filter group")]
    EmptyGroup,

    #[error("filter on '{field}' requires a pattern")]
    MissingPattern { field: String },

    #[error("filter on '{field}' requires a value")]
    MissingValue { field: String },

    #[error("invalid filter regex '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}
