//! Error types for tandem-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from configuration validation and global configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field holds a value the configuration's source is not allowed to
    /// carry, or a value this build does not support.
    #[error("invalid configuration: {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// The global configuration file exists but could not be read.
    #[error("failed to read configuration at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The global configuration file is not valid TOML or has unknown keys.
    #[error("failed to parse configuration at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The global configuration parsed but failed validation.
    #[error("global configuration invalid: {0}")]
    GlobalInvalid(#[source] Box<ConfigError>),

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors from the on-disk session store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with the offending file.
    #[error("failed to parse session at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A stored session carries a configuration its source may not hold.
    #[error("stored session at {path} is invalid: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: ConfigError,
    },

    #[error("session not found at {path}")]
    SessionNotFound { path: PathBuf },
}

/// Errors from change validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChangeError {
    #[error("missing change")]
    Missing,
}

/// Errors from endpoint URL parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("missing host in URL '{0}'")]
    MissingHost(String),

    #[error("invalid port in URL '{0}'")]
    InvalidPort(String),

    #[error("missing path in URL '{0}'")]
    MissingPath(String),
}
