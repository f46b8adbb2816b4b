//! Global configuration file (`~/.tandem.toml`).
//!
//! # Format
//!
//! ```toml
//! [synchronization]
//! mode = "two-way-resolved"
//!
//! [ignore]
//! default = [".DS_Store", "*.tmp"]
//! vcs = "ignore"
//!
//! [symlink]
//! mode = "portable"
//!
//! [watch]
//! mode = "force-poll"
//! pollingInterval = 10
//!
//! [permission]
//! exposureLevel = "user"
//! ```
//!
//! Alpha/beta-specific exposure levels have no representation here; they
//! only make sense next to the URLs they affect. Unknown keys are rejected.
//!
//! Every load reads the file afresh.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::configuration::{Configuration, ConfigurationSource};
use crate::error::ConfigError;
use crate::settings::{
    IgnoreVcsMode, PermissionExposureLevel, SymlinkMode, SynchronizationMode, WatchMode,
};

pub const GLOBAL_CONFIGURATION_FILE: &str = ".tandem.toml";

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct GlobalFile {
    synchronization: SynchronizationSection,
    ignore: IgnoreSection,
    symlink: SymlinkSection,
    watch: WatchSection,
    permission: PermissionSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SynchronizationSection {
    mode: SynchronizationMode,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct IgnoreSection {
    default: Vec<String>,
    vcs: IgnoreVcsMode,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SymlinkSection {
    mode: SymlinkMode,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
struct WatchSection {
    mode: WatchMode,
    polling_interval: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
struct PermissionSection {
    exposure_level: PermissionExposureLevel,
}

impl From<GlobalFile> for Configuration {
    fn from(file: GlobalFile) -> Self {
        Configuration {
            synchronization_mode: file.synchronization.mode,
            default_ignores: file.ignore.default,
            ignore_vcs_mode: file.ignore.vcs,
            symlink_mode: file.symlink.mode,
            watch_mode: file.watch.mode,
            watch_polling_interval: file.watch.polling_interval,
            permission_exposure_level: file.permission.exposure_level,
            ..Configuration::default()
        }
    }
}

/// `<home>/.tandem.toml`. Pure, no I/O.
pub fn global_configuration_path_at(home: &Path) -> PathBuf {
    home.join(GLOBAL_CONFIGURATION_FILE)
}

/// Load and validate the global configuration from an explicit file path.
///
/// A missing file yields the all-default configuration. An unreadable,
/// unparsable, or invalid file is an error.
pub fn load_global_from(path: &Path) -> Result<Configuration, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Configuration::default());
        }
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let file: GlobalFile = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let configuration = Configuration::from(file);
    configuration
        .ensure_valid(ConfigurationSource::Global)
        .map_err(|err| ConfigError::GlobalInvalid(Box::new(err)))?;
    Ok(configuration)
}

/// Load the global configuration for the user whose home is `home`.
pub fn load_global_at(home: &Path) -> Result<Configuration, ConfigError> {
    load_global_from(&global_configuration_path_at(home))
}

/// `load_global_at` convenience wrapper.
pub fn load_global() -> Result<Configuration, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
    load_global_at(&home)
}
