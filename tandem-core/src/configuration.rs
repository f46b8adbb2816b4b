//! Session configuration: validation per source and session/global merge.
//!
//! A [`Configuration`] is only meaningful together with the
//! [`ConfigurationSource`] that produced it. Each source may set a different
//! subset of fields:
//!
//! | field                         | Session | Global | Create |
//! |-------------------------------|---------|--------|--------|
//! | default ignores               | yes     | yes    | no     |
//! | per-session ignores           | yes     | no     | yes    |
//! | alpha/beta exposure levels    | yes     | no     | yes    |
//! | everything else               | yes     | yes    | yes    |

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::settings::{
    IgnoreVcsMode, PermissionExposureLevel, SymlinkMode, SynchronizationMode, WatchMode,
};
use crate::sync::valid_ignore_pattern;

/// Where a configuration value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigurationSource {
    /// Loaded from a session record stored on disk.
    Session,
    /// Loaded from the user's global configuration file.
    Global,
    /// Supplied in a create request.
    Create,
}

/// Synchronization behaviour settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    #[serde(default, skip_serializing_if = "SynchronizationMode::is_default")]
    pub synchronization_mode: SynchronizationMode,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_ignores: Vec<String>,

    #[serde(default, skip_serializing_if = "IgnoreVcsMode::is_default")]
    pub ignore_vcs_mode: IgnoreVcsMode,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignores: Vec<String>,

    #[serde(default, skip_serializing_if = "SymlinkMode::is_default")]
    pub symlink_mode: SymlinkMode,

    #[serde(default, skip_serializing_if = "WatchMode::is_default")]
    pub watch_mode: WatchMode,

    /// Poll interval in seconds; 0 selects the engine's internal default.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub watch_polling_interval: u32,

    #[serde(default, skip_serializing_if = "PermissionExposureLevel::is_default")]
    pub permission_exposure_level: PermissionExposureLevel,

    #[serde(default, skip_serializing_if = "PermissionExposureLevel::is_default")]
    pub alpha_permission_exposure_level: PermissionExposureLevel,

    #[serde(default, skip_serializing_if = "PermissionExposureLevel::is_default")]
    pub beta_permission_exposure_level: PermissionExposureLevel,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl Configuration {
    /// Check this configuration against the rules for `source`.
    ///
    /// Fails on the first offending field; nothing is coerced.
    pub fn ensure_valid(&self, source: ConfigurationSource) -> Result<(), ConfigError> {
        if !self.synchronization_mode.is_default() && !self.synchronization_mode.supported() {
            return Err(unsupported("synchronization mode", &self.synchronization_mode));
        }
        if !self.symlink_mode.is_default() && !self.symlink_mode.supported() {
            return Err(unsupported("symlink mode", &self.symlink_mode));
        }
        if !self.watch_mode.is_default() && !self.watch_mode.supported() {
            return Err(unsupported("watch mode", &self.watch_mode));
        }

        // Any polling interval is acceptable.

        if source == ConfigurationSource::Create && !self.default_ignores.is_empty() {
            return Err(ConfigError::invalid(
                "default ignores",
                "create configuration with default ignores specified",
            ));
        }
        for ignore in &self.default_ignores {
            if !valid_ignore_pattern(ignore) {
                return Err(ConfigError::invalid(
                    "default ignores",
                    format!("invalid default ignore pattern: '{ignore}'"),
                ));
            }
        }

        if source == ConfigurationSource::Global && !self.ignores.is_empty() {
            return Err(ConfigError::invalid(
                "ignores",
                "global configuration with ignores specified",
            ));
        }
        for ignore in &self.ignores {
            if !valid_ignore_pattern(ignore) {
                return Err(ConfigError::invalid(
                    "ignores",
                    format!("invalid ignore pattern: '{ignore}'"),
                ));
            }
        }

        if !self.ignore_vcs_mode.is_default() && !self.ignore_vcs_mode.supported() {
            return Err(unsupported("VCS ignore mode", &self.ignore_vcs_mode));
        }

        if !self.permission_exposure_level.is_default()
            && !self.permission_exposure_level.supported()
        {
            return Err(unsupported(
                "permission exposure level",
                &self.permission_exposure_level,
            ));
        }
        if source == ConfigurationSource::Global {
            if !self.alpha_permission_exposure_level.is_default() {
                return Err(ConfigError::invalid(
                    "alpha permission exposure level",
                    "global configuration with alpha-specific permission exposure level specified",
                ));
            }
            if !self.beta_permission_exposure_level.is_default() {
                return Err(ConfigError::invalid(
                    "beta permission exposure level",
                    "global configuration with beta-specific permission exposure level specified",
                ));
            }
        } else {
            if !self.alpha_permission_exposure_level.is_default()
                && !self.alpha_permission_exposure_level.supported()
            {
                return Err(unsupported(
                    "alpha permission exposure level",
                    &self.alpha_permission_exposure_level,
                ));
            }
            if !self.beta_permission_exposure_level.is_default()
                && !self.beta_permission_exposure_level.supported()
            {
                return Err(unsupported(
                    "beta permission exposure level",
                    &self.beta_permission_exposure_level,
                ));
            }
        }

        Ok(())
    }

    /// Merge a session configuration over a global one.
    ///
    /// Scalars take the session value unless it is the default. Default
    /// ignores always come from `global`, per-session ignores and the
    /// endpoint-specific exposure levels always come from `session`. Both
    /// inputs are expected to have been validated against their sources.
    pub fn merge(session: &Configuration, global: &Configuration) -> Configuration {
        Configuration {
            synchronization_mode: prefer(&session.synchronization_mode, &global.synchronization_mode),
            default_ignores: global.default_ignores.clone(),
            ignore_vcs_mode: prefer(&session.ignore_vcs_mode, &global.ignore_vcs_mode),
            ignores: session.ignores.clone(),
            symlink_mode: prefer(&session.symlink_mode, &global.symlink_mode),
            watch_mode: prefer(&session.watch_mode, &global.watch_mode),
            watch_polling_interval: if session.watch_polling_interval != 0 {
                session.watch_polling_interval
            } else {
                global.watch_polling_interval
            },
            permission_exposure_level: prefer(
                &session.permission_exposure_level,
                &global.permission_exposure_level,
            ),
            alpha_permission_exposure_level: session.alpha_permission_exposure_level.clone(),
            beta_permission_exposure_level: session.beta_permission_exposure_level.clone(),
        }
    }
}

/// Session value unless it equals the type's default.
fn prefer<T: Default + PartialEq + Clone>(session: &T, global: &T) -> T {
    if *session != T::default() {
        session.clone()
    } else {
        global.clone()
    }
}

fn unsupported(field: &'static str, value: &impl std::fmt::Display) -> ConfigError {
    ConfigError::invalid(field, format!("unknown or unsupported value '{value}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global_like() -> Configuration {
        Configuration {
            synchronization_mode: SynchronizationMode::TwoWayResolved,
            default_ignores: vec![".DS_Store".into()],
            watch_polling_interval: 20,
            permission_exposure_level: PermissionExposureLevel::User,
            ..Configuration::default()
        }
    }

    #[test]
    fn default_configuration_is_valid_for_every_source() {
        let config = Configuration::default();
        for source in [
            ConfigurationSource::Session,
            ConfigurationSource::Global,
            ConfigurationSource::Create,
        ] {
            config.ensure_valid(source).expect("default must validate");
        }
    }

    #[test]
    fn invalid_error_names_the_field() {
        let config = Configuration {
            watch_mode: WatchMode::parse("fanotify"),
            ..Configuration::default()
        };
        let err = config
            .ensure_valid(ConfigurationSource::Session)
            .unwrap_err();
        match err {
            ConfigError::Invalid { field, reason } => {
                assert_eq!(field, "watch mode");
                assert!(reason.contains("fanotify"), "got: {reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn merge_prefers_non_default_session_scalars() {
        let session = Configuration {
            synchronization_mode: SynchronizationMode::OneWayReplica,
            ignores: vec!["build".into()],
            alpha_permission_exposure_level: PermissionExposureLevel::Other,
            ..Configuration::default()
        };
        let merged = Configuration::merge(&session, &global_like());
        assert_eq!(merged.synchronization_mode, SynchronizationMode::OneWayReplica);
        assert_eq!(merged.permission_exposure_level, PermissionExposureLevel::User);
        assert_eq!(merged.watch_polling_interval, 20);
        assert_eq!(merged.default_ignores, vec![".DS_Store".to_string()]);
        assert_eq!(merged.ignores, vec!["build".to_string()]);
        assert_eq!(
            merged.alpha_permission_exposure_level,
            PermissionExposureLevel::Other
        );
        assert!(merged.beta_permission_exposure_level.is_default());
    }

    #[test]
    fn merge_does_not_take_default_ignores_from_session() {
        let session = Configuration {
            default_ignores: vec!["*.session".into()],
            ..Configuration::default()
        };
        let merged = Configuration::merge(&session, &Configuration::default());
        assert!(merged.default_ignores.is_empty());
    }

    #[test]
    fn serde_skips_default_fields() {
        let yaml = serde_yaml::to_string(&Configuration::default()).expect("serialize");
        assert_eq!(yaml.trim(), "{}");
        let config = Configuration {
            watch_polling_interval: 5,
            ..Configuration::default()
        };
        let yaml = serde_yaml::to_string(&config).expect("serialize");
        assert!(yaml.contains("watchPollingInterval: 5"), "got: {yaml}");
    }
}
