//! Synchronization setting enums.
//!
//! Every setting has a distinguished `Default` value ("not specified by this
//! source") that is distinct from its concrete choices. Values are written as
//! kebab-case strings; any string this build does not know parses into
//! `Unsupported(raw)` so that validation can reject it by name instead of the
//! value being silently dropped.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

macro_rules! setting_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
        pub enum $name {
            /// Not specified; resolved during merge.
            #[default]
            Default,
            $( $(#[$vmeta])* $variant, )+
            /// A value this build does not recognise.
            Unsupported(String),
        }

        impl $name {
            /// Every concrete value this build supports.
            pub fn supported_values() -> Vec<Self> {
                vec![$(Self::$variant),+]
            }

            pub fn is_default(&self) -> bool {
                matches!(self, Self::Default)
            }

            /// True for concrete values this build can act on.
            pub fn supported(&self) -> bool {
                !matches!(self, Self::Default | Self::Unsupported(_))
            }

            /// Parse a textual value. Never fails: unknown text is kept as
            /// [`Self::Unsupported`].
            pub fn parse(text: &str) -> Self {
                match text.trim() {
                    "" | "default" => Self::Default,
                    $( $text => Self::$variant, )+
                    other => Self::Unsupported(other.to_string()),
                }
            }

            pub fn as_str(&self) -> &str {
                match self {
                    Self::Default => "default",
                    $( Self::$variant => $text, )+
                    Self::Unsupported(raw) => raw,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let text = String::deserialize(deserializer)?;
                Ok(Self::parse(&text))
            }
        }
    };
}

setting_enum! {
    /// Direction and conflict policy of synchronization.
    SynchronizationMode {
        /// Bidirectional; conflicts are left for the user.
        TwoWaySafe => "two-way-safe",
        /// Bidirectional; alpha wins conflicts.
        TwoWayResolved => "two-way-resolved",
        /// Alpha to beta, never overwriting beta-side modifications.
        OneWaySafe => "one-way-safe",
        /// Beta mirrors alpha exactly.
        OneWayReplica => "one-way-replica",
    }
}

setting_enum! {
    /// Whether VCS metadata directories are ignored.
    IgnoreVcsMode {
        Ignore => "ignore",
        Propagate => "propagate",
    }
}

setting_enum! {
    SymlinkMode {
        Ignore => "ignore",
        Portable => "portable",
        PosixRaw => "posix-raw",
    }
}

setting_enum! {
    /// Filesystem monitoring strategy.
    WatchMode {
        Portable => "portable",
        ForcePoll => "force-poll",
        NoWatch => "no-watch",
    }
}

setting_enum! {
    /// How much permission metadata is propagated between endpoints.
    PermissionExposureLevel {
        User => "user",
        Group => "group",
        Other => "other",
    }
}
