//! tandem core library: session configuration, domain types, session store.
//!
//! - [`settings`]: setting enums with explicit default / unsupported values
//! - [`configuration`]: [`Configuration`], per-source validation, merge
//! - [`global`]: global configuration file loading
//! - [`sync`]: snapshot and change values shared with the engine
//! - [`types`]: URLs, session ids, session records
//! - [`store`]: on-disk session records

pub mod configuration;
pub mod error;
pub mod global;
pub mod settings;
pub mod store;
pub mod sync;
pub mod types;

pub use configuration::{Configuration, ConfigurationSource};
pub use error::{ChangeError, ConfigError, StoreError, UrlError};
pub use settings::{
    IgnoreVcsMode, PermissionExposureLevel, SymlinkMode, SynchronizationMode, WatchMode,
};
pub use sync::{Change, Entry, EntryKind};
pub use types::{Protocol, Session, SessionId, Url};
