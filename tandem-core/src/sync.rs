//! Filesystem snapshots and changes exchanged with the synchronization engine.
//!
//! The engine itself lives outside this crate; these are the values it
//! reports and consumes, plus the ignore-pattern rules configuration
//! validation relies on.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ChangeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Directory,
    File,
    Symlink,
}

/// A node in a filesystem snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub kind: EntryKind,
    /// Children by name; directories only.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub contents: BTreeMap<String, Entry>,
    /// Content digest; files only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub digest: Vec<u8>,
    #[serde(default)]
    pub executable: bool,
    /// Link target; symlinks only.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target: String,
}

impl Entry {
    pub fn directory(contents: BTreeMap<String, Entry>) -> Self {
        Self {
            kind: EntryKind::Directory,
            contents,
            digest: Vec::new(),
            executable: false,
            target: String::new(),
        }
    }

    pub fn file(digest: Vec<u8>, executable: bool) -> Self {
        Self {
            kind: EntryKind::File,
            contents: BTreeMap::new(),
            digest,
            executable,
            target: String::new(),
        }
    }

    pub fn symlink(target: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::Symlink,
            contents: BTreeMap::new(),
            digest: Vec::new(),
            executable: false,
            target: target.into(),
        }
    }
}

/// A modification at `path`. A `None` snapshot means "nothing exists there".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub path: String,
    #[serde(default)]
    pub old: Option<Entry>,
    #[serde(default)]
    pub new: Option<Entry>,
}

impl Change {
    /// Check a change received from the engine.
    ///
    /// The path is not validated, and `old == new` is accepted: one-way
    /// modes synthesize such changes.
    pub fn ensure_valid(change: Option<&Change>) -> Result<(), ChangeError> {
        match change {
            Some(_) => Ok(()),
            None => Err(ChangeError::Missing),
        }
    }
}

/// Validate every change in a batch.
pub fn ensure_changes_valid(changes: &[Option<Change>]) -> Result<(), ChangeError> {
    changes
        .iter()
        .try_for_each(|change| Change::ensure_valid(change.as_ref()))
}

/// Whether `pattern` is usable as an ignore pattern.
///
/// A leading `!` negates the pattern. Empty patterns, a bare `!`, the root
/// itself, and syntactically invalid globs are rejected.
pub fn valid_ignore_pattern(pattern: &str) -> bool {
    let body = pattern.strip_prefix('!').unwrap_or(pattern);
    if body.is_empty() || body == "/" {
        return false;
    }
    glob::Pattern::new(body.trim_start_matches('/')).is_ok()
}
