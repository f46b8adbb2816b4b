//! Domain types for tandem sessions.
//!
//! All types are serializable via serde; sessions are stored as YAML and sent
//! over the daemon socket as JSON.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::configuration::Configuration;
use crate::error::UrlError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed session identifier (UUID v4 text).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Endpoint URLs
// ---------------------------------------------------------------------------

/// How an endpoint is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Local,
    Ssh,
}

/// Location of one side of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Url {
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub path: String,
}

impl Url {
    /// A local URL for `path`, taken verbatim.
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            protocol: Protocol::Local,
            user: String::new(),
            host: String::new(),
            port: None,
            path: path.into(),
        }
    }

    /// Parse `ssh://[user@]host[:port]/path`, SCP-style `[user@]host:path`,
    /// or a local path.
    pub fn parse(raw: &str) -> Result<Self, UrlError> {
        if raw.is_empty() {
            return Err(UrlError::Empty);
        }

        if let Some(rest) = raw.strip_prefix("ssh://") {
            let (authority, path) = match rest.find('/') {
                Some(index) => rest.split_at(index),
                None => return Err(UrlError::MissingPath(raw.to_string())),
            };
            let (user, host_port) = split_user(authority);
            let (host, port) = match host_port.rsplit_once(':') {
                Some((host, port)) => {
                    let port = port
                        .parse::<u16>()
                        .map_err(|_| UrlError::InvalidPort(raw.to_string()))?;
                    (host, Some(port))
                }
                None => (host_port, None),
            };
            return remote(raw, user, host, port, path);
        }

        if is_scp_style(raw) {
            if let Some((authority, path)) = raw.split_once(':') {
                let (user, host) = split_user(authority);
                return remote(raw, user, host, None, path);
            }
        }

        Ok(Self::local(raw))
    }

    pub fn is_local(&self) -> bool {
        self.protocol == Protocol::Local
    }

    /// Resolve a relative local path against `base`. Remote URLs and
    /// absolute paths are left untouched.
    pub fn make_absolute(&mut self, base: &Path) {
        if !self.is_local() || Path::new(&self.path).is_absolute() {
            return;
        }
        self.path = base.join(&self.path).to_string_lossy().into_owned();
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.protocol {
            Protocol::Local => f.write_str(&self.path),
            Protocol::Ssh => {
                let user = if self.user.is_empty() {
                    String::new()
                } else {
                    format!("{}@", self.user)
                };
                match self.port {
                    Some(port) => write!(f, "ssh://{user}{}:{port}{}", self.host, self.path),
                    None => write!(f, "{user}{}:{}", self.host, self.path),
                }
            }
        }
    }
}

fn split_user(authority: &str) -> (&str, &str) {
    match authority.split_once('@') {
        Some((user, host)) => (user, host),
        None => ("", authority),
    }
}

fn remote(
    raw: &str,
    user: &str,
    host: &str,
    port: Option<u16>,
    path: &str,
) -> Result<Url, UrlError> {
    if host.is_empty() {
        return Err(UrlError::MissingHost(raw.to_string()));
    }
    if path.is_empty() {
        return Err(UrlError::MissingPath(raw.to_string()));
    }
    Ok(Url {
        protocol: Protocol::Ssh,
        user: user.to_string(),
        host: host.to_string(),
        port,
        path: path.to_string(),
    })
}

/// `host:path` where the colon comes before any path separator. Windows
/// drive letters (`C:\...`, `C:/...`) stay local.
fn is_scp_style(raw: &str) -> bool {
    let Some(colon) = raw.find(':') else {
        return false;
    };
    if raw[..colon].contains('/') || raw[..colon].contains('\\') {
        return false;
    }
    let bytes = raw.as_bytes();
    let drive_letter = colon == 1
        && bytes[0].is_ascii_alphabetic()
        && matches!(bytes.get(2), None | Some(b'\\') | Some(b'/'));
    !drive_letter
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// A persistent pairing of two endpoints.
///
/// `configuration` is the session-source configuration as supplied at
/// creation; the effective configuration is obtained by merging it with the
/// global configuration at use time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub alpha: Url,
    pub beta: Url,
    #[serde(default)]
    pub configuration: Configuration,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(alpha: Url, beta: Url, configuration: Configuration) -> Self {
        Self {
            id: SessionId::generate(),
            alpha,
            beta,
            configuration,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_paths_stay_local() {
        for raw in ["/tmp/a", "relative/dir", "C:\\Users\\me", "C:/work", "./x:y"] {
            let url = Url::parse(raw).expect("parse");
            assert!(url.is_local(), "{raw} should be local");
            assert_eq!(url.path, raw);
        }
    }

    #[test]
    fn ssh_scheme_with_user_and_port() {
        let url = Url::parse("ssh://me@host:2222/srv/b").expect("parse");
        assert_eq!(url.protocol, Protocol::Ssh);
        assert_eq!(url.user, "me");
        assert_eq!(url.host, "host");
        assert_eq!(url.port, Some(2222));
        assert_eq!(url.path, "/srv/b");
        assert_eq!(url.to_string(), "ssh://me@host:2222/srv/b");
    }

    #[test]
    fn scp_style_remote() {
        let url = Url::parse("host:projects/b").expect("parse");
        assert_eq!(url.protocol, Protocol::Ssh);
        assert_eq!(url.user, "");
        assert_eq!(url.path, "projects/b");
        assert_eq!(url.to_string(), "host:projects/b");
    }

    #[test]
    fn malformed_remote_urls_are_rejected() {
        assert_eq!(Url::parse(""), Err(UrlError::Empty));
        assert!(matches!(Url::parse("ssh://host"), Err(UrlError::MissingPath(_))));
        assert!(matches!(Url::parse("ssh:///b"), Err(UrlError::MissingHost(_))));
        assert!(matches!(Url::parse("ssh://h:99999/b"), Err(UrlError::InvalidPort(_))));
        assert!(matches!(Url::parse("host:"), Err(UrlError::MissingPath(_))));
    }

    #[test]
    fn make_absolute_only_touches_relative_local_paths() {
        let base = Path::new("/home/me");
        let mut relative = Url::local("work");
        relative.make_absolute(base);
        assert_eq!(relative.path, "/home/me/work");

        let mut remote = Url::parse("host:work").expect("parse");
        remote.make_absolute(base);
        assert_eq!(remote.path, "work");
    }

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(SessionId::generate(), SessionId::generate());
        assert_eq!(SessionId::from("abc").to_string(), "abc");
    }
}
