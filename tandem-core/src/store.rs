//! On-disk session records.
//!
//! # Storage layout
//!
//! ```text
//! ~/.tandem/
//!   sessions/              (mode 0700)
//!     <session_id>.yaml    (one file per session, mode 0600)
//! ```
//!
//! Every function takes an explicit `home`; callers derive it once (see
//! [`home`]) so tests can point everything at a `TempDir`.

use std::path::{Path, PathBuf};

use crate::configuration::ConfigurationSource;
use crate::error::StoreError;
use crate::types::{Session, SessionId};

/// `<home>/.tandem/sessions/`. Pure, no I/O.
pub fn sessions_dir_at(home: &Path) -> PathBuf {
    home.join(".tandem").join("sessions")
}

/// `<home>/.tandem/sessions/<id>.yaml`. Pure, no I/O.
pub fn session_path_at(home: &Path, id: &SessionId) -> PathBuf {
    sessions_dir_at(home).join(format!("{}.yaml", id.0))
}

/// Load one session record and check its configuration as a
/// [`ConfigurationSource::Session`] value.
pub fn load_session_at(home: &Path, id: &SessionId) -> Result<Session, StoreError> {
    let path = session_path_at(home, id);
    if !path.exists() {
        return Err(StoreError::SessionNotFound { path });
    }
    read_session(path)
}

/// Load every stored session, sorted by creation time then id.
pub fn list_sessions_at(home: &Path) -> Result<Vec<Session>, StoreError> {
    let dir = sessions_dir_at(home);
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut sessions = Vec::new();
    for entry in std::fs::read_dir(&dir)?.filter_map(|e| e.ok()) {
        let name = entry.file_name();
        if !name.to_string_lossy().ends_with(".yaml") {
            continue;
        }
        sessions.push(read_session(entry.path())?);
    }
    sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    Ok(sessions)
}

/// Atomically save a session record.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_session_at(home: &Path, session: &Session) -> Result<(), StoreError> {
    ensure_sessions_dir(home)?;
    let path = session_path_at(home, &session.id);
    let tmp_path = path.with_file_name(format!("{}.yaml.tmp", session.id.0));

    let yaml = serde_yaml::to_string(session)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// Delete a session record. Removing an absent record is not an error.
pub fn remove_session_at(home: &Path, id: &SessionId) -> Result<(), StoreError> {
    match std::fs::remove_file(session_path_at(home, id)) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn read_session(path: PathBuf) -> Result<Session, StoreError> {
    let contents = std::fs::read_to_string(&path)?;
    let session: Session = match serde_yaml::from_str(&contents) {
        Ok(session) => session,
        Err(source) => return Err(StoreError::Parse { path, source }),
    };
    if let Err(source) = session.configuration.ensure_valid(ConfigurationSource::Session) {
        return Err(StoreError::Invalid { path, source });
    }
    Ok(session)
}

fn ensure_sessions_dir(home: &Path) -> Result<(), StoreError> {
    let dir = sessions_dir_at(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::Configuration;
    use crate::types::Url;
    use tempfile::TempDir;

    fn session() -> Session {
        Session::new(
            Url::local("/tmp/a"),
            Url::parse("ssh://host/b").expect("url"),
            Configuration::default(),
        )
    }

    #[test]
    fn session_path_is_correct() {
        let id = SessionId::from("abc");
        let path = session_path_at(Path::new("/home/me"), &id);
        assert!(path.ends_with(".tandem/sessions/abc.yaml"));
    }

    #[test]
    fn sessions_dir_created_with_perms() {
        let home = TempDir::new().expect("tempdir");
        save_session_at(home.path(), &session()).expect("save");
        let dir = sessions_dir_at(home.path());
        assert!(dir.exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&dir).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o700);
        }
    }

    #[test]
    fn save_and_load_roundtrip() {
        let home = TempDir::new().expect("tempdir");
        let original = session();
        save_session_at(home.path(), &original).expect("save");
        let loaded = load_session_at(home.path(), &original.id).expect("load");
        assert_eq!(loaded, original);
    }

    #[test]
    fn remove_is_idempotent() {
        let home = TempDir::new().expect("tempdir");
        let original = session();
        save_session_at(home.path(), &original).expect("save");
        remove_session_at(home.path(), &original.id).expect("remove");
        remove_session_at(home.path(), &original.id).expect("remove again");
        assert!(list_sessions_at(home.path()).expect("list").is_empty());
    }

    #[test]
    fn list_empty_when_no_directory() {
        let home = TempDir::new().expect("tempdir");
        assert!(list_sessions_at(home.path()).expect("list").is_empty());
    }
}
