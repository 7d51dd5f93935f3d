//! Fixed-credential login gate.
//!
//! A successful login writes a session file into the data directory; later
//! invocations restore it instead of asking for the credential again. Command
//! entry points receive the resulting [`Session`] explicitly.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::Config;

const SESSION_FILE: &str = "session.json";
const DEFAULT_USERNAME: &str = "admin";

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    password: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: Option<String>) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            cfg.get("auth.username")
                .unwrap_or_else(|| DEFAULT_USERNAME.to_string()),
            cfg.get("auth.password").filter(|p| !p.is_empty()),
        )
    }

    fn accepts(&self, username: &str, password: &str) -> anyhow::Result<bool> {
        let expected = self
            .password
            .as_deref()
            .ok_or_else(|| anyhow!("auth.password is not configured; cannot log in"))?;
        Ok(username == self.username && password == expected)
    }
}

/// Proof that the login gate passed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    pub token: Uuid,
    pub created_at: DateTime<Utc>,
}

pub fn session_path(data_dir: &Path) -> PathBuf {
    data_dir.join(SESSION_FILE)
}

#[instrument(skip(credentials, password))]
pub fn login(
    data_dir: &Path,
    credentials: &Credentials,
    username: &str,
    password: &str,
) -> anyhow::Result<Session> {
    if !credentials.accepts(username.trim(), password)? {
        warn!(username, "rejected login");
        return Err(anyhow!("invalid username or password"));
    }

    let session = Session {
        username: credentials.username.clone(),
        token: Uuid::new_v4(),
        created_at: Utc::now(),
    };
    save_session(&session_path(data_dir), &session)?;
    info!(username = %session.username, "logged in");
    Ok(session)
}

/// Loads the stored session, if any, for the configured user.
#[instrument(skip(credentials))]
pub fn restore(data_dir: &Path, credentials: &Credentials) -> anyhow::Result<Option<Session>> {
    let path = session_path(data_dir);
    if !path.exists() {
        debug!(file = %path.display(), "no session file");
        return Ok(None);
    }

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    let session: Session = match serde_json::from_str(&raw) {
        Ok(session) => session,
        Err(err) => {
            warn!(file = %path.display(), error = %err, "ignoring unreadable session file");
            return Ok(None);
        }
    };

    if session.username != credentials.username {
        warn!(stored = %session.username, "session belongs to a different user");
        return Ok(None);
    }
    Ok(Some(session))
}

pub fn require(data_dir: &Path, credentials: &Credentials) -> anyhow::Result<Session> {
    restore(data_dir, credentials)?
        .ok_or_else(|| anyhow!("not logged in; run `taskdeck login <username>` first"))
}

#[instrument]
pub fn logout(data_dir: &Path) -> anyhow::Result<bool> {
    let path = session_path(data_dir);
    if !path.exists() {
        return Ok(false);
    }
    fs::remove_file(&path).with_context(|| format!("failed removing {}", path.display()))?;
    info!("logged out");
    Ok(true)
}

fn save_session(path: &Path, session: &Session) -> anyhow::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let mut temp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut temp, session)?;
    temp.flush()?;
    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn creds() -> Credentials {
        Credentials::new("admin", Some("s3cret".to_string()))
    }

    #[test]
    fn login_then_restore_round_trips() {
        let temp = tempdir().expect("tempdir");
        let session = login(temp.path(), &creds(), "admin", "s3cret").expect("login");

        let restored = restore(temp.path(), &creds()).expect("restore");
        assert_eq!(restored, Some(session));
    }

    #[test]
    fn wrong_password_is_rejected_and_writes_nothing() {
        let temp = tempdir().expect("tempdir");
        assert!(login(temp.path(), &creds(), "admin", "nope").is_err());
        assert!(!session_path(temp.path()).exists());
        assert!(require(temp.path(), &creds()).is_err());
    }

    #[test]
    fn login_without_configured_password_fails() {
        let temp = tempdir().expect("tempdir");
        let creds = Credentials::new("admin", None);
        assert!(login(temp.path(), &creds, "admin", "").is_err());
    }

    #[test]
    fn session_of_other_user_is_ignored() {
        let temp = tempdir().expect("tempdir");
        login(temp.path(), &creds(), "admin", "s3cret").expect("login");
        let other = Credentials::new("someone", Some("x".to_string()));
        assert_eq!(restore(temp.path(), &other).expect("restore"), None);
    }

    #[test]
    fn logout_removes_session() {
        let temp = tempdir().expect("tempdir");
        login(temp.path(), &creds(), "admin", "s3cret").expect("login");
        assert!(logout(temp.path()).expect("logout"));
        assert!(!logout(temp.path()).expect("second logout"));
        assert_eq!(restore(temp.path(), &creds()).expect("restore"), None);
    }
}
