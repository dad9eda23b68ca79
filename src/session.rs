//! Persisted login state: the bearer token and the user it belongs to.

use std::io;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::api::UserRecord;
use crate::realtime::CredentialSource;

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub token: Option<String>,
    pub user: Option<UserRecord>,
}

/// `session.json` with an in-memory copy. Reads never touch the disk.
#[derive(Debug)]
pub struct SessionStore {
    path: Option<PathBuf>,
    current: RwLock<Session>,
}

impl SessionStore {
    /// Load the session at `path`. Missing means logged out; so does a file
    /// that cannot be parsed, which is removed.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let current = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Session>(&bytes) {
                Ok(session) => session,
                Err(e) => {
                    tracing::warn!("discarding corrupt session file {}: {e}", path.display());
                    let _ = std::fs::remove_file(&path);
                    Session::default()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Session::default(),
            Err(e) => {
                tracing::warn!("cannot read session file {}: {e}", path.display());
                Session::default()
            }
        };

        Self {
            path: Some(path),
            current: RwLock::new(current),
        }
    }

    /// Session that lives only as long as this value.
    pub fn ephemeral() -> Self {
        Self {
            path: None,
            current: RwLock::new(Session::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn token(&self) -> Option<String> {
        self.current.read().token.clone()
    }

    pub fn user(&self) -> Option<UserRecord> {
        self.current.read().user.clone()
    }

    pub fn snapshot(&self) -> Session {
        self.current.read().clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.current.read().token.is_some()
    }

    pub fn save(&self, token: String, user: Option<UserRecord>) -> io::Result<()> {
        let session = Session {
            token: Some(token),
            user,
        };
        if let Some(path) = &self.path {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            let body = serde_json::to_vec_pretty(&session).map_err(io::Error::other)?;
            std::fs::write(path, body)?;
        }
        *self.current.write() = session;
        Ok(())
    }

    /// Forget the token and user. Idempotent.
    pub fn clear(&self) -> io::Result<()> {
        *self.current.write() = Session::default();
        if let Some(path) = &self.path {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl CredentialSource for SessionStore {
    fn credential(&self) -> Option<String> {
        self.token()
    }
}
