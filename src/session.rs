//! Session: the stored credential and role of the signed-in user.
//!
//! DESIGN
//! ======
//! The session is a small JSON document keyed like the browser storage the
//! web front end used (`auth-token`, `role`, `user-id`). It is loaded once
//! and handed to the API client as a [`CredentialProvider`], so nothing
//! reads credentials from global state.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::net::types::{LoginResponse, Role};

pub const AUTH_TOKEN_KEY: &str = "auth-token";
pub const ROLE_KEY: &str = "role";
pub const USER_ID_KEY: &str = "user-id";

/// Source of the token sent in the `Authentication-Token` header.
///
/// Read at request time, so a provider may change between calls.
pub trait CredentialProvider: Send + Sync {
    fn auth_token(&self) -> Option<String>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "auth-token", default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(rename = "user-id", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
}

impl Session {
    #[must_use]
    pub fn from_login(login: &LoginResponse) -> Self {
        Self {
            auth_token: Some(login.token.clone()),
            role: Some(login.roles),
            user_id: Some(login.id),
        }
    }

    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.auth_token.as_deref().is_some_and(|token| !token.is_empty())
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.is_logged_in() && self.role == Some(Role::Admin)
    }

    /// Overlay explicit values (command-line flags, env) on a stored session.
    #[must_use]
    pub fn with_overrides(mut self, token: Option<String>, role: Option<Role>) -> Self {
        if let Some(token) = token {
            self.auth_token = Some(token);
        }
        if let Some(role) = role {
            self.role = Some(role);
        }
        self
    }
}

impl CredentialProvider for Session {
    fn auth_token(&self) -> Option<String> {
        self.auth_token.clone().filter(|token| !token.is_empty())
    }
}

/// Errors from reading or writing the session file.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("session file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// File-backed session storage.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored session. A missing file is an empty session.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(&self) -> Result<Session, SessionError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no stored session");
                return Ok(Session::default());
            }
            Err(source) => return Err(SessionError::Io { path: self.path.clone(), source }),
        };
        serde_json::from_str(&raw).map_err(|source| SessionError::Parse { path: self.path.clone(), source })
    }

    /// Persist the session, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, session: &Session) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
        }
        let rendered = serde_json::to_string_pretty(session)
            .map_err(|source| SessionError::Parse { path: self.path.clone(), source })?;
        std::fs::write(&self.path, rendered).map_err(|source| self.io_error(source))?;
        debug!(path = %self.path.display(), "session saved");
        Ok(())
    }

    /// Forget the token, role and user id.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be removed.
    pub fn clear(&self) -> Result<(), SessionError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(self.io_error(source)),
        }
    }

    fn io_error(&self, source: std::io::Error) -> SessionError {
        SessionError::Io { path: self.path.clone(), source }
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
