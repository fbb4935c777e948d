//! Login before the shell starts.
//!
//! The credential document is written by the external setup program; the
//! shell only ever reads it.

use crate::config::SystemPaths;
use crate::console::{Console, Input};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The authenticated user of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub username: String,
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Credentials file not found")]
    NotFound(PathBuf),
    #[error("Invalid credentials file format")]
    Invalid(#[source] serde_json::Error),
    #[error("can't read credentials: {0}")]
    Io(#[source] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthFailure {
    #[error("Too many failed attempts. System locked.")]
    LockedOut,
    /// Input closed while asking for credentials.
    #[error("login aborted")]
    Aborted,
}

/// Why the shell refused to start.
#[derive(Debug, Error)]
pub enum BootError {
    #[error("System not properly configured. Run setup first.")]
    NotConfigured,
    #[error(transparent)]
    Credentials(#[from] CredentialError),
    #[error(transparent)]
    Auth(#[from] AuthFailure),
}

impl BootError {
    /// Process status for every refusal.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// Whether the external setup finished: the marker exists and reads `1`.
pub fn setup_completed(marker: &Path) -> bool {
    fs::read_to_string(marker).is_ok_and(|content| content.trim() == "1")
}

/// `{ "username": "secret" }`, read-only.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    users: BTreeMap<String, String>,
}

impl CredentialStore {
    pub fn load(path: &Path) -> Result<Self, CredentialError> {
        let raw = fs::read_to_string(path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => CredentialError::NotFound(path.to_path_buf()),
            _ => CredentialError::Io(err),
        })?;
        let users = serde_json::from_str(&raw).map_err(CredentialError::Invalid)?;
        Ok(Self { users })
    }

    pub fn verify(&self, username: &str, secret: &str) -> bool {
        self.users.get(username).is_some_and(|stored| stored == secret)
    }

    pub fn usernames(&self) -> impl Iterator<Item = &str> {
        self.users.keys().map(String::as_str)
    }
}

pub struct CredentialGate {
    store: CredentialStore,
    max_attempts: u32,
    show_users: bool,
}

impl CredentialGate {
    pub fn new(store: CredentialStore, max_attempts: u32) -> Self {
        Self {
            store,
            max_attempts,
            show_users: false,
        }
    }

    /// Gate for an installation: the credential store plus the show-user
    /// preference.
    pub fn open(paths: &SystemPaths, max_attempts: u32) -> Result<Self, CredentialError> {
        let store = CredentialStore::load(&paths.credentials)?;
        let mut gate = Self::new(store, max_attempts);
        gate.show_users = setup_completed(&paths.show_user);
        Ok(gate)
    }

    pub fn login(
        &self,
        console: &mut dyn Console,
        out: &mut dyn Write,
    ) -> Result<Principal, AuthFailure> {
        if self.show_users {
            let names: Vec<_> = self.store.usernames().collect();
            let _ = writeln!(out, "Users: {}", names.join(", "));
        }

        let mut remaining = self.max_attempts;
        while remaining > 0 {
            let username = match console.read_line("Username: ") {
                Ok(Input::Line(name)) => name.trim().to_string(),
                Ok(Input::Interrupted) => String::new(),
                Ok(Input::Eof) | Err(_) => return Err(AuthFailure::Aborted),
            };
            let secret = match console.read_secret("Password: ") {
                Ok(Input::Line(secret)) => secret,
                Ok(Input::Interrupted) => String::new(),
                Ok(Input::Eof) | Err(_) => return Err(AuthFailure::Aborted),
            };

            if self.store.verify(&username, &secret) {
                tracing::info!(user = %username, "login succeeded");
                let _ = writeln!(out, "\nWelcome, {username}!");
                return Ok(Principal { username });
            }

            remaining -= 1;
            tracing::warn!(user = %username, remaining, "login failed");
            let _ = writeln!(out, "Invalid credentials. {remaining} attempts remaining.");
        }

        let _ = writeln!(out, "{}", AuthFailure::LockedOut);
        Err(AuthFailure::LockedOut)
    }
}
