//! Live credential slots shared by the backend clients.
//!
//! One store instance is the single owner of both credential pairs. Writers
//! swap complete values under a per-kind lock; readers clone the whole value
//! under the same lock, so no caller ever observes a half-updated pair.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use thiserror::Error;

pub const PRIMARY_TOKEN_FILE: &str = "primary-token";
pub const SECONDARY_USERNAME_FILE: &str = "secondary-username";
pub const SECONDARY_PASSWORD_FILE: &str = "secondary-password";

/// Primary backend tokens are always exactly this long.
const PRIMARY_TOKEN_LENGTH: usize = 64;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("reading {kind} from {path:?}: {source}")]
    Read {
        kind: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("primary token is invalid: must be exactly {PRIMARY_TOKEN_LENGTH} characters, got {length}")]
    InvalidPrimaryToken { length: usize },
}

/// Username/password pair for the secondary backend.
#[derive(Clone, PartialEq, Eq)]
pub struct SecondaryCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for SecondaryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecondaryCredentials")
            .field("username", &self.username)
            .field("password", &format_args!("{}…", preview(&self.password, 3)))
            .finish()
    }
}

/// Holds the live credentials for both backends, plus one reload counter
/// per kind. Constructed once and shared; multiple independent stores can
/// coexist in one process.
#[derive(Default)]
pub struct CredentialStore {
    primary_token: Mutex<Option<String>>,
    secondary: Mutex<Option<SecondaryCredentials>>,
    primary_reloads: AtomicU64,
    secondary_reloads: AtomicU64,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current primary token, or `None` if never applied.
    pub fn primary_token(&self) -> Option<String> {
        self.primary_token.lock().clone()
    }

    /// Current secondary pair, cloned as a unit.
    pub fn secondary_credentials(&self) -> Option<SecondaryCredentials> {
        self.secondary.lock().clone()
    }

    /// Number of effective (value-changed) primary token reloads.
    pub fn primary_reloads(&self) -> u64 {
        self.primary_reloads.load(Ordering::Relaxed)
    }

    /// Number of effective (value-changed) secondary credential reloads.
    pub fn secondary_reloads(&self) -> u64 {
        self.secondary_reloads.load(Ordering::Relaxed)
    }

    /// Validate and apply a primary token. Returns `Ok(false)` when the
    /// token matches the live value (no-op). An invalid token leaves the
    /// live value untouched.
    pub fn apply_primary_token(&self, token: String) -> Result<bool, CredentialError> {
        if token.chars().count() != PRIMARY_TOKEN_LENGTH {
            return Err(CredentialError::InvalidPrimaryToken {
                length: token.chars().count(),
            });
        }

        let mut slot = self.primary_token.lock();
        if slot.as_deref() == Some(token.as_str()) {
            return Ok(false);
        }
        tracing::info!(token = %format!("{}…", preview(&token, 5)), "primary token updated");
        *slot = Some(token);
        self.primary_reloads.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    /// Apply a secondary pair. Returns `false` when unchanged.
    pub fn apply_secondary_credentials(&self, credentials: SecondaryCredentials) -> bool {
        let mut slot = self.secondary.lock();
        if slot.as_ref() == Some(&credentials) {
            return false;
        }
        tracing::info!(
            username = %credentials.username,
            password = %format!("{}…", preview(&credentials.password, 3)),
            "secondary credentials updated"
        );
        *slot = Some(credentials);
        self.secondary_reloads.fetch_add(1, Ordering::Relaxed);
        true
    }
}

/// Read and trim the primary token file.
pub fn read_primary_token(secret_directory: &Path) -> Result<String, CredentialError> {
    read_trimmed(secret_directory.join(PRIMARY_TOKEN_FILE), "primary token")
}

/// Read and trim the secondary username and password files.
pub fn read_secondary_credentials(
    secret_directory: &Path,
) -> Result<SecondaryCredentials, CredentialError> {
    let username = read_trimmed(
        secret_directory.join(SECONDARY_USERNAME_FILE),
        "secondary username",
    )?;
    let password = read_trimmed(
        secret_directory.join(SECONDARY_PASSWORD_FILE),
        "secondary password",
    )?;
    Ok(SecondaryCredentials { username, password })
}

fn read_trimmed(path: PathBuf, kind: &'static str) -> Result<String, CredentialError> {
    let raw = std::fs::read_to_string(&path).map_err(|source| CredentialError::Read {
        kind,
        path,
        source,
    })?;
    Ok(raw.trim().to_string())
}

/// First `n` characters of a secret, for log lines. Never the full value.
fn preview(s: &str, n: usize) -> &str {
    let end = s
        .char_indices()
        .nth(n)
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    &s[..end]
}
