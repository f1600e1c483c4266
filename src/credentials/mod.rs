//! Credential lifecycle: startup load, live store, and hot reload.
//!
//! The same read-compare-apply path serves both the initial load and the
//! filesystem watcher, so the process starts fully configured before the
//! first filesystem event ever fires.

mod store;
mod watcher;

pub use store::{
    read_primary_token, read_secondary_credentials, CredentialError, CredentialStore,
    SecondaryCredentials, PRIMARY_TOKEN_FILE, SECONDARY_PASSWORD_FILE, SECONDARY_USERNAME_FILE,
};
pub use watcher::{CredentialWatcher, WatcherError};

use std::path::Path;

use crate::api::cache::SecondaryCache;

const SECONDARY_USERNAME_ENV: &str = "SECONDARY_USERNAME";
const SECONDARY_PASSWORD_ENV: &str = "SECONDARY_PASSWORD";

/// Read the primary token file and apply it to the store. Returns whether
/// the live value changed. An unreadable or invalid token leaves the live
/// value untouched.
pub fn reload_primary(
    store: &CredentialStore,
    secret_directory: &Path,
) -> Result<bool, CredentialError> {
    let token = read_primary_token(secret_directory)?;
    store.apply_primary_token(token)
}

/// Read the secondary credential files and apply them to the store. On an
/// effective change the cached secondary listing is invalidated, so no
/// entry fetched under the old credentials outlives them.
pub fn reload_secondary(
    store: &CredentialStore,
    secret_directory: &Path,
    cache: Option<&SecondaryCache>,
) -> Result<bool, CredentialError> {
    let credentials = read_secondary_credentials(secret_directory)?;
    let changed = store.apply_secondary_credentials(credentials);
    if changed {
        if let Some(cache) = cache {
            cache.invalidate();
        }
    }
    Ok(changed)
}

/// Secondary credentials at startup: from the secret directory when it is
/// mounted, otherwise from environment variables. `None` means the
/// secondary backend stays unconfigured, which is not an error.
pub fn load_secondary_startup(
    secret_directory: &Path,
) -> Result<Option<SecondaryCredentials>, CredentialError> {
    if secret_directory.exists() {
        return read_secondary_credentials(secret_directory).map(Some);
    }

    let username = std::env::var(SECONDARY_USERNAME_ENV).unwrap_or_default();
    let password = std::env::var(SECONDARY_PASSWORD_ENV).unwrap_or_default();
    if username.is_empty() || password.is_empty() {
        tracing::info!(
            directory = %secret_directory.display(),
            "secondary backend not configured: no secret directory and no env credentials"
        );
        return Ok(None);
    }
    Ok(Some(SecondaryCredentials { username, password }))
}
