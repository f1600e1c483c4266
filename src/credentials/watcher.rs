//! Credential hot-reload driven by filesystem notifications.
//!
//! Watches the mounted secret directory, debounces the event churn an
//! atomic directory swap produces, and applies changed credentials to the
//! live store. A failed reload is logged and the loop keeps running.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;

use crate::api::cache::SecondaryCache;
use crate::credentials::{
    self, CredentialStore, PRIMARY_TOKEN_FILE, SECONDARY_PASSWORD_FILE, SECONDARY_USERNAME_FILE,
};

/// Name of the versioned data directory a mounted secret volume swaps
/// atomically. The credential files are symlinks into it, so a secret
/// update surfaces as an event on this name rather than on the files.
const DATA_DIRECTORY: &str = "..data";

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("failed to create file watcher: {0}")]
    Init(#[from] notify::Error),
}

/// Which credential kind(s) a filesystem event asks us to reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReloadKind {
    Primary,
    Secondary,
    Both,
}

impl ReloadKind {
    fn merge(self, other: ReloadKind) -> ReloadKind {
        if self == other {
            self
        } else {
            ReloadKind::Both
        }
    }
}

/// Watches the secret directory and hot-reloads credentials.
///
/// Dropping the watcher closes the notify subscription; the debounce loop
/// then exits on its next receive.
pub struct CredentialWatcher {
    _watcher: RecommendedWatcher,
    _handle: thread::JoinHandle<()>,
}

impl CredentialWatcher {
    /// Start watching `secret_directory`.
    ///
    /// `cache` is invalidated whenever the secondary credentials change.
    /// `None` means the secondary backend is not configured; its credential
    /// files are then ignored entirely.
    pub fn start(
        secret_directory: PathBuf,
        store: Arc<CredentialStore>,
        cache: Option<Arc<SecondaryCache>>,
        debounce: Duration,
    ) -> Result<Self, WatcherError> {
        let (raw_tx, raw_rx) = mpsc::channel();

        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| match result {
                Ok(event) => {
                    let _ = raw_tx.send(event);
                }
                Err(err) => tracing::warn!(error = %err, "file watcher error"),
            },
            notify::Config::default(),
        )?;
        watcher.watch(&secret_directory, RecursiveMode::NonRecursive)?;

        let handle =
            thread::spawn(move || debounce_loop(raw_rx, &secret_directory, &store, cache, debounce));

        Ok(Self {
            _watcher: watcher,
            _handle: handle,
        })
    }
}

/// Single consumer of the classified event queue. Groups the burst of
/// events one secret swap produces into a single reload.
fn debounce_loop(
    rx: mpsc::Receiver<Event>,
    secret_directory: &Path,
    store: &CredentialStore,
    cache: Option<Arc<SecondaryCache>>,
    debounce: Duration,
) {
    let mut pending: Option<(ReloadKind, Instant)> = None;

    loop {
        let timeout = if pending.is_some() {
            debounce
        } else {
            Duration::from_secs(60)
        };

        match rx.recv_timeout(timeout) {
            Ok(event) => {
                if let Some(kind) = classify(&event) {
                    let merged = match pending {
                        Some((previous, _)) => previous.merge(kind),
                        None => kind,
                    };
                    pending = Some((merged, Instant::now()));
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if let Some((kind, last)) = pending {
                    if last.elapsed() >= debounce {
                        dispatch(kind, secret_directory, store, cache.as_deref());
                        pending = None;
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Map a filesystem event to the credential kind it affects, if any.
///
/// Base names starting with `..` other than the data directory itself are
/// artifacts of the atomic swap (`..data_tmp`, `..2024_01_01…`) and are
/// ignored.
fn classify(event: &Event) -> Option<ReloadKind> {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return None;
    }

    let mut kind: Option<ReloadKind> = None;
    for path in &event.paths {
        let base = match path.file_name().and_then(|n| n.to_str()) {
            Some(base) => base,
            None => continue,
        };
        let this = match base {
            PRIMARY_TOKEN_FILE => ReloadKind::Primary,
            SECONDARY_USERNAME_FILE | SECONDARY_PASSWORD_FILE => ReloadKind::Secondary,
            DATA_DIRECTORY => return Some(ReloadKind::Both),
            other if other.starts_with("..") => continue,
            other => {
                tracing::debug!(name = other, "ignoring filesystem event");
                continue;
            }
        };
        kind = Some(match kind {
            Some(previous) => previous.merge(this),
            None => this,
        });
    }
    kind
}

/// Run the requested reload(s). Failures are collected so that one broken
/// credential never stops the other from reloading, then reported together.
///
/// Without a secondary backend (`cache` is `None`) the secondary files are
/// not read at all; a primary-only deployment rotating its secret would
/// otherwise report a missing-file error on every swap.
fn dispatch(
    kind: ReloadKind,
    secret_directory: &Path,
    store: &CredentialStore,
    cache: Option<&SecondaryCache>,
) {
    let mut failures = Vec::new();

    if matches!(kind, ReloadKind::Secondary | ReloadKind::Both) {
        match cache {
            Some(cache) => {
                if let Err(err) =
                    credentials::reload_secondary(store, secret_directory, Some(cache))
                {
                    failures.push(err.to_string());
                }
            }
            None => {
                tracing::debug!("secondary backend not configured, skipping credential reload")
            }
        }
    }
    if matches!(kind, ReloadKind::Primary | ReloadKind::Both) {
        if let Err(err) = credentials::reload_primary(store, secret_directory) {
            failures.push(err.to_string());
        }
    }

    if !failures.is_empty() {
        tracing::error!(errors = %failures.join("; "), "credential reload failed");
    }
}
