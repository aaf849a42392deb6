// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Disk persistence for batches that could not be delivered.
//!
//! Each failed batch becomes one file of newline-joined serialized
//! envelopes under a per-key directory in the OS temp location. The
//! directory is provisioned at most once per process: the first failure to
//! create or secure it marks the key as unusable and every later write is
//! refused without touching the filesystem again. All files are created
//! owner-only readable.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use once_cell::sync::Lazy;
use tracing::{debug, warn};

use crate::config::TelemetryConfig;
use crate::error::StoreError;

/// Prefix of the per-key directory under the OS temp dir.
pub const TEMPDIR_PREFIX: &str = "beacon-";

const RETRY_FILE_SUFFIX: &str = ".retry.json";

#[derive(Debug, Clone, Copy, PartialEq)]
enum DirState {
    Provisioned,
    ProvisioningFailed,
}

/// Process-wide provisioning outcomes, keyed by directory. Shared across
/// store instances so a failed directory is never probed twice.
static PROVISIONED_DIRS: Lazy<Mutex<HashMap<PathBuf, DirState>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Writes and recovers retry batches for one instrumentation key.
pub struct RetryStore {
    config: Arc<TelemetryConfig>,
    dir: PathBuf,
    seq: AtomicU64,
}

impl RetryStore {
    pub fn new(config: Arc<TelemetryConfig>) -> Self {
        let dir = std::env::temp_dir().join(format!(
            "{TEMPDIR_PREFIX}{}",
            config.instrumentation_key()
        ));
        Self::with_dir(config, dir)
    }

    /// Store rooted at an explicit directory. Used by tests.
    pub fn with_dir(config: Arc<TelemetryConfig>, dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            dir: dir.into(),
            seq: AtomicU64::new(0),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// Persist one newline-joined batch to disk. Returns `true` when the
    /// payload landed in a file.
    ///
    /// Blocking variant for crash handlers; `persist` runs the same body
    /// on the blocking pool for async callers. Refuses without error when
    /// disk retry is disabled, when provisioning has failed, or when the
    /// payload would push the directory past the configured byte cap.
    pub fn persist_sync(&self, payload: &str) -> bool {
        if !self.config.disk_retry_enabled() {
            debug!("disk retry disabled, discarding batch");
            return false;
        }
        match self.try_persist(payload) {
            Ok(path) => {
                debug!(path = %path.display(), bytes = payload.len(), "persisted batch to disk");
                true
            }
            Err(err) => {
                warn!(error = %err, "unable to persist batch to disk");
                false
            }
        }
    }

    pub async fn persist(self: Arc<Self>, payload: String) -> bool {
        tokio::task::spawn_blocking(move || self.persist_sync(&payload))
            .await
            .unwrap_or(false)
    }

    fn try_persist(&self, payload: &str) -> Result<PathBuf, StoreError> {
        self.provision()?;

        let used = self.directory_size()?;
        let cap = self.config.disk_retry_cap_bytes();
        if used + payload.len() as u64 > cap {
            return Err(StoreError::IoError(format!(
                "retry directory byte cap reached ({used} of {cap} bytes used)"
            )));
        }

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{seq}{RETRY_FILE_SUFFIX}", Utc::now().timestamp_millis());
        let path = self.dir.join(name);
        write_owner_only(&path, payload.as_bytes())?;
        Ok(path)
    }

    /// Create and secure the retry directory, once per process. A failed
    /// attempt is permanent: the outcome is cached and later calls return
    /// the cached error without retrying.
    fn provision(&self) -> Result<(), StoreError> {
        let mut registry = PROVISIONED_DIRS.lock().unwrap();
        match registry.get(&self.dir) {
            Some(DirState::Provisioned) => return Ok(()),
            Some(DirState::ProvisioningFailed) => {
                return Err(StoreError::ProvisioningFailed(
                    "retry directory previously failed to provision".to_owned(),
                ))
            }
            None => {}
        }

        let outcome = create_secure_dir(&self.dir);
        let state = if outcome.is_ok() {
            DirState::Provisioned
        } else {
            DirState::ProvisioningFailed
        };
        registry.insert(self.dir.clone(), state);

        outcome.map_err(|err| {
            warn!(
                dir = %self.dir.display(),
                error = %err,
                "retry directory provisioning failed, disk retry disabled for this key"
            );
            StoreError::ProvisioningFailed(err.to_string())
        })
    }

    fn directory_size(&self) -> Result<u64, StoreError> {
        let mut total = 0u64;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                total += entry.metadata()?.len();
            }
        }
        Ok(total)
    }

    /// Pending retry files, oldest first. The timestamp-seq naming makes
    /// lexicographic order chronological.
    pub fn pending_files(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.ends_with(RETRY_FILE_SUFFIX))
            })
            .collect();
        files.sort();
        files
    }

    /// Read back one persisted batch as individual serialized envelopes.
    pub fn read_batch(&self, path: &Path) -> io::Result<Vec<String>> {
        let raw = fs::read_to_string(path)?;
        Ok(raw
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect())
    }

    pub fn remove(&self, path: &Path) {
        if let Err(err) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %err, "unable to remove retry file");
        }
    }
}

fn create_secure_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

#[cfg(unix)]
fn write_owner_only(path: &Path, bytes: &[u8]) -> io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(bytes)
}

#[cfg(not(unix))]
fn write_owner_only(path: &Path, bytes: &[u8]) -> io::Result<()> {
    use std::io::Write;
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(bytes)
}

/// Forget cached provisioning outcomes. Tests share the process-wide
/// registry and must isolate themselves from each other.
#[doc(hidden)]
pub fn reset_provisioning_registry() {
    PROVISIONED_DIRS.lock().unwrap().clear();
}
