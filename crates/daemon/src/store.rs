//! JSON document persistence.
//!
//! Every persisted concern (settings, exclusion ledger, exemptions, run state)
//! is one pretty-printed JSON file in the state directory. Writes go to a
//! sibling temp file that is renamed over the target, so an interrupted write
//! never leaves a truncated document behind. Each document is owned by a
//! [`JsonStore`]: readers take cloned snapshots, writers mutate a copy under
//! the write lock and only commit it once it is on disk.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::Settings;

/// User settings document.
pub const SETTINGS_FILE: &str = "config.json";
/// Exclusion ledger document.
pub const LEDGER_FILE: &str = "used_collections.json";
/// Exemption list document.
pub const EXEMPTIONS_FILE: &str = "user_exemptions.json";
/// Run state document.
pub const RUN_STATE_FILE: &str = "run_state.json";

/// Errors that can occur while persisting a document.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Path of the temp file used while writing `path`.
fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "state".to_string());
    path.with_file_name(format!(".{}.tmp", name))
}

/// Path a corrupt document is moved to: `<name>.corrupt.<unix-seconds>`.
pub fn corrupt_backup_path(path: &Path) -> PathBuf {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let mut backup = path.as_os_str().to_owned();
    backup.push(format!(".corrupt.{}", timestamp));
    PathBuf::from(backup)
}

/// Atomically replace `path` with `contents`.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp = temp_path(path);
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(value)?;
    write_atomic(path, json.as_bytes())?;
    Ok(())
}

/// Load a document, falling back to `T::default()` when it is missing or unusable.
///
/// A document that exists but cannot be parsed is moved aside with
/// [`corrupt_backup_path`] and reported at error level; the service carries on
/// with the default value.
pub fn load_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return T::default(),
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "failed to read state file, using defaults");
            return T::default();
        }
    };

    if content.trim().is_empty() {
        return T::default();
    }

    match serde_json::from_str(&content) {
        Ok(value) => value,
        Err(e) => {
            let backup = corrupt_backup_path(path);
            match fs::rename(path, &backup) {
                Ok(()) => tracing::error!(
                    path = %path.display(),
                    backup = %backup.display(),
                    error = %e,
                    "state file is corrupt, moved aside and reset to defaults"
                ),
                Err(rename_err) => tracing::error!(
                    path = %path.display(),
                    error = %e,
                    rename_error = %rename_err,
                    "state file is corrupt and could not be moved aside, using defaults"
                ),
            }
            T::default()
        }
    }
}

/// A single persisted JSON document with a single-writer discipline.
#[derive(Debug)]
pub struct JsonStore<T> {
    path: PathBuf,
    inner: RwLock<T>,
}

/// Store for the user settings document.
pub type ConfigStore = JsonStore<Settings>;

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned + Default + Clone + Send + Sync,
{
    /// Open the document at `path`, loading its current contents.
    pub fn open<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let value = load_json_or_default(&path);
        Self {
            path,
            inner: RwLock::new(value),
        }
    }

    /// Open the document `file_name` inside `dir`.
    pub fn open_in(dir: &Path, file_name: &str) -> Self {
        Self::open(dir.join(file_name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Consistent copy of the current value.
    pub async fn snapshot(&self) -> T {
        self.inner.read().await.clone()
    }

    /// Run `f` against the current value without cloning it.
    pub async fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.inner.read().await;
        f(&guard)
    }

    /// Mutate the document and persist it.
    ///
    /// `f` runs against a copy; the in-memory value is only replaced once the
    /// copy has been written, so a failed write leaves both unchanged.
    pub async fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, StoreError> {
        let mut guard = self.inner.write().await;
        let mut next = guard.clone();
        let result = f(&mut next);
        write_json_atomic(&self.path, &next)?;
        *guard = next;
        Ok(result)
    }

    /// Re-read the document from disk, picking up edits made outside the
    /// daemon.
    ///
    /// A missing, empty or unparseable file keeps the current value and is
    /// left where it is. Returns whether a new value was loaded.
    pub async fn reload(&self) -> bool {
        let mut guard = self.inner.write().await;
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return false,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to re-read state file, keeping current value");
                return false;
            }
        };
        if content.trim().is_empty() {
            return false;
        }

        match serde_json::from_str(&content) {
            Ok(value) => {
                *guard = value;
                true
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "state file does not parse, keeping last good value"
                );
                false
            }
        }
    }

    /// Replace the whole document.
    pub async fn replace(&self, value: T) -> Result<(), StoreError> {
        self.update(|current| *current = value).await
    }
}
