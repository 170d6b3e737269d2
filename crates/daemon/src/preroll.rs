//! Pre-roll engine
//!
//! Plex plays whatever file is named `<preroll_target_name>.<ext>` in the
//! pre-roll folder before a movie. Switching pre-rolls is therefore a pair of
//! renames: the installed file goes back to its own name (recorded in the
//! `current_roll.txt` marker) and the new source takes the target name.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::blocks::active_season_blocks;
use crate::config::{AppliesTo, SeasonTarget, Settings};
use crate::store::{write_atomic, ConfigStore};

/// Marker file holding the original name of the installed pre-roll.
pub const CURRENT_ROLL_FILE: &str = "current_roll.txt";

/// Errors that can occur while switching pre-rolls.
#[derive(Debug, Error)]
pub enum PrerollError {
    #[error("no pre-roll folder configured")]
    FolderNotSet,

    #[error("pre-roll folder does not exist: {}", .0.display())]
    FolderMissing(PathBuf),

    #[error("no active pre-roll block and no default pre-roll configured")]
    NoPrerollConfigured,

    #[error("pre-roll source file not found: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result of one resolve-and-apply run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrerollOutcome {
    /// Original name of the file now installed.
    pub applied_file: String,
    /// Season block that chose the file, if any.
    pub block: Option<String>,
    /// True when no block was active and the default file was used.
    pub fallback_used: bool,
    /// False when the right file was already installed.
    pub changed: bool,
}

/// Which file should be installed on `today`, and why.
fn resolve_filename(settings: &Settings, today: NaiveDate) -> Result<(String, Option<String>), PrerollError> {
    let active = active_season_blocks(&settings.seasonal_blocks, today, AppliesTo::Preroll);
    if active.len() > 1 {
        let ignored: Vec<&str> = active[1..].iter().map(|b| b.name.as_str()).collect();
        info!(using = %active[0].name, ignored = ?ignored, "several pre-roll blocks active, using the first");
    }

    for block in active {
        if let SeasonTarget::Preroll { filename } = &block.target {
            return Ok((filename.clone(), Some(block.name.clone())));
        }
    }

    settings
        .default_preroll()
        .map(|f| (f.to_string(), None))
        .ok_or(PrerollError::NoPrerollConfigured)
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().to_string())
}

/// Files directly inside `folder`.
fn folder_files(folder: &Path) -> Vec<PathBuf> {
    WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}

/// Currently installed pre-roll files (any extension).
fn installed_files(folder: &Path, target_name: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = folder_files(folder)
        .into_iter()
        .filter(|p| file_stem(p).as_deref() == Some(target_name))
        .collect();
    files.sort();
    files
}

/// Original name of the installed pre-roll, from the marker file.
pub fn read_marker(folder: &Path) -> Option<String> {
    fs::read_to_string(folder.join(CURRENT_ROLL_FILE))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Candidate pre-roll files in `folder`, sorted by name.
///
/// The marker and any installed pre-roll are left out.
pub fn list_preroll_files(folder: &Path, target_name: &str) -> Result<Vec<String>, PrerollError> {
    if !folder.is_dir() {
        return Err(PrerollError::FolderMissing(folder.to_path_buf()));
    }
    let mut names: Vec<String> = folder_files(folder)
        .into_iter()
        .filter(|p| file_stem(p).as_deref() != Some(target_name))
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
        .filter(|n| n != CURRENT_ROLL_FILE)
        .collect();
    names.sort();
    Ok(names)
}

/// Resolve the pre-roll for `today` and install it.
pub fn apply_preroll(settings: &Settings, today: NaiveDate) -> Result<PrerollOutcome, PrerollError> {
    let folder = settings.preroll_folder().ok_or(PrerollError::FolderNotSet)?;
    if !folder.is_dir() {
        return Err(PrerollError::FolderMissing(folder.to_path_buf()));
    }

    let (filename, block) = resolve_filename(settings, today)?;
    let fallback_used = block.is_none();
    let target_name = settings.preroll_target_name.as_str();
    let extension = Path::new(&filename)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let target = folder.join(format!("{}{}", target_name, extension));
    let marker = read_marker(folder);

    if marker.as_deref() == Some(filename.as_str()) && target.exists() {
        return Ok(PrerollOutcome {
            applied_file: filename,
            block,
            fallback_used,
            changed: false,
        });
    }

    let source = folder.join(&filename);
    if !source.is_file() {
        warn!(source = %source.display(), "pre-roll source missing, keeping current pre-roll");
        return Err(PrerollError::SourceMissing(source));
    }

    for (i, installed) in installed_files(folder, target_name).into_iter().enumerate() {
        match (&marker, i) {
            (Some(original), 0) => {
                let restored = folder.join(original);
                fs::rename(&installed, &restored)?;
                info!(from = %installed.display(), to = %restored.display(), "restored previous pre-roll");
            }
            _ => {
                fs::remove_file(&installed)?;
                warn!(path = %installed.display(), "removed installed pre-roll with unknown origin");
            }
        }
    }

    fs::rename(&source, &target)?;
    write_atomic(&folder.join(CURRENT_ROLL_FILE), filename.as_bytes())?;
    info!(file = %filename, target = %target.display(), fallback_used, "pre-roll installed");

    Ok(PrerollOutcome {
        applied_file: filename,
        block,
        fallback_used,
        changed: true,
    })
}

/// Serializes pre-roll switches from the scheduler and the HTTP surface.
pub struct PrerollEngine {
    settings: Arc<ConfigStore>,
    gate: Mutex<()>,
}

impl PrerollEngine {
    pub fn new(settings: Arc<ConfigStore>) -> Self {
        Self {
            settings,
            gate: Mutex::new(()),
        }
    }

    pub async fn resolve_and_apply(&self, now: DateTime<Local>) -> Result<PrerollOutcome, PrerollError> {
        let _guard = self.gate.lock().await;
        let settings = self.settings.snapshot().await;
        apply_preroll(&settings, now.date_naive())
    }

    pub async fn list_preroll_files(&self) -> Result<Vec<String>, PrerollError> {
        let settings = self.settings.snapshot().await;
        let folder = settings.preroll_folder().ok_or(PrerollError::FolderNotSet)?;
        list_preroll_files(folder, &settings.preroll_target_name)
    }

    /// Original name of the installed pre-roll, if known.
    pub async fn current(&self) -> Option<String> {
        let settings = self.settings.snapshot().await;
        settings.preroll_folder().and_then(read_marker)
    }
}
