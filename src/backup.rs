//! Timestamped copies of the master workbook

use crate::error::{RateSheetError, RateSheetResult};
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

fn timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

fn split_name(path: &Path) -> (String, String) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (stem, ext)
}

/// Default backup folder: `<parent>/backups`
pub fn default_backup_dir(master: &Path) -> PathBuf {
    master
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("backups")
}

/// Copy the master to `<backup_dir>/<stem>_backup_<YYYYmmdd_HHMMSS><ext>`
pub fn create_backup(master: &Path, backup_dir: Option<&Path>) -> RateSheetResult<PathBuf> {
    if !master.is_file() {
        return Err(RateSheetError::Validation(format!(
            "Cannot back up missing file: {}",
            master.display()
        )));
    }

    let dir = backup_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_backup_dir(master));
    fs::create_dir_all(&dir)?;

    let (stem, ext) = split_name(master);
    let backup_path = dir.join(format!("{}_backup_{}{}", stem, timestamp(), ext));
    fs::copy(master, &backup_path)?;

    info!(backup = %backup_path.display(), "master backed up");
    Ok(backup_path)
}

/// Back up before an edit; failure is logged and the edit goes ahead
pub fn backup_before_edit(master: &Path, backup_dir: Option<&Path>) -> Option<PathBuf> {
    match create_backup(master, backup_dir) {
        Ok(path) => Some(path),
        Err(e) => {
            warn!(master = %master.display(), error = %e, "backup failed; continuing without one");
            None
        }
    }
}

/// Rename a file to `<stem>_<YYYYmmdd_HHMMSS><ext>` next to it
pub fn rename_with_timestamp(path: &Path) -> RateSheetResult<PathBuf> {
    let (stem, ext) = split_name(path);
    let target = path.with_file_name(format!("{}_{}{}", stem, timestamp(), ext));
    fs::rename(path, &target)?;
    info!(from = %path.display(), to = %target.display(), "renamed with timestamp");
    Ok(target)
}

/// Existing backups of `master`, oldest first
pub fn list_backups(master: &Path, backup_dir: Option<&Path>) -> RateSheetResult<Vec<PathBuf>> {
    let dir = backup_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_backup_dir(master));
    let (stem, ext) = split_name(master);
    let pattern = dir.join(format!("{}_backup_*{}", glob::Pattern::escape(&stem), ext));

    let mut found: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
        .map_err(|e| RateSheetError::Validation(format!("Bad backup pattern: {}", e)))?
        .filter_map(Result::ok)
        .collect();
    found.sort();
    Ok(found)
}
