use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::models::BackupDocument;

/// `<data_dir>/backups/tradelog-backup-YYYYMMDD-HHMMSS.json`
pub fn default_backup_path(data_dir: &Path) -> Result<PathBuf> {
    let backups_dir = data_dir.join("backups");
    std::fs::create_dir_all(&backups_dir)?;
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    Ok(backups_dir.join(format!("tradelog-backup-{stamp}.json")))
}

/// Write the export document as pretty JSON. Returns the size in bytes.
pub fn write_backup(path: &Path, document: &BackupDocument) -> Result<u64> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(document)?;
    std::fs::write(path, format!("{json}\n"))?;
    Ok(std::fs::metadata(path)?.len())
}

pub fn read_import(path: &Path) -> Result<String> {
    Ok(std::fs::read_to_string(path)?)
}
