use std::path::PathBuf;

use crate::error::Result;
use crate::journal::Journal;
use crate::settings::{load_settings, save_settings, shellexpand_path};
use crate::store::SqliteStore;

pub fn run(data_dir: Option<String>, remote_dir: Option<String>) -> Result<()> {
    let mut settings = load_settings();
    if let Some(dir) = data_dir {
        settings.data_dir = shellexpand_path(&dir);
    }
    if let Some(dir) = remote_dir {
        settings.remote_dir = shellexpand_path(&dir);
    }
    save_settings(&settings)?;

    let resolved = PathBuf::from(&settings.data_dir);
    std::fs::create_dir_all(&resolved)?;
    std::fs::create_dir_all(resolved.join("backups"))?;

    // Loading seeds the default lists into a fresh store.
    let journal = Journal::load(Box::new(SqliteStore::open(&settings.db_path())?));
    tracing::debug!(trades = journal.trades().len(), "journal opened");

    println!("Initialized tradelog at {}", resolved.display());
    println!("Cloud documents: {}", settings.remote_dir);
    Ok(())
}
