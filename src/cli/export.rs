use std::path::PathBuf;

use crate::backup::{default_backup_path, write_backup};
use crate::cli::{data_dir, open_session};
use crate::error::Result;
use crate::fmt::format_bytes;

pub fn run(output: Option<String>) -> Result<()> {
    let ctx = open_session()?;
    let dest_path = match output {
        Some(p) => PathBuf::from(p),
        None => default_backup_path(&data_dir(&ctx.settings))?,
    };

    let document = ctx.session.download_backup_snapshot();
    let size = write_backup(&dest_path, &document)?;
    println!("Backup saved to {}", dest_path.display());
    println!("Trades: {}  Size: {}", document.trades.len(), format_bytes(size));
    Ok(())
}
