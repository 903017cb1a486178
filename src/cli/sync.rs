use colored::Colorize;

use crate::cli::{open_session, SyncResolution};
use crate::error::{JournalError, Result};
use crate::merge::SyncChoice;
use crate::models::SyncStatus;

pub fn push() -> Result<()> {
    let ctx = open_session()?;
    if ctx.session.sync_conflict_open() {
        return Err(JournalError::SyncConflict);
    }
    let at = if ctx.session.status() == SyncStatus::Error {
        println!("Retrying failed backup...");
        ctx.session.retry_sync()?
    } else {
        ctx.session.trigger_cloud_backup()?
    };
    println!(
        "{}",
        format!("Backed up to the cloud at {}", at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S")).green()
    );
    ctx.finish()
}

pub fn pull() -> Result<()> {
    let ctx = open_session()?;
    if ctx.settings.identity().is_none() {
        return Err(JournalError::Offline);
    }
    let trades = ctx.session.read(|j| j.trades().len());
    if ctx.session.sync_conflict_open() {
        println!(
            "{}",
            "Cloud data differs from this device. Run `tradelog resolve keep-local` or `tradelog resolve keep-remote`."
                .yellow()
        );
    } else if ctx.session.last_backup_time().is_some() {
        println!("{}", format!("In sync with the cloud ({trades} trades).").green());
    } else {
        println!("Nothing to pull; the cloud copy is empty.");
    }
    ctx.finish()
}

pub fn resolve(choice: SyncResolution) -> Result<()> {
    let ctx = open_session()?;
    let choice = SyncChoice::from(choice);
    ctx.session.resolve_sync_conflict(choice)?;
    let trades = ctx.session.read(|j| j.trades().len());
    match choice {
        SyncChoice::KeepLocal => println!("Kept this device's data and overwrote the cloud copy ({trades} trades)."),
        SyncChoice::KeepRemote => println!("Replaced this device's data with the cloud copy ({trades} trades)."),
    }
    ctx.finish()
}
