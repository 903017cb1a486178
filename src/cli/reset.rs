use colored::Colorize;
use dialoguer::Confirm;

use crate::cli::open_session;
use crate::engine::ResetOutcome;
use crate::error::Result;

pub fn run(yes: bool) -> Result<()> {
    if !yes {
        let confirmed = Confirm::new()
            .with_prompt("Erase every trade, account and setting, including the cloud copy?")
            .default(false)
            .interact()
            .unwrap_or(false);
        if !confirmed {
            println!("Reset cancelled.");
            return Ok(());
        }
    }

    let ctx = open_session()?;
    match ctx.session.reset_all_data()? {
        ResetOutcome::Complete { remote_wiped: true } => {
            println!("{}", "All data erased, in the cloud and on this device.".green())
        }
        ResetOutcome::Complete { remote_wiped: false } => {
            println!("{}", "Local data erased. Not signed in, so no cloud copy was touched.".green())
        }
        ResetOutcome::LocalOnly { reason } => {
            println!("{}", format!("Cloud reset failed ({reason}).").red());
            println!("Local data was erased, but the cloud copy may still hold old data.");
        }
    }
    if ctx.session.restart_required() {
        tracing::debug!("session closed after reset");
    }
    Ok(())
}
