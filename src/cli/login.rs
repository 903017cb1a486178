use colored::Colorize;

use crate::cli::{open_session, open_signing_in};
use crate::error::Result;
use crate::settings::{load_settings, save_settings};

pub fn login(user: &str, name: Option<String>, email: Option<String>, guest: bool) -> Result<()> {
    let mut settings = load_settings();
    settings.user_id = user.trim().to_string();
    settings.display_name = name.unwrap_or_default();
    settings.email = email.unwrap_or_default();
    settings.is_guest = guest;
    save_settings(&settings)?;

    let ctx = open_signing_in()?;
    ctx.session.login()?;
    // Let the first cloud delivery land before reporting.
    ctx.session.wait_idle(ctx.settle_timeout());
    let who = if guest { format!("{user} (guest)") } else { user.to_string() };
    println!("Signed in as {who}");

    let trades = ctx.session.read(|j| j.trades().len());
    if ctx.session.sync_conflict_open() {
        println!(
            "{}",
            "Cloud data differs from this device. Run `tradelog resolve keep-local` or `tradelog resolve keep-remote`."
                .yellow()
        );
    } else if ctx.session.last_backup_time().is_some() && trades > 0 {
        println!("{}", format!("Journal in sync with the cloud ({trades} trades).").green());
    }
    ctx.finish()
}

pub fn logout() -> Result<()> {
    let ctx = open_session()?;
    ctx.session.logout()?;
    let mut settings = ctx.settings.clone();
    ctx.finish()?;

    settings.user_id.clear();
    settings.display_name.clear();
    settings.email.clear();
    settings.is_guest = false;
    save_settings(&settings)?;
    println!("Signed out. Local data cleared; the cloud copy is kept.");
    Ok(())
}
