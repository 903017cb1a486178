use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::cli::open_session;
use crate::error::Result;
use crate::fmt::{money, outcome, percent};
use crate::models::SyncStatus;
use crate::settings::load_settings;
use crate::stats::active_summaries;

pub fn run() -> Result<()> {
    let settings = load_settings();
    let db_path = settings.db_path();

    let user = match settings.identity() {
        Some(id) if id.is_guest => format!("{} (guest)", id.id),
        Some(id) => id.display_name.map_or(id.id.clone(), |name| format!("{name} <{}>", id.id)),
        None => "(not signed in)".to_string(),
    };
    println!("User:       {user}");
    println!("Data dir:   {}", settings.data_dir);
    println!("Cloud dir:  {}", settings.remote_dir);

    if !db_path.exists() {
        println!();
        println!("Journal not found. Run `tradelog init` to set up.");
        return Ok(());
    }

    let ctx = open_session()?;
    let session = &ctx.session;
    let status = session.status();
    let label = match status {
        SyncStatus::Synced => status.to_string().green(),
        SyncStatus::Error => status.to_string().red(),
        SyncStatus::Saving => status.to_string().yellow(),
        SyncStatus::Offline => status.to_string().dimmed(),
    };
    println!("Sync:       {label}");
    if let Some(at) = session.last_backup_time() {
        println!(
            "Last backup: {}",
            at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S")
        );
    }
    if session.sync_conflict_open() {
        println!("{}", "Cloud data differs from this device; run `tradelog resolve`.".yellow());
    }

    let (summaries, trades, strategies, labels, color) = session.read(|j| {
        (
            active_summaries(j),
            j.trades().len(),
            j.taxonomy(crate::models::Taxonomy::Strategies).len(),
            j.taxonomy(crate::models::Taxonomy::Labels).len(),
            j.loss_color().to_string(),
        )
    });
    println!();
    println!("Trades:      {trades}");
    println!("Strategies:  {strategies}");
    println!("Labels:      {labels}");
    println!("Loss color:  {color}");

    let mut table = Table::new();
    table.set_header(vec!["Account", "Trades", "Net", "Win Rate", "Balance"]);
    for s in &summaries {
        table.add_row(vec![
            Cell::new(&s.name),
            Cell::new(s.trades),
            Cell::new(outcome(s.net)),
            Cell::new(percent(s.win_rate())),
            Cell::new(money(s.balance())),
        ]);
    }
    println!("\n{table}");
    Ok(())
}
