use std::path::Path;

use colored::Colorize;
use dialoguer::Select;

use crate::backup::read_import;
use crate::cli::{open_for_edit, ImportResolution};
use crate::engine::ImportOutcome;
use crate::error::Result;
use crate::merge::ImportChoice;

pub fn run(file: &str, resolve: Option<ImportResolution>) -> Result<()> {
    let ctx = open_for_edit()?;
    let text = read_import(Path::new(file))?;

    match ctx.session.import_from_json(&text)? {
        ImportOutcome::Applied => {
            let trades = ctx.session.read(|j| j.trades().len());
            println!("Imported {trades} trades from {file}");
        }
        ImportOutcome::Pending => {
            let choice = match resolve {
                Some(r) => Some(ImportChoice::from(r)),
                None => prompt_choice(),
            };
            match choice {
                Some(choice) => {
                    ctx.session.resolve_import_conflict(choice)?;
                    let verb = match choice {
                        ImportChoice::Merge => "Merged",
                        ImportChoice::Overwrite => "Replaced local data with",
                    };
                    let trades = ctx.session.read(|j| j.trades().len());
                    println!("{verb} {file} ({trades} trades now)");
                }
                None => {
                    if ctx.session.has_pending_import() {
                        tracing::debug!("discarding unresolved import");
                    }
                    println!("{}", "Import cancelled; local data unchanged.".yellow());
                }
            }
        }
    }
    ctx.finish()
}

fn prompt_choice() -> Option<ImportChoice> {
    println!("This device already has trades.");
    let picked = Select::new()
        .with_prompt("How should the backup be combined?")
        .items(&[
            "Merge (backup wins on matching trades)",
            "Overwrite local data",
            "Cancel",
        ])
        .default(0)
        .interact_opt()
        .unwrap_or(None);
    match picked {
        Some(0) => Some(ImportChoice::Merge),
        Some(1) => Some(ImportChoice::Overwrite),
        _ => None,
    }
}
