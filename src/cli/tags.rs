use crate::cli::{open_for_edit, open_session};
use crate::error::Result;
use crate::models::Taxonomy;

pub fn add(which: Taxonomy, name: &str) -> Result<()> {
    let ctx = open_for_edit()?;
    if ctx.session.add_taxonomy_entry(which, name)? {
        println!("Added {which}: {}", name.trim());
    } else {
        println!("{which} '{}' already exists", name.trim());
    }
    ctx.finish()
}

pub fn remove(which: Taxonomy, name: &str) -> Result<()> {
    let ctx = open_for_edit()?;
    if ctx.session.remove_taxonomy_entry(which, name)? {
        println!("Removed {which}: {name}");
    } else {
        println!("No {which} named '{name}'");
    }
    ctx.finish()
}

pub fn list(which: Taxonomy) -> Result<()> {
    let ctx = open_session()?;
    let values = ctx.session.read(|j| j.taxonomy(which).to_vec());
    if values.is_empty() {
        println!("No {which} entries.");
    }
    for value in values {
        println!("{value}");
    }
    Ok(())
}
