use comfy_table::{Cell, Table};

use crate::cli::{open_for_edit, open_session};
use crate::error::{JournalError, Result};
use crate::fmt::money;
use crate::models::{Account, AccountField};

pub fn list() -> Result<()> {
    let ctx = open_session()?;
    let (accounts, active) = ctx
        .session
        .read(|j| (j.accounts().to_vec(), j.active_accounts().to_vec()));

    let mut table = Table::new();
    table.set_header(vec!["", "ID", "Name", "Starting Balance", "Profit", "Loss"]);
    for account in accounts {
        let marker = if active.contains(&account.id) { "*" } else { "" };
        table.add_row(vec![
            Cell::new(marker),
            Cell::new(&account.id),
            Cell::new(&account.name),
            Cell::new(money(account.initial_capital)),
            Cell::new(&account.profit_color),
            Cell::new(&account.loss_color),
        ]);
    }
    println!("Accounts (* = shown on this device)\n{table}");
    Ok(())
}

pub fn add(id: &str, name: &str, capital: f64) -> Result<()> {
    let ctx = open_for_edit()?;
    let mut accounts = ctx.session.read(|j| j.accounts().to_vec());
    if accounts.iter().any(|a| a.id == id) {
        return Err(JournalError::InvalidInput(format!("account '{id}' already exists")));
    }
    accounts.push(Account {
        id: id.to_string(),
        name: name.to_string(),
        initial_capital: capital,
        ..Account::main()
    });
    ctx.session.replace_accounts(accounts)?;
    println!("Added account: {name}");
    ctx.finish()
}

pub fn set(id: &str, fields: Vec<AccountField>) -> Result<()> {
    if fields.is_empty() {
        return Err(JournalError::InvalidInput("nothing to change".to_string()));
    }
    let ctx = open_for_edit()?;
    for field in fields {
        ctx.session.update_account(id, field)?;
    }
    println!("Updated account {id}");
    ctx.finish()
}

pub fn remove(id: &str) -> Result<()> {
    let ctx = open_for_edit()?;
    let accounts = ctx.session.read(|j| j.accounts().to_vec());
    if !accounts.iter().any(|a| a.id == id) {
        return Err(JournalError::UnknownAccount(id.to_string()));
    }
    let remaining: Vec<Account> = accounts.into_iter().filter(|a| a.id != id).collect();
    ctx.session.replace_accounts(remaining)?;
    println!("Removed account {id}");
    ctx.finish()
}

pub fn select(ids: Vec<String>) -> Result<()> {
    let ctx = open_session()?;
    ctx.session.set_active_accounts(ids)?;
    let active = ctx.session.read(|j| j.active_accounts().join(", "));
    println!("Showing: {active}");
    ctx.finish()
}

pub fn set_loss_color(color: &str) -> Result<()> {
    let color = color.trim();
    if color.is_empty() {
        return Err(JournalError::InvalidInput("color must not be empty".to_string()));
    }
    let ctx = open_for_edit()?;
    ctx.session.set_loss_color(color)?;
    println!("Loss color set to {color}");
    ctx.finish()
}
