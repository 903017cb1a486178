use chrono::Local;
use colored::Colorize;
use comfy_table::{Cell, Color, Table};

use crate::cli::{open_for_edit, open_session, parse_date};
use crate::error::{JournalError, Result};
use crate::fmt::outcome;
use crate::models::{Trade, MAIN_ACCOUNT_ID};

/// Optional trade fields shared by `add` and `edit`.
pub struct TradeFields {
    pub amount: Option<f64>,
    pub date: Option<String>,
    pub note: Option<String>,
    pub strategy: Option<String>,
    pub label: Option<String>,
    pub account: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub fn add(fields: TradeFields) -> Result<()> {
    let ctx = open_for_edit()?;
    let date = match &fields.date {
        Some(raw) => parse_date(raw)?,
        None => Local::now().date_naive(),
    };
    let amount = fields
        .amount
        .ok_or_else(|| JournalError::InvalidInput("amount is required".to_string()))?;
    let account_id = match fields.account {
        Some(id) => {
            if ctx.session.read(|j| j.account(&id).is_none()) {
                return Err(JournalError::UnknownAccount(id));
            }
            id
        }
        None => ctx.session.read(|j| {
            j.active_accounts()
                .first()
                .cloned()
                .unwrap_or_else(|| MAIN_ACCOUNT_ID.to_string())
        }),
    };

    let mut trade = Trade::new(date, amount, &account_id);
    trade.note = non_empty(fields.note);
    trade.strategy = non_empty(fields.strategy);
    trade.label = non_empty(fields.label);

    let id = ctx.session.save_trade(trade, None)?;
    println!("Recorded {id}: {} on {date}", outcome(amount));
    ctx.finish()
}

pub fn edit(id: &str, fields: TradeFields) -> Result<()> {
    let ctx = open_for_edit()?;
    let mut trade = ctx
        .session
        .read(|j| j.trade(id).cloned())
        .ok_or_else(|| JournalError::UnknownTrade(id.to_string()))?;

    if let Some(amount) = fields.amount {
        trade.amount = amount;
    }
    if let Some(raw) = &fields.date {
        trade.date = parse_date(raw)?;
    }
    if let Some(account) = fields.account {
        if ctx.session.read(|j| j.account(&account).is_none()) {
            return Err(JournalError::UnknownAccount(account));
        }
        trade.account_id = account;
    }
    if fields.note.is_some() {
        trade.note = non_empty(fields.note);
    }
    if fields.strategy.is_some() {
        trade.strategy = non_empty(fields.strategy);
    }
    if fields.label.is_some() {
        trade.label = non_empty(fields.label);
    }

    ctx.session.save_trade(trade, Some(id))?;
    println!("Updated {id}");
    ctx.finish()
}

pub fn delete(id: &str) -> Result<()> {
    let ctx = open_for_edit()?;
    if !ctx.session.delete_trade(id)? {
        println!("{}", format!("No trade {id}; nothing deleted.").yellow());
    } else {
        println!("Deleted {id}");
    }
    ctx.finish()
}

pub fn list(limit: Option<usize>) -> Result<()> {
    let ctx = open_session()?;
    let trades: Vec<Trade> = ctx.session.read(|j| {
        let active = j.active_accounts();
        j.trades()
            .iter()
            .filter(|t| active.contains(&t.account_id))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    });

    if trades.is_empty() {
        println!("No trades yet. Add one with `tradelog trade add <amount>`.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "Date", "Outcome", "Strategy", "Label", "Account", "Note"]);
    for trade in &trades {
        let color = if trade.amount < 0.0 { Color::Red } else { Color::Green };
        table.add_row(vec![
            Cell::new(&trade.id),
            Cell::new(trade.date),
            Cell::new(outcome(trade.amount)).fg(color),
            Cell::new(trade.strategy.as_deref().unwrap_or("")),
            Cell::new(trade.label.as_deref().unwrap_or("")),
            Cell::new(&trade.account_id),
            Cell::new(trade.note.as_deref().unwrap_or("")),
        ]);
    }
    println!("Trades\n{table}");
    Ok(())
}
