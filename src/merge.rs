//! Import and sync conflict policies over the journal.

use std::collections::HashMap;

use crate::journal::Journal;
use crate::models::{Account, Payload, Taxonomy, Trade};

/// How a pending import is folded into local data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportChoice {
    Merge,
    Overwrite,
}

/// How an open sync conflict is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncChoice {
    /// Keep local data and overwrite the remote document with it.
    KeepLocal,
    /// Throw away local data and adopt the remote document.
    KeepRemote,
}

/// Replace each local collection the payload carries. Absent fields are left
/// untouched.
pub fn apply_overwrite(journal: &mut Journal, payload: &Payload) {
    if let Some(trades) = &payload.trades {
        journal.set_trades(trades.clone());
    }
    if let Some(strategies) = &payload.strategies {
        journal.set_taxonomy(Taxonomy::Strategies, strategies.clone());
    }
    if let Some(labels) = &payload.labels {
        journal.set_taxonomy(Taxonomy::Labels, labels.clone());
    }
    if let Some(accounts) = &payload.accounts {
        journal.set_accounts(accounts.clone());
        journal.select_accounts(ids_of(accounts));
    }
    if let Some(color) = payload.settings.as_ref().and_then(|s| s.loss_color()) {
        journal.set_loss_color(color);
    }
}

/// Fold the payload into local data, payload winning on identity collisions.
pub fn apply_merge(journal: &mut Journal, payload: &Payload) {
    if let Some(incoming) = &payload.trades {
        journal.update_trades(|local| merge_trades(local, incoming));
    }
    if let Some(incoming) = &payload.strategies {
        journal.update_taxonomy(Taxonomy::Strategies, |local| union_tags(local, incoming));
    }
    if let Some(incoming) = &payload.labels {
        journal.update_taxonomy(Taxonomy::Labels, |local| union_tags(local, incoming));
    }
    if let Some(incoming) = &payload.accounts {
        let mut active = journal.active_accounts().to_vec();
        journal.update_accounts(|local| merge_accounts(local, incoming));
        for id in ids_of(incoming) {
            if !active.contains(&id) {
                active.push(id);
            }
        }
        journal.select_accounts(active);
    }
    if let Some(color) = payload.settings.as_ref().and_then(|s| s.loss_color()) {
        journal.set_loss_color(color);
    }
}

/// Take the remote document wholesale: trades, both tag lists and accounts
/// are replaced (absent means empty), and every remote account is selected.
pub fn adopt_remote(journal: &mut Journal, remote: &Payload) {
    journal.set_trades(remote.trades.clone().unwrap_or_default());
    journal.set_taxonomy(Taxonomy::Strategies, remote.strategies.clone().unwrap_or_default());
    journal.set_taxonomy(Taxonomy::Labels, remote.labels.clone().unwrap_or_default());
    let accounts = remote.accounts.clone().unwrap_or_default();
    journal.set_accounts(accounts);
    let ids = journal.account_ids();
    journal.select_accounts(ids);
    if let Some(color) = remote.settings.as_ref().and_then(|s| s.loss_color()) {
        journal.set_loss_color(color);
    }
}

/// Identity-keyed union: local first, incoming on top, sorted newest first
/// with ties broken by descending id.
pub fn merge_trades(local: Vec<Trade>, incoming: &[Trade]) -> Vec<Trade> {
    let mut by_id: HashMap<String, Trade> = local.into_iter().map(|t| (t.id.clone(), t)).collect();
    for trade in incoming {
        by_id.insert(trade.id.clone(), trade.clone());
    }
    let mut merged: Vec<Trade> = by_id.into_values().collect();
    merged.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| b.id.cmp(&a.id)));
    merged
}

/// Local order kept, unseen incoming tags appended.
pub fn union_tags(mut local: Vec<String>, incoming: &[String]) -> Vec<String> {
    let mut seen = Vec::with_capacity(local.len());
    local.retain(|tag| {
        if seen.contains(tag) {
            false
        } else {
            seen.push(tag.clone());
            true
        }
    });
    for tag in incoming {
        if !local.contains(tag) {
            local.push(tag.clone());
        }
    }
    local
}

/// Accounts combined by id; an incoming account replaces the local one in
/// place, new accounts are appended.
pub fn merge_accounts(mut local: Vec<Account>, incoming: &[Account]) -> Vec<Account> {
    for account in incoming {
        match local.iter_mut().find(|a| a.id == account.id) {
            Some(existing) => *existing = account.clone(),
            None => local.push(account.clone()),
        }
    }
    local
}

/// Active selection after the account list is replaced: everything when the
/// new id set strictly grows the old one, otherwise the surviving selection,
/// otherwise the first new account.
pub fn reconcile_active_accounts(
    old_ids: &[String],
    previous_active: &[String],
    new_ids: &[String],
) -> Vec<String> {
    let grew = new_ids.len() > old_ids.len() && old_ids.iter().all(|id| new_ids.contains(id));
    if grew {
        return new_ids.to_vec();
    }
    let surviving: Vec<String> = previous_active
        .iter()
        .filter(|id| new_ids.contains(id))
        .cloned()
        .collect();
    if surviving.is_empty() {
        new_ids.first().cloned().into_iter().collect()
    } else {
        surviving
    }
}

fn ids_of(accounts: &[Account]) -> Vec<String> {
    accounts.iter().map(|a| a.id.clone()).collect()
}
