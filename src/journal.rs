//! In-memory journal state mirrored to the local store on every write.

use chrono::{DateTime, Utc};

use crate::models::{
    Account, BackupDocument, Preferences, Snapshot, Taxonomy, Trade, DEFAULT_LABELS,
    DEFAULT_LOSS_COLOR, DEFAULT_STRATEGIES,
};
use crate::store::{
    get_json, set_json, LocalStore, ALL_KEYS, KEY_ACCOUNTS, KEY_ACTIVE_ACCOUNTS, KEY_LABELS,
    KEY_LOSS_COLOR, KEY_STRATEGIES, KEY_TRADES,
};

pub fn default_strategies() -> Vec<String> {
    DEFAULT_STRATEGIES.iter().map(|s| s.to_string()).collect()
}

pub fn default_labels() -> Vec<String> {
    DEFAULT_LABELS.iter().map(|s| s.to_string()).collect()
}

pub struct Journal {
    store: Box<dyn LocalStore>,
    trades: Vec<Trade>,
    strategies: Vec<String>,
    labels: Vec<String>,
    accounts: Vec<Account>,
    active_accounts: Vec<String>,
    loss_color: String,
    last_trade_ms: i64,
}

impl Journal {
    /// Load every collection from `store`, seeding defaults for missing keys.
    pub fn load(store: Box<dyn LocalStore>) -> Self {
        let store_ref = store.as_ref();
        let trades = get_json(store_ref, KEY_TRADES, Vec::new());
        let strategies = get_json(store_ref, KEY_STRATEGIES, default_strategies());
        let labels = get_json(store_ref, KEY_LABELS, default_labels());
        let accounts: Vec<Account> = get_json(store_ref, KEY_ACCOUNTS, vec![Account::main()]);
        let active_accounts = get_json(store_ref, KEY_ACTIVE_ACCOUNTS, vec![Account::main().id]);
        let loss_color = get_json(store_ref, KEY_LOSS_COLOR, DEFAULT_LOSS_COLOR.to_string());

        let mut journal = Self {
            store,
            trades,
            strategies,
            labels,
            accounts,
            active_accounts,
            loss_color,
            last_trade_ms: 0,
        };
        if journal.accounts.is_empty() {
            journal.set_accounts(vec![Account::main()]);
        }
        let active = journal.active_accounts.clone();
        journal.select_accounts(active);
        journal
    }

    // -- reads --------------------------------------------------------------

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn trade(&self, id: &str) -> Option<&Trade> {
        self.trades.iter().find(|t| t.id == id)
    }

    pub fn taxonomy(&self, which: Taxonomy) -> &[String] {
        match which {
            Taxonomy::Strategies => &self.strategies,
            Taxonomy::Labels => &self.labels,
        }
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn account(&self, id: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.id == id)
    }

    pub fn account_ids(&self) -> Vec<String> {
        self.accounts.iter().map(|a| a.id.clone()).collect()
    }

    pub fn active_accounts(&self) -> &[String] {
        &self.active_accounts
    }

    pub fn loss_color(&self) -> &str {
        &self.loss_color
    }

    pub fn preferences(&self) -> Preferences {
        Preferences {
            loss_color: Some(self.loss_color.clone()),
            ..Preferences::default()
        }
    }

    pub fn snapshot(&self, now: DateTime<Utc>, write_id: Option<String>) -> Snapshot {
        Snapshot {
            trades: self.trades.clone(),
            strategies: self.strategies.clone(),
            labels: self.labels.clone(),
            accounts: self.accounts.clone(),
            settings: self.preferences(),
            last_updated: now,
            write_id,
        }
    }

    pub fn export_document(&self) -> BackupDocument {
        BackupDocument {
            trades: self.trades.clone(),
            strategies: self.strategies.clone(),
            labels: self.labels.clone(),
            accounts: self.accounts.clone(),
            settings: self.preferences(),
        }
    }

    // -- writes -------------------------------------------------------------

    pub fn set_trades(&mut self, trades: Vec<Trade>) {
        self.trades = trades;
        set_json(self.store.as_mut(), KEY_TRADES, &self.trades);
    }

    pub fn update_trades(&mut self, f: impl FnOnce(Vec<Trade>) -> Vec<Trade>) {
        let prev = std::mem::take(&mut self.trades);
        self.set_trades(f(prev));
    }

    pub fn set_taxonomy(&mut self, which: Taxonomy, values: Vec<String>) {
        match which {
            Taxonomy::Strategies => {
                self.strategies = values;
                set_json(self.store.as_mut(), KEY_STRATEGIES, &self.strategies);
            }
            Taxonomy::Labels => {
                self.labels = values;
                set_json(self.store.as_mut(), KEY_LABELS, &self.labels);
            }
        }
    }

    pub fn update_taxonomy(&mut self, which: Taxonomy, f: impl FnOnce(Vec<String>) -> Vec<String>) {
        let prev = self.taxonomy(which).to_vec();
        self.set_taxonomy(which, f(prev));
    }

    /// Replace the account list. An empty list is replaced by the seed account.
    pub fn set_accounts(&mut self, accounts: Vec<Account>) {
        self.accounts = if accounts.is_empty() {
            vec![Account::main()]
        } else {
            accounts
        };
        set_json(self.store.as_mut(), KEY_ACCOUNTS, &self.accounts);
    }

    pub fn update_accounts(&mut self, f: impl FnOnce(Vec<Account>) -> Vec<Account>) {
        let prev = std::mem::take(&mut self.accounts);
        self.set_accounts(f(prev));
    }

    /// Select accounts by id. Unknown ids are dropped and an empty selection
    /// falls back to the first account.
    pub fn select_accounts(&mut self, ids: Vec<String>) {
        let mut selected: Vec<String> = Vec::new();
        for id in ids {
            if self.account(&id).is_some() && !selected.contains(&id) {
                selected.push(id);
            }
        }
        if selected.is_empty() {
            selected.extend(self.accounts.first().map(|a| a.id.clone()));
        }
        self.active_accounts = selected;
        set_json(self.store.as_mut(), KEY_ACTIVE_ACCOUNTS, &self.active_accounts);
    }

    pub fn set_loss_color(&mut self, color: &str) {
        self.loss_color = color.to_string();
        set_json(self.store.as_mut(), KEY_LOSS_COLOR, &self.loss_color);
    }

    /// A time-based id not used by any trade currently held.
    pub fn next_trade_id(&mut self) -> String {
        let mut ms = Utc::now().timestamp_millis().max(self.last_trade_ms + 1);
        while self.trade(&format!("trade-{ms}")).is_some() {
            ms += 1;
        }
        self.last_trade_ms = ms;
        format!("trade-{ms}")
    }

    // -- lifecycle ----------------------------------------------------------

    /// Factory defaults in memory and in the store.
    pub fn reset_to_defaults(&mut self) {
        self.set_trades(Vec::new());
        self.set_taxonomy(Taxonomy::Strategies, default_strategies());
        self.set_taxonomy(Taxonomy::Labels, default_labels());
        self.set_accounts(vec![Account::main()]);
        self.select_accounts(vec![Account::main().id]);
        self.set_loss_color(DEFAULT_LOSS_COLOR);
    }

    /// Remove every persisted key this client owns.
    pub fn purge_persisted(&mut self) {
        for key in ALL_KEYS {
            if let Err(e) = self.store.remove(key) {
                tracing::warn!(key, error = %e, "could not remove local key");
            }
        }
    }

    /// Remove everything in the local store, known keys or not.
    pub fn clear_store(&mut self) {
        if let Err(e) = self.store.clear() {
            tracing::warn!(error = %e, "could not clear local store");
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &dyn LocalStore {
        self.store.as_ref()
    }
}

/// Factory-default snapshot, as written to remote by a reset.
pub fn factory_snapshot(now: DateTime<Utc>) -> Snapshot {
    Snapshot {
        trades: Vec::new(),
        strategies: default_strategies(),
        labels: default_labels(),
        accounts: vec![Account::main()],
        settings: Preferences {
            loss_color: Some(DEFAULT_LOSS_COLOR.to_string()),
            ..Preferences::default()
        },
        last_updated: now,
        write_id: None,
    }
}
