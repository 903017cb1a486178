use crate::journal::Journal;

/// Per-account figures over the journal.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountSummary {
    pub account_id: String,
    pub name: String,
    pub trades: usize,
    pub net: f64,
    pub wins: usize,
    pub initial_capital: f64,
}

impl AccountSummary {
    pub fn win_rate(&self) -> Option<f64> {
        (self.trades > 0).then(|| self.wins as f64 / self.trades as f64 * 100.0)
    }

    pub fn balance(&self) -> f64 {
        self.initial_capital + self.net
    }
}

/// One summary per active account, in account-list order.
pub fn active_summaries(journal: &Journal) -> Vec<AccountSummary> {
    let active = journal.active_accounts();
    journal
        .accounts()
        .iter()
        .filter(|a| active.contains(&a.id))
        .map(|account| {
            let mut summary = AccountSummary {
                account_id: account.id.clone(),
                name: account.name.clone(),
                trades: 0,
                net: 0.0,
                wins: 0,
                initial_capital: account.initial_capital,
            };
            for trade in journal.trades().iter().filter(|t| t.account_id == account.id) {
                summary.trades += 1;
                summary.net += trade.amount;
                if trade.amount > 0.0 {
                    summary.wins += 1;
                }
            }
            summary
        })
        .collect()
}
