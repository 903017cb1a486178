pub mod accounts;
pub mod export;
pub mod import;
pub mod init;
pub mod login;
pub mod reset;
pub mod status;
pub mod sync;
pub mod tags;
pub mod trades;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;

use crate::auth::LocalAuth;
use crate::engine::Session;
use crate::error::{JournalError, Result};
use crate::journal::Journal;
use crate::merge::{ImportChoice, SyncChoice};
use crate::models::SyncStatus;
use crate::remote::DirRemote;
use crate::settings::{load_settings, Settings};
use crate::store::SqliteStore;

#[derive(Parser)]
#[command(name = "tradelog", version, about = "Local-first trading journal with cloud backup.")]
pub struct Cli {
    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,
    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Set up tradelog: choose a data directory and create the journal.
    Init {
        /// Path for tradelog data (default: ~/Documents/tradelog)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
        /// Directory acting as the cloud document store
        #[arg(long = "remote-dir")]
        remote_dir: Option<String>,
    },
    /// Sign in; an empty journal is restored from the cloud copy.
    Login {
        /// Account id used for the cloud document
        #[arg(long)]
        user: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        /// Sign in as a guest
        #[arg(long)]
        guest: bool,
    },
    /// Sign out and clear local data. The cloud copy is kept.
    Logout,
    /// Record and manage trades.
    Trade {
        #[command(subcommand)]
        command: TradeCommands,
    },
    /// Manage the strategy list.
    Strategy {
        #[command(subcommand)]
        command: TagCommands,
    },
    /// Manage the label list.
    Label {
        #[command(subcommand)]
        command: TagCommands,
    },
    /// Manage accounts.
    Account {
        #[command(subcommand)]
        command: AccountCommands,
    },
    /// Set the global loss color.
    Color {
        /// Any CSS color, e.g. '#E2E8F0'
        value: String,
    },
    /// Import a backup file.
    Import {
        /// Path to a JSON backup
        file: String,
        /// How to combine with existing trades (asked interactively if omitted)
        #[arg(long, value_enum)]
        resolve: Option<ImportResolution>,
    },
    /// Export the journal as a JSON backup.
    Export {
        /// Output path (default: <data_dir>/backups/tradelog-backup-YYYYMMDD-HHMMSS.json)
        #[arg(long)]
        output: Option<String>,
    },
    /// Push the journal to the cloud now.
    Sync,
    /// Check the cloud copy against this device.
    Pull,
    /// Settle a sync conflict.
    Resolve {
        #[arg(value_enum)]
        choice: SyncResolution,
    },
    /// Erase all data, in the cloud and on this device.
    Reset {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Show settings, sync state and account summaries.
    Status,
    /// Print shell completions.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
pub enum TradeCommands {
    /// Record a trade.
    Add {
        /// Realized outcome; negative for a loss
        #[arg(allow_hyphen_values = true, value_parser = parse_finite)]
        amount: f64,
        /// Trade date: YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        note: Option<String>,
        #[arg(long)]
        strategy: Option<String>,
        #[arg(long)]
        label: Option<String>,
        /// Account id (default: first active account)
        #[arg(long)]
        account: Option<String>,
    },
    /// Change fields of an existing trade.
    Edit {
        /// Trade ID (shown in `tradelog trade list`)
        id: String,
        #[arg(long, allow_hyphen_values = true, value_parser = parse_finite)]
        amount: Option<f64>,
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        note: Option<String>,
        #[arg(long)]
        strategy: Option<String>,
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        account: Option<String>,
    },
    /// Delete a trade.
    Delete {
        id: String,
    },
    /// List trades in the active accounts.
    List {
        /// Show at most this many trades
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Subcommand)]
pub enum TagCommands {
    Add { name: String },
    Remove { name: String },
    List,
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// List all accounts.
    List,
    /// Add an account.
    Add {
        /// Short id, e.g. 'swing'
        id: String,
        #[arg(long)]
        name: String,
        /// Starting balance
        #[arg(long, default_value = "0", value_parser = parse_finite)]
        capital: f64,
    },
    /// Change account fields.
    Set {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, value_parser = parse_finite)]
        capital: Option<f64>,
        #[arg(long = "profit-color")]
        profit_color: Option<String>,
        #[arg(long = "loss-color")]
        loss_color: Option<String>,
    },
    /// Remove an account. Its trades are kept.
    Remove { id: String },
    /// Choose which accounts are shown on this device.
    Select {
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ImportResolution {
    Merge,
    Overwrite,
}

impl From<ImportResolution> for ImportChoice {
    fn from(r: ImportResolution) -> Self {
        match r {
            ImportResolution::Merge => ImportChoice::Merge,
            ImportResolution::Overwrite => ImportChoice::Overwrite,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum SyncResolution {
    KeepLocal,
    KeepRemote,
}

impl From<SyncResolution> for SyncChoice {
    fn from(r: SyncResolution) -> Self {
        match r {
            SyncResolution::KeepLocal => SyncChoice::KeepLocal,
            SyncResolution::KeepRemote => SyncChoice::KeepRemote,
        }
    }
}

// ---------------------------------------------------------------------------
// Session helpers
// ---------------------------------------------------------------------------

/// An open journal plus the settings it was opened with.
pub(crate) struct Context {
    pub settings: Settings,
    pub session: Session,
}

impl Context {
    fn settle_timeout(&self) -> Duration {
        self.settings.sync_config().push_timeout * 2 + Duration::from_secs(1)
    }

    /// Wait for scheduled pushes, then report a failed backup.
    pub fn finish(self) -> Result<()> {
        if !self.session.wait_idle(self.settle_timeout()) {
            tracing::warn!("cloud backup still running at exit");
        }
        if self.session.status() == SyncStatus::Error {
            eprintln!(
                "{}",
                "Cloud backup failed; changes are saved locally. Run `tradelog sync` to retry.".yellow()
            );
        }
        Ok(())
    }
}

pub(crate) fn open_session() -> Result<Context> {
    let settings = load_settings();
    let auth = Arc::new(LocalAuth::new(settings.identity()));
    open_with_auth(settings, auth)
}

/// Open with the configured profile still signing in; the caller finishes
/// with [`Session::login`].
pub(crate) fn open_signing_in() -> Result<Context> {
    let settings = load_settings();
    let auth = Arc::new(LocalAuth::pending(settings.identity()));
    open_with_auth(settings, auth)
}

fn open_with_auth(settings: Settings, auth: Arc<LocalAuth>) -> Result<Context> {
    let db_path = settings.db_path();
    if !db_path.exists() {
        return Err(JournalError::Settings(
            "no journal found; run `tradelog init` first".to_string(),
        ));
    }
    let journal = Journal::load(Box::new(SqliteStore::open(&db_path)?));
    let remote = Arc::new(DirRemote::new(Path::new(&settings.remote_dir)));
    let session = Session::new(journal, remote, auth, settings.sync_config())?;
    let ctx = Context { settings, session };
    // Let the initial remote delivery land before anything reads state.
    ctx.session.wait_idle(ctx.settle_timeout());
    Ok(ctx)
}

/// Open for a command that changes data; refuses while cloud and local
/// data disagree so a push cannot silently overwrite the other side.
pub(crate) fn open_for_edit() -> Result<Context> {
    let ctx = open_session()?;
    if ctx.session.sync_conflict_open() {
        return Err(JournalError::SyncConflict);
    }
    Ok(ctx)
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| JournalError::InvalidInput(format!("date '{raw}' is not YYYY-MM-DD")))
}

fn parse_finite(raw: &str) -> std::result::Result<f64, String> {
    let value: f64 = raw.parse().map_err(|_| format!("'{raw}' is not a number"))?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(format!("'{raw}' is not a finite number"))
    }
}

pub(crate) fn data_dir(settings: &Settings) -> PathBuf {
    PathBuf::from(&settings.data_dir)
}
