use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not signed in: cloud backup is unavailable while offline")]
    Offline,

    #[error("Remote store error: {0}")]
    Remote(String),

    #[error("Remote write timed out after {0:?}")]
    Timeout(Duration),

    #[error("Import file is not valid JSON: {0}")]
    MalformedImport(String),

    #[error("No import is waiting for a decision")]
    NoPendingImport,

    #[error("No sync conflict is open")]
    NoSyncConflict,

    #[error("Cloud data differs from this device; run `tradelog resolve keep-local` or `tradelog resolve keep-remote`")]
    SyncConflict,

    #[error("At least one account is required")]
    NoAccounts,

    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    #[error("Unknown trade: {0}")]
    UnknownTrade(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Session is closed; restart required")]
    SessionClosed,
}

pub type Result<T> = std::result::Result<T, JournalError>;
