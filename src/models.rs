use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{JournalError, Result};

pub const DEFAULT_STRATEGIES: &[&str] = &["動能突破", "急殺抄底", "波段趨勢"];
pub const DEFAULT_LABELS: &[&str] = &["短線", "事件", "產業", "波段"];
pub const DEFAULT_PROFIT_COLOR: &str = "#D05A5A";
pub const DEFAULT_LOSS_COLOR: &str = "#E2E8F0";
pub const MAIN_ACCOUNT_ID: &str = "main";

/// One journaled outcome. Wire names follow the documents already stored
/// remotely (`emotion`, `portfolioId`), so older backups load unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub date: NaiveDate,
    pub amount: f64,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(
        rename = "emotion",
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub label: Option<String>,
    #[serde(rename = "portfolioId", default = "default_account_id")]
    pub account_id: String,
    #[serde(default, deserialize_with = "lenient_timestamp", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Fields written by other clients that this one does not model.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Trade {
    pub fn new(date: NaiveDate, amount: f64, account_id: &str) -> Self {
        Self {
            id: String::new(),
            date,
            amount,
            note: None,
            strategy: None,
            label: None,
            account_id: account_id.to_string(),
            timestamp: None,
            extra: BTreeMap::new(),
        }
    }
}

/// Reject NaN and infinities; JSON cannot carry them, so one would make the
/// stored trade or account list unreadable.
pub fn ensure_finite(what: &str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(JournalError::InvalidInput(format!("{what} must be a finite number, got {value}")))
    }
}

fn default_account_id() -> String {
    MAIN_ACCOUNT_ID.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub initial_capital: f64,
    #[serde(default = "default_profit_color")]
    pub profit_color: String,
    #[serde(default = "default_loss_color")]
    pub loss_color: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Account {
    pub fn main() -> Self {
        Self {
            id: MAIN_ACCOUNT_ID.to_string(),
            name: "Main Account".to_string(),
            initial_capital: 100_000.0,
            profit_color: default_profit_color(),
            loss_color: default_loss_color(),
            extra: BTreeMap::new(),
        }
    }
}

fn default_profit_color() -> String {
    DEFAULT_PROFIT_COLOR.to_string()
}

fn default_loss_color() -> String {
    DEFAULT_LOSS_COLOR.to_string()
}

/// A patchable field of an [`Account`].
#[derive(Debug, Clone, PartialEq)]
pub enum AccountField {
    Name(String),
    InitialCapital(f64),
    ProfitColor(String),
    LossColor(String),
}

impl AccountField {
    pub fn apply(&self, account: &mut Account) {
        match self {
            Self::Name(v) => account.name = v.clone(),
            Self::InitialCapital(v) => account.initial_capital = *v,
            Self::ProfitColor(v) => account.profit_color = v.clone(),
            Self::LossColor(v) => account.loss_color = v.clone(),
        }
    }
}

/// Replicated preferences. Only the loss color is modelled today.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss_color: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Preferences {
    /// The loss color when one is actually set.
    pub fn loss_color(&self) -> Option<&str> {
        self.loss_color.as_deref().filter(|c| !c.is_empty())
    }
}

/// Which of the two tag lists an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Taxonomy {
    Strategies,
    Labels,
}

impl fmt::Display for Taxonomy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strategies => write!(f, "strategy"),
            Self::Labels => write!(f, "label"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Offline,
    Saving,
    Synced,
    Error,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Offline => "offline",
            Self::Saving => "saving",
            Self::Synced => "synced",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// The unit of replication, pushed as a full overwrite of the user's document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub trades: Vec<Trade>,
    pub strategies: Vec<String>,
    #[serde(rename = "emotions")]
    pub labels: Vec<String>,
    #[serde(rename = "portfolios")]
    pub accounts: Vec<Account>,
    pub settings: Preferences,
    pub last_updated: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_id: Option<String>,
}

/// What a user downloads as a backup file: the snapshot without sync fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupDocument {
    pub trades: Vec<Trade>,
    pub strategies: Vec<String>,
    #[serde(rename = "emotions")]
    pub labels: Vec<String>,
    #[serde(rename = "portfolios")]
    pub accounts: Vec<Account>,
    pub settings: Preferences,
}

/// A snapshot-shaped document from outside this process: a remote
/// notification, a point read, or an import file. Every field is optional and
/// a field that fails to parse is treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    #[serde(default, deserialize_with = "lenient_records")]
    pub trades: Option<Vec<Trade>>,
    #[serde(default, deserialize_with = "lenient")]
    pub strategies: Option<Vec<String>>,
    #[serde(rename = "emotions", default, deserialize_with = "lenient")]
    pub labels: Option<Vec<String>>,
    #[serde(rename = "portfolios", default, deserialize_with = "lenient_records")]
    pub accounts: Option<Vec<Account>>,
    #[serde(default, deserialize_with = "lenient")]
    pub settings: Option<Preferences>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient")]
    pub write_id: Option<String>,
}

impl Payload {
    /// Parse an import file. Anything that is not a JSON object is rejected.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| JournalError::MalformedImport(e.to_string()))?;
        if !value.is_object() {
            return Err(JournalError::MalformedImport(
                "expected a JSON object at the top level".to_string(),
            ));
        }
        let unreadable_trades = value
            .get("trades")
            .and_then(Value::as_array)
            .is_some_and(|raw| !raw.is_empty());
        let payload = Self::from_value(value)
            .ok_or_else(|| JournalError::MalformedImport("unreadable document".to_string()))?;
        if unreadable_trades && payload.trades.is_none() {
            return Err(JournalError::MalformedImport(
                "none of the trades in the file could be read".to_string(),
            ));
        }
        Ok(payload)
    }

    /// Interpret a stored document; `None` when it is not an object at all.
    pub fn from_value(value: Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        serde_json::from_value(value).ok()
    }
}

impl From<&Snapshot> for Payload {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            trades: Some(snapshot.trades.clone()),
            strategies: Some(snapshot.strategies.clone()),
            labels: Some(snapshot.labels.clone()),
            accounts: Some(snapshot.accounts.clone()),
            settings: Some(snapshot.settings.clone()),
            last_updated: Some(snapshot.last_updated),
            write_id: snapshot.write_id.clone(),
        }
    }
}

fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// An array read record by record; unreadable records are dropped with a
/// warning. A non-empty array with no readable record counts as absent.
fn lenient_records<'de, D, T>(deserializer: D) -> std::result::Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let Value::Array(raw) = Value::deserialize(deserializer)? else {
        return Ok(None);
    };
    let offered = raw.len();
    let records: Vec<T> = raw
        .into_iter()
        .enumerate()
        .filter_map(|(index, record)| match serde_json::from_value(record) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!(index, error = %e, "dropping unreadable record");
                None
            }
        })
        .collect();
    if offered > 0 && records.is_empty() {
        return Ok(None);
    }
    Ok(Some(records))
}

/// Accepts RFC 3339 strings, epoch milliseconds, or `{seconds, nanoseconds}`
/// objects as written by the hosted document store.
fn lenient_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(parse_timestamp(&value))
}

pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::Object(map) => {
            let secs = map.get("seconds").or_else(|| map.get("_seconds"))?.as_i64()?;
            let nanos = map
                .get("nanoseconds")
                .or_else(|| map.get("_nanoseconds"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            Utc.timestamp_opt(secs, nanos as u32).single()
        }
        _ => None,
    }
}
