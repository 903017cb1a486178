use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::Identity;
use crate::error::{JournalError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub data_dir: String,
    #[serde(default = "default_remote_dir")]
    pub remote_dir: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub is_guest: bool,
    #[serde(default = "default_push_timeout_secs")]
    pub push_timeout_secs: u64,
    #[serde(default = "default_echo_grace_secs")]
    pub echo_grace_secs: u64,
}

fn default_push_timeout_secs() -> u64 {
    15
}

fn default_echo_grace_secs() -> u64 {
    5
}

fn default_remote_dir() -> String {
    default_data_dir().join("cloud").to_string_lossy().to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().to_string_lossy().to_string(),
            remote_dir: default_remote_dir(),
            user_id: String::new(),
            display_name: String::new(),
            email: String::new(),
            is_guest: false,
            push_timeout_secs: default_push_timeout_secs(),
            echo_grace_secs: default_echo_grace_secs(),
        }
    }
}

impl Settings {
    /// The signed-in identity, if any.
    pub fn identity(&self) -> Option<Identity> {
        if self.user_id.is_empty() {
            return None;
        }
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Some(Identity {
            is_guest: self.is_guest,
            display_name: non_empty(&self.display_name),
            email: non_empty(&self.email),
            ..Identity::new(&self.user_id)
        })
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            push_timeout: Duration::from_secs(self.push_timeout_secs.max(1)),
            echo_grace: Duration::from_secs(self.echo_grace_secs),
            ..SyncConfig::default()
        }
    }

    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("tradelog.db")
    }
}

/// Tuning knobs for the replication engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Upper bound on a single remote write.
    pub push_timeout: Duration,
    /// A remote write-time this close to our own last push is taken as its echo.
    pub echo_grace: Duration,
    /// How many of our own recent write ids are remembered.
    pub write_id_memory: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            push_timeout: Duration::from_secs(default_push_timeout_secs()),
            echo_grace: Duration::from_secs(default_echo_grace_secs()),
            write_id_memory: 16,
        }
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("tradelog")
}

fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Documents")
        .join("tradelog")
}

pub fn load_settings() -> Settings {
    let path = settings_path();
    if path.exists() {
        let content = std::fs::read_to_string(&path).unwrap_or_default();
        serde_json::from_str(&content).unwrap_or_default()
    } else {
        Settings::default()
    }
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir)?;
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| JournalError::Settings(e.to_string()))?;
    std::fs::write(settings_path(), format!("{json}\n"))?;
    Ok(())
}

pub fn shellexpand_path(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| PathBuf::from(path))
        .to_string_lossy()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_merges_with_defaults() {
        let json = r#"{"data_dir": "/tmp/test", "user_id": "u1"}"#;
        let s: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(s.push_timeout_secs, 15);
        assert_eq!(s.echo_grace_secs, 5);
        assert!(!s.remote_dir.is_empty());
        assert_eq!(s.identity().unwrap().id, "u1");
    }

    #[test]
    fn test_no_identity_when_logged_out() {
        let s = Settings::default();
        assert!(s.identity().is_none());
    }

    #[test]
    fn test_sync_config_from_settings() {
        let s = Settings {
            push_timeout_secs: 0,
            echo_grace_secs: 9,
            ..Settings::default()
        };
        let config = s.sync_config();
        assert_eq!(config.push_timeout, Duration::from_secs(1));
        assert_eq!(config.echo_grace, Duration::from_secs(9));
    }

    #[test]
    fn test_identity_keeps_optional_profile_fields() {
        let s = Settings {
            user_id: "u1".to_string(),
            display_name: "Ada".to_string(),
            ..Settings::default()
        };
        let identity = s.identity().unwrap();
        assert_eq!(identity.display_name.as_deref(), Some("Ada"));
        assert!(identity.email.is_none());
    }
}
