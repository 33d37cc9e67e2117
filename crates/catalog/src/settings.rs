//! Operator settings, including the template token dictionary
//!
//! Stored values are merged over built-in defaults, so a partial
//! `settings.json` still yields a complete token table.

use crate::persist::write_json_atomic;
use dockyard_common::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Token prefix used by declarative templates for host-side placeholders
pub const TOKEN_PREFIX: char = '!';

const DEFAULT_TOKENS: &[(&str, &str)] = &[
    ("!PUID", "1000"),
    ("!PGID", "1000"),
    ("!TZ", "Etc/UTC"),
    ("!config", "./config"),
    ("!downloads", "./downloads"),
    ("!music", "./music"),
    ("!movies", "./movies"),
    ("!tv", "./tv"),
    ("!books", "./books"),
    ("!comics", "./comics"),
    ("!podcasts", "./podcasts"),
];

/// Operator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Token -> value substitutions for declarative templates
    #[serde(default)]
    pub template_tokens: BTreeMap<String, String>,

    /// Refuse installs onto this host
    #[serde(default)]
    pub disable_save_to_server: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            template_tokens: DEFAULT_TOKENS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            disable_save_to_server: false,
        }
    }
}

impl Settings {
    /// Overlay stored values on the defaults
    fn merged_with_defaults(self) -> Self {
        let mut merged = Settings::default();
        merged.template_tokens.extend(self.template_tokens);
        merged.disable_save_to_server = self.disable_save_to_server;
        merged
    }
}

/// File-backed settings store
pub struct SettingsStore {
    path: PathBuf,
    settings: RwLock<Settings>,
}

impl SettingsStore {
    /// Open the settings file, falling back to defaults
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = load_settings(&path);
        Self {
            path,
            settings: RwLock::new(settings),
        }
    }

    /// Current settings
    pub async fn get(&self) -> Settings {
        self.settings.read().await.clone()
    }

    /// Snapshot of the token dictionary
    pub async fn template_tokens(&self) -> HashMap<String, String> {
        self.settings
            .read()
            .await
            .template_tokens
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Replace the settings and persist them
    pub async fn save(&self, settings: Settings) -> Result<Settings> {
        let merged = settings.merged_with_defaults();

        let mut current = self.settings.write().await;
        write_json_atomic(&self.path, &merged)?;
        *current = merged.clone();

        info!("Saved settings to {}", self.path.display());
        Ok(merged)
    }
}

fn load_settings(path: &Path) -> Settings {
    if !path.exists() {
        return Settings::default();
    }

    let parsed = std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|data| serde_json::from_str::<Settings>(&data).map_err(|e| e.to_string()));

    match parsed {
        Ok(settings) => settings.merged_with_defaults(),
        Err(e) => {
            warn!("Error loading settings from {}: {}", path.display(), e);
            Settings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::open(dir.path().join("settings.json"));

        let tokens = store.template_tokens().await;
        assert_eq!(tokens.get("!config").map(String::as_str), Some("./config"));
        assert_eq!(tokens.get("!PUID").map(String::as_str), Some("1000"));
        assert!(!store.get().await.disable_save_to_server);
    }

    #[tokio::test]
    async fn test_partial_file_merges_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"template_tokens": {"!config": "/srv/cfg"}}"#).unwrap();

        let store = SettingsStore::open(&path);
        let tokens = store.template_tokens().await;
        assert_eq!(tokens.get("!config").map(String::as_str), Some("/srv/cfg"));
        assert_eq!(tokens.get("!TZ").map(String::as_str), Some("Etc/UTC"));
    }

    #[tokio::test]
    async fn test_save_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::open(&path);

        let mut settings = store.get().await;
        settings.disable_save_to_server = true;
        settings
            .template_tokens
            .insert("!media".to_string(), "/mnt/media".to_string());
        store.save(settings).await.unwrap();

        let reopened = SettingsStore::open(&path).get().await;
        assert!(reopened.disable_save_to_server);
        assert_eq!(
            reopened.template_tokens.get("!media").map(String::as_str),
            Some("/mnt/media")
        );
    }
}
