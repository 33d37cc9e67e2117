//! File-backed registry of catalog sources
//!
//! The registry keeps the ordered list of sources in memory and rewrites
//! `sources.json` wholesale after every mutation.

use crate::persist::write_json_atomic;
use dockyard_common::{Error, Result, Source};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Storage backend for registered sources
pub struct SourceRegistry {
    path: PathBuf,
    sources: RwLock<Vec<Source>>,
}

impl SourceRegistry {
    /// Open the registry file, starting empty if it is missing or unreadable
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let sources = load_sources(&path);

        info!(
            "Loaded {} source(s) from {}",
            sources.len(),
            path.display()
        );

        Self {
            path,
            sources: RwLock::new(sources),
        }
    }

    /// All sources, in registration order
    pub async fn list(&self) -> Vec<Source> {
        self.sources.read().await.clone()
    }

    /// Get a source by ID
    pub async fn get(&self, id: &str) -> Option<Source> {
        self.sources
            .read()
            .await
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }

    /// Register a new source; URLs must be unique
    pub async fn add(&self, source: Source) -> Result<()> {
        let mut sources = self.sources.write().await;

        if sources.iter().any(|s| s.url == source.url) {
            return Err(Error::DuplicateSource(source.url));
        }

        let mut updated = sources.clone();
        updated.push(source);
        write_json_atomic(&self.path, &updated)?;
        *sources = updated;

        debug!("Registry now holds {} source(s)", sources.len());
        Ok(())
    }

    /// Replace a stored source with the same ID
    /// Returns Ok(false) if no such source exists
    pub async fn update(&self, source: &Source) -> Result<bool> {
        let mut sources = self.sources.write().await;

        let Some(index) = sources.iter().position(|s| s.id == source.id) else {
            return Ok(false);
        };

        let mut updated = sources.clone();
        updated[index] = source.clone();
        write_json_atomic(&self.path, &updated)?;
        *sources = updated;

        Ok(true)
    }

    /// Remove a source by ID
    /// Returns Ok(false) if no such source exists
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let mut sources = self.sources.write().await;

        let updated: Vec<Source> = sources.iter().filter(|s| s.id != id).cloned().collect();
        if updated.len() == sources.len() {
            return Ok(false);
        }

        write_json_atomic(&self.path, &updated)?;
        *sources = updated;

        info!("Removed source: {}", id);
        Ok(true)
    }
}

fn load_sources(path: &Path) -> Vec<Source> {
    if !path.exists() {
        return Vec::new();
    }

    match std::fs::read_to_string(path) {
        Ok(data) => match serde_json::from_str(&data) {
            Ok(sources) => sources,
            Err(e) => {
                warn!("Error parsing sources file {}: {}", path.display(), e);
                Vec::new()
            }
        },
        Err(e) => {
            warn!("Error reading sources file {}: {}", path.display(), e);
            Vec::new()
        }
    }
}
