//! On-disk deployment history
//!
//! Layout under the deploy root:
//! - `<app>/docker-compose.yml` (legacy, unversioned)
//! - `<app>/<timestamp>/docker-compose.yml`
//! - `<app>/<timestamp>/app-details.json`
//!
//! Timestamps share one fixed-width format, so the newest version is the
//! lexicographically greatest directory name.

use chrono::{DateTime, Duration, Utc};
use dockyard_common::{Application, Error, KeyedLocks, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::OwnedMutexGuard;
use tracing::{info, warn};

pub const COMPOSE_FILE: &str = "docker-compose.yml";
pub const DETAILS_FILE: &str = "app-details.json";

const VERSION_FORMAT: &str = "%Y-%m-%dT%H-%M-%S-%3fZ";

/// Replace everything outside `[A-Za-z0-9_-]` with `_`
pub fn sanitize_app_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Orchestrator project name for an app, shared by all of its versions
pub fn project_name(name: &str) -> String {
    sanitize_app_name(name).to_lowercase()
}

/// Directory name for a version created at `at`
pub fn version_name(at: DateTime<Utc>) -> String {
    at.format(VERSION_FORMAT).to_string()
}

/// Parse a version directory name back into its timestamp
pub fn parse_version(name: &str) -> Option<DateTime<Utc>> {
    // YYYY-MM-DDTHH-MM-SS-mmmZ
    if name.len() != 24 || !name.is_ascii() || !name.ends_with('Z') {
        return None;
    }
    let rfc3339 = format!(
        "{}T{}.{}Z",
        &name[0..10],
        name[11..19].replace('-', ":"),
        &name[20..23]
    );
    DateTime::parse_from_rfc3339(&rfc3339)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}

fn subdirectories(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .collect()
}

/// Directory holding the current deployment of an app, if any
///
/// A compose file directly in `base` wins; otherwise the greatest
/// subdirectory name that holds a compose file.
pub fn resolve_latest(base: &Path) -> Option<PathBuf> {
    if base.join(COMPOSE_FILE).is_file() {
        return Some(base.to_path_buf());
    }

    let mut names = subdirectories(base);
    names.sort_by(|a, b| b.cmp(a));
    names
        .into_iter()
        .map(|name| base.join(name))
        .find(|dir| dir.join(COMPOSE_FILE).is_file())
}

/// Create a new version directory that sorts after every existing one
pub fn create_version(base: &Path) -> Result<PathBuf> {
    fs::create_dir_all(base)?;

    let mut at = Utc::now();
    if let Some(latest) = subdirectories(base)
        .iter()
        .filter_map(|name| parse_version(name))
        .max()
    {
        if version_name(at) <= version_name(latest) {
            at = latest + Duration::milliseconds(1);
        }
    }

    let name = version_name(at);
    let shadowing = subdirectories(base)
        .into_iter()
        .filter(|other| parse_version(other).is_none() && other.as_str() > name.as_str())
        .find(|other| base.join(other).join(COMPOSE_FILE).is_file());
    if let Some(other) = shadowing {
        return Err(Error::VersionShadowed(base.join(other).display().to_string()));
    }

    let dir = base.join(name);
    fs::create_dir(&dir)?;
    Ok(dir)
}

/// The resolved current deployment of one app
#[derive(Debug, Clone, Serialize)]
pub struct Deployment {
    /// Sanitized app name
    pub app_name: String,

    /// Version directory name; absent for the legacy layout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    pub directory: PathBuf,

    pub compose_file: PathBuf,
}

impl Deployment {
    fn at(app_name: String, base: &Path, directory: PathBuf) -> Self {
        let version = if directory == base {
            None
        } else {
            directory
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
        };
        Self {
            app_name,
            version,
            compose_file: directory.join(COMPOSE_FILE),
            directory,
        }
    }
}

/// One directory under the deploy root
#[derive(Debug, Clone, Serialize)]
pub struct InstalledApp {
    pub name: String,

    pub path: PathBuf,

    /// Whether a current deployment resolves
    pub valid: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Application record snapshot taken at install time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Application>,
}

/// Owns the deployment tree and the per-app locks guarding it
pub struct DeploymentStore {
    root: PathBuf,
    locks: KeyedLocks,
}

impl DeploymentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: KeyedLocks::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Base directory of an app
    pub fn app_dir(&self, name: &str) -> Result<PathBuf> {
        let sanitized = sanitize_app_name(name);
        if sanitized.is_empty() {
            return Err(Error::InvalidAppName(name.to_string()));
        }
        Ok(self.root.join(sanitized))
    }

    /// Hold the advisory lock for one app
    pub async fn lock_app(&self, name: &str) -> OwnedMutexGuard<()> {
        self.locks.lock(&sanitize_app_name(name)).await
    }

    /// Resolve the current deployment of an app
    pub fn current(&self, name: &str) -> Result<Deployment> {
        let base = self.app_dir(name)?;
        let directory =
            resolve_latest(&base).ok_or_else(|| Error::DeploymentNotFound(name.to_string()))?;
        Ok(Deployment::at(sanitize_app_name(name), &base, directory))
    }

    /// Write a new version of an app
    pub async fn install(&self, app: &Application, compose: &str) -> Result<Deployment> {
        let base = self.app_dir(&app.name)?;
        let _guard = self.lock_app(&app.name).await;

        let directory = create_version(&base)?;
        tokio::fs::write(directory.join(COMPOSE_FILE), compose).await?;
        tokio::fs::write(
            directory.join(DETAILS_FILE),
            serde_json::to_vec_pretty(app)?,
        )
        .await?;

        info!("Installed {} into {}", app.name, directory.display());
        Ok(Deployment::at(sanitize_app_name(&app.name), &base, directory))
    }

    /// Every app directory under the root, by name
    pub fn list_installed(&self) -> Result<Vec<InstalledApp>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut names = subdirectories(&self.root);
        names.sort();

        let mut apps = Vec::with_capacity(names.len());
        for name in names {
            let path = self.root.join(&name);
            let current = resolve_latest(&path).map(|dir| Deployment::at(name.clone(), &path, dir));
            let details = current
                .as_ref()
                .and_then(|deployment| read_details(&deployment.directory));

            apps.push(InstalledApp {
                valid: current.is_some(),
                version: current.and_then(|deployment| deployment.version),
                details,
                name,
                path,
            });
        }

        Ok(apps)
    }

    pub async fn read_compose(&self, name: &str) -> Result<String> {
        let deployment = self.current(name)?;
        Ok(tokio::fs::read_to_string(&deployment.compose_file).await?)
    }

    /// Overwrite the current deployment's compose file
    pub async fn write_compose(&self, name: &str, content: &str) -> Result<Deployment> {
        let _guard = self.lock_app(name).await;
        let deployment = self.current(name)?;
        tokio::fs::write(&deployment.compose_file, content).await?;
        info!("Updated compose file {}", deployment.compose_file.display());
        Ok(deployment)
    }

    /// Delete an app's whole history; `Ok(false)` if there was none
    pub async fn remove_all(&self, name: &str) -> Result<bool> {
        let base = self.app_dir(name)?;
        let _guard = self.lock_app(name).await;
        delete_base(&base).await
    }
}

pub(crate) async fn delete_base(base: &Path) -> Result<bool> {
    if !base.exists() {
        return Ok(false);
    }
    tokio::fs::remove_dir_all(base).await?;
    info!("Removed deployment directory {}", base.display());
    Ok(true)
}

fn read_details(dir: &Path) -> Option<Application> {
    let path = dir.join(DETAILS_FILE);
    let data = fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&data) {
        Ok(app) => Some(app),
        Err(e) => {
            warn!("Ignoring unreadable {}: {}", path.display(), e);
            None
        }
    }
}
