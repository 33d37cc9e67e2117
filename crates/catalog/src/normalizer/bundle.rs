//! Generic compose-bundle folders
//!
//! Layout of a bundle cache:
//! - `<cache>/<bundle>/docker-compose.yml` (or `.yaml`)
//! - optional icon image, `README[.md|.txt|.markdown]`, `screenshot-<n>.<ext>`

use super::{Normalizer, RawCatalog};
use dockyard_common::{Application, ComposeSource, Error, Result, Source};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Accepted compose file names, in preference order
pub const COMPOSE_FILE_NAMES: [&str; 2] = ["docker-compose.yml", "docker-compose.yaml"];

fn image_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\.(png|jpg|jpeg|svg|webp)$").expect("valid regex"))
}

fn readme_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^readme(\.(md|txt|markdown))?$").expect("valid regex"))
}

fn screenshot_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^screenshot-(\d+)\.(png|jpg|jpeg|webp)$").expect("valid regex")
    })
}

/// One bundle folder with a compose document
#[derive(Debug, Clone)]
pub(crate) struct Bundle {
    pub name: String,
    pub dir: PathBuf,
    pub compose_file: String,
}

impl Bundle {
    pub fn compose_path(&self) -> PathBuf {
        self.dir.join(&self.compose_file)
    }

    /// Stable application ID for this bundle
    pub fn app_id(&self, source: &Source) -> String {
        format!("{}-{}", source.id, self.name)
    }
}

/// Immediate subdirectories of `root` that contain a compose file, by name
pub(crate) fn list_bundles(root: &Path) -> Result<Vec<Bundle>> {
    let mut bundles = Vec::new();

    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }

        let dir = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        match COMPOSE_FILE_NAMES
            .iter()
            .find(|candidate| dir.join(candidate).is_file())
        {
            Some(compose_file) => bundles.push(Bundle {
                name,
                dir,
                compose_file: compose_file.to_string(),
            }),
            None => debug!("Skipping folder without compose file: {}", dir.display()),
        }
    }

    bundles.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(bundles)
}

/// Regular file names in `dir`, sorted
pub(crate) fn file_names(dir: &Path) -> Result<Vec<String>> {
    let mut names: Vec<String> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    Ok(names)
}

/// Public URL path of a bundle folder
pub(crate) fn public_path(prefix: &str, source_id: &str, bundle: &str) -> String {
    format!("{}/{}/{}", prefix.trim_end_matches('/'), source_id, bundle)
}

pub(crate) fn expect_bundles(raw: &RawCatalog) -> Result<&Path> {
    match raw {
        RawCatalog::Bundles(root) => Ok(root),
        RawCatalog::Json(_) => Err(Error::CatalogParse(
            "expected a bundle folder, got a JSON payload".to_string(),
        )),
    }
}

/// First image that is not a screenshot, else the first image
pub(crate) fn find_icon(files: &[String]) -> Option<&String> {
    let images: Vec<&String> = files.iter().filter(|f| image_re().is_match(f)).collect();
    images
        .iter()
        .find(|f| !screenshot_re().is_match(f))
        .or(images.first())
        .copied()
}

/// Screenshot files ordered by their embedded number
pub(crate) fn find_screenshots(files: &[String]) -> Vec<&String> {
    let mut shots: Vec<(u64, &String)> = files
        .iter()
        .filter_map(|f| {
            let caps = screenshot_re().captures(f)?;
            let index = caps
                .get(1)
                .and_then(|m| m.as_str().parse::<u64>().ok())
                .unwrap_or(0);
            Some((index, f))
        })
        .collect();
    shots.sort_by_key(|(index, _)| *index);
    shots.into_iter().map(|(_, f)| f).collect()
}

fn read_description(dir: &Path, files: &[String], bundle: &str) -> Option<String> {
    let readme = files.iter().find(|f| readme_re().is_match(f))?;
    match fs::read_to_string(dir.join(readme)) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("Error reading readme for {}: {}", bundle, e);
            None
        }
    }
}

/// Plain compose-bundle folders
pub struct GenericBundleNormalizer {
    public_prefix: String,
}

impl GenericBundleNormalizer {
    pub fn new(public_prefix: String) -> Self {
        Self { public_prefix }
    }

    fn normalize_bundle(&self, source: &Source, bundle: &Bundle) -> Result<Application> {
        let files = file_names(&bundle.dir)?;
        let base = public_path(&self.public_prefix, &source.id, &bundle.name);

        Ok(Application {
            id: bundle.app_id(source),
            source_id: source.id.clone(),
            name: bundle.name.clone(),
            description: read_description(&bundle.dir, &files, &bundle.name),
            icon_url: find_icon(&files).map(|f| format!("{}/{}", base, f)),
            screenshots: find_screenshots(&files)
                .into_iter()
                .map(|f| format!("{}/{}", base, f))
                .collect(),
            compose: ComposeSource::Path(format!("{}/{}", base, bundle.compose_file)),
        })
    }
}

impl Normalizer for GenericBundleNormalizer {
    fn normalize(&self, source: &Source, raw: &RawCatalog) -> Result<Vec<Application>> {
        let root = expect_bundles(raw)?;
        let mut apps = Vec::new();

        for bundle in list_bundles(root)? {
            match self.normalize_bundle(source, &bundle) {
                Ok(app) => apps.push(app),
                Err(e) => warn!("Skipping bundle {}: {}", bundle.name, e),
            }
        }

        Ok(apps)
    }
}
