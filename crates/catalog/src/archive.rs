//! Safe ZIP extraction into the bundle cache
//!
//! Every entry is resolved lexically under the destination directory before
//! anything is written. Entries that would land outside it are skipped and
//! reported, the rest of the archive still extracts.

use dockyard_common::{Error, Result};
use std::fs;
use std::io::{self, Cursor, Read};
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};
use zip::ZipArchive;

/// Folder that holds the app bundles inside a catalog archive
pub const APPS_FOLDER: &str = "Apps";

/// Default ceiling on total uncompressed bytes (512 MiB)
pub const DEFAULT_MAX_EXTRACT_BYTES: u64 = 512 * 1024 * 1024;

/// Outcome of one extraction
#[derive(Debug, Default, Clone)]
pub struct ExtractReport {
    /// Regular files written
    pub files_written: usize,

    /// Entry names refused because they escape the destination
    pub skipped: Vec<String>,
}

/// Resolve an archive entry name under `dest`
///
/// Fails with `ZipSlipDetected` for absolute names or names that climb
/// above `dest` through `..` components.
pub fn safe_entry_path(dest: &Path, entry_name: &str) -> Result<PathBuf> {
    let normalized = entry_name.replace('\\', "/");
    let mut relative = PathBuf::new();

    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !relative.pop() {
                    return Err(Error::ZipSlipDetected(entry_name.to_string()));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::ZipSlipDetected(entry_name.to_string()));
            }
        }
    }

    if relative.as_os_str().is_empty() {
        return Err(Error::Archive(format!(
            "entry '{}' does not name a path",
            entry_name
        )));
    }

    Ok(dest.join(relative))
}

/// Extract `bytes` into `dest`, bounded by `max_bytes` uncompressed
pub fn extract(bytes: &[u8], dest: &Path, max_bytes: u64) -> Result<ExtractReport> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).map_err(|e| Error::Archive(e.to_string()))?;

    fs::create_dir_all(dest)?;

    let mut report = ExtractReport::default();
    let mut total: u64 = 0;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| Error::Archive(e.to_string()))?;
        let name = entry.name().to_string();

        let target = match safe_entry_path(dest, &name) {
            Ok(target) => target,
            Err(Error::ZipSlipDetected(entry_name)) => {
                warn!("Skipping archive entry outside destination: {}", entry_name);
                report.skipped.push(entry_name);
                continue;
            }
            Err(e) => {
                warn!("Skipping archive entry '{}': {}", name, e);
                continue;
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let remaining = max_bytes.saturating_sub(total);
        let mut out = fs::File::create(&target)?;
        let written = io::copy(&mut (&mut entry).take(remaining + 1), &mut out)?;
        total += written;

        if total > max_bytes {
            return Err(Error::SizeLimitExceeded { limit: max_bytes });
        }

        report.files_written += 1;
    }

    Ok(report)
}

/// Find the `Apps` folder at the root or inside one wrapper directory
pub fn locate_apps_folder(root: &Path) -> Result<PathBuf> {
    let direct = root.join(APPS_FOLDER);
    if direct.is_dir() {
        return Ok(direct);
    }

    let mut wrappers: Vec<PathBuf> = fs::read_dir(root)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|entry| entry.path())
        .collect();
    wrappers.sort();

    wrappers
        .into_iter()
        .map(|wrapper| wrapper.join(APPS_FOLDER))
        .find(|candidate| candidate.is_dir())
        .ok_or(Error::NoAppsFolderFound)
}

/// Extracts source archives into per-source cache directories
#[derive(Debug, Clone)]
pub struct ArchiveExtractor {
    storage_root: PathBuf,
    max_extract_bytes: u64,
}

impl ArchiveExtractor {
    pub fn new(storage_root: impl Into<PathBuf>, max_extract_bytes: u64) -> Self {
        Self {
            storage_root: storage_root.into(),
            max_extract_bytes,
        }
    }

    /// Root under which every source cache lives
    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Cache directory for a source
    pub fn cache_dir(&self, source_id: &str) -> Result<PathBuf> {
        check_source_id(source_id)?;
        Ok(self.storage_root.join(source_id))
    }

    /// Extract an archive and install its `Apps` folder as the source's cache
    ///
    /// The staging directory is removed whether or not this succeeds.
    pub async fn materialize(&self, source_id: &str, bytes: Vec<u8>) -> Result<PathBuf> {
        let cache_dir = self.cache_dir(source_id)?;
        let storage_root = self.storage_root.clone();
        let max_bytes = self.max_extract_bytes;
        let source_id = source_id.to_string();

        tokio::task::spawn_blocking(move || -> Result<PathBuf> {
            fs::create_dir_all(&storage_root)?;
            let staging = tempfile::Builder::new()
                .prefix(&format!(".staging-{}-", source_id))
                .tempdir_in(&storage_root)?;

            let report = extract(&bytes, staging.path(), max_bytes)?;
            info!(
                "Extracted {} file(s) for source {} ({} entr(ies) skipped)",
                report.files_written,
                source_id,
                report.skipped.len()
            );

            let apps_dir = locate_apps_folder(staging.path())?;
            replace_dir(&apps_dir, &cache_dir)?;

            info!("Bundle cache ready at {}", cache_dir.display());
            Ok(cache_dir)
        })
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("Extraction task failed: {}", e)))?
    }

    /// Drop a source's cache directory if present
    pub fn remove_cache(&self, source_id: &str) -> Result<()> {
        let cache_dir = self.cache_dir(source_id)?;
        if cache_dir.exists() {
            fs::remove_dir_all(&cache_dir)?;
            info!("Removed bundle cache {}", cache_dir.display());
        }
        Ok(())
    }
}

fn check_source_id(source_id: &str) -> Result<()> {
    let valid = !source_id.is_empty()
        && source_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidSource(format!(
            "source id '{}' cannot name a cache directory",
            source_id
        )))
    }
}

/// Replace `to` with the contents of `from`
fn replace_dir(from: &Path, to: &Path) -> io::Result<()> {
    if to.exists() {
        fs::remove_dir_all(to)?;
    }
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }

    if fs::rename(from, to).is_err() {
        copy_dir_all(from, to)?;
        fs::remove_dir_all(from)?;
    }

    Ok(())
}

fn copy_dir_all(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    /// Build an in-memory archive from (name, contents) pairs
    pub(crate) fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for (name, contents) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_safe_entry_path() {
        let dest = Path::new("/data/dest");
        assert_eq!(
            safe_entry_path(dest, "Apps/nginx/docker-compose.yml").unwrap(),
            dest.join("Apps/nginx/docker-compose.yml")
        );
        assert_eq!(
            safe_entry_path(dest, "./Apps/../Apps/x").unwrap(),
            dest.join("Apps/x")
        );
        assert_eq!(
            safe_entry_path(dest, "Apps\\nginx\\icon.png").unwrap(),
            dest.join("Apps/nginx/icon.png")
        );

        for name in ["../../evil", "Apps/../../evil", "/etc/passwd", "..\\evil"] {
            let err = safe_entry_path(dest, name).unwrap_err();
            assert!(matches!(err, Error::ZipSlipDetected(_)), "{}", name);
        }
    }

    #[test]
    fn test_zip_slip_entry_is_skipped() {
        let root = tempfile::tempdir().unwrap();
        let dest = root.path().join("dest");

        let bytes = zip_bytes(&[
            ("Apps/nginx/docker-compose.yml", "services: {}\n"),
            ("../../evil", "owned"),
            ("Apps/nginx/README.md", "hello"),
        ]);

        let report = extract(&bytes, &dest, DEFAULT_MAX_EXTRACT_BYTES).unwrap();

        assert_eq!(report.files_written, 2);
        assert_eq!(report.skipped, vec!["../../evil".to_string()]);
        assert!(dest.join("Apps/nginx/docker-compose.yml").exists());
        assert!(dest.join("Apps/nginx/README.md").exists());
        assert!(!root.path().join("evil").exists());
        assert!(!root.path().parent().unwrap().join("evil").exists());
    }

    #[test]
    fn test_extract_size_limit() {
        let dest = tempfile::tempdir().unwrap();
        let big = "x".repeat(2048);
        let bytes = zip_bytes(&[("Apps/a/big.txt", big.as_str())]);

        let err = extract(&bytes, dest.path(), 1024).unwrap_err();
        assert!(matches!(err, Error::SizeLimitExceeded { limit: 1024 }));
    }

    #[test]
    fn test_rejects_garbage() {
        let dest = tempfile::tempdir().unwrap();
        let err = extract(b"definitely not a zip", dest.path(), 1024).unwrap_err();
        assert!(matches!(err, Error::Archive(_)));
    }

    #[test]
    fn test_locate_apps_folder() {
        let root = tempfile::tempdir().unwrap();
        assert!(matches!(
            locate_apps_folder(root.path()),
            Err(Error::NoAppsFolderFound)
        ));

        fs::create_dir_all(root.path().join("repo-main/Apps")).unwrap();
        assert_eq!(
            locate_apps_folder(root.path()).unwrap(),
            root.path().join("repo-main/Apps")
        );

        fs::create_dir_all(root.path().join("Apps")).unwrap();
        assert_eq!(
            locate_apps_folder(root.path()).unwrap(),
            root.path().join("Apps")
        );
    }

    #[test]
    fn test_apps_folder_two_levels_down_not_found() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("a/b/Apps")).unwrap();
        assert!(matches!(
            locate_apps_folder(root.path()),
            Err(Error::NoAppsFolderFound)
        ));
    }

    #[tokio::test]
    async fn test_materialize_replaces_cache_and_cleans_staging() {
        let storage = tempfile::tempdir().unwrap();
        let extractor = ArchiveExtractor::new(storage.path(), DEFAULT_MAX_EXTRACT_BYTES);

        let first = zip_bytes(&[("repo-main/Apps/old/docker-compose.yml", "services: {}\n")]);
        let cache = extractor.materialize("src1", first).await.unwrap();
        assert!(cache.join("old/docker-compose.yml").exists());

        let second = zip_bytes(&[("Apps/new/docker-compose.yml", "services: {}\n")]);
        let cache = extractor.materialize("src1", second).await.unwrap();
        assert!(cache.join("new/docker-compose.yml").exists());
        assert!(!cache.join("old").exists());

        let leftovers: Vec<_> = fs::read_dir(storage.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(leftovers, vec!["src1".to_string()]);
    }

    #[tokio::test]
    async fn test_materialize_without_apps_folder_fails_and_cleans_up() {
        let storage = tempfile::tempdir().unwrap();
        let extractor = ArchiveExtractor::new(storage.path(), DEFAULT_MAX_EXTRACT_BYTES);

        let bytes = zip_bytes(&[("random/file.txt", "hi")]);
        let err = extractor.materialize("src2", bytes).await.unwrap_err();
        assert!(matches!(err, Error::NoAppsFolderFound));
        assert_eq!(fs::read_dir(storage.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_cache_dir_rejects_path_like_ids() {
        let extractor = ArchiveExtractor::new("/tmp/storage", DEFAULT_MAX_EXTRACT_BYTES);
        assert!(extractor.cache_dir("../etc").is_err());
        assert!(extractor.cache_dir("a/b").is_err());
        assert!(extractor.cache_dir("6f1c-aa").is_ok());
    }
}
