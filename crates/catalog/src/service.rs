//! Catalog service: source processing and application aggregation

use crate::archive::{safe_entry_path, ArchiveExtractor, DEFAULT_MAX_EXTRACT_BYTES};
use crate::fetcher::{SafeFetcher, UrlPolicy, DEFAULT_MAX_DOWNLOAD_BYTES};
use crate::normalizer::{normalizer_for, NormalizeContext, RawCatalog};
use crate::registry::SourceRegistry;
use crate::settings::SettingsStore;
use dockyard_common::{
    Application, ComposeSource, Error, KeyedLocks, Result, Source, SourceKind, SourceStatus,
    SourceVariant,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Default URL prefix under which bundle caches are served
pub const DEFAULT_PUBLIC_PREFIX: &str = "/storage";

/// Catalog service configuration
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Root of the per-source bundle caches
    pub storage_dir: PathBuf,

    /// URL prefix the storage root is served under
    pub public_prefix: String,

    pub max_download_bytes: u64,

    pub max_extract_bytes: u64,

    pub fetch_timeout: Duration,

    /// Allow sources on loopback and private networks
    pub allow_private_hosts: bool,
}

impl CatalogConfig {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            public_prefix: DEFAULT_PUBLIC_PREFIX.to_string(),
            max_download_bytes: DEFAULT_MAX_DOWNLOAD_BYTES,
            max_extract_bytes: DEFAULT_MAX_EXTRACT_BYTES,
            fetch_timeout: Duration::from_secs(60),
            allow_private_hosts: false,
        }
    }
}

/// Source ingestion and catalog reads
pub struct Catalog {
    registry: Arc<SourceRegistry>,
    settings: Arc<SettingsStore>,
    fetcher: SafeFetcher,
    extractor: ArchiveExtractor,
    public_prefix: String,
    refresh_locks: KeyedLocks,
}

impl Catalog {
    pub fn new(
        config: CatalogConfig,
        registry: Arc<SourceRegistry>,
        settings: Arc<SettingsStore>,
    ) -> Result<Self> {
        let fetcher = SafeFetcher::new(
            UrlPolicy {
                allow_private_hosts: config.allow_private_hosts,
            },
            config.max_download_bytes,
            config.fetch_timeout,
        )?;

        Ok(Self {
            registry,
            settings,
            fetcher,
            extractor: ArchiveExtractor::new(config.storage_dir, config.max_extract_bytes),
            public_prefix: config.public_prefix.trim_end_matches('/').to_string(),
            refresh_locks: KeyedLocks::new(),
        })
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub async fn list_sources(&self) -> Vec<Source> {
        self.registry.list().await
    }

    /// Register a source and process it right away
    ///
    /// The returned record carries the processing outcome; a failed first
    /// fetch still leaves the source registered with `status = error`.
    pub async fn add_source(&self, url: String, variant: Option<SourceVariant>) -> Result<Source> {
        let source = Source::new(url, variant)?;
        self.fetcher.validate(&source.url)?;
        self.registry.add(source.clone()).await?;
        info!("Registered source {} ({})", source.id, source.url);

        let _guard = self.refresh_locks.lock(&source.id).await;
        let (source, _) = self.process_and_record(source).await?;
        Ok(source)
    }

    /// Re-fetch a source, recording the outcome on its record
    pub async fn refresh_source(&self, id: &str) -> Result<Source> {
        let _guard = self.refresh_locks.lock(id).await;
        let source = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| Error::SourceNotFound(id.to_string()))?;

        match self.process_and_record(source).await? {
            (source, None) => Ok(source),
            (_, Some(e)) => Err(e),
        }
    }

    /// Unregister a source and drop its bundle cache
    pub async fn remove_source(&self, id: &str) -> Result<()> {
        let _guard = self.refresh_locks.lock(id).await;
        if !self.registry.remove(id).await? {
            return Err(Error::SourceNotFound(id.to_string()));
        }
        self.extractor.remove_cache(id)?;
        info!("Removed source {}", id);
        Ok(())
    }

    async fn process_and_record(&self, mut source: Source) -> Result<(Source, Option<Error>)> {
        let outcome = self.process(&source).await;
        let failure = match outcome {
            Ok(()) => {
                source.mark_success();
                info!("Processed source {}", source.id);
                None
            }
            Err(e) => {
                error!("Failed to process source {}: {}", source.id, e);
                source.mark_failed(e.to_string());
                Some(e)
            }
        };

        if !self.registry.update(&source).await? {
            warn!("Source {} was removed while processing", source.id);
        }
        Ok((source, failure))
    }

    async fn process(&self, source: &Source) -> Result<()> {
        match source.kind {
            SourceKind::Archive => {
                let bytes = self.fetcher.fetch(&source.url).await?;
                self.extractor.materialize(&source.id, bytes).await?;
            }
            SourceKind::DeclarativeJson => {
                let payload = self.fetcher.fetch_json(&source.url).await?;
                let ctx = self.normalize_context().await;
                normalizer_for(source.format(), &ctx).normalize(source, &RawCatalog::Json(payload))?;
            }
        }
        Ok(())
    }

    async fn normalize_context(&self) -> NormalizeContext {
        NormalizeContext {
            public_prefix: self.public_prefix.clone(),
            tokens: self.settings.template_tokens().await,
        }
    }

    async fn raw_catalog(&self, source: &Source) -> Result<RawCatalog> {
        match source.kind {
            SourceKind::Archive => {
                let cache = self.extractor.cache_dir(&source.id)?;
                if !cache.is_dir() {
                    return Err(Error::Archive(format!(
                        "bundle cache missing for source {}",
                        source.id
                    )));
                }
                Ok(RawCatalog::Bundles(cache))
            }
            SourceKind::DeclarativeJson => {
                Ok(RawCatalog::Json(self.fetcher.fetch_json(&source.url).await?))
            }
        }
    }

    /// Normalize every successfully processed source
    pub async fn list_applications(&self) -> Vec<Application> {
        let ctx = self.normalize_context().await;
        let mut apps = Vec::new();

        for source in self.registry.list().await {
            if source.status != SourceStatus::Success {
                continue;
            }

            let normalized = match self.raw_catalog(&source).await {
                Ok(raw) => normalizer_for(source.format(), &ctx).normalize(&source, &raw),
                Err(e) => Err(e),
            };

            match normalized {
                Ok(mut found) => apps.append(&mut found),
                Err(e) => warn!("Source {} contributed no applications: {}", source.id, e),
            }
        }

        apps
    }

    pub async fn get_application(&self, id: &str) -> Result<Application> {
        self.list_applications()
            .await
            .into_iter()
            .find(|app| app.id == id)
            .ok_or_else(|| Error::ApplicationNotFound(id.to_string()))
    }

    /// Compose text of an application, reading bundle files from the cache
    pub async fn resolve_compose(&self, app: &Application) -> Result<String> {
        match &app.compose {
            ComposeSource::Content(content) => Ok(content.clone()),
            ComposeSource::Path(public_path) => {
                let file = self.storage_file(public_path)?;
                Ok(tokio::fs::read_to_string(&file).await?)
            }
        }
    }

    /// Map a public storage path back onto the storage root
    fn storage_file(&self, public_path: &str) -> Result<PathBuf> {
        let relative = public_path
            .strip_prefix(&self.public_prefix)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| {
                Error::CatalogParse(format!("compose path {} is outside storage", public_path))
            })?;

        safe_entry_path(self.storage_root(), relative).map_err(|_| {
            Error::CatalogParse(format!("compose path {} is outside storage", public_path))
        })
    }

    pub fn storage_root(&self) -> &Path {
        self.extractor.storage_root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::zip_bytes;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        _dir: tempfile::TempDir,
        catalog: Catalog,
    }

    fn fixture(allow_private_hosts: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CatalogConfig::new(dir.path().join("storage"));
        config.allow_private_hosts = allow_private_hosts;
        config.fetch_timeout = Duration::from_secs(5);

        let registry = Arc::new(SourceRegistry::open(dir.path().join("sources.json")));
        let settings = Arc::new(SettingsStore::open(dir.path().join("settings.json")));
        let catalog = Catalog::new(config, registry, settings).unwrap();
        Fixture { _dir: dir, catalog }
    }

    async fn serve(server: &MockServer, route: &str, body: Vec<u8>) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(server)
            .await;
    }

    const BUNDLE: &[(&str, &str)] = &[
        ("nginx/docker-compose.yml", "services:\n  web:\n    image: nginx\n"),
        ("nginx/icon.png", "png"),
        ("nginx/README.md", "Web server"),
        ("nginx/screenshot-1.png", "1"),
    ];

    fn with_prefix(prefix: &str) -> Vec<(String, String)> {
        BUNDLE
            .iter()
            .map(|(name, body)| (format!("{}{}", prefix, name), body.to_string()))
            .collect()
    }

    fn zip_of(entries: &[(String, String)]) -> Vec<u8> {
        let borrowed: Vec<(&str, &str)> = entries
            .iter()
            .map(|(n, b)| (n.as_str(), b.as_str()))
            .collect();
        zip_bytes(&borrowed)
    }

    /// Application as JSON, with its source id masked out
    fn masked(app: &Application) -> String {
        serde_json::to_string(app)
            .unwrap()
            .replace(&app.source_id, "SRC")
    }

    #[tokio::test]
    async fn test_wrapper_folder_yields_same_output() {
        let server = MockServer::start().await;
        serve(&server, "/root.zip", zip_of(&with_prefix("Apps/"))).await;
        serve(&server, "/wrapped.zip", zip_of(&with_prefix("store-main/Apps/"))).await;

        let f = fixture(true);
        let root = f
            .catalog
            .add_source(format!("{}/root.zip", server.uri()), None)
            .await
            .unwrap();
        let wrapped = f
            .catalog
            .add_source(format!("{}/wrapped.zip", server.uri()), None)
            .await
            .unwrap();
        assert_eq!(root.status, SourceStatus::Success);
        assert_eq!(wrapped.status, SourceStatus::Success);

        let apps = f.catalog.list_applications().await;
        assert_eq!(apps.len(), 2);
        assert_eq!(masked(&apps[0]), masked(&apps[1]));
        assert_eq!(apps[0].id, format!("{}-nginx", root.id));
        assert_eq!(apps[0].description.as_deref(), Some("Web server"));

        let compose = f.catalog.resolve_compose(&apps[1]).await.unwrap();
        assert!(compose.contains("image: nginx"));
    }

    #[tokio::test]
    async fn test_failed_source_is_kept_with_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.zip"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let f = fixture(true);
        let source = f
            .catalog
            .add_source(format!("{}/missing.zip", server.uri()), None)
            .await
            .unwrap();

        assert_eq!(source.status, SourceStatus::Error);
        assert!(source.error.is_some());
        assert_eq!(f.catalog.list_sources().await.len(), 1);
        assert!(f.catalog.list_applications().await.is_empty());

        let err = f.catalog.refresh_source(&source.id).await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }

    #[tokio::test]
    async fn test_template_source_and_settings() {
        let server = MockServer::start().await;
        let templates = json!([{
            "name": "sonarr",
            "title": "Sonarr",
            "image": "linuxserver/sonarr",
            "volumes": [{"container": "/config", "bind": "!config"}]
        }]);
        serve(&server, "/templates.json", templates.to_string().into_bytes()).await;

        let f = fixture(true);
        let source = f
            .catalog
            .add_source(
                format!("{}/templates.json", server.uri()),
                Some(SourceVariant::DeclarativeTemplate),
            )
            .await
            .unwrap();
        assert_eq!(source.status, SourceStatus::Success);

        let mut settings = f.catalog.settings().get().await;
        settings
            .template_tokens
            .insert("!config".to_string(), "/srv/cfg".to_string());
        f.catalog.settings().save(settings).await.unwrap();

        let app = f
            .catalog
            .get_application(&format!("{}-sonarr", source.id))
            .await
            .unwrap();
        let compose = f.catalog.resolve_compose(&app).await.unwrap();
        assert!(compose.contains("/srv/cfg:/config"));
    }

    #[tokio::test]
    async fn test_rejects_private_and_duplicate_urls() {
        let f = fixture(false);
        let err = f
            .catalog
            .add_source("http://192.168.1.5/store.zip".to_string(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsafeUrl(_)));
        assert!(f.catalog.list_sources().await.is_empty());

        let server = MockServer::start().await;
        serve(&server, "/a.json", b"[]".to_vec()).await;
        let f = fixture(true);
        let url = format!("{}/a.json", server.uri());
        f.catalog.add_source(url.clone(), None).await.unwrap();
        let err = f.catalog.add_source(url, None).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateSource(_)));
    }

    #[tokio::test]
    async fn test_remove_source_drops_cache() {
        let server = MockServer::start().await;
        serve(&server, "/root.zip", zip_of(&with_prefix("Apps/"))).await;

        let f = fixture(true);
        let source = f
            .catalog
            .add_source(format!("{}/root.zip", server.uri()), None)
            .await
            .unwrap();
        let cache = f.catalog.storage_root().join(&source.id);
        assert!(cache.is_dir());

        f.catalog.remove_source(&source.id).await.unwrap();
        assert!(!cache.exists());
        assert!(matches!(
            f.catalog.remove_source(&source.id).await,
            Err(Error::SourceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_compose_path_outside_storage_is_refused() {
        let f = fixture(true);
        let app = Application {
            id: "x".to_string(),
            source_id: "src".to_string(),
            name: "x".to_string(),
            description: None,
            icon_url: None,
            screenshots: Vec::new(),
            compose: ComposeSource::Path("/storage/../../etc/passwd".to_string()),
        };
        let err = f.catalog.resolve_compose(&app).await.unwrap_err();
        assert!(matches!(err, Error::CatalogParse(_)));

        let app = Application {
            compose: ComposeSource::Path("/elsewhere/a.yml".to_string()),
            ..app
        };
        assert!(f.catalog.resolve_compose(&app).await.is_err());
    }
}
