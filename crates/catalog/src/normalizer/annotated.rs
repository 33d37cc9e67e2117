//! Compose bundles annotated with an `x-casaos` metadata block
//!
//! The metadata is read from the compose document itself, then stripped so
//! the emitted compose text only holds what the orchestrator understands.

use super::bundle::{expect_bundles, list_bundles, public_path, Bundle};
use super::{Normalizer, RawCatalog};
use dockyard_common::{Application, ComposeSource, Error, Result, Source};
use serde_yaml::{Mapping, Value};
use std::fs;
use tracing::warn;

/// Reserved top-level extension key holding app metadata
pub const METADATA_KEY: &str = "x-casaos";

/// Preferred locale for language-keyed metadata
pub const PREFERRED_LOCALE: &str = "en_us";

/// Pick a display string from a plain string or a language map
pub fn localized(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Mapping(map) => map
            .get(PREFERRED_LOCALE)
            .and_then(Value::as_str)
            .or_else(|| map.values().find_map(Value::as_str))
            .map(str::to_string),
        _ => None,
    }
}

/// Keep absolute URLs, join relative references to the bundle path
fn resolve_reference(reference: &str, base: &str) -> String {
    if reference.starts_with("http://") || reference.starts_with("https://") {
        reference.to_string()
    } else {
        let relative = reference.trim_start_matches("./").trim_start_matches('/');
        format!("{}/{}", base, relative)
    }
}

/// Strip metadata keys and compact bind mounts, in place
pub fn clean_compose(doc: &mut Value) -> Result<Option<Value>> {
    let root = doc
        .as_mapping_mut()
        .ok_or_else(|| Error::CatalogParse("compose document is not a mapping".to_string()))?;

    let metadata = root.remove(METADATA_KEY);

    if let Some(services) = root.get_mut("services").and_then(Value::as_mapping_mut) {
        for (_, service) in services.iter_mut() {
            if let Some(service) = service.as_mapping_mut() {
                service.remove(METADATA_KEY);
                compact_bind_volumes(service);
            }
        }
    }

    Ok(metadata)
}

/// `{type: bind, source, target}` becomes `source:target`
fn compact_bind_volumes(service: &mut Mapping) {
    let Some(volumes) = service.get_mut("volumes").and_then(Value::as_sequence_mut) else {
        return;
    };

    for volume in volumes.iter_mut() {
        let compact = match volume.as_mapping() {
            Some(entry) if entry.get("type").and_then(Value::as_str) == Some("bind") => {
                match (
                    entry.get("source").and_then(Value::as_str),
                    entry.get("target").and_then(Value::as_str),
                ) {
                    (Some(source), Some(target)) => Some(format!("{}:{}", source, target)),
                    _ => None,
                }
            }
            _ => None,
        };

        if let Some(compact) = compact {
            *volume = Value::String(compact);
        }
    }
}

/// Metadata-annotated compose bundles
pub struct AnnotatedBundleNormalizer {
    public_prefix: String,
}

impl AnnotatedBundleNormalizer {
    pub fn new(public_prefix: String) -> Self {
        Self { public_prefix }
    }

    fn normalize_bundle(&self, source: &Source, bundle: &Bundle) -> Result<Application> {
        let text = fs::read_to_string(bundle.compose_path())?;
        let mut doc: Value = serde_yaml::from_str(&text)
            .map_err(|e| Error::CatalogParse(format!("{}: {}", bundle.name, e)))?;

        let metadata = clean_compose(&mut doc)?.unwrap_or(Value::Null);
        let base = public_path(&self.public_prefix, &source.id, &bundle.name);

        let name = metadata
            .get("title")
            .and_then(localized)
            .unwrap_or_else(|| bundle.name.clone());
        let description = metadata
            .get("description")
            .and_then(localized)
            .or_else(|| metadata.get("tagline").and_then(localized));
        let icon_url = metadata
            .get("icon")
            .and_then(localized)
            .map(|icon| resolve_reference(&icon, &base));
        let screenshots = metadata
            .get("screenshot_link")
            .and_then(Value::as_sequence)
            .map(|links| {
                links
                    .iter()
                    .filter_map(localized)
                    .map(|link| resolve_reference(&link, &base))
                    .collect()
            })
            .unwrap_or_default();

        let content = serde_yaml::to_string(&doc)?;

        Ok(Application {
            id: bundle.app_id(source),
            source_id: source.id.clone(),
            name,
            description,
            icon_url,
            screenshots,
            compose: ComposeSource::Content(content),
        })
    }
}

impl Normalizer for AnnotatedBundleNormalizer {
    fn normalize(&self, source: &Source, raw: &RawCatalog) -> Result<Vec<Application>> {
        let root = expect_bundles(raw)?;
        let mut apps = Vec::new();

        for bundle in list_bundles(root)? {
            match self.normalize_bundle(source, &bundle) {
                Ok(app) => apps.push(app),
                Err(e) => warn!("Skipping annotated bundle {}: {}", bundle.name, e),
            }
        }

        Ok(apps)
    }
}
