//! Plain JSON arrays of ready-made app entries

use super::{Normalizer, RawCatalog};
use dockyard_common::{Application, ComposeSource, Error, Result, Source};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

const UNKNOWN_NAME: &str = "Unknown";

#[derive(Debug, Deserialize)]
struct PlainItem {
    #[serde(default)]
    name: Option<String>,

    #[serde(default)]
    description: Option<String>,

    #[serde(default)]
    icon: Option<String>,

    #[serde(default)]
    image: Option<String>,

    #[serde(default)]
    docker_compose: Option<String>,

    #[serde(default)]
    compose: Option<String>,
}

/// Stable ID for a plain JSON entry
///
/// `occurrence` counts earlier entries with the same name in one payload.
/// It is hashed as its own path segment ahead of the name, so no name can
/// reproduce another entry's key.
pub fn plain_app_id(source_id: &str, name: &str, occurrence: usize) -> String {
    let key = format!("{}/{}/{}", source_id, occurrence, name);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes()).to_string()
}

/// Plain JSON array passthrough
pub struct PlainJsonNormalizer;

impl Normalizer for PlainJsonNormalizer {
    fn normalize(&self, source: &Source, raw: &RawCatalog) -> Result<Vec<Application>> {
        let items = match raw {
            RawCatalog::Json(serde_json::Value::Array(items)) => items,
            _ => {
                return Err(Error::CatalogParse(
                    "JSON source must be an array".to_string(),
                ))
            }
        };

        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut apps = Vec::new();

        for (index, item) in items.iter().enumerate() {
            let item: PlainItem = match serde_json::from_value(item.clone()) {
                Ok(item) => item,
                Err(e) => {
                    warn!("Skipping JSON item {} of {}: {}", index, source.id, e);
                    continue;
                }
            };

            let Some(content) = item.docker_compose.or(item.compose) else {
                warn!("Skipping JSON item {} of {}: no compose text", index, source.id);
                continue;
            };

            let name = item.name.unwrap_or_else(|| UNKNOWN_NAME.to_string());
            let occurrence = seen.entry(name.clone()).or_insert(0);
            let id = plain_app_id(&source.id, &name, *occurrence);
            *occurrence += 1;

            apps.push(Application {
                id,
                source_id: source.id.clone(),
                name,
                description: item.description,
                icon_url: item.icon.or(item.image),
                screenshots: Vec::new(),
                compose: ComposeSource::Content(content),
            });
        }

        Ok(apps)
    }
}
