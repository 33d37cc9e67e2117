//! Declarative JSON templates
//!
//! Each template item describes one service abstractly. A single-service
//! compose document is synthesized per item, with host-side placeholder
//! tokens substituted from the settings dictionary.

use super::{Normalizer, RawCatalog, UniqueIds};
use crate::settings::TOKEN_PREFIX;
use dockyard_common::{Application, ComposeSource, Error, Result, Source};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::collections::HashMap;
use tracing::warn;

const DEFAULT_RESTART_POLICY: &str = "unless-stopped";

/// One template item
#[derive(Debug, Deserialize)]
pub struct TemplateItem {
    pub name: String,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub logo: Option<String>,

    pub image: String,

    #[serde(default)]
    pub restart_policy: Option<String>,

    /// Mapping strings or single-key objects holding one
    #[serde(default)]
    pub ports: Vec<serde_json::Value>,

    #[serde(default)]
    pub volumes: Vec<TemplateVolume>,

    #[serde(default)]
    pub env: Vec<TemplateEnv>,
}

#[derive(Debug, Deserialize)]
pub struct TemplateVolume {
    pub container: String,

    /// Host path or placeholder token
    #[serde(default)]
    pub bind: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TemplateEnv {
    pub name: String,

    #[serde(default)]
    pub default: Option<serde_json::Value>,
}

/// Substitute a host-side placeholder
///
/// Known tokens take the configured value; unknown `!name` tokens become
/// `./name`; anything else is used verbatim.
pub fn resolve_bind(token: &str, tokens: &HashMap<String, String>) -> String {
    if let Some(value) = tokens.get(token) {
        value.clone()
    } else if let Some(rest) = token.strip_prefix(TOKEN_PREFIX) {
        format!("./{}", rest)
    } else {
        token.to_string()
    }
}

fn port_mapping(port: &serde_json::Value) -> Option<String> {
    match port {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Object(map) if map.len() == 1 => map.values().next().and_then(port_mapping),
        _ => None,
    }
}

fn scalar_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Build the single-service compose document for an item
pub fn synthesize_compose(item: &TemplateItem, tokens: &HashMap<String, String>) -> Value {
    let mut service = Mapping::new();
    service.insert("image".into(), item.image.clone().into());
    service.insert(
        "restart".into(),
        item.restart_policy
            .clone()
            .unwrap_or_else(|| DEFAULT_RESTART_POLICY.to_string())
            .into(),
    );

    let ports: Vec<Value> = item
        .ports
        .iter()
        .filter_map(port_mapping)
        .map(Value::String)
        .collect();
    if !ports.is_empty() {
        service.insert("ports".into(), Value::Sequence(ports));
    }

    if !item.volumes.is_empty() {
        let volumes = item
            .volumes
            .iter()
            .map(|volume| match &volume.bind {
                Some(bind) => format!("{}:{}", resolve_bind(bind, tokens), volume.container),
                None => volume.container.clone(),
            })
            .map(Value::String)
            .collect();
        service.insert("volumes".into(), Value::Sequence(volumes));
    }

    if !item.env.is_empty() {
        let mut environment = Mapping::new();
        for var in &item.env {
            let default = var.default.as_ref().map(scalar_text).unwrap_or_default();
            let value = tokens.get(&default).cloned().unwrap_or(default);
            environment.insert(var.name.clone().into(), value.into());
        }
        service.insert("environment".into(), Value::Mapping(environment));
    }

    let mut services = Mapping::new();
    services.insert(item.name.clone().into(), Value::Mapping(service));

    let mut doc = Mapping::new();
    doc.insert("version".into(), "3".into());
    doc.insert("services".into(), Value::Mapping(services));
    Value::Mapping(doc)
}

/// Declarative template arrays
pub struct DeclarativeTemplateNormalizer {
    tokens: HashMap<String, String>,
}

impl DeclarativeTemplateNormalizer {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }

    fn normalize_item(&self, source: &Source, item: serde_json::Value) -> Result<Application> {
        let item: TemplateItem = serde_json::from_value(item)
            .map_err(|e| Error::CatalogParse(format!("invalid template item: {}", e)))?;

        let content = serde_yaml::to_string(&synthesize_compose(&item, &self.tokens))?;

        Ok(Application {
            id: format!("{}-{}", source.id, item.name),
            source_id: source.id.clone(),
            name: item.title.clone().unwrap_or_else(|| item.name.clone()),
            description: item.description,
            icon_url: item.logo,
            screenshots: Vec::new(),
            compose: ComposeSource::Content(content),
        })
    }
}

impl Normalizer for DeclarativeTemplateNormalizer {
    fn normalize(&self, source: &Source, raw: &RawCatalog) -> Result<Vec<Application>> {
        let items = match raw {
            RawCatalog::Json(serde_json::Value::Array(items)) => items,
            _ => {
                return Err(Error::CatalogParse(
                    "template source must be a JSON array".to_string(),
                ))
            }
        };

        let mut ids = UniqueIds::default();
        let mut apps = Vec::new();
        for (index, item) in items.iter().enumerate() {
            match self.normalize_item(source, item.clone()) {
                Ok(mut app) => {
                    app.id = ids.claim(app.id);
                    apps.push(app);
                }
                Err(e) => warn!("Skipping template item {} of {}: {}", index, source.id, e),
            }
        }

        Ok(apps)
    }
}
