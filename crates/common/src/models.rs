//! Shared data models for catalog sources and normalized applications

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How a source's payload is transported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// ZIP archive of app bundles
    Archive,
    /// JSON document fetched on every catalog read
    DeclarativeJson,
}

impl SourceKind {
    /// Derive the kind from the URL suffix, ignoring query string and fragment
    pub fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        if path.to_ascii_lowercase().ends_with(".zip") {
            SourceKind::Archive
        } else {
            SourceKind::DeclarativeJson
        }
    }
}

/// Optional catalog dialect tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceVariant {
    /// Compose bundles carrying an `x-casaos` metadata block
    MetadataAnnotated,
    /// JSON array of abstract service templates
    DeclarativeTemplate,
}

/// Processing status of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Pending,
    Success,
    Error,
}

/// Normalization strategy, selected once from `(kind, variant)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogFormat {
    GenericBundle,
    AnnotatedBundle,
    DeclarativeTemplate,
    PlainJson,
}

/// A registered catalog origin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    /// Unique source identifier
    pub id: String,

    /// Origin location
    pub url: String,

    /// Transport kind, derived from the URL
    pub kind: SourceKind,

    /// Optional catalog dialect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<SourceVariant>,

    /// Result of the last processing attempt
    pub status: SourceStatus,

    /// Last failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// When the source was last processed
    pub updated_at: DateTime<Utc>,
}

impl Source {
    /// Create a new pending source, checking that the variant fits the kind
    pub fn new(url: String, variant: Option<SourceVariant>) -> Result<Self> {
        let url = url.trim().to_string();
        if url.is_empty() {
            return Err(Error::InvalidSource("URL is required".to_string()));
        }

        let kind = SourceKind::from_url(&url);
        match (kind, variant) {
            (SourceKind::DeclarativeJson, Some(SourceVariant::MetadataAnnotated)) => {
                return Err(Error::InvalidSource(
                    "metadata-annotated sources must point to a .zip archive".to_string(),
                ));
            }
            (SourceKind::Archive, Some(SourceVariant::DeclarativeTemplate)) => {
                return Err(Error::InvalidSource(
                    "declarative-template sources must point to a JSON document".to_string(),
                ));
            }
            _ => {}
        }

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            url,
            kind,
            variant,
            status: SourceStatus::Pending,
            error: None,
            updated_at: Utc::now(),
        })
    }

    /// Normalization strategy for this source
    pub fn format(&self) -> CatalogFormat {
        match (self.kind, self.variant) {
            (SourceKind::Archive, Some(SourceVariant::MetadataAnnotated)) => {
                CatalogFormat::AnnotatedBundle
            }
            (SourceKind::Archive, _) => CatalogFormat::GenericBundle,
            (SourceKind::DeclarativeJson, Some(SourceVariant::DeclarativeTemplate)) => {
                CatalogFormat::DeclarativeTemplate
            }
            (SourceKind::DeclarativeJson, _) => CatalogFormat::PlainJson,
        }
    }

    /// Record a successful processing attempt
    pub fn mark_success(&mut self) {
        self.status = SourceStatus::Success;
        self.error = None;
        self.updated_at = Utc::now();
    }

    /// Record a failed processing attempt
    pub fn mark_failed(&mut self, error: String) {
        self.status = SourceStatus::Error;
        self.error = Some(error);
        self.updated_at = Utc::now();
    }
}

/// Where an application's compose document lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComposeSource {
    /// Static reference under the public storage prefix
    #[serde(rename = "compose_path")]
    Path(String),
    /// Inline compose text
    #[serde(rename = "compose_content")]
    Content(String),
}

/// A normalized, installable catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: String,

    pub source_id: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,

    /// Screenshot locations, in display order
    #[serde(default)]
    pub screenshots: Vec<String>,

    #[serde(flatten)]
    pub compose: ComposeSource,
}
