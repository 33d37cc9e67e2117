//! Catalog normalization
//!
//! Each `CatalogFormat` has one `Normalizer` implementation that turns raw
//! catalog data into `Application` records. Per-item failures are logged and
//! the item is dropped; only a wrong-shaped payload fails a whole source.

pub mod annotated;
pub mod bundle;
pub mod plain;
pub mod template;

use dockyard_common::{Application, CatalogFormat, Result, Source};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

pub use annotated::AnnotatedBundleNormalizer;
pub use bundle::GenericBundleNormalizer;
pub use plain::PlainJsonNormalizer;
pub use template::DeclarativeTemplateNormalizer;

/// Raw catalog content for one source
#[derive(Debug, Clone)]
pub enum RawCatalog {
    /// Cached bundle folder of an archive source
    Bundles(PathBuf),
    /// Parsed JSON payload of a JSON source
    Json(serde_json::Value),
}

/// Inputs shared by all normalizers for one catalog read
#[derive(Debug, Clone, Default)]
pub struct NormalizeContext {
    /// URL prefix under which bundle caches are served
    pub public_prefix: String,

    /// Template token dictionary
    pub tokens: HashMap<String, String>,
}

/// Turns one source's raw content into applications
pub trait Normalizer: Send + Sync {
    fn normalize(&self, source: &Source, raw: &RawCatalog) -> Result<Vec<Application>>;
}

/// Hands out application ids that are unique within one payload
///
/// A repeated id gets `-1`, `-2`, ... appended until it is unused.
#[derive(Debug, Default)]
pub(crate) struct UniqueIds {
    taken: HashSet<String>,
}

impl UniqueIds {
    pub(crate) fn claim(&mut self, id: String) -> String {
        let mut candidate = id.clone();
        let mut n = 1;
        while self.taken.contains(&candidate) {
            candidate = format!("{}-{}", id, n);
            n += 1;
        }
        self.taken.insert(candidate.clone());
        candidate
    }
}

/// Pick the normalizer for a catalog format
pub fn normalizer_for(format: CatalogFormat, ctx: &NormalizeContext) -> Box<dyn Normalizer> {
    match format {
        CatalogFormat::GenericBundle => {
            Box::new(GenericBundleNormalizer::new(ctx.public_prefix.clone()))
        }
        CatalogFormat::AnnotatedBundle => {
            Box::new(AnnotatedBundleNormalizer::new(ctx.public_prefix.clone()))
        }
        CatalogFormat::DeclarativeTemplate => {
            Box::new(DeclarativeTemplateNormalizer::new(ctx.tokens.clone()))
        }
        CatalogFormat::PlainJson => Box::new(PlainJsonNormalizer),
    }
}
