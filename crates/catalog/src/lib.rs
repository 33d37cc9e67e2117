//! Catalog ingestion
//!
//! Registers remote catalog sources, fetches them behind an SSRF guard,
//! extracts bundle archives into a per-source cache and normalizes every
//! supported catalog format into `Application` records.

pub mod archive;
pub mod fetcher;
pub mod normalizer;
mod persist;
pub mod registry;
pub mod service;
pub mod settings;
pub mod truenas;

pub use archive::{ArchiveExtractor, ExtractReport};
pub use fetcher::{SafeFetcher, UrlPolicy};
pub use normalizer::{Normalizer, RawCatalog};
pub use registry::SourceRegistry;
pub use service::{Catalog, CatalogConfig};
pub use settings::{Settings, SettingsStore};
pub use truenas::generate_truenas_values;
