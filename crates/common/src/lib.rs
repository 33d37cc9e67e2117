pub mod error;
pub mod locks;
pub mod models;

pub use error::{Error, Result};
pub use locks::KeyedLocks;
pub use models::{
    Application, CatalogFormat, ComposeSource, Source, SourceKind, SourceStatus, SourceVariant,
};
