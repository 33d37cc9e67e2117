use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unsafe URL: {0}")]
    UnsafeUrl(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Size limit exceeded: more than {limit} bytes")]
    SizeLimitExceeded { limit: u64 },

    #[error("Archive entry escapes the destination directory: {0}")]
    ZipSlipDetected(String),

    #[error("No \"Apps\" folder found in the archive")]
    NoAppsFolderFound,

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Catalog parse error: {0}")]
    CatalogParse(String),

    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("Source with this URL already exists: {0}")]
    DuplicateSource(String),

    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error("Application not found: {0}")]
    ApplicationNotFound(String),

    #[error("Invalid application name: {0:?}")]
    InvalidAppName(String),

    #[error("Deployment not found: {0}")]
    DeploymentNotFound(String),

    #[error("Deployment directory {0} sorts after new versions; move or remove it")]
    VersionShadowed(String),

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("Command timed out after {0} seconds")]
    CommandTimedOut(u64),

    #[error("Filesystem error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
