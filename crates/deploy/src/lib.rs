//! Deployment lifecycle
//!
//! Keeps a versioned on-disk history of installed compose stacks and drives
//! the external compose tool against the current version of each app.

pub mod controller;
pub mod orchestrator;
pub mod store;

pub use controller::{ComposeAction, DeploymentController};
pub use orchestrator::{CommandOutput, DockerCompose, Orchestrator};
pub use store::{project_name, sanitize_app_name, Deployment, DeploymentStore, InstalledApp};
