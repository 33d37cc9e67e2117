//! Lifecycle actions against installed apps
//!
//! Nothing is cached between calls: every action resolves the current
//! deployment again and leaves container state to the orchestrator.

use crate::orchestrator::{CommandOutput, Orchestrator};
use crate::store::{delete_base, project_name, resolve_latest, DeploymentStore, COMPOSE_FILE};
use dockyard_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Compose subcommands exposed to operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComposeAction {
    Up,
    Down,
    Restart,
    Stop,
    Start,
}

impl ComposeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComposeAction::Up => "up",
            ComposeAction::Down => "down",
            ComposeAction::Restart => "restart",
            ComposeAction::Stop => "stop",
            ComposeAction::Start => "start",
        }
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec![self.as_str().to_string()];
        if *self == ComposeAction::Up {
            args.push("-d".to_string());
        }
        args
    }
}

impl fmt::Display for ComposeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drives the orchestrator for deployments held by a `DeploymentStore`
pub struct DeploymentController {
    store: Arc<DeploymentStore>,
    orchestrator: Arc<dyn Orchestrator>,
}

impl DeploymentController {
    pub fn new(store: Arc<DeploymentStore>, orchestrator: Arc<dyn Orchestrator>) -> Self {
        Self {
            store,
            orchestrator,
        }
    }

    pub fn store(&self) -> &Arc<DeploymentStore> {
        &self.store
    }

    /// Run one lifecycle action on an app's current deployment
    pub async fn apply(&self, name: &str, action: ComposeAction) -> Result<CommandOutput> {
        let deployment = self.store.current(name)?;
        let project = project_name(name);

        info!("Applying {} to {} (project {})", action, name, project);
        self.orchestrator
            .compose(&project, &deployment.compose_file, &action.args())
            .await
    }

    /// Tear down an app's containers and delete its whole history
    ///
    /// A failing `down` is logged and does not stop the directory removal.
    pub async fn remove(&self, name: &str, delete_images: bool, delete_volumes: bool) -> Result<()> {
        let base = self.store.app_dir(name)?;
        let _guard = self.store.lock_app(name).await;

        if let Some(dir) = resolve_latest(&base) {
            let mut args = vec!["down".to_string(), "--remove-orphans".to_string()];
            if delete_images {
                args.extend(["--rmi".to_string(), "all".to_string()]);
            }
            if delete_volumes {
                args.push("--volumes".to_string());
            }

            if let Err(e) = self
                .orchestrator
                .compose(&project_name(name), &dir.join(COMPOSE_FILE), &args)
                .await
            {
                warn!("Ignoring failed teardown of {}: {}", name, e);
            }
        }

        if !delete_base(&base).await? {
            return Err(Error::DeploymentNotFound(name.to_string()));
        }
        info!("Removed {}", name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    struct Call {
        project: String,
        compose_file: PathBuf,
        args: Vec<String>,
    }

    #[derive(Default)]
    struct RecordingOrchestrator {
        calls: Mutex<Vec<Call>>,
        fail: bool,
    }

    impl RecordingOrchestrator {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Orchestrator for RecordingOrchestrator {
        async fn compose(
            &self,
            project: &str,
            compose_file: &Path,
            args: &[String],
        ) -> Result<CommandOutput> {
            self.calls.lock().unwrap().push(Call {
                project: project.to_string(),
                compose_file: compose_file.to_path_buf(),
                args: args.to_vec(),
            });
            if self.fail {
                Err(Error::CommandFailed("no such project".to_string()))
            } else {
                Ok(CommandOutput::default())
            }
        }
    }

    fn setup(orchestrator: Arc<RecordingOrchestrator>) -> (tempfile::TempDir, DeploymentController) {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(DeploymentStore::new(root.path()));
        (root, DeploymentController::new(store, orchestrator))
    }

    fn deploy(root: &Path, dir: &str, version: &str) -> PathBuf {
        let version_dir = root.join(dir).join(version);
        fs::create_dir_all(&version_dir).unwrap();
        let compose = version_dir.join(COMPOSE_FILE);
        fs::write(&compose, "services: {}\n").unwrap();
        compose
    }

    fn strings(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_up_uses_stable_project_name() {
        let orchestrator = Arc::new(RecordingOrchestrator::default());
        let (root, controller) = setup(orchestrator.clone());
        deploy(root.path(), "My_App_", "2024-01-01T00-00-00-000Z");
        let latest = deploy(root.path(), "My_App_", "2024-06-01T00-00-00-000Z");

        controller.apply("My App!", ComposeAction::Up).await.unwrap();
        controller.apply("My App!", ComposeAction::Up).await.unwrap();

        let calls = orchestrator.calls();
        assert_eq!(calls.len(), 2);
        for call in calls {
            assert_eq!(call.project, "my_app_");
            assert_eq!(call.compose_file, latest);
            assert_eq!(call.args, strings(&["up", "-d"]));
        }
    }

    #[tokio::test]
    async fn test_other_actions_are_not_detached() {
        let orchestrator = Arc::new(RecordingOrchestrator::default());
        let (root, controller) = setup(orchestrator.clone());
        deploy(root.path(), "web", "2024-01-01T00-00-00-000Z");

        for action in [
            ComposeAction::Down,
            ComposeAction::Restart,
            ComposeAction::Stop,
            ComposeAction::Start,
        ] {
            controller.apply("web", action).await.unwrap();
        }

        let args: Vec<Vec<String>> = orchestrator.calls().into_iter().map(|c| c.args).collect();
        assert_eq!(
            args,
            vec![
                strings(&["down"]),
                strings(&["restart"]),
                strings(&["stop"]),
                strings(&["start"]),
            ]
        );
    }

    #[tokio::test]
    async fn test_apply_surfaces_failures() {
        let orchestrator = Arc::new(RecordingOrchestrator::failing());
        let (root, controller) = setup(orchestrator);
        deploy(root.path(), "web", "2024-01-01T00-00-00-000Z");

        assert!(matches!(
            controller.apply("web", ComposeAction::Stop).await,
            Err(Error::CommandFailed(_))
        ));
        assert!(matches!(
            controller.apply("ghost", ComposeAction::Stop).await,
            Err(Error::DeploymentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_with_images_and_volumes() {
        let orchestrator = Arc::new(RecordingOrchestrator::default());
        let (root, controller) = setup(orchestrator.clone());
        let compose = deploy(root.path(), "web", "2024-01-01T00-00-00-000Z");

        controller.remove("web", true, true).await.unwrap();

        let calls = orchestrator.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].compose_file, compose);
        assert_eq!(
            calls[0].args,
            strings(&["down", "--remove-orphans", "--rmi", "all", "--volumes"])
        );
        assert!(!root.path().join("web").exists());
    }

    #[tokio::test]
    async fn test_remove_deletes_even_when_down_fails() {
        let orchestrator = Arc::new(RecordingOrchestrator::failing());
        let (root, controller) = setup(orchestrator.clone());
        deploy(root.path(), "web", "2024-01-01T00-00-00-000Z");
        deploy(root.path(), "web", "2024-06-01T00-00-00-000Z");

        controller.remove("web", false, false).await.unwrap();

        assert_eq!(
            orchestrator.calls()[0].args,
            strings(&["down", "--remove-orphans"])
        );
        assert!(!root.path().join("web").exists());
    }

    #[tokio::test]
    async fn test_remove_unresolvable_directory() {
        let orchestrator = Arc::new(RecordingOrchestrator::default());
        let (root, controller) = setup(orchestrator.clone());
        fs::create_dir_all(root.path().join("empty")).unwrap();

        controller.remove("empty", false, false).await.unwrap();
        assert!(orchestrator.calls().is_empty());
        assert!(!root.path().join("empty").exists());

        assert!(matches!(
            controller.remove("ghost", false, false).await,
            Err(Error::DeploymentNotFound(_))
        ));
    }

    #[test]
    fn test_action_wire_names() {
        let action: ComposeAction = serde_json::from_str("\"restart\"").unwrap();
        assert_eq!(action, ComposeAction::Restart);
        assert!(serde_json::from_str::<ComposeAction>("\"pause\"").is_err());
    }
}
