// Artifact Materializer
// Writes extracted artifacts into the workspace as complete files.

use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::stream::{CancelFlag, EventEmitter};
use crate::models::{Artifact, ArtifactStatus};
use crate::services::workspace_fs::{resolve_in_workspace, FsError, WorkspaceFs};

/// Notified after a file has been written and the settle delay has passed
#[async_trait]
pub trait WorkspaceListener: Send + Sync {
    async fn on_file_written(&self, path: &Path, created: bool);
}

/// Result of materializing one artifact
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MaterializeOutcome {
    pub filename: String,
    pub path: Option<PathBuf>,
    pub status: ArtifactStatus,
    /// The file existed before this write
    pub existed: bool,
    pub error: Option<String>,
}

impl MaterializeOutcome {
    fn failed(filename: &str, path: Option<PathBuf>, error: String) -> Self {
        Self {
            filename: filename.to_string(),
            path,
            status: ArtifactStatus::Failed,
            existed: false,
            error: Some(error),
        }
    }

    pub fn is_created(&self) -> bool {
        self.status == ArtifactStatus::Created
    }
}

pub struct ArtifactMaterializer {
    fs: Arc<dyn WorkspaceFs>,
    listener: Option<Arc<dyn WorkspaceListener>>,
    events: EventEmitter,
    settle_delay: Duration,
}

impl ArtifactMaterializer {
    pub fn new(fs: Arc<dyn WorkspaceFs>, events: EventEmitter, settle_delay: Duration) -> Self {
        Self {
            fs,
            listener: None,
            events,
            settle_delay,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn WorkspaceListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Write one artifact. Never returns an error: failures are reported in
    /// the outcome so a batch can continue.
    pub async fn materialize(&self, artifact: &Artifact, workspace_root: &Path) -> MaterializeOutcome {
        let filename = artifact.filename.as_str();

        let path = match resolve_in_workspace(workspace_root, filename) {
            Ok(path) => path,
            Err(e) => {
                log::warn!("[Materializer] Rejected {}: {}", filename, e);
                self.events.artifact(filename, ArtifactStatus::Failed, Some(e.to_string()));
                return MaterializeOutcome::failed(filename, None, e.to_string());
            }
        };

        self.events.artifact(filename, ArtifactStatus::Creating, None);

        if let Some(parent) = path.parent() {
            match self.fs.create_dir(parent).await {
                Ok(()) | Err(FsError::AlreadyExists(_)) => {}
                Err(e) => {
                    log::error!("[Materializer] Failed to create directory for {}: {}", filename, e);
                    self.events.artifact(filename, ArtifactStatus::Failed, Some(e.to_string()));
                    return MaterializeOutcome::failed(filename, Some(path), e.to_string());
                }
            }
        }

        let existed = self.fs.exists(&path).await;

        if let Err(e) = self.fs.write_file(&path, &artifact.code).await {
            log::error!("[Materializer] Failed to write {}: {}", filename, e);
            self.events.artifact(filename, ArtifactStatus::Failed, Some(e.to_string()));
            return MaterializeOutcome::failed(filename, Some(path), e.to_string());
        }

        log::info!(
            "[Materializer] {} {}",
            if existed { "Updated" } else { "Created" },
            path.display()
        );

        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
        if let Some(listener) = &self.listener {
            listener.on_file_written(&path, !existed).await;
        }
        self.events.artifact(filename, ArtifactStatus::Created, None);

        MaterializeOutcome {
            filename: filename.to_string(),
            path: Some(path),
            status: ArtifactStatus::Created,
            existed,
            error: None,
        }
    }

    /// Write artifacts in order. Stops early (without error) when cancelled.
    pub async fn materialize_all(
        &self,
        artifacts: &[Artifact],
        workspace_root: &Path,
        cancel: &CancelFlag,
    ) -> Vec<MaterializeOutcome> {
        let mut outcomes = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            if cancel.is_cancelled() {
                log::info!("[Materializer] Cancelled with {} file(s) remaining", artifacts.len() - outcomes.len());
                break;
            }
            outcomes.push(self.materialize(artifact, workspace_root).await);
        }
        outcomes
    }
}
