// Command Execution Coordinator
//
// Runs a batch of commands sequentially on one terminal:
// busy lock -> confirmation -> write -> completion -> classify -> status.
// The first failing command stops the batch.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::completion::{CompletionDetector, CompletionReason, CompletionResult};
use super::confirmation::ConfirmationGate;
use super::failure::{analyze, output_indicates_failure};
use super::stream::{CancelFlag, EventEmitter};
use crate::models::{CommandStatus, ConfirmationDecision, ErrorAnalysis};
use crate::services::terminal::{TerminalError, TerminalHandle, TerminalRegistry, TerminalStatus};
use crate::utils::config::ExecutionConfig;

/// Receives dev-server URLs detected in command output
#[async_trait]
pub trait PreviewSink: Send + Sync {
    async fn open(&self, url: &str);
}

/// One command that ran to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRun {
    pub command: String,
    pub output: String,
    pub reason: CompletionReason,
}

/// The command that stopped a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    pub command: String,
    pub output: String,
    pub analysis: ErrorAnalysis,
    pub working_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Succeeded {
        runs: Vec<CommandRun>,
    },
    Failed {
        runs: Vec<CommandRun>,
        failure: CommandFailure,
    },
    Cancelled {
        runs: Vec<CommandRun>,
        skipped: Vec<String>,
    },
}

impl BatchOutcome {
    pub fn failure(&self) -> Option<&CommandFailure> {
        match self {
            BatchOutcome::Failed { failure, .. } => Some(failure),
            _ => None,
        }
    }

    pub fn runs(&self) -> &[CommandRun] {
        match self {
            BatchOutcome::Succeeded { runs }
            | BatchOutcome::Failed { runs, .. }
            | BatchOutcome::Cancelled { runs, .. } => runs,
        }
    }
}

pub struct ExecutionCoordinator {
    registry: Arc<TerminalRegistry>,
    gate: Arc<ConfirmationGate>,
    detector: CompletionDetector,
    events: EventEmitter,
    preview: Option<Arc<dyn PreviewSink>>,
    config: ExecutionConfig,
}

impl ExecutionCoordinator {
    pub fn new(
        registry: Arc<TerminalRegistry>,
        gate: Arc<ConfirmationGate>,
        detector: CompletionDetector,
        events: EventEmitter,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            registry,
            gate,
            detector,
            events,
            preview: None,
            config,
        }
    }

    pub fn with_preview(mut self, preview: Arc<dyn PreviewSink>) -> Self {
        self.preview = Some(preview);
        self
    }

    pub fn gate(&self) -> &Arc<ConfirmationGate> {
        &self.gate
    }

    /// Run `commands` in order on `terminal_id`
    pub async fn run_batch(
        &self,
        terminal_id: &str,
        commands: &[String],
        workspace: &Path,
        is_auto_fix: bool,
        cancel: &CancelFlag,
    ) -> Result<BatchOutcome, TerminalError> {
        let terminal = self.registry.get(terminal_id).await?;
        let _busy = terminal.lock_busy(self.config.busy_wait_timeout()).await?;
        let mut runs = Vec::with_capacity(commands.len());

        log::info!(
            "[Coordinator] Running {} command(s) on {} (auto_fix={})",
            commands.len(),
            terminal_id,
            is_auto_fix
        );

        if self.config.cd_into_workspace && !commands.is_empty() {
            let cd = format!("cd \"{}\"\r", workspace.display().to_string().replace('"', "\\\""));
            self.registry.write(terminal_id, &cd).await?;
            tokio::time::sleep(self.config.settle_delay()).await;
        }

        for (index, command) in commands.iter().enumerate() {
            if cancel.is_cancelled() {
                return Ok(self.cancelled(runs, &commands[index..]));
            }

            self.events.command(command, CommandStatus::PendingConfirmation);
            let decision = self
                .gate
                .request(commands[index..].to_vec(), is_auto_fix, cancel)
                .await;
            if decision == ConfirmationDecision::Cancelled {
                return Ok(self.cancelled(runs, &commands[index..]));
            }
            self.events.command(command, CommandStatus::Confirmed);

            let result = self.execute(&terminal, command, cancel).await?;
            if result.reason == CompletionReason::Cancelled {
                terminal.set_status(TerminalStatus::Idle);
                return Ok(self.cancelled(runs, &commands[index..]));
            }

            if output_indicates_failure(&result.output) {
                terminal.set_status(TerminalStatus::Error);
                self.events.command(command, CommandStatus::Failed);
                let analysis = analyze(&result.output, command);
                log::warn!(
                    "[Coordinator] '{}' failed ({}): {}",
                    command,
                    analysis.error_type,
                    analysis.issue
                );
                return Ok(BatchOutcome::Failed {
                    runs,
                    failure: CommandFailure {
                        command: command.clone(),
                        output: result.output,
                        analysis,
                        working_dir: workspace.to_path_buf(),
                    },
                });
            }

            terminal.set_status(TerminalStatus::Success);
            self.events.command(command, CommandStatus::Succeeded);
            if let Some(url) = &result.preview_url {
                self.open_preview(url).await;
            }

            runs.push(CommandRun {
                command: command.clone(),
                output: result.output,
                reason: result.reason,
            });
        }

        Ok(BatchOutcome::Succeeded { runs })
    }

    async fn execute(
        &self,
        terminal: &TerminalHandle,
        command: &str,
        cancel: &CancelFlag,
    ) -> Result<CompletionResult, TerminalError> {
        terminal.set_status(TerminalStatus::Running);
        self.events.command(command, CommandStatus::Running);

        let mark = terminal.output_len();
        self.registry
            .write(terminal.id(), &format!("{}\r", command))
            .await?;

        Ok(self
            .detector
            .wait_for_completion(terminal, mark, command, cancel)
            .await)
    }

    async fn open_preview(&self, url: &str) {
        log::info!("[Coordinator] Dev server detected at {}", url);
        self.events.preview(url);
        if let Some(preview) = &self.preview {
            preview.open(url).await;
        }
    }

    fn cancelled(&self, runs: Vec<CommandRun>, skipped: &[String]) -> BatchOutcome {
        for command in skipped {
            self.events.command(command, CommandStatus::Cancelled);
        }
        log::info!("[Coordinator] Batch cancelled, {} command(s) skipped", skipped.len());
        BatchOutcome::Cancelled {
            runs,
            skipped: skipped.to_vec(),
        }
    }
}
