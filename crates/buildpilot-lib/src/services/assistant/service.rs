// Assistant Service
//
// Drives one conversation bound to a workspace folder and a terminal:
//   user text -> bounded prompt -> streamed reply -> files -> commands -> repair
//
// Only one turn runs at a time. A turn owns a stream session whose cancel flag
// is shared by the materializer, coordinator and completion detector.

use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use super::completion::CompletionDetector;
use super::confirmation::ConfirmationGate;
use super::context_manager::ContextManager;
use super::coordinator::{BatchOutcome, CommandFailure, ExecutionCoordinator, PreviewSink};
use super::error::{AssistantError, AssistantResult};
use super::materializer::{ArtifactMaterializer, MaterializeOutcome, WorkspaceListener};
use super::parser::{parse, IncrementalParser};
use super::prompt_builder::{gather_workspace_context, render_project_context, SYSTEM_PROMPT};
use super::repair::{RepairLoop, RepairState, RetryContext};
use super::sanitizer::OutputSanitizer;
use super::stream::{CancelFlag, EventEmitter, StreamManager};
use crate::models::{
    ArtifactStatus, AssistantEvent, ConfirmationRequest, Message, MessageStatus, ProjectState,
};
use crate::repositories::StateStore;
use crate::services::gateway::{ChatRequest, LlmGateway};
use crate::services::terminal::TerminalRegistry;
use crate::services::workspace_fs::{list_workspace_files, WorkspaceFs};
use crate::utils::config::AssistantConfig;

/// Characters of recent terminal output attached to each turn
const TERMINAL_CONTEXT_CHARS: usize = 2_000;

/// Collaborators supplied by the host
pub struct AssistantDeps {
    pub gateway: Arc<dyn LlmGateway>,
    pub store: Arc<dyn StateStore>,
    pub fs: Arc<dyn WorkspaceFs>,
    pub registry: Arc<TerminalRegistry>,
    pub preview: Option<Arc<dyn PreviewSink>>,
    pub listener: Option<Arc<dyn WorkspaceListener>>,
}

/// What one turn (or manual retry) produced
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// The streamed reply, or the last repair reply for a manual retry
    pub message: Message,
    pub files: Vec<MaterializeOutcome>,
    /// Every command batch that ran, repair batches included
    pub batches: Vec<BatchOutcome>,
    pub repair_state: RepairState,
}

impl TurnOutcome {
    fn new(message: Message) -> Self {
        Self {
            message,
            files: Vec::new(),
            batches: Vec::new(),
            repair_state: RepairState::Idle,
        }
    }

    /// The failure still standing at the end of the turn
    pub fn unresolved_failure(&self) -> Option<&CommandFailure> {
        self.batches.last().and_then(|b| b.failure())
    }
}

pub struct AssistantService {
    gateway: Arc<dyn LlmGateway>,
    store: Arc<dyn StateStore>,
    fs: Arc<dyn WorkspaceFs>,
    registry: Arc<TerminalRegistry>,
    context: ContextManager,
    materializer: ArtifactMaterializer,
    coordinator: ExecutionCoordinator,
    repair: RepairLoop,
    streams: StreamManager,
    events: EventEmitter,
    sanitizer: OutputSanitizer,
    config: AssistantConfig,
    workspace: PathBuf,
    workspace_key: String,
    terminal_id: String,
    messages: Mutex<Vec<Message>>,
    turn_lock: tokio::sync::Mutex<()>,
}

impl AssistantService {
    /// Open the assistant for `workspace`: restores persisted history and
    /// project state, and starts a terminal in the workspace.
    pub async fn open(
        deps: AssistantDeps,
        config: AssistantConfig,
        workspace: impl Into<PathBuf>,
    ) -> AssistantResult<Self> {
        let workspace = workspace.into();
        let workspace_key = workspace.display().to_string();
        let events = EventEmitter::new();

        let terminal = deps.registry.create(&workspace).await?;
        let messages = deps
            .store
            .load_messages(&workspace_key)
            .map_err(AssistantError::Storage)?;

        let context = ContextManager::load(
            deps.gateway.clone(),
            deps.store.clone(),
            config.context.clone(),
            workspace_key.clone(),
        );

        let mut materializer =
            ArtifactMaterializer::new(deps.fs.clone(), events.clone(), config.execution.settle_delay());
        if let Some(listener) = deps.listener {
            materializer = materializer.with_listener(listener);
        }

        let gate = Arc::new(ConfirmationGate::new(
            events.clone(),
            config.execution.require_confirmation,
        ));
        let mut coordinator = ExecutionCoordinator::new(
            deps.registry.clone(),
            gate,
            CompletionDetector::new(config.completion.clone()),
            events.clone(),
            config.execution.clone(),
        );
        if let Some(preview) = deps.preview {
            coordinator = coordinator.with_preview(preview);
        }

        let repair = RepairLoop::new(config.repair.clone(), events.clone());

        log::info!(
            "[Assistant] Opened {} with {} stored message(s), terminal {}",
            workspace_key,
            messages.len(),
            terminal.id()
        );

        Ok(Self {
            gateway: deps.gateway,
            store: deps.store,
            fs: deps.fs,
            registry: deps.registry,
            context,
            materializer,
            coordinator,
            repair,
            streams: StreamManager::new(),
            events,
            sanitizer: OutputSanitizer::new(),
            config,
            workspace,
            workspace_key,
            terminal_id: terminal.id().to_string(),
            messages: Mutex::new(messages),
            turn_lock: tokio::sync::Mutex::new(()),
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<AssistantEvent> {
        self.events.subscribe()
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn terminal_id(&self) -> &str {
        &self.terminal_id
    }

    pub fn messages(&self) -> Vec<Message> {
        self.with_messages(|messages| messages.clone())
    }

    pub fn project_state(&self) -> ProjectState {
        self.context.project_state()
    }

    pub fn reset_project_state(&self) -> AssistantResult<()> {
        self.context.reset_project_state().map_err(AssistantError::Storage)
    }

    /// Record a design decision shown in every later prompt
    pub fn add_decision(&self, text: &str) -> AssistantResult<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AssistantError::InvalidInput("Decision is empty".to_string()));
        }
        self.context.add_decision(text);
        Ok(())
    }

    /// Record a project constraint. Returns false when it is already known.
    pub fn add_constraint(&self, constraint: &str) -> AssistantResult<bool> {
        let constraint = constraint.trim();
        if constraint.is_empty() {
            return Err(AssistantError::InvalidInput("Constraint is empty".to_string()));
        }
        Ok(self.context.add_constraint(constraint))
    }

    pub fn repair_state(&self) -> RepairState {
        self.repair.state()
    }

    pub fn retry_context(&self) -> Option<RetryContext> {
        self.repair.retry_context()
    }

    pub fn pending_confirmation(&self) -> Option<ConfirmationRequest> {
        self.coordinator.gate().pending_request()
    }

    pub fn resolve_confirmation(&self, request_id: &str, approved: bool) -> AssistantResult<()> {
        self.coordinator
            .gate()
            .resolve(request_id, approved)
            .map_err(AssistantError::InvalidInput)
    }

    pub fn set_require_confirmation(&self, required: bool) {
        self.coordinator.gate().set_require_confirmation(required);
    }

    // =========================================================================
    // Turns
    // =========================================================================

    /// Send a user message and run the whole turn
    pub async fn send_message(&self, text: &str) -> AssistantResult<TurnOutcome> {
        let content = self.sanitizer.sanitize_user_input(text)?;
        let _turn = self
            .turn_lock
            .try_lock()
            .map_err(|_| AssistantError::TurnInProgress)?;

        self.repair.reset();
        let (session_id, mut cancel_rx, cancel) = self.streams.create_session().await;
        let result = self.run_turn(content, &mut cancel_rx, &cancel).await;
        self.streams.remove_session(&session_id).await;

        if let Err(e) = &result {
            self.report(e);
        }
        result
    }

    /// Ask the gateway again to fix the failure kept after automatic repair stopped
    pub async fn retry_last_failure(&self) -> AssistantResult<TurnOutcome> {
        let _turn = self
            .turn_lock
            .try_lock()
            .map_err(|_| AssistantError::TurnInProgress)?;
        let context = self
            .repair
            .begin_manual_retry()
            .ok_or(AssistantError::NoRetryAvailable)?;

        let (session_id, mut cancel_rx, cancel) = self.streams.create_session().await;
        let result = self.run_manual_retry(context, &mut cancel_rx, &cancel).await;
        self.streams.remove_session(&session_id).await;

        if let Err(e) = &result {
            self.report(e);
        }
        result
    }

    /// Stop the active stream, pending confirmation and command loop.
    /// Returns true if anything was running.
    pub async fn cancel(&self) -> bool {
        let sessions = self.streams.cancel_all().await;
        let pending = self.coordinator.gate().cancel_pending();
        if sessions > 0 || pending {
            log::info!("[Assistant] Cancelled active turn");
        }
        sessions > 0 || pending
    }

    async fn run_turn(
        &self,
        content: String,
        cancel_rx: &mut mpsc::Receiver<()>,
        cancel: &CancelFlag,
    ) -> AssistantResult<TurnOutcome> {
        self.push_message(Message::user(content));

        let history = self.messages();
        let mut prepared = self.context.build_prompt(&history).await;
        if self.config.execution.include_workspace_context {
            if let Some(block) = self.workspace_context().await {
                prepared.system.push(block);
            }
        }

        let message = self.stream_reply(prepared.into_request(), cancel_rx, cancel).await?;
        let mut outcome = TurnOutcome::new(message);

        if outcome.message.status == MessageStatus::Complete {
            let text = outcome.message.content.clone();
            self.process_response(&text, false, None, cancel, &mut outcome).await?;
            self.drive_repair(cancel_rx, cancel, &mut outcome).await;
        }

        outcome.repair_state = self.repair.state();
        Ok(outcome)
    }

    /// Stream the reply into a new assistant message. A cancelled stream
    /// keeps the partial text as a truncated message.
    async fn stream_reply(
        &self,
        request: ChatRequest,
        cancel_rx: &mut mpsc::Receiver<()>,
        cancel: &CancelFlag,
    ) -> AssistantResult<Message> {
        let mut message = Message::assistant_streaming();
        let mut parser = IncrementalParser::new();

        let mut stream = match self.gateway.stream_chat(request).await {
            Ok(stream) => stream,
            Err(e) => {
                message.status = MessageStatus::Error;
                self.finish_message(message);
                return Err(e.into());
            }
        };

        let mut failure = None;
        loop {
            if cancel.is_cancelled() {
                message.status = MessageStatus::Truncated;
                break;
            }
            tokio::select! {
                _ = cancel_rx.recv() => {
                    message.status = MessageStatus::Truncated;
                    break;
                }
                item = stream.next() => match item {
                    Some(Ok(token)) => {
                        for artifact in parser.push(&token) {
                            self.events.artifact(&artifact.filename, ArtifactStatus::Extracted, None);
                        }
                        self.events.token(&message.id, &token);
                    }
                    Some(Err(e)) => {
                        message.status = MessageStatus::Error;
                        failure = Some(e);
                        break;
                    }
                    None => {
                        message.status = MessageStatus::Complete;
                        break;
                    }
                },
            }
        }

        message.content = parser.text().to_string();
        if message.status == MessageStatus::Truncated {
            log::info!("[Assistant] Stream cancelled after {} chars", message.content.len());
        }
        self.finish_message(message.clone());

        match failure {
            Some(e) => Err(e.into()),
            None => Ok(message),
        }
    }

    /// Materialize every artifact, then run the commands. With no commands in
    /// the reply, `fallback` is re-run instead.
    async fn process_response(
        &self,
        text: &str,
        is_auto_fix: bool,
        fallback: Option<&str>,
        cancel: &CancelFlag,
        outcome: &mut TurnOutcome,
    ) -> AssistantResult<()> {
        let parsed = parse(text);

        let files = self
            .materializer
            .materialize_all(&parsed.artifacts, &self.workspace, cancel)
            .await;
        for file in files.iter().filter(|f| !f.is_created()) {
            self.report(&AssistantError::MaterializationFailed {
                filename: file.filename.clone(),
                reason: file.error.clone().unwrap_or_default(),
            });
        }
        outcome.files.extend(files);

        let mut commands = parsed.command_texts();
        if commands.is_empty() {
            if let Some(command) = fallback {
                commands.push(command.to_string());
            }
        }
        if commands.is_empty() || cancel.is_cancelled() {
            return Ok(());
        }

        let batch = self
            .coordinator
            .run_batch(&self.terminal_id, &commands, &self.workspace, is_auto_fix, cancel)
            .await?;
        outcome.batches.push(batch);
        Ok(())
    }

    /// Automatic repair until the failure is gone or the budget is spent
    async fn drive_repair(
        &self,
        cancel_rx: &mut mpsc::Receiver<()>,
        cancel: &CancelFlag,
        outcome: &mut TurnOutcome,
    ) {
        while let Some(failure) = outcome.unresolved_failure().cloned() {
            if cancel.is_cancelled() {
                break;
            }
            let conversation = self.messages();
            if !self.repair.begin_attempt(&failure, &conversation) {
                self.events.notice(&format!(
                    "'{}' still fails. Use retry to ask for another fix.",
                    failure.command
                ));
                break;
            }
            if let Err(e) = self
                .attempt_fix(&failure, &conversation, cancel_rx, cancel, outcome)
                .await
            {
                self.repair.await_manual_retry(&failure, &conversation, e.to_string());
                self.report(&e);
                break;
            }
            if cancel.is_cancelled() {
                self.repair
                    .await_manual_retry(&failure, &conversation, "cancelled".to_string());
                break;
            }
            if outcome.unresolved_failure().is_none() {
                self.repair.mark_resolved();
            }
        }
    }

    async fn run_manual_retry(
        &self,
        context: RetryContext,
        cancel_rx: &mut mpsc::Receiver<()>,
        cancel: &CancelFlag,
    ) -> AssistantResult<TurnOutcome> {
        let mut outcome = TurnOutcome::new(Message::assistant(String::new()));
        let failure = context.failure;

        if let Err(e) = self
            .attempt_fix(&failure, &context.conversation, cancel_rx, cancel, &mut outcome)
            .await
        {
            self.repair.await_manual_retry(&failure, &context.conversation, e.to_string());
            return Err(e);
        }
        if cancel.is_cancelled() {
            self.repair
                .await_manual_retry(&failure, &context.conversation, "cancelled".to_string());
            outcome.repair_state = self.repair.state();
            return Ok(outcome);
        }

        match outcome.unresolved_failure().cloned() {
            Some(next) => {
                self.repair
                    .await_manual_retry(&next, &self.messages(), "manual retry failed".to_string())
            }
            None => self.repair.mark_resolved(),
        }
        outcome.repair_state = self.repair.state();
        Ok(outcome)
    }

    /// One fix request for `failure`, fed back through the normal pipeline.
    /// A cancel while waiting for the reply leaves the outcome untouched.
    async fn attempt_fix(
        &self,
        failure: &CommandFailure,
        conversation: &[Message],
        cancel_rx: &mut mpsc::Receiver<()>,
        cancel: &CancelFlag,
        outcome: &mut TurnOutcome,
    ) -> AssistantResult<()> {
        let terminal_output = self.registry.get_output(&self.terminal_id).await.ok();
        let listing = list_workspace_files(
            self.fs.as_ref(),
            &self.workspace,
            self.config.repair.max_listed_files,
        )
        .await;
        let instruction = self
            .repair
            .repair_instruction(failure, terminal_output.as_deref(), Some(&listing));

        let mut system = Vec::new();
        if let Some(preamble) = render_project_context(&self.context.project_state()) {
            system.push(preamble);
        }
        system.push(SYSTEM_PROMPT.to_string());
        let request = self.repair.build_request(system, conversation, &instruction);

        let reply = tokio::select! {
            _ = cancel_rx.recv() => {
                log::info!("[Assistant] Fix request for '{}' cancelled", failure.command);
                return Ok(());
            }
            reply = self.gateway.complete(request) => reply?,
        };
        if cancel.is_cancelled() {
            return Ok(());
        }

        self.push_message(Message::system(instruction));
        let message = Message::assistant(reply);
        self.finish_message(message.clone());
        outcome.message = message.clone();

        self.process_response(&message.content, true, Some(failure.command.as_str()), cancel, outcome)
            .await
    }

    async fn workspace_context(&self) -> Option<String> {
        let terminal_output = self.registry.get_output(&self.terminal_id).await.ok();
        gather_workspace_context(
            self.fs.as_ref(),
            &self.workspace,
            terminal_output.as_deref(),
            TERMINAL_CONTEXT_CHARS,
            self.config.execution.max_listed_files,
            &self.sanitizer,
        )
        .await
    }

    // =========================================================================
    // History
    // =========================================================================

    fn finish_message(&self, message: Message) {
        self.events.message_complete(&message.id, message.status);
        self.push_message(message);
    }

    fn push_message(&self, message: Message) {
        let snapshot = self.with_messages(|messages| {
            messages.push(message);
            messages.clone()
        });
        if let Err(e) = self.store.save_messages(&self.workspace_key, &snapshot) {
            log::error!("[Assistant] Failed to persist conversation: {}", e);
        }
    }

    fn with_messages<T>(&self, f: impl FnOnce(&mut Vec<Message>) -> T) -> T {
        match self.messages.lock() {
            Ok(mut messages) => f(&mut messages),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    fn report(&self, err: &AssistantError) {
        log::warn!("[Assistant] {}: {}", err.code().as_str(), err);
        self.events
            .error(err.code().as_str(), &err.to_string(), err.is_retryable());
    }
}
