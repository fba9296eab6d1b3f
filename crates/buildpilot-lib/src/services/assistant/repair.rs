// Auto-Repair Loop
//
// Idle -> Repairing -> Resolved
//                   -> AwaitingManualRetry
//
// A failed command gets at most `max_auto_repairs` automatic fix requests per
// user turn. When the budget is spent, or the fix request itself fails, the
// failure is kept as a RetryContext until the user retries or starts a new turn.

use serde::Serialize;
use std::sync::Mutex;

use super::coordinator::CommandFailure;
use super::prompt_builder::RepairPrompt;
use super::sanitizer::OutputSanitizer;
use super::stream::EventEmitter;
use crate::models::Message;
use crate::services::gateway::{ChatMessage, ChatRequest};
use crate::services::workspace_fs::FileListing;
use crate::utils::config::RepairConfig;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RepairState {
    Idle,
    Repairing,
    Resolved,
    AwaitingManualRetry,
}

impl RepairState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepairState::Idle => "idle",
            RepairState::Repairing => "repairing",
            RepairState::Resolved => "resolved",
            RepairState::AwaitingManualRetry => "awaiting_manual_retry",
        }
    }
}

/// Everything needed to retry a failed command later
#[derive(Debug, Clone, PartialEq)]
pub struct RetryContext {
    pub failure: CommandFailure,
    /// Conversation as it was when the failure happened
    pub conversation: Vec<Message>,
    /// Why automatic repair stopped
    pub reason: String,
}

struct Inner {
    state: RepairState,
    attempts: u32,
    retry: Option<RetryContext>,
}

pub struct RepairLoop {
    inner: Mutex<Inner>,
    config: RepairConfig,
    events: EventEmitter,
    sanitizer: OutputSanitizer,
}

impl RepairLoop {
    pub fn new(config: RepairConfig, events: EventEmitter) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: RepairState::Idle,
                attempts: 0,
                retry: None,
            }),
            config,
            events,
            sanitizer: OutputSanitizer::new(),
        }
    }

    pub fn config(&self) -> &RepairConfig {
        &self.config
    }

    pub fn state(&self) -> RepairState {
        self.with_inner(|inner| inner.state)
    }

    pub fn attempts(&self) -> u32 {
        self.with_inner(|inner| inner.attempts)
    }

    pub fn retry_context(&self) -> Option<RetryContext> {
        self.with_inner(|inner| inner.retry.clone())
    }

    /// Start of a new user turn: budget restored, pending retry dropped
    pub fn reset(&self) {
        self.with_inner(|inner| {
            inner.attempts = 0;
            inner.retry = None;
        });
        self.transition(RepairState::Idle);
    }

    /// Decide whether `failure` gets an automatic fix request. Returns false
    /// once the budget is spent, leaving the loop awaiting a manual retry.
    pub fn begin_attempt(&self, failure: &CommandFailure, conversation: &[Message]) -> bool {
        let allowed = self.with_inner(|inner| {
            if inner.attempts < self.config.max_auto_repairs {
                inner.attempts += 1;
                true
            } else {
                false
            }
        });

        if allowed {
            log::info!(
                "[Repair] Auto-repair attempt {}/{} for '{}'",
                self.attempts(),
                self.config.max_auto_repairs,
                failure.command
            );
            self.transition(RepairState::Repairing);
        } else {
            self.await_manual_retry(
                failure,
                conversation,
                "automatic repair budget exhausted".to_string(),
            );
        }
        allowed
    }

    /// Begin a user-requested retry. Does not consume the automatic budget.
    pub fn begin_manual_retry(&self) -> Option<RetryContext> {
        let context = self.with_inner(|inner| {
            if inner.state == RepairState::AwaitingManualRetry {
                inner.retry.take()
            } else {
                None
            }
        })?;
        log::info!("[Repair] Manual retry of '{}'", context.failure.command);
        self.transition(RepairState::Repairing);
        Some(context)
    }

    pub fn mark_resolved(&self) {
        self.with_inner(|inner| inner.retry = None);
        self.transition(RepairState::Resolved);
    }

    /// Stop repairing and keep the failure for a manual retry
    pub fn await_manual_retry(&self, failure: &CommandFailure, conversation: &[Message], reason: String) {
        log::warn!("[Repair] Waiting for manual retry of '{}': {}", failure.command, reason);
        self.with_inner(|inner| {
            inner.retry = Some(RetryContext {
                failure: failure.clone(),
                conversation: conversation.to_vec(),
                reason,
            });
        });
        self.transition(RepairState::AwaitingManualRetry);
    }

    /// The instruction sent to the gateway for `failure`
    pub fn repair_instruction(
        &self,
        failure: &CommandFailure,
        terminal_output: Option<&str>,
        workspace_files: Option<&FileListing>,
    ) -> String {
        RepairPrompt {
            command: &failure.command,
            output: &failure.output,
            working_dir: &failure.working_dir,
            analysis: &failure.analysis,
            terminal_output,
            workspace_files,
            tail_chars: self.config.output_tail_chars,
        }
        .render(&self.sanitizer)
    }

    /// Non-streaming fix request: recent turns plus `instruction`
    pub fn build_request(&self, system: Vec<String>, conversation: &[Message], instruction: &str) -> ChatRequest {
        let start = conversation.len().saturating_sub(self.config.history_turns);
        let mut messages: Vec<ChatMessage> = conversation[start..].iter().map(ChatMessage::from).collect();
        messages.push(ChatMessage::user(instruction));
        ChatRequest::new(system, messages)
    }

    fn transition(&self, next: RepairState) {
        let previous = self.with_inner(|inner| std::mem::replace(&mut inner.state, next));
        if previous != next {
            log::debug!("[Repair] {} -> {}", previous.as_str(), next.as_str());
            self.events.repair_state(next.as_str());
        }
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        match self.inner.lock() {
            Ok(mut inner) => f(&mut inner),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssistantEvent, ErrorAnalysis, ErrorType};
    use std::path::PathBuf;

    fn failure(command: &str) -> CommandFailure {
        CommandFailure {
            command: command.to_string(),
            output: "npm ERR! Missing script: \"start\"".to_string(),
            analysis: ErrorAnalysis {
                error_type: ErrorType::NpmError,
                issue: "Missing npm script".to_string(),
                file: None,
                line: None,
                fix_plan: vec![],
            },
            working_dir: PathBuf::from("/work"),
        }
    }

    fn repair_loop(max: u32) -> (RepairLoop, EventEmitter) {
        let events = EventEmitter::new();
        let config = RepairConfig {
            max_auto_repairs: max,
            ..RepairConfig::default()
        };
        (RepairLoop::new(config, events.clone()), events)
    }

    #[test]
    fn test_budget_allows_one_attempt() {
        let (repair, _) = repair_loop(1);
        let f = failure("npm start");

        assert!(repair.begin_attempt(&f, &[]));
        assert_eq!(repair.state(), RepairState::Repairing);

        assert!(!repair.begin_attempt(&f, &[Message::user("hi")]));
        assert_eq!(repair.state(), RepairState::AwaitingManualRetry);
        let context = repair.retry_context().unwrap();
        assert_eq!(context.failure.command, "npm start");
        assert_eq!(context.conversation.len(), 1);
    }

    #[test]
    fn test_zero_budget_goes_straight_to_manual() {
        let (repair, _) = repair_loop(0);
        assert!(!repair.begin_attempt(&failure("npm test"), &[]));
        assert_eq!(repair.state(), RepairState::AwaitingManualRetry);
    }

    #[test]
    fn test_manual_retry_takes_context_once() {
        let (repair, _) = repair_loop(0);
        repair.begin_attempt(&failure("npm test"), &[]);

        let context = repair.begin_manual_retry().unwrap();
        assert_eq!(context.failure.command, "npm test");
        assert_eq!(repair.state(), RepairState::Repairing);
        assert!(repair.begin_manual_retry().is_none());

        repair.mark_resolved();
        assert_eq!(repair.state(), RepairState::Resolved);
        assert!(repair.retry_context().is_none());
    }

    #[test]
    fn test_reset_restores_budget() {
        let (repair, _) = repair_loop(1);
        repair.begin_attempt(&failure("a"), &[]);
        repair.begin_attempt(&failure("a"), &[]);

        repair.reset();

        assert_eq!(repair.state(), RepairState::Idle);
        assert_eq!(repair.attempts(), 0);
        assert!(repair.retry_context().is_none());
        assert!(repair.begin_attempt(&failure("a"), &[]));
    }

    #[tokio::test]
    async fn test_transitions_are_published() {
        let (repair, events) = repair_loop(1);
        let mut rx = events.subscribe();

        repair.begin_attempt(&failure("npm start"), &[]);
        repair.mark_resolved();

        assert_eq!(
            rx.recv().await.unwrap(),
            AssistantEvent::RepairState { state: "repairing".into() }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            AssistantEvent::RepairState { state: "resolved".into() }
        );
    }

    #[test]
    fn test_request_uses_recent_turns() {
        let (repair, _) = repair_loop(1);
        let conversation: Vec<Message> = (0..10).map(|i| Message::user(format!("m{}", i))).collect();

        let instruction = repair.repair_instruction(&failure("npm start"), None, None);
        let request = repair.build_request(vec!["system".into()], &conversation, &instruction);

        assert_eq!(request.messages.len(), 7);
        assert_eq!(request.messages[0].content, "m4");
        assert!(request.messages[6].content.contains("npm start"));
        assert!(request.messages[6].content.contains("Missing script"));
        assert_eq!(request.system, vec!["system"]);
    }
}
