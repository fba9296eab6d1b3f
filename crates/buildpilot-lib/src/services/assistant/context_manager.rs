// Context Window Manager
//
// Builds the bounded prompt for each turn:
//   system:   project-context preamble, base system prompt, history summary
//   messages: first K turns + turns past the summary + last N turns
//
// The summary covers [K, end) and is regenerated once the turns between its
// end and the recent window reach the refresh interval.

use std::sync::{Arc, Mutex};

use super::prompt_builder::{render_project_context, render_summary, summarize_request, SYSTEM_PROMPT};
use super::state_extractor::extract_project_state;
use crate::models::{ConversationSummary, Message, ProjectState};
use crate::repositories::StateStore;
use crate::services::gateway::{ChatMessage, ChatRequest, GatewayError, LlmGateway};
use crate::utils::config::ContextConfig;

/// Prompt ready to send to the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedContext {
    pub system: Vec<String>,
    pub messages: Vec<ChatMessage>,
    /// A history summary replaced part of the conversation
    pub summarized: bool,
}

impl PreparedContext {
    pub fn into_request(self) -> ChatRequest {
        ChatRequest::new(self.system, self.messages)
    }
}

pub struct ContextManager {
    gateway: Arc<dyn LlmGateway>,
    store: Arc<dyn StateStore>,
    config: ContextConfig,
    workspace: String,
    project_state: Mutex<ProjectState>,
    summary: Mutex<Option<ConversationSummary>>,
}

impl ContextManager {
    /// Load the persisted state of `workspace`. Storage errors are logged
    /// and the manager starts empty.
    pub fn load(
        gateway: Arc<dyn LlmGateway>,
        store: Arc<dyn StateStore>,
        config: ContextConfig,
        workspace: impl Into<String>,
    ) -> Self {
        let workspace = workspace.into();

        let project_state = store
            .load_project_state(&workspace)
            .unwrap_or_else(|e| {
                log::error!("[ContextManager] Failed to load project state: {}", e);
                None
            })
            .unwrap_or_default();
        let summary = store.load_summary(&workspace).unwrap_or_else(|e| {
            log::error!("[ContextManager] Failed to load summary: {}", e);
            None
        });

        Self {
            gateway,
            store,
            config,
            workspace,
            project_state: Mutex::new(project_state),
            summary: Mutex::new(summary),
        }
    }

    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    pub fn project_state(&self) -> ProjectState {
        match self.project_state.lock() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn summary(&self) -> Option<ConversationSummary> {
        self.summary.lock().ok().and_then(|s| s.clone())
    }

    /// Forget project facts and the cached summary
    pub fn reset_project_state(&self) -> Result<(), String> {
        self.update_state(|state| {
            *state = ProjectState::new();
            true
        });
        self.set_summary(None);
        self.store.delete_project_state(&self.workspace)?;
        self.store.save_summary(&self.workspace, None)?;
        log::info!("[ContextManager] Reset project state for {}", self.workspace);
        Ok(())
    }

    pub fn add_decision(&self, text: &str) {
        self.update_state(|state| {
            state.add_decision(text);
            true
        });
    }

    /// Returns false for an empty or already recorded constraint
    pub fn add_constraint(&self, constraint: &str) -> bool {
        self.update_state(|state| state.add_constraint(constraint))
    }

    /// Build the prompt for `history`, the full conversation including the
    /// newest user message. May call the gateway once to summarize.
    pub async fn build_prompt(&self, history: &[Message]) -> PreparedContext {
        self.update_state(|state| extract_project_state(state, history, &self.config));

        let mut system = Vec::new();
        if let Some(preamble) = render_project_context(&self.project_state()) {
            system.push(preamble);
        }
        system.push(SYSTEM_PROMPT.to_string());

        let total = history.len();
        let keep_initial = self.config.keep_initial_messages;
        let keep_recent = self.config.keep_recent_messages;

        if total <= self.config.conversation_threshold || keep_initial + keep_recent >= total {
            return PreparedContext {
                system,
                messages: history.iter().map(ChatMessage::from).collect(),
                summarized: false,
            };
        }

        let middle_end = total - keep_recent;
        let summary = self.summary_for(history, keep_initial, middle_end).await;
        // Without any summary the middle segment is dropped
        let covered_end = summary.as_ref().map_or(middle_end, |s| s.covered_end);
        if let Some(summary) = &summary {
            system.push(render_summary(summary));
        }

        let messages = history[..keep_initial]
            .iter()
            .chain(&history[covered_end..middle_end])
            .chain(&history[middle_end..])
            .map(ChatMessage::from)
            .collect();

        PreparedContext {
            system,
            messages,
            summarized: summary.is_some(),
        }
    }

    /// Cached summary when still fresh, otherwise a new one for [start, end)
    async fn summary_for(&self, history: &[Message], start: usize, end: usize) -> Option<ConversationSummary> {
        let cached = self
            .summary()
            .filter(|s| s.covered_start == start && s.covered_end > start && s.covered_end <= end);

        if let Some(cached) = &cached {
            if end - cached.covered_end < self.config.summary_refresh_interval {
                return Some(cached.clone());
            }
        }

        log::info!(
            "[ContextManager] Summarizing messages [{}, {}) of {}",
            start,
            end,
            history.len()
        );
        match self.summarize(&history[start..end]).await {
            Ok(text) => {
                let summary = ConversationSummary::new(text, start, end);
                self.set_summary(Some(summary.clone()));
                if let Err(e) = self.store.save_summary(&self.workspace, Some(&summary)) {
                    log::error!("[ContextManager] Failed to persist summary: {}", e);
                }
                Some(summary)
            }
            Err(e) => {
                log::warn!("[ContextManager] Summarization failed, using previous summary: {}", e);
                cached
            }
        }
    }

    async fn summarize(&self, messages: &[Message]) -> Result<String, GatewayError> {
        let request = summarize_request(messages, self.config.summary_message_chars);
        let text = self.gateway.complete(request).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(GatewayError::ParseError("empty summary".to_string()));
        }
        Ok(text.to_string())
    }

    /// Apply `f` and persist when it reports a change
    fn update_state(&self, f: impl FnOnce(&mut ProjectState) -> bool) -> bool {
        let snapshot = {
            let mut state = match self.project_state.lock() {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
            if !f(&mut state) {
                return false;
            }
            state.clone()
        };
        if let Err(e) = self.store.save_project_state(&self.workspace, &snapshot) {
            log::error!("[ContextManager] Failed to persist project state: {}", e);
        }
        true
    }

    fn set_summary(&self, summary: Option<ConversationSummary>) {
        match self.summary.lock() {
            Ok(mut slot) => *slot = summary,
            Err(poisoned) => *poisoned.into_inner() = summary,
        }
    }
}
