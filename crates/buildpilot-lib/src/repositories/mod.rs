// Repository Layer
// Persistence for project state, conversation summaries and chat history,
// keyed by workspace path

pub mod conversation_repo;
pub mod project_state_repo;

use std::collections::HashMap;
use std::sync::Mutex;

pub use conversation_repo::ConversationRepository;
pub use project_state_repo::ProjectStateRepository;

use crate::models::{ConversationSummary, Message, ProjectState};
use crate::utils::database::Database;

/// Storage seam used by the assistant service
pub trait StateStore: Send + Sync {
    fn load_project_state(&self, workspace: &str) -> Result<Option<ProjectState>, String>;
    fn save_project_state(&self, workspace: &str, state: &ProjectState) -> Result<(), String>;
    fn delete_project_state(&self, workspace: &str) -> Result<(), String>;

    fn load_summary(&self, workspace: &str) -> Result<Option<ConversationSummary>, String>;
    /// `None` clears the cached summary
    fn save_summary(&self, workspace: &str, summary: Option<&ConversationSummary>) -> Result<(), String>;

    fn load_messages(&self, workspace: &str) -> Result<Vec<Message>, String>;
    fn save_messages(&self, workspace: &str, messages: &[Message]) -> Result<(), String>;
}

/// SQLite-backed store
pub struct SqliteStateStore {
    project_states: ProjectStateRepository,
    conversations: ConversationRepository,
}

impl SqliteStateStore {
    pub fn new(db: Database) -> Self {
        Self {
            project_states: ProjectStateRepository::new(db.clone()),
            conversations: ConversationRepository::new(db),
        }
    }
}

impl StateStore for SqliteStateStore {
    fn load_project_state(&self, workspace: &str) -> Result<Option<ProjectState>, String> {
        self.project_states.get(workspace)
    }

    fn save_project_state(&self, workspace: &str, state: &ProjectState) -> Result<(), String> {
        self.project_states.save(workspace, state)
    }

    fn delete_project_state(&self, workspace: &str) -> Result<(), String> {
        self.project_states.delete(workspace).map(|_| ())
    }

    fn load_summary(&self, workspace: &str) -> Result<Option<ConversationSummary>, String> {
        self.conversations.get_summary(workspace)
    }

    fn save_summary(&self, workspace: &str, summary: Option<&ConversationSummary>) -> Result<(), String> {
        match summary {
            Some(summary) => self.conversations.save_summary(workspace, summary),
            None => self.conversations.delete_summary(workspace),
        }
    }

    fn load_messages(&self, workspace: &str) -> Result<Vec<Message>, String> {
        self.conversations.get_messages(workspace)
    }

    fn save_messages(&self, workspace: &str, messages: &[Message]) -> Result<(), String> {
        self.conversations.replace_messages(workspace, messages)
    }
}

#[derive(Default)]
struct MemoryState {
    project_states: HashMap<String, ProjectState>,
    summaries: HashMap<String, ConversationSummary>,
    messages: HashMap<String, Vec<Message>>,
}

/// Non-persistent store for ephemeral sessions
#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<MemoryState>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> Result<T, String> {
        let mut state = self
            .inner
            .lock()
            .map_err(|e| format!("Failed to lock state store: {}", e))?;
        Ok(f(&mut state))
    }
}

impl StateStore for MemoryStateStore {
    fn load_project_state(&self, workspace: &str) -> Result<Option<ProjectState>, String> {
        self.with_state(|s| s.project_states.get(workspace).cloned())
    }

    fn save_project_state(&self, workspace: &str, state: &ProjectState) -> Result<(), String> {
        self.with_state(|s| {
            s.project_states.insert(workspace.to_string(), state.clone());
        })
    }

    fn delete_project_state(&self, workspace: &str) -> Result<(), String> {
        self.with_state(|s| {
            s.project_states.remove(workspace);
        })
    }

    fn load_summary(&self, workspace: &str) -> Result<Option<ConversationSummary>, String> {
        self.with_state(|s| s.summaries.get(workspace).cloned())
    }

    fn save_summary(&self, workspace: &str, summary: Option<&ConversationSummary>) -> Result<(), String> {
        self.with_state(|s| match summary {
            Some(summary) => {
                s.summaries.insert(workspace.to_string(), summary.clone());
            }
            None => {
                s.summaries.remove(workspace);
            }
        })
    }

    fn load_messages(&self, workspace: &str) -> Result<Vec<Message>, String> {
        self.with_state(|s| s.messages.get(workspace).cloned().unwrap_or_default())
    }

    fn save_messages(&self, workspace: &str, messages: &[Message]) -> Result<(), String> {
        self.with_state(|s| {
            s.messages.insert(workspace.to_string(), messages.to_vec());
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn exercise(store: &dyn StateStore) {
        let mut state = ProjectState::new();
        state.set_goal_if_empty("Landing page");
        store.save_project_state("/w", &state).unwrap();
        assert_eq!(
            store.load_project_state("/w").unwrap().and_then(|s| s.project_goal),
            Some("Landing page".to_string())
        );
        store.delete_project_state("/w").unwrap();
        assert_eq!(store.load_project_state("/w").unwrap(), None);

        let summary = ConversationSummary::new("summary".into(), 2, 21);
        store.save_summary("/w", Some(&summary)).unwrap();
        assert_eq!(store.load_summary("/w").unwrap().map(|s| s.covered_end), Some(21));
        store.save_summary("/w", None).unwrap();
        assert_eq!(store.load_summary("/w").unwrap(), None);

        store
            .save_messages("/w", &[Message::user("a"), Message::assistant("b")])
            .unwrap();
        let contents: Vec<String> = store
            .load_messages("/w")
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["a", "b"]);
        assert!(store.load_messages("/other").unwrap().is_empty());
    }

    #[test]
    fn test_sqlite_store() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("state.db")).unwrap();
        exercise(&SqliteStateStore::new(db));
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryStateStore::new());
    }

    #[test]
    fn test_sqlite_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db");
        {
            let store = SqliteStateStore::new(Database::new(path.clone()).unwrap());
            store.save_messages("/w", &[Message::user("persisted")]).unwrap();
        }
        let store = SqliteStateStore::new(Database::new(path).unwrap());
        assert_eq!(store.load_messages("/w").unwrap()[0].content, "persisted");
    }
}
