// Stream sessions and assistant events
//
// - StreamManager tracks the active response stream of each turn so it can be
//   cancelled from outside
// - CancelFlag is the cooperative cancellation signal checked between steps
//   by the materializer, coordinator and completion detector
// - EventEmitter publishes AssistantEvents to the host UI

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use uuid::Uuid;

use crate::models::{
    ArtifactStatus, AssistantEvent, CommandStatus, ConfirmationRequest, MessageStatus,
};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Shared cooperative cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct StreamSession {
    cancel_tx: mpsc::Sender<()>,
    flag: CancelFlag,
}

/// Manages active streaming sessions
pub struct StreamManager {
    sessions: Arc<RwLock<HashMap<String, StreamSession>>>,
}

impl StreamManager {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a new streaming session.
    /// Returns (session_id, cancel_receiver, cancel_flag)
    pub async fn create_session(&self) -> (String, mpsc::Receiver<()>, CancelFlag) {
        let session_id = format!("stream_{}", Uuid::new_v4().simple());
        let (cancel_tx, cancel_rx) = mpsc::channel(1);
        let flag = CancelFlag::new();

        self.sessions.write().await.insert(
            session_id.clone(),
            StreamSession {
                cancel_tx,
                flag: flag.clone(),
            },
        );

        (session_id, cancel_rx, flag)
    }

    /// Cancel a streaming session
    pub async fn cancel_session(&self, session_id: &str) -> Result<(), String> {
        let session = self.sessions.write().await.remove(session_id);

        match session {
            Some(session) => {
                session.flag.cancel();
                let _ = session.cancel_tx.send(()).await;
                log::info!("[Stream] Cancelled session {}", session_id);
                Ok(())
            }
            None => Err(format!("Session not found: {}", session_id)),
        }
    }

    /// Cancel every active session. Returns how many were cancelled.
    pub async fn cancel_all(&self) -> usize {
        let drained: Vec<(String, StreamSession)> = self.sessions.write().await.drain().collect();
        let count = drained.len();
        for (id, session) in drained {
            session.flag.cancel();
            let _ = session.cancel_tx.try_send(());
            log::info!("[Stream] Cancelled session {}", id);
        }
        count
    }

    /// Remove a session (called when the turn finishes)
    pub async fn remove_session(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }

    pub async fn session_exists(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    pub async fn active_session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for StreamManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Publishes assistant events to any number of subscribers
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<AssistantEvent>,
}

impl EventEmitter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AssistantEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: AssistantEvent) {
        let _ = self.tx.send(event);
    }

    pub fn token(&self, message_id: &str, token: &str) {
        self.emit(AssistantEvent::Token {
            message_id: message_id.to_string(),
            token: token.to_string(),
        });
    }

    pub fn message_complete(&self, message_id: &str, status: MessageStatus) {
        self.emit(AssistantEvent::MessageComplete {
            message_id: message_id.to_string(),
            status,
        });
    }

    pub fn artifact(&self, filename: &str, status: ArtifactStatus, error: Option<String>) {
        self.emit(AssistantEvent::ArtifactStatus {
            filename: filename.to_string(),
            status,
            error,
        });
    }

    pub fn confirmation(&self, request: &ConfirmationRequest) {
        self.emit(AssistantEvent::ConfirmationRequested {
            request: request.clone(),
        });
    }

    pub fn command(&self, command: &str, status: CommandStatus) {
        self.emit(AssistantEvent::CommandStatus {
            command: command.to_string(),
            status,
        });
    }

    pub fn preview(&self, url: &str) {
        self.emit(AssistantEvent::PreviewReady {
            url: url.to_string(),
        });
    }

    pub fn repair_state(&self, state: &str) {
        self.emit(AssistantEvent::RepairState {
            state: state.to_string(),
        });
    }

    pub fn notice(&self, message: &str) {
        self.emit(AssistantEvent::Notice {
            message: message.to_string(),
        });
    }

    pub fn error(&self, code: &str, message: &str, retryable: bool) {
        self.emit(AssistantEvent::Error {
            code: code.to_string(),
            message: message.to_string(),
            retryable,
        });
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_session() {
        let manager = StreamManager::new();

        let (session_id, _cancel_rx, flag) = manager.create_session().await;

        assert!(session_id.starts_with("stream_"));
        assert!(manager.session_exists(&session_id).await);
        assert_eq!(manager.active_session_count().await, 1);
        assert!(!flag.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_session_signals_receiver_and_flag() {
        let manager = StreamManager::new();
        let (session_id, mut cancel_rx, flag) = manager.create_session().await;

        manager.cancel_session(&session_id).await.unwrap();

        assert!(cancel_rx.try_recv().is_ok());
        assert!(flag.is_cancelled());
        assert!(!manager.session_exists(&session_id).await);
    }

    #[tokio::test]
    async fn test_cancel_nonexistent_session() {
        let manager = StreamManager::new();
        assert!(manager.cancel_session("nonexistent").await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let manager = StreamManager::new();
        let (_, _, a) = manager.create_session().await;
        let (_, _, b) = manager.create_session().await;

        assert_eq!(manager.cancel_all().await, 2);
        assert!(a.is_cancelled() && b.is_cancelled());
        assert_eq!(manager.active_session_count().await, 0);
    }

    #[tokio::test]
    async fn test_remove_session_does_not_cancel() {
        let manager = StreamManager::new();
        let (session_id, _, flag) = manager.create_session().await;

        manager.remove_session(&session_id).await;

        assert!(!manager.session_exists(&session_id).await);
        assert!(!flag.is_cancelled());
    }

    #[tokio::test]
    async fn test_emitter_delivers_to_subscribers() {
        let emitter = EventEmitter::new();
        let mut rx = emitter.subscribe();

        emitter.notice("Commands cancelled");
        emitter.preview("http://localhost:3000");

        assert_eq!(
            rx.recv().await.unwrap(),
            AssistantEvent::Notice {
                message: "Commands cancelled".to_string()
            }
        );
        assert!(matches!(rx.recv().await.unwrap(), AssistantEvent::PreviewReady { .. }));
    }

    #[test]
    fn test_emit_without_subscribers_is_fine() {
        EventEmitter::new().token("m1", "x");
    }
}
