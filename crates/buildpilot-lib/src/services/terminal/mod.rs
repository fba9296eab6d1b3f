// Terminal Registry
//
// Owns every terminal the assistant drives. Each entry carries:
// - a bounded output buffer (one writer, many readers)
// - a status shown to the user
// - an exclusive busy lock held while a command batch runs
// - a broadcast channel publishing output and status changes
//
// Process management itself is delegated to a `TerminalBackend`.

pub mod output_buffer;
pub mod pty;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, MutexGuard};
use uuid::Uuid;

use crate::utils::config::ExecutionConfig;
use crate::utils::text;

pub use output_buffer::TerminalOutputBuffer;
pub use pty::PtyBackend;

/// Lines returned by `get_output`
pub const RECENT_OUTPUT_LINES: usize = 500;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TerminalError {
    #[error("Terminal not found: {0}")]
    NotFound(String),

    #[error("Terminal {0} is busy")]
    Busy(String),

    #[error("Failed to start terminal: {0}")]
    SpawnFailed(String),

    #[error("Terminal IO error: {0}")]
    Io(String),

    #[error("Terminal {0} has exited")]
    Exited(String),
}

/// Status shown for a terminal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Idle,
    Running,
    Success,
    Error,
    Exited,
}

/// Events published per terminal
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalEvent {
    Data(String),
    StatusChanged(TerminalStatus),
    Exited(Option<i32>),
}

/// Process-level terminal operations
#[async_trait]
pub trait TerminalBackend: Send + Sync {
    /// Start a shell for `id` in `cwd`. Output must be delivered through
    /// `sink.push_output`.
    async fn spawn(&self, id: &str, cwd: &Path, sink: TerminalHandle) -> Result<(), TerminalError>;

    async fn write(&self, id: &str, data: &str) -> Result<(), TerminalError>;

    async fn resize(&self, id: &str, cols: u16, rows: u16) -> Result<(), TerminalError>;

    async fn kill(&self, id: &str) -> Result<(), TerminalError>;
}

struct TerminalEntry {
    id: String,
    cwd: PathBuf,
    buffer: RwLock<TerminalOutputBuffer>,
    status: RwLock<TerminalStatus>,
    busy: Mutex<()>,
    events: broadcast::Sender<TerminalEvent>,
}

/// Shared handle to one terminal's state
#[derive(Clone)]
pub struct TerminalHandle {
    entry: Arc<TerminalEntry>,
}

impl TerminalHandle {
    pub fn new(id: impl Into<String>, cwd: impl Into<PathBuf>, buffer_bytes: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            entry: Arc::new(TerminalEntry {
                id: id.into(),
                cwd: cwd.into(),
                buffer: RwLock::new(TerminalOutputBuffer::with_max_size(buffer_bytes)),
                status: RwLock::new(TerminalStatus::Idle),
                busy: Mutex::new(()),
                events,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.entry.id
    }

    pub fn cwd(&self) -> &Path {
        &self.entry.cwd
    }

    /// Append output and publish it. Called by the backend's reader.
    pub fn push_output(&self, data: &str) {
        if data.is_empty() {
            return;
        }
        match self.entry.buffer.write() {
            Ok(mut buffer) => buffer.push(data),
            Err(poisoned) => poisoned.into_inner().push(data),
        }
        let _ = self.entry.events.send(TerminalEvent::Data(data.to_string()));
    }

    /// Absolute end offset of the output buffer
    pub fn output_len(&self) -> usize {
        match self.entry.buffer.read() {
            Ok(buffer) => buffer.end_offset(),
            Err(poisoned) => poisoned.into_inner().end_offset(),
        }
    }

    /// Output written after `mark` (see `output_len`)
    pub fn output_since(&self, mark: usize) -> String {
        match self.entry.buffer.read() {
            Ok(buffer) => buffer.since(mark).to_string(),
            Err(poisoned) => poisoned.into_inner().since(mark).to_string(),
        }
    }

    /// The last `lines` lines of output
    pub fn recent_output(&self, lines: usize) -> String {
        let read = |buffer: &TerminalOutputBuffer| text::tail_lines(buffer.contents(), lines).to_string();
        match self.entry.buffer.read() {
            Ok(buffer) => read(&buffer),
            Err(poisoned) => read(&poisoned.into_inner()),
        }
    }

    pub fn status(&self) -> TerminalStatus {
        match self.entry.status.read() {
            Ok(status) => *status,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn set_status(&self, status: TerminalStatus) {
        match self.entry.status.write() {
            Ok(mut current) => *current = status,
            Err(poisoned) => *poisoned.into_inner() = status,
        }
        let _ = self.entry.events.send(TerminalEvent::StatusChanged(status));
    }

    /// Record process exit
    pub fn mark_exited(&self, code: Option<i32>) {
        log::info!("[Terminal] {} exited with {:?}", self.id(), code);
        self.set_status(TerminalStatus::Exited);
        let _ = self.entry.events.send(TerminalEvent::Exited(code));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TerminalEvent> {
        self.entry.events.subscribe()
    }

    /// Acquire the exclusive busy lock, waiting at most `timeout`
    pub async fn lock_busy(&self, timeout: Duration) -> Result<MutexGuard<'_, ()>, TerminalError> {
        tokio::time::timeout(timeout, self.entry.busy.lock())
            .await
            .map_err(|_| TerminalError::Busy(self.id().to_string()))
    }

    pub fn is_busy(&self) -> bool {
        self.entry.busy.try_lock().is_err()
    }
}

impl std::fmt::Debug for TerminalHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalHandle")
            .field("id", &self.entry.id)
            .field("cwd", &self.entry.cwd)
            .finish()
    }
}

/// Owner of all terminals
pub struct TerminalRegistry {
    backend: Arc<dyn TerminalBackend>,
    terminals: tokio::sync::RwLock<HashMap<String, TerminalHandle>>,
    buffer_bytes: usize,
}

impl TerminalRegistry {
    pub fn new(backend: Arc<dyn TerminalBackend>, buffer_bytes: usize) -> Self {
        Self {
            backend,
            terminals: tokio::sync::RwLock::new(HashMap::new()),
            buffer_bytes,
        }
    }

    /// Registry whose terminals keep `output_buffer_bytes` of output each
    pub fn from_config(backend: Arc<dyn TerminalBackend>, config: &ExecutionConfig) -> Self {
        Self::new(backend, config.output_buffer_bytes)
    }

    /// Start a new terminal in `cwd`
    pub async fn create(&self, cwd: &Path) -> Result<TerminalHandle, TerminalError> {
        let id = format!("term_{}", Uuid::new_v4().simple());
        let handle = TerminalHandle::new(id.clone(), cwd, self.buffer_bytes);

        self.backend.spawn(&id, cwd, handle.clone()).await?;
        log::info!("[Terminal] Created {} in {}", id, cwd.display());

        self.terminals.write().await.insert(id, handle.clone());
        Ok(handle)
    }

    pub async fn get(&self, id: &str) -> Result<TerminalHandle, TerminalError> {
        self.terminals
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| TerminalError::NotFound(id.to_string()))
    }

    pub async fn ids(&self) -> Vec<String> {
        self.terminals.read().await.keys().cloned().collect()
    }

    pub async fn write(&self, id: &str, data: &str) -> Result<(), TerminalError> {
        let handle = self.get(id).await?;
        if handle.status() == TerminalStatus::Exited {
            return Err(TerminalError::Exited(id.to_string()));
        }
        self.backend.write(id, data).await
    }

    pub async fn resize(&self, id: &str, cols: u16, rows: u16) -> Result<(), TerminalError> {
        self.get(id).await?;
        self.backend.resize(id, cols, rows).await
    }

    /// Kill the process and forget the terminal
    pub async fn kill(&self, id: &str) -> Result<(), TerminalError> {
        let handle = self
            .terminals
            .write()
            .await
            .remove(id)
            .ok_or_else(|| TerminalError::NotFound(id.to_string()))?;
        let result = self.backend.kill(id).await;
        handle.mark_exited(None);
        result
    }

    /// Feed output from an externally managed terminal
    pub async fn handle_data(&self, id: &str, data: &str) -> Result<(), TerminalError> {
        self.get(id).await?.push_output(data);
        Ok(())
    }

    /// Recent output, last `RECENT_OUTPUT_LINES` lines
    pub async fn get_output(&self, id: &str) -> Result<String, TerminalError> {
        Ok(self.get(id).await?.recent_output(RECENT_OUTPUT_LINES))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex as StdMutex;

    type Responder = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

    /// In-memory backend that answers written commands with scripted output
    pub struct ScriptedBackend {
        pub writes: StdMutex<Vec<String>>,
        sinks: StdMutex<HashMap<String, TerminalHandle>>,
        respond: Responder,
    }

    impl ScriptedBackend {
        pub fn new(respond: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
            Self {
                writes: StdMutex::new(Vec::new()),
                sinks: StdMutex::new(HashMap::new()),
                respond: Box::new(respond),
            }
        }

        pub fn written(&self) -> Vec<String> {
            self.writes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TerminalBackend for ScriptedBackend {
        async fn spawn(&self, id: &str, _cwd: &Path, sink: TerminalHandle) -> Result<(), TerminalError> {
            self.sinks.lock().unwrap().insert(id.to_string(), sink);
            Ok(())
        }

        async fn write(&self, id: &str, data: &str) -> Result<(), TerminalError> {
            self.writes.lock().unwrap().push(data.to_string());
            let sink = self.sinks.lock().unwrap().get(id).cloned();
            if let (Some(sink), Some(output)) = (sink, (self.respond)(data)) {
                sink.push_output(&output);
            }
            Ok(())
        }

        async fn resize(&self, _id: &str, _cols: u16, _rows: u16) -> Result<(), TerminalError> {
            Ok(())
        }

        async fn kill(&self, id: &str) -> Result<(), TerminalError> {
            self.sinks.lock().unwrap().remove(id);
            Ok(())
        }
    }
}
