// PTY terminal backend
// Interactive shells on a pseudo terminal via portable-pty

use async_trait::async_trait;
use portable_pty::{Child, CommandBuilder, MasterPty, NativePtySystem, PtySize, PtySystem};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{TerminalBackend, TerminalError, TerminalHandle};

struct PtySession {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
}

/// Terminal backend running a login shell on a native PTY
pub struct PtyBackend {
    shell: String,
    sessions: Arc<Mutex<HashMap<String, PtySession>>>,
}

impl PtyBackend {
    pub fn new() -> Self {
        Self::with_shell(default_shell())
    }

    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn with_session<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut PtySession) -> Result<T, TerminalError>,
    ) -> Result<T, TerminalError> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|e| TerminalError::Io(format!("Failed to lock PTY sessions: {}", e)))?;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| TerminalError::NotFound(id.to_string()))?;
        f(session)
    }
}

impl Default for PtyBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn default_shell() -> String {
    if cfg!(windows) {
        "powershell.exe".to_string()
    } else {
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string())
    }
}

/// Decode as much of `pending` as forms complete UTF-8, keeping an incomplete
/// trailing sequence for the next read.
fn drain_utf8(pending: &mut Vec<u8>) -> String {
    match std::str::from_utf8(pending) {
        Ok(s) => {
            let out = s.to_string();
            pending.clear();
            out
        }
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            let out = String::from_utf8_lossy(&pending[..valid]).into_owned();
            pending.drain(..valid);
            out
        }
        Err(_) => {
            let out = String::from_utf8_lossy(pending).into_owned();
            pending.clear();
            out
        }
    }
}

#[async_trait]
impl TerminalBackend for PtyBackend {
    async fn spawn(&self, id: &str, cwd: &Path, sink: TerminalHandle) -> Result<(), TerminalError> {
        let pty_system = NativePtySystem::default();
        let pair = pty_system
            .openpty(PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| TerminalError::SpawnFailed(format!("Failed to create PTY: {}", e)))?;

        let mut cmd = CommandBuilder::new(&self.shell);
        cmd.cwd(cwd);
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");
        cmd.env("LANG", "en_US.UTF-8");

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| TerminalError::SpawnFailed(format!("Failed to spawn shell: {}", e)))?;
        drop(pair.slave);

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| TerminalError::Io(format!("Failed to clone PTY reader: {}", e)))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| TerminalError::Io(format!("Failed to take PTY writer: {}", e)))?;

        self.sessions
            .lock()
            .map_err(|e| TerminalError::Io(format!("Failed to lock PTY sessions: {}", e)))?
            .insert(
                id.to_string(),
                PtySession {
                    master: pair.master,
                    writer,
                    child,
                },
            );

        let sessions = self.sessions.clone();
        let terminal_id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let mut chunk = [0u8; 4096];
            let mut pending = Vec::new();
            loop {
                match reader.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => {
                        pending.extend_from_slice(&chunk[..n]);
                        let text = drain_utf8(&mut pending);
                        sink.push_output(&text);
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        log::warn!("[PTY] Read error on {}: {}", terminal_id, e);
                        break;
                    }
                }
            }

            let exit_code = sessions.lock().ok().and_then(|mut sessions| {
                sessions
                    .remove(&terminal_id)
                    .and_then(|mut session| session.child.try_wait().ok().flatten())
                    .map(|status| status.exit_code() as i32)
            });
            sink.mark_exited(exit_code);
        });

        Ok(())
    }

    async fn write(&self, id: &str, data: &str) -> Result<(), TerminalError> {
        self.with_session(id, |session| {
            session
                .writer
                .write_all(data.as_bytes())
                .and_then(|_| session.writer.flush())
                .map_err(|e| TerminalError::Io(format!("Failed to write to PTY: {}", e)))
        })
    }

    async fn resize(&self, id: &str, cols: u16, rows: u16) -> Result<(), TerminalError> {
        self.with_session(id, |session| {
            session
                .master
                .resize(PtySize {
                    rows,
                    cols,
                    pixel_width: 0,
                    pixel_height: 0,
                })
                .map_err(|e| TerminalError::Io(format!("Failed to resize PTY: {}", e)))
        })
    }

    async fn kill(&self, id: &str) -> Result<(), TerminalError> {
        let session = self
            .sessions
            .lock()
            .map_err(|e| TerminalError::Io(format!("Failed to lock PTY sessions: {}", e)))?
            .remove(id);

        match session {
            Some(mut session) => session
                .child
                .kill()
                .map_err(|e| TerminalError::Io(format!("Failed to kill shell: {}", e))),
            None => Err(TerminalError::NotFound(id.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_utf8_keeps_incomplete_sequence() {
        let bytes = "é".as_bytes();
        let mut pending = vec![b'a', bytes[0]];
        assert_eq!(drain_utf8(&mut pending), "a");
        assert_eq!(pending, vec![bytes[0]]);

        pending.push(bytes[1]);
        assert_eq!(drain_utf8(&mut pending), "é");
        assert!(pending.is_empty());
    }

    #[test]
    fn test_drain_utf8_replaces_invalid_bytes() {
        let mut pending = vec![b'a', 0xff, b'b'];
        assert_eq!(drain_utf8(&mut pending), "a\u{fffd}b");
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let backend = PtyBackend::with_shell("/bin/sh");
        assert_eq!(
            backend.write("nope", "ls\r").await,
            Err(TerminalError::NotFound("nope".to_string()))
        );
    }
}
