// Command Confirmation Gate
//
// Idle -> PendingConfirmation(commands, is_auto_fix) -> Confirmed | Cancelled -> Idle
//
// At most one request is outstanding. Further callers wait on the gate's lock
// until the current request is resolved.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use tokio::sync::{oneshot, Mutex};

use super::stream::{CancelFlag, EventEmitter};
use crate::models::{ConfirmationDecision, ConfirmationRequest};

/// Notice shown when the user declines a batch
pub const CANCELLED_NOTICE: &str = "Command execution cancelled. Remaining commands were skipped.";

struct Pending {
    request: ConfirmationRequest,
    responder: oneshot::Sender<bool>,
}

pub struct ConfirmationGate {
    turn: Mutex<()>,
    pending: StdMutex<Option<Pending>>,
    require_confirmation: AtomicBool,
    events: EventEmitter,
}

impl ConfirmationGate {
    pub fn new(events: EventEmitter, require_confirmation: bool) -> Self {
        Self {
            turn: Mutex::new(()),
            pending: StdMutex::new(None),
            require_confirmation: AtomicBool::new(require_confirmation),
            events,
        }
    }

    pub fn set_require_confirmation(&self, required: bool) {
        self.require_confirmation.store(required, Ordering::SeqCst);
    }

    pub fn requires_confirmation(&self) -> bool {
        self.require_confirmation.load(Ordering::SeqCst)
    }

    /// Ask the user to approve `commands`. Resolves once `resolve` is called,
    /// immediately when confirmation is disabled, or as cancelled once
    /// `cancel` is set.
    pub async fn request(
        &self,
        commands: Vec<String>,
        is_auto_fix: bool,
        cancel: &CancelFlag,
    ) -> ConfirmationDecision {
        let _turn = self.turn.lock().await;
        if cancel.is_cancelled() {
            log::debug!("[Confirmation] Turn cancelled while queued");
            return ConfirmationDecision::Cancelled;
        }
        let request = ConfirmationRequest::new(commands, is_auto_fix);

        if !self.requires_confirmation() {
            log::debug!("[Confirmation] Auto-approved {} command(s)", request.commands.len());
            return ConfirmationDecision::Confirmed;
        }

        let (tx, rx) = oneshot::channel();
        self.set_pending(Some(Pending {
            request: request.clone(),
            responder: tx,
        }));
        // cancel_pending may have run before the slot was filled
        if cancel.is_cancelled() {
            self.clear_if_current(&request.id);
            log::debug!("[Confirmation] Turn cancelled before request {} was shown", request.id);
            return ConfirmationDecision::Cancelled;
        }

        log::info!(
            "[Confirmation] Waiting for approval of {} command(s) (auto_fix={})",
            request.commands.len(),
            is_auto_fix
        );
        self.events.confirmation(&request);

        // A dropped responder counts as a cancel
        let approved = rx.await.unwrap_or(false);
        self.clear_if_current(&request.id);

        if approved {
            ConfirmationDecision::Confirmed
        } else {
            log::info!("[Confirmation] Request {} cancelled", request.id);
            self.events.notice(CANCELLED_NOTICE);
            ConfirmationDecision::Cancelled
        }
    }

    /// Resolve the outstanding request
    pub fn resolve(&self, request_id: &str, approved: bool) -> Result<(), String> {
        let pending = {
            let mut slot = self.lock_pending()?;
            if slot.as_ref().is_some_and(|p| p.request.id == request_id) {
                slot.take()
            } else {
                None
            }
        };

        match pending {
            Some(pending) => {
                let _ = pending.responder.send(approved);
                Ok(())
            }
            None => Err(format!("No pending confirmation with id {}", request_id)),
        }
    }

    /// Cancel whatever is outstanding. Returns true if something was pending.
    pub fn cancel_pending(&self) -> bool {
        let pending = self.lock_pending().ok().and_then(|mut slot| slot.take());
        match pending {
            Some(pending) => {
                let _ = pending.responder.send(false);
                true
            }
            None => false,
        }
    }

    pub fn pending_request(&self) -> Option<ConfirmationRequest> {
        self.lock_pending()
            .ok()
            .and_then(|slot| slot.as_ref().map(|p| p.request.clone()))
    }

    fn lock_pending(&self) -> Result<std::sync::MutexGuard<'_, Option<Pending>>, String> {
        self.pending
            .lock()
            .map_err(|e| format!("Failed to lock confirmation state: {}", e))
    }

    fn set_pending(&self, pending: Option<Pending>) {
        match self.pending.lock() {
            Ok(mut slot) => *slot = pending,
            Err(poisoned) => *poisoned.into_inner() = pending,
        }
    }

    fn clear_if_current(&self, request_id: &str) {
        if let Ok(mut slot) = self.pending.lock() {
            if slot.as_ref().is_some_and(|p| p.request.id == request_id) {
                *slot = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AssistantEvent;
    use std::sync::Arc;
    use std::time::Duration;

    async fn next_request(rx: &mut tokio::sync::broadcast::Receiver<AssistantEvent>) -> ConfirmationRequest {
        loop {
            if let AssistantEvent::ConfirmationRequested { request } = rx.recv().await.unwrap() {
                return request;
            }
        }
    }

    #[tokio::test]
    async fn test_confirmed_request() {
        let events = EventEmitter::new();
        let mut rx = events.subscribe();
        let gate = Arc::new(ConfirmationGate::new(events, true));

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.request(vec!["npm install".into()], false, &CancelFlag::new()).await
            })
        };

        let request = next_request(&mut rx).await;
        assert_eq!(request.commands, vec!["npm install"]);
        assert!(!request.is_auto_fix);
        assert_eq!(gate.pending_request(), Some(request.clone()));

        gate.resolve(&request.id, true).unwrap();
        assert_eq!(waiter.await.unwrap(), ConfirmationDecision::Confirmed);
        assert!(gate.pending_request().is_none());
    }

    #[tokio::test]
    async fn test_cancel_emits_notice() {
        let events = EventEmitter::new();
        let mut rx = events.subscribe();
        let gate = Arc::new(ConfirmationGate::new(events, true));

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.request(vec!["rm -rf dist".into()], true, &CancelFlag::new()).await
            })
        };
        let request = next_request(&mut rx).await;
        gate.resolve(&request.id, false).unwrap();

        assert_eq!(waiter.await.unwrap(), ConfirmationDecision::Cancelled);
        assert_eq!(
            rx.recv().await.unwrap(),
            AssistantEvent::Notice {
                message: CANCELLED_NOTICE.to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_only_one_request_outstanding() {
        let events = EventEmitter::new();
        let mut rx = events.subscribe();
        let gate = Arc::new(ConfirmationGate::new(events, true));

        let first = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.request(vec!["npm install".into()], false, &CancelFlag::new()).await
            })
        };
        let first_request = next_request(&mut rx).await;

        let second = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.request(vec!["npm run dev".into()], false, &CancelFlag::new()).await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        // The second caller is still queued behind the first
        assert_eq!(gate.pending_request().map(|r| r.id), Some(first_request.id.clone()));

        gate.resolve(&first_request.id, true).unwrap();
        assert_eq!(first.await.unwrap(), ConfirmationDecision::Confirmed);

        let second_request = next_request(&mut rx).await;
        assert_eq!(second_request.commands, vec!["npm run dev"]);
        gate.resolve(&second_request.id, false).unwrap();
        assert_eq!(second.await.unwrap(), ConfirmationDecision::Cancelled);
    }

    #[tokio::test]
    async fn test_resolve_unknown_id_fails() {
        let gate = ConfirmationGate::new(EventEmitter::new(), true);
        assert!(gate.resolve("confirm_missing", true).is_err());
    }

    #[tokio::test]
    async fn test_cancel_pending_counts_as_cancel() {
        let events = EventEmitter::new();
        let mut rx = events.subscribe();
        let gate = Arc::new(ConfirmationGate::new(events, true));

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.request(vec!["npm test".into()], false, &CancelFlag::new()).await
            })
        };
        next_request(&mut rx).await;

        assert!(gate.cancel_pending());
        assert_eq!(waiter.await.unwrap(), ConfirmationDecision::Cancelled);
        assert!(!gate.cancel_pending());
    }

    #[tokio::test]
    async fn test_cancelled_turn_does_not_wait() {
        let events = EventEmitter::new();
        let mut rx = events.subscribe();
        let gate = ConfirmationGate::new(events, true);
        let cancel = CancelFlag::new();
        cancel.cancel();

        let decision = tokio::time::timeout(
            Duration::from_millis(200),
            gate.request(vec!["npm install".into()], false, &cancel),
        )
        .await
        .unwrap();

        assert_eq!(decision, ConfirmationDecision::Cancelled);
        assert!(gate.pending_request().is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancel_while_queued_behind_another_request() {
        let events = EventEmitter::new();
        let mut rx = events.subscribe();
        let gate = Arc::new(ConfirmationGate::new(events, true));

        let first = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.request(vec!["npm install".into()], false, &CancelFlag::new()).await
            })
        };
        let first_request = next_request(&mut rx).await;

        let cancel = CancelFlag::new();
        let second = {
            let gate = gate.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                gate.request(vec!["npm run dev".into()], false, &cancel).await
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        // cancel lands while the second caller still waits for the gate
        cancel.cancel();
        gate.resolve(&first_request.id, true).unwrap();

        assert_eq!(first.await.unwrap(), ConfirmationDecision::Confirmed);
        assert_eq!(second.await.unwrap(), ConfirmationDecision::Cancelled);
        assert!(gate.pending_request().is_none());
    }

    #[tokio::test]
    async fn test_disabled_gate_auto_confirms() {
        let gate = ConfirmationGate::new(EventEmitter::new(), false);
        assert_eq!(
            gate.request(vec!["npm install".into()], false, &CancelFlag::new()).await,
            ConfirmationDecision::Confirmed
        );
        assert!(gate.pending_request().is_none());
    }
}
