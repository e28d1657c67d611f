//! Deferred lifecycle notifications
//!
//! Events are broadcast after the current synchronous work finishes: the bus
//! spawns a task that yields once before sending. Change events raised while
//! one is already pending collapse into it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::Handle;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineEvent {
    /// The engine finished startup
    Init,
    /// The override set changed
    Change,
}

impl EngineEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Change => "change",
        }
    }
}

pub struct ChangeBus {
    tx: broadcast::Sender<EngineEvent>,
    change_pending: Arc<AtomicBool>,
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            change_pending: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn emit_init(&self) {
        self.emit_deferred(EngineEvent::Init, None);
    }

    /// Schedule a change event unless one is already pending.
    ///
    /// Callers must have finished writing the store before calling.
    pub fn notify_change(&self) {
        if self.change_pending.swap(true, Ordering::AcqRel) {
            tracing::trace!("change event already pending");
            return;
        }
        self.emit_deferred(EngineEvent::Change, Some(self.change_pending.clone()));
    }

    fn emit_deferred(&self, event: EngineEvent, pending: Option<Arc<AtomicBool>>) {
        let tx = self.tx.clone();
        let send = move || {
            if let Some(pending) = &pending {
                pending.store(false, Ordering::Release);
            }
            // Ignore error if no subscribers
            let _ = tx.send(event);
        };

        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::task::yield_now().await;
                    send();
                });
            }
            Err(_) => send(),
        }
    }
}
