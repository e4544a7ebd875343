//! Run events delivered to the caller (log, progress, status)

use crate::core::{LogEntry, RunStatus, StepStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Events that can occur during a run
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    Log(LogEntry),
    Progress {
        percent: f64,
        message: Option<String>,
    },
    StepStatus(HashMap<String, StepStatus>),
    RunStatus {
        run_id: Uuid,
        status: RunStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(&ExecutionEvent) + Send + Sync>;

/// Fans events out to synchronous handlers and channel subscribers
#[derive(Default)]
pub struct EventBus {
    handlers: Mutex<Vec<EventHandler>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ExecutionEvent>>>,
}

pub(crate) fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler<F>(&self, handler: F)
    where
        F: Fn(&ExecutionEvent) + Send + Sync + 'static,
    {
        relock(&self.handlers).push(Arc::new(handler));
    }

    /// Open a channel that receives every event from now on
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ExecutionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        relock(&self.subscribers).push(tx);
        rx
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let handlers: Vec<EventHandler> = relock(&self.handlers).clone();
        for handler in &handlers {
            handler(&event);
        }

        // Closed receivers are dropped
        relock(&self.subscribers).retain(|tx| tx.send(event.clone()).is_ok());
    }
}
