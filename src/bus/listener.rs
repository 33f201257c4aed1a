//! Listener task ownership shared by the subscriber implementations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;

use super::{BusError, Result};

/// Holds a subscriber's listener task and its closed flag.
///
/// `install` and `close` may race: whichever runs second aborts the task, so
/// a listener never outlives a closed subscriber.
#[derive(Debug, Default)]
pub struct ListenerSlot {
    task: Mutex<Option<JoinHandle<()>>>,
    closed: Arc<AtomicBool>,
}

impl ListenerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Flag the listener task can poll to tell a shutdown from a lost connection.
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }

    pub fn is_listening(&self) -> bool {
        self.guard().is_some()
    }

    /// Fail unless the slot is open and empty.
    pub fn ensure_idle(&self) -> Result<()> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        if self.is_listening() {
            return Err(BusError::AlreadyListening);
        }
        Ok(())
    }

    /// Store a freshly spawned listener.
    ///
    /// Aborts `task` if the slot is closed or already holds a listener.
    pub fn install(&self, task: JoinHandle<()>) -> Result<()> {
        let mut slot = self.guard();
        if slot.is_some() {
            task.abort();
            return Err(BusError::AlreadyListening);
        }
        *slot = Some(task);
        // Re-checked under the lock: close() may have run before we stored the task
        if self.is_closed() {
            if let Some(task) = slot.take() {
                task.abort();
            }
            return Err(BusError::Closed);
        }
        Ok(())
    }

    /// Close the slot and abort its listener. Returns `false` if already closed.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(task) = self.guard().take() {
            task.abort();
        }
        true
    }

    fn guard(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
