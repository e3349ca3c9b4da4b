//! Per-session resize coalescing.
//!
//! Each session has one slot holding the last applied size and at most one
//! pending timer. A request restarts the timer; only the request that is still
//! current when the quiet interval elapses reaches the process.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;
use tracing::warn;

use termhub_common::mutex_lock_or_recover;
use termhub_common::rwlock_read_or_recover;
use termhub_common::rwlock_write_or_recover;

use crate::domain::SessionId;
use crate::domain::TerminalSize;
use crate::error::RegistryError;
use crate::metrics::DaemonMetrics;

/// What prompted a resize on the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizeReason {
    /// The outermost container's pixel size changed.
    #[default]
    Container,
    Focus,
    Layout,
    Window,
}

pub trait ResizeApplier: Send + Sync {
    fn apply_resize(&self, id: &SessionId, size: TerminalSize) -> Result<(), RegistryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeDecision {
    Scheduled,
    /// Equal to the size already applied.
    Unchanged,
    /// Dropped because the multiplexer manages this pane's layout.
    Suppressed,
}

#[derive(Default)]
struct Slot {
    applied: Option<TerminalSize>,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl Slot {
    /// Cancels the pending timer, returning whether there was one.
    fn cancel(&mut self) -> bool {
        match self.timer.take() {
            Some(timer) => {
                timer.abort();
                true
            }
            None => false,
        }
    }
}

pub struct ResizeDebouncer {
    slots: RwLock<HashMap<SessionId, Arc<Mutex<Slot>>>>,
    applier: Arc<dyn ResizeApplier>,
    metrics: Arc<DaemonMetrics>,
    quiet: Duration,
}

impl ResizeDebouncer {
    pub fn new(applier: Arc<dyn ResizeApplier>, metrics: Arc<DaemonMetrics>, quiet: Duration) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            applier,
            metrics,
            quiet,
        }
    }

    fn slot(&self, id: &SessionId) -> Arc<Mutex<Slot>> {
        if let Some(slot) = rwlock_read_or_recover(&self.slots).get(id) {
            return Arc::clone(slot);
        }
        let mut slots = rwlock_write_or_recover(&self.slots);
        Arc::clone(slots.entry(id.clone()).or_default())
    }

    /// Records the size a process was started with.
    pub fn seed(&self, id: &SessionId, size: TerminalSize) {
        let slot = self.slot(id);
        mutex_lock_or_recover(&slot).applied = Some(size);
    }

    pub fn applied(&self, id: &SessionId) -> Option<TerminalSize> {
        let slot = rwlock_read_or_recover(&self.slots).get(id).cloned()?;
        let applied = mutex_lock_or_recover(&slot).applied;
        applied
    }

    /// Drops the slot of a closed session, cancelling any pending resize.
    pub fn forget(&self, id: &SessionId) {
        let slot = rwlock_write_or_recover(&self.slots).remove(id);
        if let Some(slot) = slot {
            mutex_lock_or_recover(&slot).cancel();
        }
    }

    /// Must be called from within a tokio runtime.
    pub fn request(
        &self,
        id: &SessionId,
        size: TerminalSize,
        reason: ResizeReason,
        layout_managed: bool,
    ) -> ResizeDecision {
        if layout_managed && reason != ResizeReason::Container {
            self.metrics.record_resize_suppressed();
            debug!(session_id = %id, ?reason, "Resize suppressed for multiplexer-managed pane");
            return ResizeDecision::Suppressed;
        }

        let slot = self.slot(id);
        let mut guard = mutex_lock_or_recover(&slot);
        guard.generation += 1;
        if guard.cancel() {
            self.metrics.record_resize_superseded();
        }
        if guard.applied == Some(size) {
            self.metrics.record_resize_unchanged();
            return ResizeDecision::Unchanged;
        }

        let generation = guard.generation;
        let task_slot = Arc::clone(&slot);
        let applier = Arc::clone(&self.applier);
        let metrics = Arc::clone(&self.metrics);
        let quiet = self.quiet;
        let id = id.clone();
        guard.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(quiet).await;
            let mut guard = mutex_lock_or_recover(&task_slot);
            if guard.generation != generation {
                return;
            }
            guard.timer = None;
            // Applied under the slot lock so resizes of one session stay ordered.
            match applier.apply_resize(&id, size) {
                Ok(()) => {
                    guard.applied = Some(size);
                    metrics.record_resize_applied();
                }
                Err(err) => warn!(session_id = %id, size = %size, error = %err, "Resize failed"),
            }
        }));
        ResizeDecision::Scheduled
    }
}
