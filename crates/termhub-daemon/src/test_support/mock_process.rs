//! Mock implementation of ProcessBackend for testing.
//!
//! Spawned "processes" only record what they are sent. Tests drive output and
//! exits through [`MockProcessBackend::emit_output`] and
//! [`MockProcessBackend::emit_exit`], which go through the same event stream a
//! real PTY reader thread would use.

use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;

use termhub_common::mutex_lock_or_recover;

use crate::domain::SessionId;
use crate::domain::TerminalSize;
use crate::error::ProcessError;
use crate::ports::EventSender;
use crate::ports::LaunchSpec;
use crate::ports::ProcessBackend;
use crate::ports::ProcessEvent;
use crate::ports::ProcessHandle;
use crate::ports::SpawnErrorKind;
use crate::ports::SpawnSpec;

struct ProcessRecord {
    epoch: u64,
    events: EventSender,
    launch: LaunchSpec,
    written: Vec<u8>,
    resizes: Vec<TerminalSize>,
    terminations: usize,
}

#[derive(Default)]
struct MockState {
    records: HashMap<SessionId, ProcessRecord>,
}

/// A configurable process backend that never starts a real process.
#[derive(Default)]
pub struct MockProcessBackend {
    state: Arc<Mutex<MockState>>,
    spawn_error: Option<SpawnErrorKind>,
    spawn_delay: Option<Duration>,
    spawn_calls: AtomicUsize,
}

impl MockProcessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> MockProcessBackendBuilder {
        MockProcessBackendBuilder::default()
    }

    /// Returns the number of times spawn() was called, failures included.
    pub fn spawn_count(&self) -> usize {
        self.spawn_calls.load(Ordering::SeqCst)
    }

    /// Epoch of the most recent attachment to `id`.
    pub fn epoch_of(&self, id: &SessionId) -> Option<u64> {
        mutex_lock_or_recover(&self.state)
            .records
            .get(id)
            .map(|record| record.epoch)
    }

    pub fn was_terminated(&self, id: &SessionId) -> bool {
        mutex_lock_or_recover(&self.state)
            .records
            .get(id)
            .is_some_and(|record| record.terminations > 0)
    }

    /// Every byte written to `id`, across attachments.
    pub fn written(&self, id: &SessionId) -> Vec<u8> {
        mutex_lock_or_recover(&self.state)
            .records
            .get(id)
            .map(|record| record.written.clone())
            .unwrap_or_default()
    }

    pub fn resizes(&self, id: &SessionId) -> Vec<TerminalSize> {
        mutex_lock_or_recover(&self.state)
            .records
            .get(id)
            .map(|record| record.resizes.clone())
            .unwrap_or_default()
    }

    pub fn launch_of(&self, id: &SessionId) -> Option<LaunchSpec> {
        mutex_lock_or_recover(&self.state)
            .records
            .get(id)
            .map(|record| record.launch.clone())
    }

    pub fn spawned_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = mutex_lock_or_recover(&self.state)
            .records
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Emits output from the current attachment of `id`.
    pub fn emit_output(&self, id: &SessionId, data: &[u8]) -> bool {
        let state = mutex_lock_or_recover(&self.state);
        let Some(record) = state.records.get(id) else {
            return false;
        };
        record
            .events
            .send(ProcessEvent::Output {
                session_id: id.clone(),
                epoch: record.epoch,
                data: Bytes::copy_from_slice(data),
            })
            .is_ok()
    }

    /// Emits an exit from the current attachment of `id`.
    pub fn emit_exit(&self, id: &SessionId, code: Option<i32>) -> bool {
        let state = mutex_lock_or_recover(&self.state);
        let Some(record) = state.records.get(id) else {
            return false;
        };
        record
            .events
            .send(ProcessEvent::Exited {
                session_id: id.clone(),
                epoch: record.epoch,
                code,
            })
            .is_ok()
    }
}

impl ProcessBackend for MockProcessBackend {
    fn spawn(
        &self,
        spec: &SpawnSpec,
        events: EventSender,
    ) -> Result<Box<dyn ProcessHandle>, ProcessError> {
        self.spawn_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.spawn_delay {
            std::thread::sleep(delay);
        }
        if let Some(kind) = self.spawn_error {
            return Err(ProcessError::Spawn {
                program: spec.launch.program.clone(),
                reason: "mock spawn failure".to_string(),
                kind,
            });
        }

        let mut state = mutex_lock_or_recover(&self.state);
        let record = state
            .records
            .entry(spec.session_id.clone())
            .or_insert_with(|| ProcessRecord {
                epoch: spec.epoch,
                events: events.clone(),
                launch: spec.launch.clone(),
                written: Vec::new(),
                resizes: Vec::new(),
                terminations: 0,
            });
        record.epoch = spec.epoch;
        record.events = events;
        record.launch = spec.launch.clone();
        let pid = 10_000 + self.spawn_calls.load(Ordering::SeqCst) as u32;

        Ok(Box::new(MockHandle {
            session_id: spec.session_id.clone(),
            epoch: spec.epoch,
            pid,
            terminated: false,
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockHandle {
    session_id: SessionId,
    epoch: u64,
    pid: u32,
    terminated: bool,
    state: Arc<Mutex<MockState>>,
}

impl ProcessHandle for MockHandle {
    fn write(&mut self, data: &[u8]) -> Result<(), ProcessError> {
        if self.terminated {
            return Err(ProcessError::Write("process terminated".to_string()));
        }
        let mut state = mutex_lock_or_recover(&self.state);
        if let Some(record) = state.records.get_mut(&self.session_id) {
            record.written.extend_from_slice(data);
        }
        Ok(())
    }

    fn resize(&mut self, size: TerminalSize) -> Result<(), ProcessError> {
        let mut state = mutex_lock_or_recover(&self.state);
        if let Some(record) = state.records.get_mut(&self.session_id) {
            record.resizes.push(size);
        }
        Ok(())
    }

    fn terminate(&mut self) -> Result<(), ProcessError> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;
        let mut state = mutex_lock_or_recover(&self.state);
        if let Some(record) = state.records.get_mut(&self.session_id) {
            record.terminations += 1;
            let _ = record.events.send(ProcessEvent::Exited {
                session_id: self.session_id.clone(),
                epoch: self.epoch,
                code: None,
            });
        }
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }
}

#[derive(Default)]
pub struct MockProcessBackendBuilder {
    spawn_error: Option<SpawnErrorKind>,
    spawn_delay: Option<Duration>,
}

impl MockProcessBackendBuilder {
    /// Every spawn fails with this kind.
    pub fn with_spawn_error(mut self, kind: SpawnErrorKind) -> Self {
        self.spawn_error = Some(kind);
        self
    }

    /// Every spawn blocks the calling thread this long before returning.
    pub fn with_spawn_delay(mut self, delay: Duration) -> Self {
        self.spawn_delay = Some(delay);
        self
    }

    pub fn build(self) -> MockProcessBackend {
        MockProcessBackend {
            spawn_error: self.spawn_error,
            spawn_delay: self.spawn_delay,
            ..MockProcessBackend::default()
        }
    }
}
