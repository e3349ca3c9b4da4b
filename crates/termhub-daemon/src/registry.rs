//! The authoritative table of live sessions.
//!
//! The registry is the only holder of [`ProcessHandle`]s. Every write, resize
//! and close goes through it, and each goes under that session's entry lock,
//! which is what serializes per-session mutation.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;

use chrono::DateTime;
use chrono::Utc;
use tracing::debug;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use termhub_common::mutex_lock_or_recover;
use termhub_common::rwlock_read_or_recover;
use termhub_common::rwlock_write_or_recover;

use crate::debounce::ResizeApplier;
use crate::domain::SessionId;
use crate::domain::SessionInfo;
use crate::domain::SessionKind;
use crate::domain::SessionStatus;
use crate::domain::TerminalSize;
use crate::domain::WindowId;
use crate::error::RegistryError;
use crate::ports::EventSender;
use crate::ports::LaunchSpec;
use crate::ports::Multiplexer;
use crate::ports::ProcessBackend;
use crate::ports::ProcessEvent;
use crate::ports::ProcessHandle;
use crate::ports::SpawnSpec;
use crate::ports::TAG_KIND;
use crate::ports::TAG_SESSION_ID;
use crate::ports::TAG_WINDOW;
use crate::router::InputTarget;

const RESTORED_DEFAULT_KIND: &str = "shell";

pub fn generate_session_id() -> SessionId {
    SessionId::new(Uuid::new_v4().to_string()[..8].to_string())
}

#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub id: SessionId,
    pub kind: SessionKind,
    pub size: TerminalSize,
    pub window: Option<WindowId>,
    pub launch: LaunchSpec,
    /// Ask for a multiplexer-backed session.
    pub persistent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    /// Detach the adapter of a backed session; terminate anything else.
    Release,
    /// Terminate the process and any multiplexer session behind it.
    Terminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Adapter released, the multiplexer keeps the session; status `detached`.
    Released,
    /// Session destroyed and removed from the registry.
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// The event came from a released attachment or an unknown session.
    Stale,
    /// The adapter exited but the multiplexer session lives on.
    Retained,
    /// The session is gone.
    Closed,
}

struct SessionEntry {
    id: SessionId,
    kind: SessionKind,
    status: SessionStatus,
    size: TerminalSize,
    created_at: DateTime<Utc>,
    seq: u64,
    window: Option<WindowId>,
    multiplexer_name: Option<String>,
    epoch: u64,
    handle: Option<Box<dyn ProcessHandle>>,
}

impl SessionEntry {
    fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            kind: self.kind.clone(),
            status: self.status,
            size: self.size,
            created_at: self.created_at,
            seq: self.seq,
            window: self.window.clone(),
            multiplexer_name: self.multiplexer_name.clone(),
            pid: self.handle.as_ref().and_then(|h| h.pid()),
        }
    }
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<SessionEntry>>>>,
    backend: Arc<dyn ProcessBackend>,
    multiplexer: Option<Arc<dyn Multiplexer>>,
    events: EventSender,
    max_sessions: usize,
    next_epoch: AtomicU64,
    next_seq: AtomicU64,
}

impl SessionRegistry {
    pub fn new(
        backend: Arc<dyn ProcessBackend>,
        multiplexer: Option<Arc<dyn Multiplexer>>,
        events: EventSender,
        max_sessions: usize,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            backend,
            multiplexer,
            events,
            max_sessions,
            next_epoch: AtomicU64::new(1),
            next_seq: AtomicU64::new(1),
        }
    }

    pub fn has_multiplexer(&self) -> bool {
        self.multiplexer.is_some()
    }

    fn next_epoch(&self) -> u64 {
        self.next_epoch.fetch_add(1, Ordering::Relaxed)
    }

    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    fn entry(&self, id: &SessionId) -> Option<Arc<Mutex<SessionEntry>>> {
        rwlock_read_or_recover(&self.sessions).get(id).cloned()
    }

    fn entry_or_err(&self, id: &SessionId) -> Result<Arc<Mutex<SessionEntry>>, RegistryError> {
        self.entry(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))
    }

    fn remove(&self, id: &SessionId) {
        rwlock_write_or_recover(&self.sessions).remove(id);
    }

    /// Spawns the backing process. Blocks until the process has started.
    pub fn create(&self, request: CreateRequest) -> Result<SessionInfo, RegistryError> {
        let mux = match (&self.multiplexer, request.persistent) {
            (Some(mux), true) => Some(Arc::clone(mux)),
            (None, true) => {
                warn!(
                    session_id = %request.id,
                    "Persistent session requested without a multiplexer; spawning unbacked"
                );
                None
            }
            _ => None,
        };
        let multiplexer_name = mux
            .as_ref()
            .map(|mux| mux.session_name(request.id.as_str()));
        let epoch = self.next_epoch();

        {
            let mut sessions = rwlock_write_or_recover(&self.sessions);
            if sessions.contains_key(&request.id) {
                return Err(RegistryError::DuplicateId(request.id));
            }
            if sessions.len() >= self.max_sessions {
                return Err(RegistryError::LimitReached(self.max_sessions));
            }
            let entry = SessionEntry {
                id: request.id.clone(),
                kind: request.kind.clone(),
                status: SessionStatus::Spawning,
                size: request.size,
                created_at: Utc::now(),
                seq: self.next_seq(),
                window: request.window.clone(),
                multiplexer_name: multiplexer_name.clone(),
                epoch,
                handle: None,
            };
            sessions.insert(request.id.clone(), Arc::new(Mutex::new(entry)));
        }

        let backing = match (mux.as_deref(), multiplexer_name.as_deref()) {
            (Some(mux), Some(name)) => Some((mux, name)),
            _ => None,
        };
        let mut handle = match self.start_process(&request, epoch, backing) {
            Ok(handle) => handle,
            Err(err) => {
                self.remove(&request.id);
                return Err(err);
            }
        };

        let Some(entry) = self.entry(&request.id) else {
            // Killed while spawning.
            if let Err(err) = handle.terminate() {
                warn!(session_id = %request.id, error = %err, "Failed to terminate orphaned process");
            }
            return Err(RegistryError::NotFound(request.id));
        };
        let mut guard = mutex_lock_or_recover(&entry);
        guard.handle = Some(handle);
        guard.status = SessionStatus::Active;
        info!(
            session_id = %guard.id,
            kind = %guard.kind,
            backed = guard.multiplexer_name.is_some(),
            "Session created"
        );
        Ok(guard.info())
    }

    fn start_process(
        &self,
        request: &CreateRequest,
        epoch: u64,
        backing: Option<(&dyn Multiplexer, &str)>,
    ) -> Result<Box<dyn ProcessHandle>, RegistryError> {
        let launch = match backing {
            Some((mux, name)) => {
                mux.create(name, &request.launch, request.size)?;
                let mut tags = vec![
                    (TAG_SESSION_ID, request.id.as_str()),
                    (TAG_KIND, request.kind.as_str()),
                ];
                if let Some(window) = &request.window {
                    tags.push((TAG_WINDOW, window.as_str()));
                }
                for (key, value) in tags {
                    if let Err(err) = mux.tag(name, key, value) {
                        warn!(name, key, error = %err, "Failed to tag multiplexer session");
                    }
                }
                mux.attach_command(name)
            }
            None => request.launch.clone(),
        };

        let spec = SpawnSpec {
            session_id: request.id.clone(),
            epoch,
            launch,
            size: request.size,
        };
        self.backend
            .spawn(&spec, self.events.clone())
            .map_err(|err| {
                if let Some((mux, name)) = backing {
                    if let Err(kill_err) = mux.kill(name) {
                        warn!(name, error = %kill_err, "Failed to clean up multiplexer session");
                    }
                }
                RegistryError::Spawn(err)
            })
    }

    pub fn write(&self, id: &SessionId, data: &[u8]) -> Result<(), RegistryError> {
        let entry = self.entry_or_err(id)?;
        let mut guard = mutex_lock_or_recover(&entry);
        let handle = guard
            .handle
            .as_mut()
            .ok_or_else(|| RegistryError::NoProcess(id.clone()))?;
        handle.write(data).map_err(RegistryError::Process)
    }

    /// Applies a settled size. Detached sessions only record it for the next
    /// attach.
    pub fn apply_resize(&self, id: &SessionId, size: TerminalSize) -> Result<(), RegistryError> {
        let entry = self.entry_or_err(id)?;
        let mut guard = mutex_lock_or_recover(&entry);
        guard.size = size;
        if let Some(handle) = guard.handle.as_mut() {
            handle.resize(size).map_err(RegistryError::Process)?;
        }
        debug!(session_id = %id, size = %size, "Resize applied");
        Ok(())
    }

    pub fn close(&self, id: &SessionId, mode: CloseMode) -> Result<CloseOutcome, RegistryError> {
        let entry = self.entry_or_err(id)?;
        let (handle, name, outcome) = {
            let mut guard = mutex_lock_or_recover(&entry);
            let handle = guard.handle.take();
            // Events from the released process must not look current.
            guard.epoch = self.next_epoch();
            let name = guard.multiplexer_name.clone();
            let outcome = match (mode, &name) {
                (CloseMode::Release, Some(_)) => {
                    guard.status = SessionStatus::Detached;
                    CloseOutcome::Released
                }
                _ => {
                    guard.status = SessionStatus::Closed;
                    CloseOutcome::Terminated
                }
            };
            (handle, name, outcome)
        };

        if outcome == CloseOutcome::Terminated {
            self.remove(id);
        }
        if let Some(mut handle) = handle {
            if let Err(err) = handle.terminate() {
                warn!(session_id = %id, error = %err, "Failed to terminate process");
            }
        }
        if let (CloseMode::Terminate, Some(name), Some(mux)) = (mode, &name, &self.multiplexer) {
            if let Err(err) = mux.kill(name) {
                warn!(session_id = %id, name = %name, error = %err, "Failed to kill multiplexer session");
            }
        }
        info!(session_id = %id, ?mode, ?outcome, "Session closed");
        Ok(outcome)
    }

    /// Whether an event belongs to the current attachment of a live session.
    pub fn accepts(&self, event: &ProcessEvent) -> bool {
        let Some(entry) = self.entry(event.session_id()) else {
            return false;
        };
        let guard = mutex_lock_or_recover(&entry);
        guard.epoch == event.epoch() && guard.status != SessionStatus::Closed
    }

    pub fn handle_exit(&self, id: &SessionId, epoch: u64, code: Option<i32>) -> ExitOutcome {
        let Some(entry) = self.entry(id) else {
            return ExitOutcome::Stale;
        };
        let name = {
            let guard = mutex_lock_or_recover(&entry);
            if guard.epoch != epoch || guard.status == SessionStatus::Closed {
                return ExitOutcome::Stale;
            }
            guard.multiplexer_name.clone()
        };

        // Queried without the entry lock; the epoch is re-checked below.
        let survives = match (&self.multiplexer, &name) {
            (Some(mux), Some(name)) => mux.has_session(name).unwrap_or_else(|err| {
                warn!(session_id = %id, error = %err, "Multiplexer query failed; treating session as gone");
                false
            }),
            _ => false,
        };

        let mut guard = mutex_lock_or_recover(&entry);
        if guard.epoch != epoch || guard.status == SessionStatus::Closed {
            return ExitOutcome::Stale;
        }
        guard.handle = None;
        if survives {
            guard.status = SessionStatus::Detached;
            info!(session_id = %id, ?code, "Adapter exited; multiplexer session retained");
            return ExitOutcome::Retained;
        }
        guard.status = SessionStatus::Closed;
        drop(guard);
        self.remove(id);
        info!(session_id = %id, ?code, "Session exited");
        ExitOutcome::Closed
    }

    /// Attaches a fresh adapter to a detached backed session.
    ///
    /// Returns `Ok(true)` when a new adapter was started. Blocks on process
    /// startup.
    pub fn ensure_attached(&self, id: &SessionId) -> Result<bool, RegistryError> {
        let entry = self.entry_or_err(id)?;
        let (name, size, epoch) = {
            let mut guard = mutex_lock_or_recover(&entry);
            if guard.handle.is_some() {
                return Ok(false);
            }
            let Some(name) = guard.multiplexer_name.clone() else {
                return Err(RegistryError::NoProcess(id.clone()));
            };
            let epoch = self.next_epoch();
            guard.epoch = epoch;
            (name, guard.size, epoch)
        };
        let mux = self
            .multiplexer
            .as_ref()
            .ok_or_else(|| RegistryError::NoProcess(id.clone()))?;

        if !mux.has_session(&name)? {
            info!(session_id = %id, name = %name, "Multiplexer session vanished");
            mutex_lock_or_recover(&entry).status = SessionStatus::Closed;
            self.remove(id);
            return Err(RegistryError::NotFound(id.clone()));
        }

        let spec = SpawnSpec {
            session_id: id.clone(),
            epoch,
            launch: mux.attach_command(&name),
            size,
        };
        let mut handle = self
            .backend
            .spawn(&spec, self.events.clone())
            .map_err(RegistryError::Spawn)?;

        let mut guard = mutex_lock_or_recover(&entry);
        if guard.epoch != epoch || guard.handle.is_some() || guard.status == SessionStatus::Closed {
            drop(guard);
            // Lost a race with a concurrent attach or close.
            if let Err(err) = handle.terminate() {
                warn!(session_id = %id, error = %err, "Failed to terminate surplus adapter");
            }
            return Ok(false);
        }
        guard.handle = Some(handle);
        debug!(session_id = %id, epoch, "Adapter attached");
        Ok(true)
    }

    /// Rebuilds entries from the multiplexer's session list.
    pub fn restore(&self) -> Result<usize, RegistryError> {
        let Some(mux) = &self.multiplexer else {
            return Ok(0);
        };
        let prefix = format!("{}-", mux.prefix());
        let listed = mux.list()?;

        let mut sessions = rwlock_write_or_recover(&self.sessions);
        let mut restored = 0;
        for found in listed {
            let id = found
                .session_id
                .clone()
                .or_else(|| found.name.strip_prefix(&prefix).map(str::to_string));
            let Some(id) = id.and_then(|id| SessionId::try_new(id).ok()) else {
                continue;
            };
            if sessions.contains_key(&id) {
                continue;
            }
            if sessions.len() >= self.max_sessions {
                warn!(name = %found.name, "Session limit reached; not restoring");
                continue;
            }
            let kind = found
                .kind
                .as_deref()
                .and_then(|k| SessionKind::try_new(k).ok())
                .unwrap_or_else(|| SessionKind::new(RESTORED_DEFAULT_KIND));
            let entry = SessionEntry {
                id: id.clone(),
                kind,
                status: SessionStatus::Detached,
                size: TerminalSize::default(),
                created_at: found.created_at.unwrap_or_else(Utc::now),
                seq: self.next_seq(),
                window: found.window.as_deref().and_then(|w| WindowId::try_new(w).ok()),
                multiplexer_name: Some(found.name.clone()),
                epoch: self.next_epoch(),
                handle: None,
            };
            sessions.insert(id, Arc::new(Mutex::new(entry)));
            restored += 1;
        }
        info!(restored, "Restored sessions from multiplexer");
        Ok(restored)
    }

    pub fn rename(&self, id: &SessionId, new_name: &str) -> Result<SessionInfo, RegistryError> {
        let entry = self.entry_or_err(id)?;
        let mut guard = mutex_lock_or_recover(&entry);
        let (Some(current), Some(mux)) = (guard.multiplexer_name.clone(), &self.multiplexer) else {
            return Err(RegistryError::NotPersistent(id.clone()));
        };
        mux.rename(&current, new_name)?;
        guard.multiplexer_name = Some(new_name.to_string());
        info!(session_id = %id, from = %current, to = %new_name, "Session renamed");
        Ok(guard.info())
    }

    /// Moves a session to a new window context and records it on the
    /// multiplexer so the assignment survives restarts.
    pub fn set_window(&self, id: &SessionId, window: &WindowId) -> Result<(), RegistryError> {
        let entry = self.entry_or_err(id)?;
        let mut guard = mutex_lock_or_recover(&entry);
        guard.window = Some(window.clone());
        if let (Some(name), Some(mux)) = (&guard.multiplexer_name, &self.multiplexer) {
            if let Err(err) = mux.tag(name, TAG_WINDOW, window.as_str()) {
                warn!(session_id = %id, error = %err, "Failed to tag window on multiplexer session");
            }
        }
        Ok(())
    }

    /// Sets the status of a live session. Closed sessions are left alone.
    pub fn set_status(&self, id: &SessionId, status: SessionStatus) -> bool {
        let Some(entry) = self.entry(id) else {
            return false;
        };
        let mut guard = mutex_lock_or_recover(&entry);
        if guard.status == SessionStatus::Closed {
            return false;
        }
        guard.status = status;
        true
    }

    pub fn get(&self, id: &SessionId) -> Option<SessionInfo> {
        let entry = self.entry(id)?;
        let guard = mutex_lock_or_recover(&entry);
        Some(guard.info())
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let entries: Vec<_> = rwlock_read_or_recover(&self.sessions)
            .values()
            .cloned()
            .collect();
        let mut infos: Vec<SessionInfo> = entries
            .iter()
            .map(|entry| mutex_lock_or_recover(entry).info())
            .collect();
        infos.sort_by_key(|info| info.seq);
        infos
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        rwlock_read_or_recover(&self.sessions).contains_key(id)
    }

    pub fn len(&self) -> usize {
        rwlock_read_or_recover(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Releases every session: backed ones survive in the multiplexer,
    /// everything else is terminated.
    pub fn shutdown(&self) -> (usize, usize) {
        let ids: Vec<SessionId> = rwlock_read_or_recover(&self.sessions)
            .keys()
            .cloned()
            .collect();
        let mut released = 0;
        let mut terminated = 0;
        for id in ids {
            match self.close(&id, CloseMode::Release) {
                Ok(CloseOutcome::Released) => released += 1,
                Ok(CloseOutcome::Terminated) => terminated += 1,
                Err(err) => debug!(session_id = %id, error = %err, "Session already gone"),
            }
        }
        info!(released, terminated, "Registry shut down");
        (released, terminated)
    }
}

impl InputTarget for SessionRegistry {
    fn write_input(&self, session_id: &SessionId, data: &[u8]) -> Result<(), RegistryError> {
        self.write(session_id, data)
    }
}

impl ResizeApplier for SessionRegistry {
    fn apply_resize(&self, id: &SessionId, size: TerminalSize) -> Result<(), RegistryError> {
        SessionRegistry::apply_resize(self, id, size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockMultiplexer;
    use crate::test_support::MockProcessBackend;
    use tokio::sync::mpsc;

    fn request(kind: &str, persistent: bool) -> CreateRequest {
        CreateRequest {
            id: generate_session_id(),
            kind: SessionKind::new(kind),
            size: TerminalSize::default(),
            window: Some(WindowId::new("w1")),
            launch: LaunchSpec::new("/bin/sh"),
            persistent,
        }
    }

    fn registry(
        backend: &Arc<MockProcessBackend>,
        mux: Option<Arc<MockMultiplexer>>,
        max: usize,
    ) -> (SessionRegistry, mpsc::UnboundedReceiver<ProcessEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mux = mux.map(|m| m as Arc<dyn Multiplexer>);
        let backend: Arc<dyn ProcessBackend> = Arc::clone(backend) as Arc<dyn ProcessBackend>;
        (SessionRegistry::new(backend, mux, tx, max), rx)
    }

    #[test]
    fn test_create_lists_active_session() {
        let backend = Arc::new(MockProcessBackend::new());
        let (registry, _rx) = registry(&backend, None, 4);

        let info = registry.create(request("shell", false)).unwrap();
        assert_eq!(info.status, SessionStatus::Active);
        assert!(!info.is_backed());
        assert_eq!(registry.list().len(), 1);
        assert_eq!(backend.spawn_count(), 1);
    }

    #[test]
    fn test_create_respects_limit() {
        let backend = Arc::new(MockProcessBackend::new());
        let (registry, _rx) = registry(&backend, None, 1);

        registry.create(request("shell", false)).unwrap();
        let err = registry.create(request("shell", false)).unwrap_err();
        assert!(matches!(err, RegistryError::LimitReached(1)));
    }

    #[test]
    fn test_create_refuses_an_id_in_use() {
        let backend = Arc::new(MockProcessBackend::new());
        let (registry, _rx) = registry(&backend, None, 4);
        let first = request("shell", false);
        let mut second = request("editor", false);
        second.id = first.id.clone();

        let created = registry.create(first).unwrap();
        let err = registry.create(second).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateId(ref id) if *id == created.id));
        assert_eq!(registry.get(&created.id).unwrap().kind.as_str(), "shell");
        assert_eq!(backend.spawn_count(), 1);
    }

    #[test]
    fn test_spawn_failure_leaves_no_entry() {
        let backend = Arc::new(
            MockProcessBackend::builder()
                .with_spawn_error(crate::ports::SpawnErrorKind::NotFound)
                .build(),
        );
        let (registry, _rx) = registry(&backend, None, 4);

        let err = registry.create(request("vim", false)).unwrap_err();
        assert!(matches!(err, RegistryError::Spawn(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_close_release_unbacked_terminates() {
        let backend = Arc::new(MockProcessBackend::new());
        let (registry, _rx) = registry(&backend, None, 4);
        let info = registry.create(request("shell", false)).unwrap();

        let outcome = registry.close(&info.id, CloseMode::Release).unwrap();
        assert_eq!(outcome, CloseOutcome::Terminated);
        assert!(registry.get(&info.id).is_none());
        assert!(backend.was_terminated(&info.id));
    }

    #[test]
    fn test_close_release_backed_detaches() {
        let backend = Arc::new(MockProcessBackend::new());
        let mux = Arc::new(MockMultiplexer::new("termhub"));
        let (registry, _rx) = registry(&backend, Some(Arc::clone(&mux)), 4);
        let info = registry.create(request("shell", true)).unwrap();
        let name = info.multiplexer_name.clone().unwrap();

        let outcome = registry.close(&info.id, CloseMode::Release).unwrap();
        assert_eq!(outcome, CloseOutcome::Released);
        assert_eq!(
            registry.get(&info.id).unwrap().status,
            SessionStatus::Detached
        );
        assert!(mux.has_session(&name).unwrap());
    }

    #[test]
    fn test_close_terminate_backed_kills_multiplexer_session() {
        let backend = Arc::new(MockProcessBackend::new());
        let mux = Arc::new(MockMultiplexer::new("termhub"));
        let (registry, _rx) = registry(&backend, Some(Arc::clone(&mux)), 4);
        let info = registry.create(request("shell", true)).unwrap();
        let name = info.multiplexer_name.clone().unwrap();

        registry.close(&info.id, CloseMode::Terminate).unwrap();
        assert!(registry.get(&info.id).is_none());
        assert!(!mux.has_session(&name).unwrap());
    }

    #[test]
    fn test_released_adapter_events_are_stale() {
        let backend = Arc::new(MockProcessBackend::new());
        let mux = Arc::new(MockMultiplexer::new("termhub"));
        let (registry, _rx) = registry(&backend, Some(mux), 4);
        let info = registry.create(request("shell", true)).unwrap();
        let old_epoch = backend.epoch_of(&info.id).unwrap();

        registry.close(&info.id, CloseMode::Release).unwrap();
        let stale = ProcessEvent::Exited {
            session_id: info.id.clone(),
            epoch: old_epoch,
            code: Some(0),
        };
        assert!(!registry.accepts(&stale));
        assert_eq!(
            registry.handle_exit(&info.id, old_epoch, Some(0)),
            ExitOutcome::Stale
        );
        assert!(registry.get(&info.id).is_some());
    }

    #[test]
    fn test_exit_of_backed_session_with_live_multiplexer_is_retained() {
        let backend = Arc::new(MockProcessBackend::new());
        let mux = Arc::new(MockMultiplexer::new("termhub"));
        let (registry, _rx) = registry(&backend, Some(Arc::clone(&mux)), 4);
        let info = registry.create(request("shell", true)).unwrap();
        let epoch = backend.epoch_of(&info.id).unwrap();

        assert_eq!(
            registry.handle_exit(&info.id, epoch, None),
            ExitOutcome::Retained
        );
        assert_eq!(
            registry.get(&info.id).unwrap().status,
            SessionStatus::Detached
        );

        // Once the multiplexer session is gone a reattach reports it missing.
        mux.kill(info.multiplexer_name.as_deref().unwrap()).unwrap();
        assert!(matches!(
            registry.ensure_attached(&info.id),
            Err(RegistryError::NotFound(_))
        ));
        assert!(registry.get(&info.id).is_none());
    }

    #[test]
    fn test_exit_of_unbacked_session_closes_it() {
        let backend = Arc::new(MockProcessBackend::new());
        let (registry, _rx) = registry(&backend, None, 4);
        let info = registry.create(request("shell", false)).unwrap();
        let epoch = backend.epoch_of(&info.id).unwrap();

        assert_eq!(
            registry.handle_exit(&info.id, epoch, Some(1)),
            ExitOutcome::Closed
        );
        assert!(registry.get(&info.id).is_none());
    }

    #[test]
    fn test_ensure_attached_spawns_new_epoch() {
        let backend = Arc::new(MockProcessBackend::new());
        let mux = Arc::new(MockMultiplexer::new("termhub"));
        let (registry, _rx) = registry(&backend, Some(mux), 4);
        let info = registry.create(request("shell", true)).unwrap();
        let first = backend.epoch_of(&info.id).unwrap();

        registry.close(&info.id, CloseMode::Release).unwrap();
        assert!(registry.ensure_attached(&info.id).unwrap());
        assert!(!registry.ensure_attached(&info.id).unwrap());

        let second = backend.epoch_of(&info.id).unwrap();
        assert_ne!(first, second);
        assert_eq!(backend.spawn_count(), 2);
    }

    #[test]
    fn test_restore_registers_detached_sessions() {
        let backend = Arc::new(MockProcessBackend::new());
        let mux = Arc::new(MockMultiplexer::new("termhub"));
        mux.seed("termhub-abc12345", Some("shell"), Some("w1"));
        mux.seed("termhub-def67890", None, None);
        mux.seed("someone-else", None, None);
        let (registry, _rx) = registry(&backend, Some(mux), 8);

        assert_eq!(registry.restore().unwrap(), 2);
        let restored = registry.get(&SessionId::new("abc12345")).unwrap();
        assert_eq!(restored.status, SessionStatus::Detached);
        assert_eq!(restored.window, Some(WindowId::new("w1")));
        assert_eq!(restored.kind.as_str(), "shell");
        assert_eq!(backend.spawn_count(), 0);

        let untagged = registry.get(&SessionId::new("def67890")).unwrap();
        assert_eq!(untagged.window, None);
    }

    #[test]
    fn test_rename_requires_backing() {
        let backend = Arc::new(MockProcessBackend::new());
        let mux = Arc::new(MockMultiplexer::new("termhub"));
        let (registry, _rx) = registry(&backend, Some(Arc::clone(&mux)), 4);
        let plain = registry.create(request("shell", false)).unwrap();
        let backed = registry.create(request("shell", true)).unwrap();

        assert!(matches!(
            registry.rename(&plain.id, "work"),
            Err(RegistryError::NotPersistent(_))
        ));
        let renamed = registry.rename(&backed.id, "work").unwrap();
        assert_eq!(renamed.multiplexer_name.as_deref(), Some("work"));
        assert!(mux.has_session("work").unwrap());
    }

    #[test]
    fn test_write_reaches_handle() {
        let backend = Arc::new(MockProcessBackend::new());
        let (registry, _rx) = registry(&backend, None, 4);
        let info = registry.create(request("shell", false)).unwrap();

        registry.write(&info.id, b"ls\n").unwrap();
        assert_eq!(backend.written(&info.id), b"ls\n".to_vec());
    }

    #[test]
    fn test_shutdown_releases_backed_and_terminates_rest() {
        let backend = Arc::new(MockProcessBackend::new());
        let mux = Arc::new(MockMultiplexer::new("termhub"));
        let (registry, _rx) = registry(&backend, Some(mux), 4);
        registry.create(request("shell", true)).unwrap();
        registry.create(request("shell", false)).unwrap();

        assert_eq!(registry.shutdown(), (1, 1));
        assert_eq!(registry.len(), 1);
    }
}
