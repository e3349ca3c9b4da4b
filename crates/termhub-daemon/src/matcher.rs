//! Reconnection Matcher and the PendingSpawnRequest table.
//!
//! Every spawn intent is recorded under `(windowId, requestId)` before the
//! process is started. The record is the single place that decides whether a
//! repeated or racing request attaches to an existing session, waits for an
//! in-flight one, or spawns.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use termhub_common::mutex_lock_or_recover;

use crate::domain::ConnectionId;
use crate::domain::RequestId;
use crate::domain::SessionId;
use crate::domain::SessionInfo;
use crate::domain::SessionKind;
use crate::domain::SessionStatus;
use crate::domain::WindowId;
use crate::error::MatchError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachTarget {
    Session(SessionId),
    /// Newest live session of this kind in the requester's window.
    Heuristic { kind: SessionKind },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachIntent {
    pub request: Option<RequestId>,
    pub target: AttachTarget,
    /// Sessions the client already holds.
    pub exclude: HashSet<SessionId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpawnAdmission {
    /// No record yet; the caller must spawn and then settle the record.
    Proceed,
    /// Same request already spawning; the caller is queued as a waiter.
    InFlight,
    /// Same request already produced this session.
    AlreadyResolved(SessionId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    Session(SessionId),
    /// Matched an in-flight spawn; the caller is notified when it settles.
    Pending,
}

/// Connections to notify when a pending spawn settles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settled {
    pub requester: Option<ConnectionId>,
    pub waiters: Vec<ConnectionId>,
}

impl Settled {
    pub fn recipients(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.requester.iter().copied().chain(self.waiters.iter().copied())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingState {
    InFlight,
    Resolved(SessionId),
    Failed,
}

#[derive(Debug)]
struct PendingSpawn {
    connection: ConnectionId,
    state: PendingState,
    waiters: Vec<ConnectionId>,
    updated: Instant,
}

impl PendingSpawn {
    fn add_waiter(&mut self, connection: ConnectionId) {
        if connection != self.connection && !self.waiters.contains(&connection) {
            self.waiters.push(connection);
        }
    }

    fn settle(&mut self, state: PendingState) -> Settled {
        self.state = state;
        self.updated = Instant::now();
        Settled {
            requester: Some(self.connection),
            waiters: std::mem::take(&mut self.waiters),
        }
    }
}

type PendingKey = (WindowId, RequestId);

pub struct ReconnectionMatcher {
    pending: Mutex<HashMap<PendingKey, PendingSpawn>>,
    retention: Duration,
}

impl ReconnectionMatcher {
    pub fn new(retention: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            retention,
        }
    }

    /// Records a spawn intent, or reports what an earlier identical intent
    /// became.
    pub fn begin_spawn(
        &self,
        window: &WindowId,
        request: &RequestId,
        connection: ConnectionId,
    ) -> SpawnAdmission {
        let mut pending = mutex_lock_or_recover(&self.pending);
        let key = (window.clone(), request.clone());
        if let Some(existing) = pending.get_mut(&key) {
            match &existing.state {
                PendingState::InFlight => {
                    existing.add_waiter(connection);
                    return SpawnAdmission::InFlight;
                }
                PendingState::Resolved(session_id) => {
                    existing.updated = Instant::now();
                    return SpawnAdmission::AlreadyResolved(session_id.clone());
                }
                PendingState::Failed => {}
            }
        }
        pending.insert(
            key,
            PendingSpawn {
                connection,
                state: PendingState::InFlight,
                waiters: Vec::new(),
                updated: Instant::now(),
            },
        );
        SpawnAdmission::Proceed
    }

    pub fn complete(&self, window: &WindowId, request: &RequestId, session_id: SessionId) -> Settled {
        self.settle(window, request, PendingState::Resolved(session_id))
            .unwrap_or_default()
    }

    pub fn fail(&self, window: &WindowId, request: &RequestId) -> Settled {
        self.settle(window, request, PendingState::Failed)
            .unwrap_or_default()
    }

    /// Gives up on a spawn that is still in flight. Returns `None` when it
    /// already settled.
    pub fn expire(&self, window: &WindowId, request: &RequestId) -> Option<Settled> {
        let mut pending = mutex_lock_or_recover(&self.pending);
        let entry = pending.get_mut(&(window.clone(), request.clone()))?;
        if entry.state != PendingState::InFlight {
            return None;
        }
        Some(entry.settle(PendingState::Failed))
    }

    fn settle(&self, window: &WindowId, request: &RequestId, state: PendingState) -> Option<Settled> {
        let mut pending = mutex_lock_or_recover(&self.pending);
        let entry = pending.get_mut(&(window.clone(), request.clone()))?;
        if entry.state != PendingState::InFlight {
            return None;
        }
        Some(entry.settle(state))
    }

    /// Drops settled records older than the retention period.
    pub fn purge(&self, now: Instant) -> usize {
        let mut pending = mutex_lock_or_recover(&self.pending);
        let before = pending.len();
        pending.retain(|_, entry| {
            entry.state == PendingState::InFlight
                || now.saturating_duration_since(entry.updated) < self.retention
        });
        let purged = before - pending.len();
        if purged > 0 {
            debug!(purged, "Purged settled spawn requests");
        }
        purged
    }

    pub fn pending_count(&self) -> usize {
        mutex_lock_or_recover(&self.pending).len()
    }

    /// Resolves a reconnect intent against a registry snapshot.
    ///
    /// Never spawns: a miss is `SessionGone`/`NoCandidate`, which the caller
    /// must surface as such.
    pub fn resolve(
        &self,
        intent: &AttachIntent,
        window: &WindowId,
        connection: ConnectionId,
        sessions: &[SessionInfo],
        is_live: impl Fn(ConnectionId) -> bool,
    ) -> Result<MatchOutcome, MatchError> {
        let kind = match &intent.target {
            AttachTarget::Session(session_id) => {
                return match_explicit(sessions, session_id, window).map(MatchOutcome::Session);
            }
            AttachTarget::Heuristic { kind } => kind,
        };

        let mut pending = mutex_lock_or_recover(&self.pending);
        if let Some(request) = &intent.request {
            if let Some(entry) = pending.get_mut(&(window.clone(), request.clone())) {
                match &entry.state {
                    PendingState::InFlight => {
                        entry.add_waiter(connection);
                        return Ok(MatchOutcome::Pending);
                    }
                    PendingState::Resolved(session_id) => {
                        let alive = sessions
                            .iter()
                            .any(|s| s.id == *session_id && s.status != SessionStatus::Closed);
                        if alive {
                            return Ok(MatchOutcome::Session(session_id.clone()));
                        }
                    }
                    PendingState::Failed => {}
                }
            }
        }

        // Sessions another live connection just spawned are spoken for.
        let mut excluded = intent.exclude.clone();
        for ((entry_window, _), entry) in pending.iter() {
            if let PendingState::Resolved(session_id) = &entry.state {
                if entry_window == window && entry.connection != connection && is_live(entry.connection)
                {
                    excluded.insert(session_id.clone());
                }
            }
        }
        drop(pending);

        heuristic_candidate(sessions, kind, window, &excluded)
            .map(MatchOutcome::Session)
            .ok_or_else(|| MatchError::NoCandidate {
                kind: kind.to_string(),
                window: window.clone(),
            })
    }
}

pub fn match_explicit(
    sessions: &[SessionInfo],
    session_id: &SessionId,
    window: &WindowId,
) -> Result<SessionId, MatchError> {
    let info = sessions
        .iter()
        .find(|s| s.id == *session_id && s.status != SessionStatus::Closed)
        .ok_or_else(|| MatchError::SessionGone(session_id.clone()))?;
    if let Some(expected) = &info.window {
        if expected != window {
            return Err(MatchError::WindowMismatch {
                session_id: session_id.clone(),
                expected: expected.clone(),
                actual: window.clone(),
            });
        }
    }
    Ok(info.id.clone())
}

/// Most recent attachable session with this kind and window.
pub fn heuristic_candidate(
    sessions: &[SessionInfo],
    kind: &SessionKind,
    window: &WindowId,
    excluded: &HashSet<SessionId>,
) -> Option<SessionId> {
    sessions
        .iter()
        .filter(|s| s.status.is_attachable())
        .filter(|s| s.kind == *kind)
        .filter(|s| s.window.as_ref() == Some(window))
        .filter(|s| !excluded.contains(&s.id))
        .max_by_key(|s| s.recency())
        .map(|s| s.id.clone())
}
