//! Ownership Router: the single gate for output fan-out and input fan-in.
//!
//! Each session has one owner entry behind its own mutex. Output delivery,
//! input forwarding and owner-set changes for a session all happen under that
//! mutex, so a delivery can never race a detach and reach a connection that
//! was just removed.
//!
//! Lock order: session entry, then connection entry. The two maps are never
//! held while taking an entry lock.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;
use tracing::warn;

use termhub_common::mutex_lock_or_recover;
use termhub_common::rwlock_read_or_recover;
use termhub_common::rwlock_write_or_recover;
use termhub_protocol::ServerMessage;

use crate::domain::ConnectionId;
use crate::domain::SessionId;
use crate::domain::WindowId;
use crate::error::RegistryError;
use crate::error::RouterError;

/// Output kept for a session while nobody owns it, replayed to the next owner.
const MAX_BACKLOG_BYTES: usize = 64 * 1024;

/// Messages a connection may have queued before it counts as stalled.
pub const OUTBOX_CAPACITY: usize = 1024;

/// Sending half of a connection's message queue.
///
/// The queue is bounded. The first send that finds it full marks the outbox
/// overflowed; from then on sends fail and the receiver reports the
/// connection as finished, so a client that stops reading is cut off instead
/// of buffering session output without limit.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<ServerMessage>,
    overflowed: Arc<AtomicBool>,
}

impl Outbox {
    /// Queues `message` without waiting. Returns `false` if it was not queued.
    pub fn send(&self, message: ServerMessage) -> bool {
        if self.overflowed.load(Ordering::Acquire) {
            return false;
        }
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.overflowed.store(true, Ordering::Release);
                warn!(capacity = self.tx.max_capacity(), "Outbox full; dropping slow connection");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_overflowed(&self) -> bool {
        self.overflowed.load(Ordering::Acquire)
    }
}

/// Receiving half of a connection's message queue.
#[derive(Debug)]
pub struct OutboxReceiver {
    rx: mpsc::Receiver<ServerMessage>,
    overflowed: Arc<AtomicBool>,
}

impl OutboxReceiver {
    /// Next queued message; `None` once every sender is gone or the queue
    /// overflowed.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        if self.is_overflowed() {
            return None;
        }
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<ServerMessage, TryRecvError> {
        if self.is_overflowed() {
            return Err(TryRecvError::Disconnected);
        }
        self.rx.try_recv()
    }

    pub fn is_overflowed(&self) -> bool {
        self.overflowed.load(Ordering::Acquire)
    }
}

/// Creates a connection queue holding at most `capacity` messages.
pub fn outbox(capacity: usize) -> (Outbox, OutboxReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let overflowed = Arc::new(AtomicBool::new(false));
    (
        Outbox {
            tx,
            overflowed: Arc::clone(&overflowed),
        },
        OutboxReceiver { rx, overflowed },
    )
}

/// Where authorized input ends up.
pub trait InputTarget {
    fn write_input(&self, session_id: &SessionId, data: &[u8]) -> Result<(), RegistryError>;
}

#[derive(Default)]
struct OwnerEntry {
    window: Option<WindowId>,
    owners: BTreeMap<ConnectionId, Outbox>,
    backlog: VecDeque<Bytes>,
    backlog_bytes: usize,
}

impl OwnerEntry {
    fn push_backlog(&mut self, data: Bytes) {
        self.backlog_bytes += data.len();
        self.backlog.push_back(data);
        while self.backlog_bytes > MAX_BACKLOG_BYTES {
            match self.backlog.pop_front() {
                Some(dropped) => self.backlog_bytes -= dropped.len(),
                None => break,
            }
        }
    }
}

struct ConnectionEntry {
    window: WindowId,
    outbox: Outbox,
    owned: BTreeSet<SessionId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Added,
    AlreadyOwner,
}

#[derive(Default)]
pub struct OwnershipRouter {
    entries: RwLock<HashMap<SessionId, Arc<Mutex<OwnerEntry>>>>,
    connections: RwLock<HashMap<ConnectionId, Arc<Mutex<ConnectionEntry>>>>,
    next_connection: AtomicU64,
}

impl OwnershipRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, session_id: &SessionId) -> Option<Arc<Mutex<OwnerEntry>>> {
        rwlock_read_or_recover(&self.entries).get(session_id).cloned()
    }

    fn entry_or_insert(&self, session_id: &SessionId) -> Arc<Mutex<OwnerEntry>> {
        if let Some(entry) = self.entry(session_id) {
            return entry;
        }
        rwlock_write_or_recover(&self.entries)
            .entry(session_id.clone())
            .or_default()
            .clone()
    }

    fn connection(&self, connection_id: ConnectionId) -> Option<Arc<Mutex<ConnectionEntry>>> {
        rwlock_read_or_recover(&self.connections)
            .get(&connection_id)
            .cloned()
    }

    pub fn connect(&self, window: WindowId, outbox: Outbox) -> ConnectionId {
        let id = ConnectionId::new(self.next_connection.fetch_add(1, Ordering::Relaxed) + 1);
        let entry = ConnectionEntry {
            window,
            outbox,
            owned: BTreeSet::new(),
        };
        rwlock_write_or_recover(&self.connections).insert(id, Arc::new(Mutex::new(entry)));
        id
    }

    pub fn connection_window(&self, connection_id: ConnectionId) -> Option<WindowId> {
        self.connection(connection_id)
            .map(|entry| mutex_lock_or_recover(&entry).window.clone())
    }

    pub fn is_connected(&self, connection_id: ConnectionId) -> bool {
        rwlock_read_or_recover(&self.connections).contains_key(&connection_id)
    }

    pub fn connection_count(&self) -> usize {
        rwlock_read_or_recover(&self.connections).len()
    }

    /// Adds `connection_id` to the owner set of `session_id`.
    ///
    /// Only connections of the session's assigned window may own it; a
    /// session without a window adopts the caller's. Idempotent.
    pub fn register_owner(
        &self,
        session_id: &SessionId,
        connection_id: ConnectionId,
    ) -> Result<Registration, RouterError> {
        let connection = self
            .connection(connection_id)
            .ok_or(RouterError::UnknownConnection(connection_id))?;
        let (window, outbox) = {
            let conn = mutex_lock_or_recover(&connection);
            (conn.window.clone(), conn.outbox.clone())
        };

        let entry = self.entry_or_insert(session_id);
        let mut owner = mutex_lock_or_recover(&entry);
        if let Some(expected) = owner.window.clone() {
            if expected != window {
                return Err(RouterError::WindowMismatch {
                    session_id: session_id.clone(),
                    expected,
                    actual: window,
                });
            }
        } else {
            owner.window = Some(window);
        }
        if owner.owners.contains_key(&connection_id) {
            return Ok(Registration::AlreadyOwner);
        }

        // Replay under the entry lock so live output cannot overtake it.
        // One message, however many chunks were buffered.
        if !owner.backlog.is_empty() {
            let mut data = Vec::with_capacity(owner.backlog_bytes);
            for chunk in owner.backlog.drain(..) {
                data.extend_from_slice(&chunk);
            }
            owner.backlog_bytes = 0;
            outbox.send(ServerMessage::Output {
                session_id: session_id.to_string(),
                data,
            });
        }
        owner.owners.insert(connection_id, outbox);
        mutex_lock_or_recover(&connection)
            .owned
            .insert(session_id.clone());
        if !self.is_connected(connection_id) {
            // Lost a race with disconnect, which no longer sees this session.
            owner.owners.remove(&connection_id);
            return Err(RouterError::UnknownConnection(connection_id));
        }
        debug!(session_id = %session_id, connection_id = %connection_id, "Owner registered");
        Ok(Registration::Added)
    }

    /// Removes one owner. Returns `true` when the session has no owners left;
    /// the session itself is left alone.
    pub fn unregister_owner(&self, session_id: &SessionId, connection_id: ConnectionId) -> bool {
        let Some(entry) = self.entry(session_id) else {
            return true;
        };
        let mut owner = mutex_lock_or_recover(&entry);
        owner.owners.remove(&connection_id);
        if let Some(connection) = self.connection(connection_id) {
            mutex_lock_or_recover(&connection).owned.remove(session_id);
        }
        owner.owners.is_empty()
    }

    /// Delivers output to exactly the current owners. Returns how many
    /// connections received it.
    pub fn route_output(&self, session_id: &SessionId, data: Bytes) -> usize {
        let Some(entry) = self.entry(session_id) else {
            return 0;
        };
        let mut owner = mutex_lock_or_recover(&entry);
        if owner.owners.is_empty() {
            owner.push_backlog(data);
            return 0;
        }
        let mut delivered = 0;
        for outbox in owner.owners.values() {
            let message = ServerMessage::Output {
                session_id: session_id.to_string(),
                data: data.to_vec(),
            };
            if outbox.send(message) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Forwards input if and only if `connection_id` owns the session.
    pub fn route_input(
        &self,
        connection_id: ConnectionId,
        session_id: &SessionId,
        data: &[u8],
        target: &dyn InputTarget,
    ) -> Result<(), RouterError> {
        let not_owner = || RouterError::NotOwner {
            session_id: session_id.clone(),
            connection_id,
        };
        let entry = self.entry(session_id).ok_or_else(not_owner)?;
        let owner = mutex_lock_or_recover(&entry);
        if !owner.owners.contains_key(&connection_id) {
            warn!(
                session_id = %session_id,
                connection_id = %connection_id,
                "Input rejected: connection does not own session"
            );
            return Err(not_owner());
        }
        target.write_input(session_id, data)?;
        Ok(())
    }

    pub fn is_owner(&self, connection_id: ConnectionId, session_id: &SessionId) -> bool {
        self.entry(session_id)
            .map(|entry| mutex_lock_or_recover(&entry).owners.contains_key(&connection_id))
            .unwrap_or(false)
    }

    pub fn owners(&self, session_id: &SessionId) -> Vec<ConnectionId> {
        self.entry(session_id)
            .map(|entry| mutex_lock_or_recover(&entry).owners.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn window_of(&self, session_id: &SessionId) -> Option<WindowId> {
        self.entry(session_id)
            .and_then(|entry| mutex_lock_or_recover(&entry).window.clone())
    }

    /// Pins a session to a window before anyone owns it.
    pub fn assign_window(&self, session_id: &SessionId, window: WindowId) {
        let entry = self.entry_or_insert(session_id);
        let mut owner = mutex_lock_or_recover(&entry);
        if owner.window.is_none() {
            owner.window = Some(window);
        }
    }

    /// Sends `exited` to the owners and forgets the session.
    pub fn route_exit(&self, session_id: &SessionId, code: Option<i32>) -> Vec<ConnectionId> {
        let message = ServerMessage::Exited {
            session_id: session_id.to_string(),
            code,
        };
        self.drop_session(session_id, Some(message))
    }

    /// Revokes every owner of a session, sending `detached` to each, and
    /// moves it to `window`.
    pub fn reassign_window(&self, session_id: &SessionId, window: WindowId) -> Vec<ConnectionId> {
        let entry = self.entry_or_insert(session_id);
        let mut owner = mutex_lock_or_recover(&entry);
        let revoked = self.revoke_all(session_id, &mut owner);
        owner.window = Some(window);
        revoked
    }

    /// Revokes every owner of a session, sending `detached` to each.
    pub fn release_owners(&self, session_id: &SessionId) -> Vec<ConnectionId> {
        let Some(entry) = self.entry(session_id) else {
            return Vec::new();
        };
        let mut owner = mutex_lock_or_recover(&entry);
        self.revoke_all(session_id, &mut owner)
    }

    fn revoke_all(&self, session_id: &SessionId, owner: &mut OwnerEntry) -> Vec<ConnectionId> {
        let owners = std::mem::take(&mut owner.owners);
        let mut revoked = Vec::with_capacity(owners.len());
        for (connection_id, outbox) in owners {
            outbox.send(ServerMessage::Detached {
                session_id: session_id.to_string(),
            });
            if let Some(connection) = self.connection(connection_id) {
                mutex_lock_or_recover(&connection).owned.remove(session_id);
            }
            revoked.push(connection_id);
        }
        revoked
    }

    /// Forgets a session entirely, optionally telling its owners first.
    pub fn drop_session(
        &self,
        session_id: &SessionId,
        farewell: Option<ServerMessage>,
    ) -> Vec<ConnectionId> {
        let Some(entry) = rwlock_write_or_recover(&self.entries).remove(session_id) else {
            return Vec::new();
        };
        let mut owner = mutex_lock_or_recover(&entry);
        let owners = std::mem::take(&mut owner.owners);
        let mut notified = Vec::with_capacity(owners.len());
        for (connection_id, outbox) in owners {
            if let Some(message) = &farewell {
                outbox.send(message.clone());
            }
            if let Some(connection) = self.connection(connection_id) {
                mutex_lock_or_recover(&connection).owned.remove(session_id);
            }
            notified.push(connection_id);
        }
        notified
    }

    /// Sends one copy of `message` to every connection owning any of
    /// `sessions`.
    pub fn notify_owners(&self, sessions: &[SessionId], message: &ServerMessage) -> usize {
        let mut recipients: BTreeMap<ConnectionId, Outbox> = BTreeMap::new();
        for session_id in sessions {
            if let Some(entry) = self.entry(session_id) {
                let owner = mutex_lock_or_recover(&entry);
                for (connection_id, outbox) in &owner.owners {
                    recipients
                        .entry(*connection_id)
                        .or_insert_with(|| outbox.clone());
                }
            }
        }
        recipients
            .values()
            .filter(|outbox| outbox.send(message.clone()))
            .count()
    }

    pub fn send_to(&self, connection_id: ConnectionId, message: ServerMessage) -> bool {
        let Some(connection) = self.connection(connection_id) else {
            return false;
        };
        let outbox = mutex_lock_or_recover(&connection).outbox.clone();
        outbox.send(message)
    }

    /// Drops a connection and all its registrations. Returns the sessions
    /// that no longer have any owner.
    pub fn disconnect(&self, connection_id: ConnectionId) -> Vec<SessionId> {
        let Some(connection) = rwlock_write_or_recover(&self.connections).remove(&connection_id)
        else {
            return Vec::new();
        };
        let owned = std::mem::take(&mut mutex_lock_or_recover(&connection).owned);

        let mut orphaned = Vec::new();
        for session_id in owned {
            let Some(entry) = self.entry(&session_id) else {
                continue;
            };
            let mut owner = mutex_lock_or_recover(&entry);
            owner.owners.remove(&connection_id);
            if owner.owners.is_empty() {
                orphaned.push(session_id);
            }
        }
        debug!(connection_id = %connection_id, orphaned = orphaned.len(), "Connection removed");
        orphaned
    }

    /// Drops every connection, closing their outboxes.
    pub fn disconnect_all(&self) -> usize {
        let ids: Vec<ConnectionId> = rwlock_read_or_recover(&self.connections)
            .keys()
            .copied()
            .collect();
        for id in &ids {
            self.disconnect(*id);
        }
        ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingTarget {
        writes: StdMutex<Vec<(SessionId, Vec<u8>)>>,
    }

    impl InputTarget for RecordingTarget {
        fn write_input(&self, session_id: &SessionId, data: &[u8]) -> Result<(), RegistryError> {
            self.writes
                .lock()
                .unwrap()
                .push((session_id.clone(), data.to_vec()));
            Ok(())
        }
    }

    fn connect(
        router: &OwnershipRouter,
        window: &str,
    ) -> (ConnectionId, OutboxReceiver) {
        let (tx, rx) = outbox(OUTBOX_CAPACITY);
        (router.connect(WindowId::new(window), tx), rx)
    }

    fn drain(rx: &mut OutboxReceiver) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(message);
        }
        out
    }

    #[test]
    fn test_output_reaches_only_owners() {
        let router = OwnershipRouter::new();
        let (a, mut rx_a) = connect(&router, "w1");
        let (_b, mut rx_b) = connect(&router, "w2");
        let session = SessionId::new("s1");

        router.register_owner(&session, a).unwrap();
        assert_eq!(router.route_output(&session, Bytes::from_static(b"hi")), 1);

        assert_eq!(drain(&mut rx_a).len(), 1);
        assert!(drain(&mut rx_b).is_empty());
    }

    #[test]
    fn test_window_mismatch_is_rejected() {
        let router = OwnershipRouter::new();
        let (a, _rx_a) = connect(&router, "w1");
        let (b, _rx_b) = connect(&router, "w2");
        let session = SessionId::new("s1");

        router.register_owner(&session, a).unwrap();
        let err = router.register_owner(&session, b).unwrap_err();
        assert!(matches!(err, RouterError::WindowMismatch { .. }));
        assert_eq!(router.owners(&session), vec![a]);
    }

    #[test]
    fn test_register_is_idempotent() {
        let router = OwnershipRouter::new();
        let (a, _rx) = connect(&router, "w1");
        let session = SessionId::new("s1");

        assert_eq!(router.register_owner(&session, a).unwrap(), Registration::Added);
        assert_eq!(
            router.register_owner(&session, a).unwrap(),
            Registration::AlreadyOwner
        );
        assert_eq!(router.owners(&session), vec![a]);
    }

    #[test]
    fn test_input_from_non_owner_is_rejected() {
        let router = OwnershipRouter::new();
        let (a, _rx_a) = connect(&router, "w1");
        let (b, _rx_b) = connect(&router, "w1");
        let session = SessionId::new("s1");
        let target = RecordingTarget::default();
        router.register_owner(&session, a).unwrap();

        router.route_input(a, &session, b"ok", &target).unwrap();
        let err = router.route_input(b, &session, b"evil", &target).unwrap_err();
        assert!(matches!(err, RouterError::NotOwner { .. }));
        assert_eq!(target.writes.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_output_without_owner_is_replayed_to_next_owner() {
        let router = OwnershipRouter::new();
        let session = SessionId::new("s1");
        router.assign_window(&session, WindowId::new("w1"));
        router.route_output(&session, Bytes::from_static(b"prompt$ "));

        let (a, mut rx) = connect(&router, "w1");
        router.register_owner(&session, a).unwrap();
        let messages = drain(&mut rx);
        assert_eq!(
            messages,
            vec![ServerMessage::Output {
                session_id: "s1".into(),
                data: b"prompt$ ".to_vec(),
            }]
        );
    }

    #[test]
    fn test_backlog_replays_as_one_message() {
        let router = OwnershipRouter::new();
        let session = SessionId::new("s1");
        router.assign_window(&session, WindowId::new("w1"));
        for _ in 0..3000 {
            router.route_output(&session, Bytes::from_static(b"."));
        }

        let (a, mut rx) = connect(&router, "w1");
        router.register_owner(&session, a).unwrap();
        match drain(&mut rx).as_slice() {
            [ServerMessage::Output { data, .. }] => assert_eq!(data.len(), 3000),
            other => panic!("expected one output message, got {}", other.len()),
        }
    }

    #[test]
    fn test_full_outbox_cuts_the_connection_off() {
        let router = OwnershipRouter::new();
        let (tx, mut rx) = outbox(2);
        let a = router.connect(WindowId::new("w1"), tx);
        let session = SessionId::new("s1");
        router.register_owner(&session, a).unwrap();

        assert_eq!(router.route_output(&session, Bytes::from_static(b"1")), 1);
        assert_eq!(router.route_output(&session, Bytes::from_static(b"2")), 1);
        assert_eq!(router.route_output(&session, Bytes::from_static(b"3")), 0);
        assert!(rx.is_overflowed());
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Disconnected)));
        assert!(!router.send_to(a, ServerMessage::Detached { session_id: "s1".into() }));
    }

    #[test]
    fn test_backlog_is_bounded() {
        let mut entry = OwnerEntry::default();
        for _ in 0..100 {
            entry.push_backlog(Bytes::from(vec![b'x'; 4096]));
        }
        assert!(entry.backlog_bytes <= MAX_BACKLOG_BYTES);
    }

    #[test]
    fn test_disconnect_reports_orphans_without_dropping_sessions() {
        let router = OwnershipRouter::new();
        let (a, _rx_a) = connect(&router, "w1");
        let (b, _rx_b) = connect(&router, "w1");
        let shared = SessionId::new("shared");
        let solo = SessionId::new("solo");
        router.register_owner(&shared, a).unwrap();
        router.register_owner(&shared, b).unwrap();
        router.register_owner(&solo, a).unwrap();

        let orphaned = router.disconnect(a);
        assert_eq!(orphaned, vec![solo.clone()]);
        assert_eq!(router.owners(&shared), vec![b]);
        assert_eq!(router.window_of(&solo), Some(WindowId::new("w1")));
    }

    #[test]
    fn test_route_exit_notifies_and_forgets() {
        let router = OwnershipRouter::new();
        let (a, mut rx) = connect(&router, "w1");
        let session = SessionId::new("s1");
        router.register_owner(&session, a).unwrap();

        assert_eq!(router.route_exit(&session, Some(0)), vec![a]);
        assert_eq!(
            drain(&mut rx),
            vec![ServerMessage::Exited {
                session_id: "s1".into(),
                code: Some(0),
            }]
        );
        assert!(router.owners(&session).is_empty());
        assert_eq!(router.route_output(&session, Bytes::from_static(b"late")), 0);
    }

    #[test]
    fn test_reassign_window_revokes_owners() {
        let router = OwnershipRouter::new();
        let (a, mut rx_a) = connect(&router, "w1");
        let (c, _rx_c) = connect(&router, "w2");
        let session = SessionId::new("s1");
        router.register_owner(&session, a).unwrap();

        assert_eq!(router.reassign_window(&session, WindowId::new("w2")), vec![a]);
        assert!(matches!(
            drain(&mut rx_a).as_slice(),
            [ServerMessage::Detached { .. }]
        ));
        assert!(!router.is_owner(a, &session));
        router.register_owner(&session, c).unwrap();
        assert!(router.register_owner(&session, a).is_err());
    }

    #[test]
    fn test_notify_owners_deduplicates() {
        let router = OwnershipRouter::new();
        let (a, mut rx) = connect(&router, "w1");
        let s1 = SessionId::new("s1");
        let s2 = SessionId::new("s2");
        router.register_owner(&s1, a).unwrap();
        router.register_owner(&s2, a).unwrap();

        let message = ServerMessage::SplitDissolved {
            group_id: "grp-1".into(),
            survivor: Some("s1".into()),
        };
        assert_eq!(router.notify_owners(&[s1, s2], &message), 1);
        assert_eq!(drain(&mut rx).len(), 1);
    }
}
