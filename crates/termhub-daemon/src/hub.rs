//! The session router service.
//!
//! `TerminalHub` composes the registry, ownership router, reconnection
//! matcher, resize debouncer and split state machine behind the client
//! message protocol. Transports hand it parsed [`ClientMessage`]s and drain
//! each connection's outbox; nothing outside the hub touches the components
//! directly.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::Weak;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use termhub_common::mutex_lock_or_recover;
use termhub_protocol as proto;
use termhub_protocol::ClientMessage;
use termhub_protocol::DiagnosticsDto;
use termhub_protocol::HealthDto;
use termhub_protocol::ServerMessage;
use termhub_protocol::SessionSummary;
use termhub_protocol::SpawnArgs;
use termhub_protocol::SplitGroupDto;

use crate::config::DaemonConfig;
use crate::debounce::ResizeApplier;
use crate::debounce::ResizeDebouncer;
use crate::domain::ConnectionId;
use crate::domain::RequestId;
use crate::domain::SessionId;
use crate::domain::SessionInfo;
use crate::domain::SessionKind;
use crate::domain::SessionStatus;
use crate::domain::TerminalSize;
use crate::domain::WindowId;
use crate::dto;
use crate::error::HubError;
use crate::error::RegistryError;
use crate::error::RouterError;
use crate::matcher::AttachIntent;
use crate::matcher::AttachTarget;
use crate::matcher::MatchOutcome;
use crate::matcher::ReconnectionMatcher;
use crate::matcher::SpawnAdmission;
use crate::metrics::DaemonMetrics;
use crate::ports::EventSender;
use crate::ports::LaunchSpec;
use crate::ports::Multiplexer;
use crate::ports::ProcessBackend;
use crate::ports::ProcessEvent;
use crate::registry::generate_session_id;
use crate::registry::CloseMode;
use crate::registry::CloseOutcome;
use crate::registry::CreateRequest;
use crate::registry::ExitOutcome;
use crate::registry::SessionRegistry;
use crate::router::outbox;
use crate::router::OutboxReceiver;
use crate::router::OUTBOX_CAPACITY;
use crate::split::PaneRemoval;
use crate::split::SplitDirection;
use crate::split::SplitGroup;
use crate::split::SplitPaneStateMachine;

const PURGE_INTERVAL: Duration = Duration::from_secs(5);
const SHELL_KIND: &str = "shell";

struct PendingSplit {
    target: SessionId,
    direction: SplitDirection,
    multiplexer_layout: bool,
}

struct SpawnCommand {
    request_id: RequestId,
    kind: SessionKind,
    size: TerminalSize,
    spawn_args: SpawnArgs,
    split: Option<PendingSplit>,
}

pub struct TerminalHub {
    config: DaemonConfig,
    registry: Arc<SessionRegistry>,
    router: crate::router::OwnershipRouter,
    matcher: ReconnectionMatcher,
    debouncer: ResizeDebouncer,
    splits: Mutex<SplitPaneStateMachine>,
    metrics: Arc<DaemonMetrics>,
    started: std::time::Instant,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl TerminalHub {
    /// Builds the hub, restores multiplexer sessions and starts the process
    /// event pump. Must be called from within a tokio runtime.
    pub fn start(
        config: DaemonConfig,
        backend: Arc<dyn ProcessBackend>,
        multiplexer: Option<Arc<dyn Multiplexer>>,
    ) -> Arc<Self> {
        let (events_tx, events_rx): (EventSender, _) = mpsc::unbounded_channel();
        let registry = Arc::new(SessionRegistry::new(
            backend,
            multiplexer,
            events_tx,
            config.max_sessions(),
        ));
        if let Err(err) = registry.restore() {
            warn!(error = %err, "Failed to restore multiplexer sessions");
        }

        let metrics = Arc::new(DaemonMetrics::new());
        let debouncer = ResizeDebouncer::new(
            Arc::clone(&registry) as Arc<dyn ResizeApplier>,
            Arc::clone(&metrics),
            config.resize_quiet(),
        );
        let hub = Arc::new(Self {
            matcher: ReconnectionMatcher::new(config.pending_retention()),
            config,
            registry,
            router: crate::router::OwnershipRouter::new(),
            debouncer,
            splits: Mutex::new(SplitPaneStateMachine::new()),
            metrics,
            started: std::time::Instant::now(),
            pump: Mutex::new(None),
        });
        let pump = tokio::spawn(run_event_pump(Arc::downgrade(&hub), events_rx));
        *mutex_lock_or_recover(&hub.pump) = Some(pump);
        info!(
            sessions = hub.registry.len(),
            multiplexer = hub.registry.has_multiplexer(),
            "Terminal hub started"
        );
        hub
    }

    fn splits(&self) -> MutexGuard<'_, SplitPaneStateMachine> {
        mutex_lock_or_recover(&self.splits)
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn metrics(&self) -> &DaemonMetrics {
        &self.metrics
    }

    /// Registers a connection for `window` and returns its outbox receiver.
    pub fn connect(&self, window: WindowId) -> (ConnectionId, OutboxReceiver) {
        let (tx, rx) = outbox(OUTBOX_CAPACITY);
        let connection_id = self.router.connect(window.clone(), tx);
        info!(connection_id = %connection_id, window_id = %window, "Client connected");
        (connection_id, rx)
    }

    /// Drops every registration of the connection. Sessions it owned alone
    /// become `detached`; none are closed.
    pub async fn disconnect(self: &Arc<Self>, connection_id: ConnectionId) {
        let orphaned = self.router.disconnect(connection_id);
        for session_id in &orphaned {
            if let Err(err) = self.park(session_id).await {
                warn!(session_id = %session_id, error = %err, "Failed to park orphaned session");
            }
        }
        info!(
            connection_id = %connection_id,
            orphaned = orphaned.len(),
            "Client disconnected"
        );
    }

    /// Entry point for transports. Spawn and attach can wait on process
    /// startup, so they run on their own task; every other message is
    /// handled before this returns, in arrival order.
    pub async fn dispatch(self: &Arc<Self>, connection_id: ConnectionId, message: ClientMessage) {
        if matches!(message, ClientMessage::Spawn { .. } | ClientMessage::Attach { .. }) {
            let hub = Arc::clone(self);
            tokio::spawn(async move { hub.handle(connection_id, message).await });
            return;
        }
        self.handle(connection_id, message).await;
    }

    /// Handles one message to completion.
    pub async fn handle(self: &Arc<Self>, connection_id: ConnectionId, message: ClientMessage) {
        let Some(window) = self.router.connection_window(connection_id) else {
            warn!(connection_id = %connection_id, "Message from unknown connection dropped");
            return;
        };

        let (session, result) = match message {
            ClientMessage::Spawn {
                request_id,
                kind,
                size,
                window_id,
                spawn_args,
                split,
            } => {
                let raw_request = request_id.clone();
                let command =
                    parse_spawn(&window, request_id, kind, size, window_id, spawn_args, split);
                let result = match command {
                    Ok(command) => self.spawn(connection_id, &window, command).await,
                    Err(err) => Err(err),
                };
                if let Err(err) = result {
                    self.reject_spawn(connection_id, &raw_request, &err);
                }
                return;
            }
            ClientMessage::Attach {
                request_id,
                target,
                exclude,
            } => {
                let session = match &target {
                    proto::AttachTarget::Session { session_id } => Some(session_id.clone()),
                    proto::AttachTarget::Heuristic { .. } => None,
                };
                let result = self
                    .attach(connection_id, &window, request_id, target, exclude)
                    .await;
                (session, result)
            }
            ClientMessage::Input { session_id, data } => {
                let result = self.input(connection_id, &session_id, &data);
                (Some(session_id), result)
            }
            ClientMessage::Resize {
                session_id,
                cols,
                rows,
                reason,
            } => {
                let result = self.resize(connection_id, &session_id, cols, rows, reason);
                (Some(session_id), result)
            }
            ClientMessage::Detach {
                session_id,
                keep_alive,
            } => {
                let result = self.detach(connection_id, &session_id, keep_alive).await;
                (Some(session_id), result)
            }
            ClientMessage::Close { session_id } => {
                let result = self.close(connection_id, &session_id).await;
                (Some(session_id), result)
            }
            ClientMessage::Split {
                session_id,
                other_session_id,
                direction,
            } => {
                let result = self.split(connection_id, &session_id, &other_session_id, direction);
                (Some(session_id), result)
            }
            ClientMessage::MovePane {
                session_id,
                window_id,
            } => {
                let result = self.move_pane(connection_id, &session_id, window_id).await;
                (Some(session_id), result)
            }
        };

        if let Err(err) = result {
            self.reject(connection_id, session, &err);
        }
    }

    fn reject(&self, connection_id: ConnectionId, session: Option<String>, err: &HubError) {
        debug!(
            connection_id = %connection_id,
            session_id = ?session,
            kind = ?err.kind(),
            error = %err,
            "Request rejected"
        );
        self.router.send_to(
            connection_id,
            ServerMessage::error(session, err.kind(), err.to_string()),
        );
    }

    fn reject_spawn(&self, connection_id: ConnectionId, request_id: &str, err: &HubError) {
        warn!(
            connection_id = %connection_id,
            request_id,
            kind = ?err.kind(),
            error = %err,
            "Spawn failed"
        );
        self.router.send_to(
            connection_id,
            ServerMessage::spawn_error(request_id, err.kind(), err.to_string()),
        );
    }

    fn ensure_owner(&self, connection_id: ConnectionId, session_id: &SessionId) -> Result<(), HubError> {
        if self.router.is_owner(connection_id, session_id) {
            return Ok(());
        }
        Err(RouterError::NotOwner {
            session_id: session_id.clone(),
            connection_id,
        }
        .into())
    }

    #[tracing::instrument(
        skip(self, connection_id, window, command),
        fields(connection_id = %connection_id, request_id = %command.request_id, kind = %command.kind)
    )]
    async fn spawn(
        self: &Arc<Self>,
        connection_id: ConnectionId,
        window: &WindowId,
        command: SpawnCommand,
    ) -> Result<(), HubError> {
        if let Some(split) = &command.split {
            self.ensure_owner(connection_id, &split.target)?;
            self.splits().check_split(&split.target)?;
        }

        match self
            .matcher
            .begin_spawn(window, &command.request_id, connection_id)
        {
            SpawnAdmission::Proceed => {}
            SpawnAdmission::InFlight => {
                self.metrics.record_duplicate_spawn();
                info!("Duplicate spawn joined the in-flight request");
                return Ok(());
            }
            SpawnAdmission::AlreadyResolved(session_id) => {
                self.metrics.record_duplicate_spawn();
                info!(session_id = %session_id, "Duplicate spawn resolved to its session");
                return self
                    .attach_session(connection_id, window, &session_id, Some(&command.request_id))
                    .await;
            }
        }

        let session_id = self.fresh_session_id();
        match self
            .start_session(connection_id, window, &session_id, &command)
            .await
        {
            Ok(info) => {
                let settled = self
                    .matcher
                    .complete(window, &command.request_id, info.id.clone());
                self.router.send_to(
                    connection_id,
                    dto::spawned_message(&info, Some(&command.request_id), false),
                );
                for waiter in settled.waiters {
                    if let Err(err) = self
                        .attach_session(waiter, window, &info.id, Some(&command.request_id))
                        .await
                    {
                        self.reject_spawn(waiter, command.request_id.as_str(), &err);
                    }
                }
                if let Some(split) = &command.split {
                    let layout = split.multiplexer_layout
                        && self
                            .registry
                            .get(&split.target)
                            .is_some_and(|target| target.is_backed());
                    if let Err(err) = self.apply_split(&split.target, &info.id, split.direction, layout) {
                        self.reject(connection_id, Some(info.id.to_string()), &err);
                    }
                }
                if self.router.owners(&info.id).is_empty() {
                    info!(session_id = %info.id, "Requester left during spawn; parking session");
                    if let Err(err) = self.park(&info.id).await {
                        warn!(session_id = %info.id, error = %err, "Failed to park unowned session");
                    }
                }
                Ok(())
            }
            Err(err) => {
                let settled = match err {
                    HubError::SpawnTimeout { .. } => self
                        .matcher
                        .expire(window, &command.request_id)
                        .unwrap_or_default(),
                    _ => self.matcher.fail(window, &command.request_id),
                };
                for waiter in settled.waiters {
                    self.reject_spawn(waiter, command.request_id.as_str(), &err);
                }
                Err(err)
            }
        }
    }

    fn fresh_session_id(&self) -> SessionId {
        loop {
            let id = generate_session_id();
            if !self.registry.contains(&id) && self.router.window_of(&id).is_none() {
                return id;
            }
        }
    }

    async fn start_session(
        self: &Arc<Self>,
        connection_id: ConnectionId,
        window: &WindowId,
        session_id: &SessionId,
        command: &SpawnCommand,
    ) -> Result<SessionInfo, HubError> {
        // Owner first, so output produced during startup is delivered or
        // buffered rather than lost.
        self.router.assign_window(session_id, window.clone());
        if let Err(err) = self.router.register_owner(session_id, connection_id) {
            self.router.drop_session(session_id, None);
            return Err(err.into());
        }

        let request = CreateRequest {
            id: session_id.clone(),
            kind: command.kind.clone(),
            size: command.size,
            window: Some(window.clone()),
            launch: launch_for(&command.kind, &command.spawn_args, self.config.shell()),
            persistent: command.spawn_args.persistent,
        };
        let registry = Arc::clone(&self.registry);
        let mut task = tokio::task::spawn_blocking(move || registry.create(request));
        let timeout = self.config.spawn_timeout();
        let joined = match tokio::time::timeout(timeout, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                self.metrics.record_spawn_timeout();
                self.router.drop_session(session_id, None);
                self.reap_late_spawn(task);
                return Err(HubError::SpawnTimeout {
                    request_id: command.request_id.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };

        match joined {
            Ok(Ok(info)) => {
                self.debouncer.seed(&info.id, info.size);
                info!(session_id = %info.id, size = %info.size, "Session spawned");
                Ok(info)
            }
            Ok(Err(err)) => {
                self.router.drop_session(session_id, None);
                Err(err.into())
            }
            Err(err) => {
                self.router.drop_session(session_id, None);
                Err(HubError::Internal(format!("spawn task failed: {err}")))
            }
        }
    }

    /// A spawn that outlives its timeout was already reported as failed, so
    /// the session it eventually produces is terminated.
    fn reap_late_spawn(&self, task: JoinHandle<Result<SessionInfo, RegistryError>>) {
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            let Ok(Ok(info)) = task.await else {
                return;
            };
            warn!(session_id = %info.id, "Spawn finished after its timeout; terminating");
            let id = info.id;
            let closed = tokio::task::spawn_blocking(move || registry.close(&id, CloseMode::Terminate)).await;
            if let Ok(Err(err)) = closed {
                warn!(error = %err, "Failed to terminate late session");
            }
        });
    }

    #[tracing::instrument(
        skip(self, connection_id, window, target, exclude),
        fields(connection_id = %connection_id)
    )]
    async fn attach(
        self: &Arc<Self>,
        connection_id: ConnectionId,
        window: &WindowId,
        request_id: Option<String>,
        target: proto::AttachTarget,
        exclude: Vec<String>,
    ) -> Result<(), HubError> {
        let request = request_id
            .map(RequestId::try_new)
            .transpose()
            .map_err(invalid)?;
        let target = match target {
            proto::AttachTarget::Session { session_id } => {
                AttachTarget::Session(SessionId::try_new(session_id).map_err(invalid)?)
            }
            proto::AttachTarget::Heuristic { kind, window_id } => {
                ensure_window(window, window_id)?;
                AttachTarget::Heuristic {
                    kind: SessionKind::try_new(kind).map_err(invalid)?,
                }
            }
        };
        let intent = AttachIntent {
            request: request.clone(),
            target,
            exclude: exclude
                .into_iter()
                .filter_map(|id| SessionId::try_new(id).ok())
                .collect(),
        };

        let sessions = self.registry.list();
        let outcome = self.matcher.resolve(
            &intent,
            window,
            connection_id,
            &sessions,
            |connection| self.router.is_connected(connection),
        )?;
        match outcome {
            MatchOutcome::Pending => {
                debug!("Attach waits for an in-flight spawn");
                Ok(())
            }
            MatchOutcome::Session(session_id) => {
                self.attach_session(connection_id, window, &session_id, request.as_ref())
                    .await
            }
        }
    }

    /// Makes `connection_id` an owner of an existing session and reattaches
    /// its process if it was released. Idempotent.
    async fn attach_session(
        self: &Arc<Self>,
        connection_id: ConnectionId,
        window: &WindowId,
        session_id: &SessionId,
        request_id: Option<&RequestId>,
    ) -> Result<(), HubError> {
        self.router.register_owner(session_id, connection_id)?;

        let registry = Arc::clone(&self.registry);
        let id = session_id.clone();
        let adopt = window.clone();
        let attached = blocking(move || -> Result<SessionInfo, RegistryError> {
            registry.ensure_attached(&id)?;
            let current = registry
                .get(&id)
                .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
            if current.window.is_none() {
                registry.set_window(&id, &adopt)?;
            }
            registry.set_status(&id, SessionStatus::Active);
            registry.get(&id).ok_or(RegistryError::NotFound(id))
        })
        .await?;

        let info = match attached {
            Ok(info) => info,
            Err(err) => {
                if matches!(err, RegistryError::NotFound(_)) {
                    let removal = self.splits().process_exited(session_id);
                    self.publish_removal(session_id, removal);
                    self.router.drop_session(session_id, None);
                    self.debouncer.forget(session_id);
                } else {
                    self.router.unregister_owner(session_id, connection_id);
                }
                return Err(err.into());
            }
        };

        if self.debouncer.applied(&info.id).is_none() {
            self.debouncer.seed(&info.id, info.size);
        }
        self.router
            .send_to(connection_id, dto::spawned_message(&info, request_id, true));
        let group = self.splits().group_of(&info.id).map(dto::group_dto);
        if let Some(group) = group {
            self.router
                .send_to(connection_id, ServerMessage::SplitChanged { group });
        }
        info!(
            connection_id = %connection_id,
            session_id = %info.id,
            "Session attached"
        );
        Ok(())
    }

    fn input(&self, connection_id: ConnectionId, session_id: &str, data: &[u8]) -> Result<(), HubError> {
        let session_id = SessionId::try_new(session_id).map_err(invalid)?;
        match self
            .router
            .route_input(connection_id, &session_id, data, self.registry.as_ref())
        {
            Ok(()) => Ok(()),
            // Dropped without telling the sender; the router already logged it.
            Err(RouterError::NotOwner { .. }) => {
                self.metrics.record_not_owner();
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn resize(
        &self,
        connection_id: ConnectionId,
        session_id: &str,
        cols: u16,
        rows: u16,
        reason: proto::ResizeReason,
    ) -> Result<(), HubError> {
        let session_id = SessionId::try_new(session_id).map_err(invalid)?;
        if !self.router.is_owner(connection_id, &session_id) {
            self.metrics.record_not_owner();
            warn!(
                session_id = %session_id,
                connection_id = %connection_id,
                "Resize rejected: connection does not own session"
            );
            return Ok(());
        }
        let size = TerminalSize::try_new(cols, rows).map_err(invalid)?;
        let layout_managed = self.splits().is_layout_managed(&session_id);
        let decision = self.debouncer.request(
            &session_id,
            size,
            dto::resize_reason(reason),
            layout_managed,
        );
        debug!(session_id = %session_id, size = %size, ?decision, "Resize requested");
        Ok(())
    }

    #[tracing::instrument(skip(self, connection_id), fields(connection_id = %connection_id))]
    async fn detach(
        self: &Arc<Self>,
        connection_id: ConnectionId,
        session_id: &str,
        keep_alive: bool,
    ) -> Result<(), HubError> {
        let session_id = SessionId::try_new(session_id).map_err(invalid)?;
        self.ensure_owner(connection_id, &session_id)?;
        let orphaned = self.router.unregister_owner(&session_id, connection_id);
        self.router.send_to(
            connection_id,
            ServerMessage::Detached {
                session_id: session_id.to_string(),
            },
        );
        if !orphaned {
            return Ok(());
        }
        if keep_alive {
            self.park(&session_id).await
        } else {
            self.terminate(&session_id).await
        }
    }

    /// Leaves an ownerless session reconnectable. A backed session also
    /// releases its adapter; the multiplexer keeps the terminal state.
    async fn park(self: &Arc<Self>, session_id: &SessionId) -> Result<(), HubError> {
        let Some(info) = self.registry.get(session_id) else {
            return Ok(());
        };
        // The spawning task parks it once the process is up.
        if info.status == SessionStatus::Spawning {
            return Ok(());
        }
        self.registry.set_status(session_id, SessionStatus::Detached);
        if !info.is_backed() || !self.router.owners(session_id).is_empty() {
            return Ok(());
        }
        let registry = Arc::clone(&self.registry);
        let id = session_id.clone();
        blocking(move || registry.close(&id, CloseMode::Release)).await??;
        Ok(())
    }

    /// Destroys a session and its multiplexer session.
    async fn terminate(self: &Arc<Self>, session_id: &SessionId) -> Result<(), HubError> {
        let registry = Arc::clone(&self.registry);
        let id = session_id.clone();
        blocking(move || registry.close(&id, CloseMode::Terminate)).await??;
        let removal = self.splits().close_pane(session_id);
        self.publish_removal(session_id, removal);
        self.router.route_exit(session_id, None);
        self.debouncer.forget(session_id);
        Ok(())
    }

    #[tracing::instrument(skip(self, connection_id), fields(connection_id = %connection_id))]
    async fn close(self: &Arc<Self>, connection_id: ConnectionId, session_id: &str) -> Result<(), HubError> {
        let session_id = SessionId::try_new(session_id).map_err(invalid)?;
        self.ensure_owner(connection_id, &session_id)?;

        let registry = Arc::clone(&self.registry);
        let id = session_id.clone();
        let outcome = blocking(move || registry.close(&id, CloseMode::Release)).await??;

        let removal = self.splits().close_pane(&session_id);
        self.publish_removal(&session_id, removal);
        match outcome {
            CloseOutcome::Terminated => {
                self.router.route_exit(&session_id, None);
                self.debouncer.forget(&session_id);
            }
            CloseOutcome::Released => {
                self.router.release_owners(&session_id);
            }
        }
        Ok(())
    }

    fn split(
        &self,
        connection_id: ConnectionId,
        session_id: &str,
        other_session_id: &str,
        direction: proto::SplitDirection,
    ) -> Result<(), HubError> {
        let target = SessionId::try_new(session_id).map_err(invalid)?;
        let source = SessionId::try_new(other_session_id).map_err(invalid)?;
        self.ensure_owner(connection_id, &target)?;
        self.ensure_owner(connection_id, &source)?;
        self.apply_split(&target, &source, dto::split_direction(direction), false)
    }

    fn apply_split(
        &self,
        target: &SessionId,
        source: &SessionId,
        direction: SplitDirection,
        multiplexer_layout: bool,
    ) -> Result<(), HubError> {
        let group = self
            .splits()
            .create_split(target, source, direction, multiplexer_layout)?;
        self.router.notify_owners(
            &group.panes,
            &ServerMessage::SplitChanged {
                group: dto::group_dto(&group),
            },
        );
        Ok(())
    }

    #[tracing::instrument(skip(self, connection_id), fields(connection_id = %connection_id))]
    async fn move_pane(
        self: &Arc<Self>,
        connection_id: ConnectionId,
        session_id: &str,
        window_id: String,
    ) -> Result<(), HubError> {
        let session_id = SessionId::try_new(session_id).map_err(invalid)?;
        let destination = WindowId::try_new(window_id).map_err(invalid)?;
        self.ensure_owner(connection_id, &session_id)?;

        let removal = self.splits().detach_pane(&session_id);
        self.publish_removal(&session_id, removal);
        let revoked = self.router.reassign_window(&session_id, destination.clone());
        self.registry
            .set_status(&session_id, SessionStatus::Detached);

        let registry = Arc::clone(&self.registry);
        let id = session_id.clone();
        let window = destination.clone();
        blocking(move || registry.set_window(&id, &window)).await??;
        info!(
            session_id = %session_id,
            window_id = %destination,
            revoked = revoked.len(),
            "Pane moved to another window"
        );
        Ok(())
    }

    fn publish_removal(&self, removed: &SessionId, removal: PaneRemoval) {
        match removal {
            PaneRemoval::NotGrouped => {}
            PaneRemoval::Shrunk(group) => {
                let mut recipients = group.panes.clone();
                recipients.push(removed.clone());
                self.router.notify_owners(
                    &recipients,
                    &ServerMessage::SplitChanged {
                        group: dto::group_dto(&group),
                    },
                );
            }
            PaneRemoval::Dissolved { group, survivor } => {
                let mut recipients = vec![removed.clone()];
                recipients.extend(survivor.clone());
                self.router.notify_owners(
                    &recipients,
                    &ServerMessage::SplitDissolved {
                        group_id: group.to_string(),
                        survivor: survivor.map(|s| s.to_string()),
                    },
                );
            }
        }
    }

    async fn on_process_event(self: &Arc<Self>, event: ProcessEvent) {
        if !self.registry.accepts(&event) {
            return;
        }
        match event {
            ProcessEvent::Output {
                session_id, data, ..
            } => {
                self.router.route_output(&session_id, data);
            }
            ProcessEvent::Exited {
                session_id,
                epoch,
                code,
            } => {
                let registry = Arc::clone(&self.registry);
                let id = session_id.clone();
                let outcome = match blocking(move || registry.handle_exit(&id, epoch, code)).await {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        warn!(session_id = %session_id, error = %err, "Exit handling failed");
                        return;
                    }
                };
                match outcome {
                    ExitOutcome::Stale => {}
                    ExitOutcome::Closed => {
                        let removal = self.splits().process_exited(&session_id);
                        self.publish_removal(&session_id, removal);
                        self.router.route_exit(&session_id, code);
                        self.debouncer.forget(&session_id);
                    }
                    ExitOutcome::Retained => {
                        self.router.release_owners(&session_id);
                    }
                }
            }
        }
    }

    pub fn session(&self, session_id: &SessionId) -> Option<SessionInfo> {
        self.registry.get(session_id)
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.registry.list()
    }

    pub fn owners(&self, session_id: &SessionId) -> Vec<ConnectionId> {
        self.router.owners(session_id)
    }

    pub fn group_of(&self, session_id: &SessionId) -> Option<SplitGroup> {
        self.splits().group_of(session_id).cloned()
    }

    pub fn split_violations(&self) -> Vec<String> {
        self.splits().invariant_violations()
    }

    pub fn connection_count(&self) -> usize {
        self.router.connection_count()
    }

    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        let splits = self.splits();
        self.registry
            .list()
            .iter()
            .map(|info| {
                dto::summary_dto(
                    info,
                    self.router.owners(&info.id).len(),
                    splits.group_of(&info.id),
                )
            })
            .collect()
    }

    pub fn groups(&self) -> Vec<SplitGroupDto> {
        self.splits().groups().iter().map(dto::group_dto).collect()
    }

    pub async fn rename(self: &Arc<Self>, session_id: &str, name: &str) -> Result<SessionSummary, HubError> {
        let session_id = SessionId::try_new(session_id).map_err(invalid)?;
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(HubError::InvalidMessage("name must not be empty".to_string()));
        }
        let registry = Arc::clone(&self.registry);
        let id = session_id.clone();
        let info = blocking(move || registry.rename(&id, &name)).await??;
        let owners = self.router.owners(&info.id).len();
        let group = self.group_of(&info.id);
        Ok(dto::summary_dto(&info, owners, group.as_ref()))
    }

    /// Force-kills a session regardless of who owns it.
    pub async fn kill(self: &Arc<Self>, session_id: &str) -> Result<(), HubError> {
        let session_id = SessionId::try_new(session_id).map_err(invalid)?;
        self.terminate(&session_id).await?;
        info!(session_id = %session_id, "Session killed");
        Ok(())
    }

    pub fn diagnostics(&self) -> DiagnosticsDto {
        self.metrics.snapshot()
    }

    pub fn health(&self) -> HealthDto {
        HealthDto {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_ms: self.started.elapsed().as_millis() as u64,
            sessions: self.registry.len(),
            connections: self.router.connection_count(),
            multiplexer: self.registry.has_multiplexer(),
            diagnostics: self.metrics.snapshot(),
        }
    }

    /// Releases backed sessions, terminates the rest and drops every
    /// connection.
    pub async fn shutdown(self: &Arc<Self>) {
        let pump = mutex_lock_or_recover(&self.pump).take();
        if let Some(pump) = pump {
            pump.abort();
        }
        let registry = Arc::clone(&self.registry);
        match blocking(move || registry.shutdown()).await {
            Ok((released, terminated)) => info!(released, terminated, "Sessions shut down"),
            Err(err) => warn!(error = %err, "Session shutdown failed"),
        }
        let connections = self.router.disconnect_all();
        info!(connections, "Terminal hub stopped");
    }
}

async fn run_event_pump(hub: Weak<TerminalHub>, mut events: mpsc::UnboundedReceiver<ProcessEvent>) {
    let mut purge = tokio::time::interval(PURGE_INTERVAL);
    purge.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                let Some(hub) = hub.upgrade() else {
                    break;
                };
                hub.on_process_event(event).await;
            }
            _ = purge.tick() => {
                let Some(hub) = hub.upgrade() else {
                    break;
                };
                hub.matcher.purge(tokio::time::Instant::now());
            }
        }
    }
    debug!("Process event pump stopped");
}

async fn blocking<T, F>(f: F) -> Result<T, HubError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| HubError::Internal(format!("blocking task failed: {err}")))
}

fn invalid(err: impl std::fmt::Display) -> HubError {
    HubError::InvalidMessage(err.to_string())
}

fn ensure_window(window: &WindowId, declared: String) -> Result<(), HubError> {
    let declared = WindowId::try_new(declared).map_err(invalid)?;
    if declared != *window {
        return Err(HubError::WindowMismatch {
            expected: window.clone(),
            actual: declared,
        });
    }
    Ok(())
}

fn parse_spawn(
    window: &WindowId,
    request_id: String,
    kind: String,
    size: proto::Size,
    window_id: String,
    spawn_args: SpawnArgs,
    split: Option<proto::SplitRequest>,
) -> Result<SpawnCommand, HubError> {
    ensure_window(window, window_id)?;
    let split = match split {
        Some(split) => Some(PendingSplit {
            target: SessionId::try_new(split.session_id).map_err(invalid)?,
            direction: dto::split_direction(split.direction),
            multiplexer_layout: split.multiplexer_layout,
        }),
        None => None,
    };
    Ok(SpawnCommand {
        request_id: RequestId::try_new(request_id).map_err(invalid)?,
        kind: SessionKind::try_new(kind).map_err(invalid)?,
        size: TerminalSize::try_new(size.cols, size.rows).map_err(invalid)?,
        spawn_args,
        split,
    })
}

/// An explicit command wins; otherwise `shell` runs the configured shell and
/// any other kind runs the program of that name.
pub fn launch_for(kind: &SessionKind, args: &SpawnArgs, shell: &str) -> LaunchSpec {
    let program = match &args.command {
        Some(command) => command.clone(),
        None if kind.as_str() == SHELL_KIND => shell.to_string(),
        None => kind.to_string(),
    };
    LaunchSpec {
        program,
        args: args.args.clone(),
        cwd: args.cwd.clone(),
        env: args.env.clone(),
    }
}
