//! Shared harness for hub-level tests.
//!
//! Drives a real `TerminalHub` over the mock process backend (and optionally
//! the mock multiplexer), with one `TestClient` per simulated browser window.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TryRecvError;

use termhub_daemon::ports::Multiplexer;
use termhub_daemon::ports::ProcessBackend;
use termhub_daemon::test_support::MockMultiplexer;
use termhub_daemon::test_support::MockProcessBackend;
use termhub_daemon::ConnectionId;
use termhub_daemon::DaemonConfig;
use termhub_daemon::MultiplexerMode;
use termhub_daemon::OutboxReceiver;
use termhub_daemon::SessionId;
use termhub_daemon::TerminalHub;
use termhub_daemon::WindowId;
use termhub_protocol::AttachTarget;
use termhub_protocol::ClientMessage;
use termhub_protocol::ResizeReason;
use termhub_protocol::ServerMessage;
use termhub_protocol::Size;
use termhub_protocol::SpawnArgs;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);
pub const QUIET: Duration = Duration::from_millis(30);

pub fn test_config() -> DaemonConfig {
    DaemonConfig::from_env()
        .with_multiplexer(MultiplexerMode::Disabled)
        .with_resize_quiet(QUIET)
        .with_spawn_timeout(Duration::from_secs(2))
        .with_max_sessions(32)
        .with_shell("/bin/sh")
}

pub struct Harness {
    pub hub: Arc<TerminalHub>,
    pub backend: Arc<MockProcessBackend>,
    pub mux: Option<Arc<MockMultiplexer>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_backend(test_config(), MockProcessBackend::new(), None)
    }

    pub fn with_multiplexer(mux: MockMultiplexer) -> Self {
        Self::with_backend(test_config(), MockProcessBackend::new(), Some(mux))
    }

    pub fn with_backend(
        config: DaemonConfig,
        backend: MockProcessBackend,
        mux: Option<MockMultiplexer>,
    ) -> Self {
        let backend = Arc::new(backend);
        let mux = mux.map(Arc::new);
        let process = Arc::clone(&backend) as Arc<dyn ProcessBackend>;
        let multiplexer: Option<Arc<dyn Multiplexer>> = match &mux {
            Some(mux) => Some(Arc::clone(mux) as Arc<dyn Multiplexer>),
            None => None,
        };
        let hub = TerminalHub::start(config, process, multiplexer);
        Self { hub, backend, mux }
    }

    pub fn connect(&self, window: &str) -> TestClient {
        let (id, rx) = self.hub.connect(WindowId::new(window));
        TestClient {
            id,
            window: window.to_string(),
            rx,
            hub: Arc::clone(&self.hub),
        }
    }
}

pub struct TestClient {
    pub id: ConnectionId,
    pub window: String,
    rx: OutboxReceiver,
    hub: Arc<TerminalHub>,
}

impl TestClient {
    pub async fn send(&self, message: ClientMessage) {
        self.hub.handle(self.id, message).await;
    }

    pub async fn spawn(&self, request_id: &str, kind: &str) {
        self.spawn_with(request_id, kind, SpawnArgs::default()).await;
    }

    /// Goes through the transport entry point instead of awaiting the
    /// message to completion.
    pub async fn dispatch(&self, message: ClientMessage) {
        self.hub.dispatch(self.id, message).await;
    }

    pub async fn spawn_with(&self, request_id: &str, kind: &str, spawn_args: SpawnArgs) {
        self.send(self.spawn_message(request_id, kind, spawn_args))
            .await;
    }

    pub fn spawn_message(&self, request_id: &str, kind: &str, spawn_args: SpawnArgs) -> ClientMessage {
        ClientMessage::Spawn {
            request_id: request_id.to_string(),
            kind: kind.to_string(),
            size: Size::new(80, 24),
            window_id: self.window.clone(),
            spawn_args,
            split: None,
        }
    }

    /// Spawns and waits for the reply, returning the new session's id.
    pub async fn spawn_session(&mut self, request_id: &str, kind: &str) -> SessionId {
        self.spawn(request_id, kind).await;
        self.expect_spawned().await
    }

    pub async fn attach_id(&self, session_id: &SessionId) {
        self.send(ClientMessage::Attach {
            request_id: None,
            target: AttachTarget::Session {
                session_id: session_id.to_string(),
            },
            exclude: Vec::new(),
        })
        .await;
    }

    pub async fn attach_heuristic(&self, request_id: Option<&str>, kind: &str) {
        self.send(ClientMessage::Attach {
            request_id: request_id.map(str::to_string),
            target: AttachTarget::Heuristic {
                kind: kind.to_string(),
                window_id: self.window.clone(),
            },
            exclude: Vec::new(),
        })
        .await;
    }

    pub async fn input(&self, session_id: &SessionId, data: &[u8]) {
        self.send(ClientMessage::Input {
            session_id: session_id.to_string(),
            data: data.to_vec(),
        })
        .await;
    }

    pub async fn resize(&self, session_id: &SessionId, cols: u16, rows: u16) {
        self.send(ClientMessage::Resize {
            session_id: session_id.to_string(),
            cols,
            rows,
            reason: ResizeReason::Container,
        })
        .await;
    }

    pub async fn detach(&self, session_id: &SessionId, keep_alive: bool) {
        self.send(ClientMessage::Detach {
            session_id: session_id.to_string(),
            keep_alive,
        })
        .await;
    }

    pub async fn close(&self, session_id: &SessionId) {
        self.send(ClientMessage::Close {
            session_id: session_id.to_string(),
        })
        .await;
    }

    pub async fn disconnect(self) {
        self.hub.disconnect(self.id).await;
    }

    pub async fn next(&mut self) -> ServerMessage {
        match tokio::time::timeout(RECV_TIMEOUT, self.rx.recv()).await {
            Ok(Some(message)) => message,
            Ok(None) => panic!("outbox of {} closed", self.id),
            Err(_) => panic!("{} received nothing within {RECV_TIMEOUT:?}", self.id),
        }
    }

    /// Skips messages until one satisfies `pred`.
    pub async fn next_matching(&mut self, pred: impl Fn(&ServerMessage) -> bool) -> ServerMessage {
        loop {
            let message = self.next().await;
            if pred(&message) {
                return message;
            }
        }
    }

    pub async fn expect_spawned(&mut self) -> SessionId {
        match self
            .next_matching(|m| {
                matches!(
                    m,
                    ServerMessage::Spawned { .. } | ServerMessage::SpawnError { .. }
                )
            })
            .await
        {
            ServerMessage::Spawned { session_id, .. } => SessionId::new(session_id),
            other => panic!("expected spawned, got {other:?}"),
        }
    }

    /// Collects output bytes for `session_id` until `expected` has arrived.
    pub async fn expect_output(&mut self, session_id: &SessionId, expected: &[u8]) {
        let mut seen = Vec::new();
        while !contains(&seen, expected) {
            if let ServerMessage::Output { session_id: sid, data } = self.next().await {
                if sid == session_id.as_str() {
                    seen.extend_from_slice(&data);
                }
            }
        }
    }

    /// Everything already queued, without waiting.
    pub fn drain(&mut self) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(message) => messages.push(message),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        messages
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

/// Lets the event pump and debounce timers run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

pub fn outputs_for(messages: &[ServerMessage], session_id: &SessionId) -> Vec<u8> {
    messages
        .iter()
        .filter_map(|m| match m {
            ServerMessage::Output { session_id: sid, data } if sid == session_id.as_str() => {
                Some(data.clone())
            }
            _ => None,
        })
        .flatten()
        .collect()
}
