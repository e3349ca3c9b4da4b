use termhub_protocol::ErrorCategory;
use termhub_protocol::ErrorKind;
use thiserror::Error;

use crate::domain::ConnectionId;
use crate::domain::RequestId;
use crate::domain::SessionId;
use crate::domain::WindowId;
use crate::ports::SpawnErrorKind;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to open PTY: {0}")]
    Open(String),
    #[error("Failed to spawn '{program}': {reason}")]
    Spawn {
        program: String,
        reason: String,
        kind: SpawnErrorKind,
    },
    #[error("Failed to write to process: {0}")]
    Write(String),
    #[error("Failed to resize process terminal: {0}")]
    Resize(String),
    #[error("Failed to terminate process: {0}")]
    Terminate(String),
}

impl ProcessError {
    pub fn operation(&self) -> &'static str {
        match self {
            ProcessError::Open(_) => "open",
            ProcessError::Spawn { .. } => "spawn",
            ProcessError::Write(_) => "write",
            ProcessError::Resize(_) => "resize",
            ProcessError::Terminate(_) => "terminate",
        }
    }

    pub fn suggestion(&self) -> String {
        match self {
            ProcessError::Open(_) => {
                "PTY allocation failed. Check system resource limits (ulimit -n).".to_string()
            }
            ProcessError::Spawn { kind, .. } => match kind {
                SpawnErrorKind::NotFound => {
                    "Command not found. Check that it exists and is on PATH.".to_string()
                }
                SpawnErrorKind::PermissionDenied => {
                    "Permission denied. Check file permissions.".to_string()
                }
                SpawnErrorKind::Other => {
                    "Process spawn failed. Check command syntax and permissions.".to_string()
                }
            },
            ProcessError::Write(_) | ProcessError::Resize(_) | ProcessError::Terminate(_) => {
                "The session may have ended. List sessions to check its status.".to_string()
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum MultiplexerError {
    #[error("Multiplexer unavailable: {0}")]
    Unavailable(String),
    #[error("Multiplexer command '{command}' failed: {stderr}")]
    Command { command: String, stderr: String },
    #[error("Multiplexer I/O error ({operation}): {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Session not found: {0}")]
    NotFound(SessionId),
    #[error("Session id already in use: {0}")]
    DuplicateId(SessionId),
    #[error("Session {0} has no attached process")]
    NoProcess(SessionId),
    #[error("Session {0} is not persistence-backed")]
    NotPersistent(SessionId),
    #[error("Session limit reached: maximum {0} sessions")]
    LimitReached(usize),
    #[error("Invalid terminal size: {0}")]
    InvalidSize(String),
    #[error("Spawn failed: {0}")]
    Spawn(#[source] ProcessError),
    #[error("Process I/O failed: {0}")]
    Process(#[source] ProcessError),
    #[error(transparent)]
    Multiplexer(#[from] MultiplexerError),
}

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("Connection {connection_id} does not own session {session_id}")]
    NotOwner {
        session_id: SessionId,
        connection_id: ConnectionId,
    },
    #[error("Session {session_id} belongs to window {expected}, not {actual}")]
    WindowMismatch {
        session_id: SessionId,
        expected: WindowId,
        actual: WindowId,
    },
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),
    #[error(transparent)]
    Delivery(#[from] RegistryError),
}

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("Session {0} no longer exists")]
    SessionGone(SessionId),
    #[error("Session {session_id} belongs to window {expected}, not {actual}")]
    WindowMismatch {
        session_id: SessionId,
        expected: WindowId,
        actual: WindowId,
    },
    #[error("No reconnectable '{kind}' session for window {window}")]
    NoCandidate { kind: String, window: WindowId },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SplitError {
    #[error("Cannot split a pane with itself ({0})")]
    SamePane(SessionId),
    #[error("Session {session} is already a pane of {group}; nested splits are not supported")]
    AlreadyGrouped { session: SessionId, group: String },
}

/// Everything a hub operation can report back to the requesting connection.
#[derive(Error, Debug)]
pub enum HubError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Router(#[from] RouterError),
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error(transparent)]
    Split(#[from] SplitError),
    #[error("Spawn request {request_id} did not complete within {timeout_ms}ms")]
    SpawnTimeout {
        request_id: RequestId,
        timeout_ms: u64,
    },
    #[error("Message names window {actual} but the connection belongs to {expected}")]
    WindowMismatch { expected: WindowId, actual: WindowId },
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HubError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HubError::Registry(err) => registry_kind(err),
            HubError::Router(err) => match err {
                RouterError::NotOwner { .. } => ErrorKind::NotOwner,
                RouterError::WindowMismatch { .. } => ErrorKind::WindowMismatch,
                RouterError::UnknownConnection(_) => ErrorKind::Internal,
                RouterError::Delivery(err) => registry_kind(err),
            },
            HubError::Match(err) => match err {
                MatchError::SessionGone(_) | MatchError::NoCandidate { .. } => {
                    ErrorKind::SessionGone
                }
                MatchError::WindowMismatch { .. } => ErrorKind::WindowMismatch,
            },
            HubError::Split(_) => ErrorKind::InvalidSplitOperation,
            HubError::SpawnTimeout { .. } => ErrorKind::SpawnTimeout,
            HubError::WindowMismatch { .. } => ErrorKind::WindowMismatch,
            HubError::InvalidMessage(_) => ErrorKind::InvalidMessage,
            HubError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn code(&self) -> i32 {
        self.kind().code()
    }

    pub fn category(&self) -> ErrorCategory {
        self.kind().category()
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    pub fn suggestion(&self) -> String {
        match self {
            HubError::Registry(RegistryError::Spawn(err)) => err.suggestion(),
            HubError::Registry(RegistryError::LimitReached(_)) => {
                "Close unused sessions or raise TERMHUB_MAX_SESSIONS.".to_string()
            }
            HubError::Match(_) | HubError::Registry(RegistryError::NotFound(_)) => {
                "The session is gone. Start a fresh session instead.".to_string()
            }
            HubError::Split(_) => {
                "Close or move the pane out of its group before splitting it again.".to_string()
            }
            HubError::SpawnTimeout { .. } => {
                "The process did not start in time. Retry the spawn.".to_string()
            }
            _ => String::new(),
        }
    }
}

fn registry_kind(err: &RegistryError) -> ErrorKind {
    match err {
        RegistryError::NotFound(_) | RegistryError::NoProcess(_) => ErrorKind::SessionGone,
        RegistryError::NotPersistent(_) | RegistryError::InvalidSize(_) => {
            ErrorKind::InvalidMessage
        }
        RegistryError::LimitReached(_) => ErrorKind::LimitReached,
        RegistryError::Spawn(_) | RegistryError::Multiplexer(_) => ErrorKind::SpawnFailed,
        RegistryError::Process(_) | RegistryError::DuplicateId(_) => ErrorKind::Internal,
    }
}
