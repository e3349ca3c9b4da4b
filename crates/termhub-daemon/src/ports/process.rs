use std::collections::BTreeMap;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::domain::SessionId;
use crate::domain::TerminalSize;
use crate::error::ProcessError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnErrorKind {
    NotFound,
    PermissionDenied,
    Other,
}

/// Program, arguments and environment of a backing process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub env: BTreeMap<String, String>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

/// One attachment of a process to a session.
///
/// `epoch` changes every time the registry (re)attaches a process, so events
/// from a released attachment can be told apart from the current one.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub session_id: SessionId,
    pub epoch: u64,
    pub launch: LaunchSpec,
    pub size: TerminalSize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Output {
        session_id: SessionId,
        epoch: u64,
        data: Bytes,
    },
    Exited {
        session_id: SessionId,
        epoch: u64,
        code: Option<i32>,
    },
}

impl ProcessEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            ProcessEvent::Output { session_id, .. } | ProcessEvent::Exited { session_id, .. } => {
                session_id
            }
        }
    }

    pub fn epoch(&self) -> u64 {
        match self {
            ProcessEvent::Output { epoch, .. } | ProcessEvent::Exited { epoch, .. } => *epoch,
        }
    }
}

/// Events from every process funnel into one ordered stream.
pub type EventSender = mpsc::UnboundedSender<ProcessEvent>;

/// A live process attached to a pseudo-terminal.
///
/// Only the session registry holds these.
pub trait ProcessHandle: Send {
    fn write(&mut self, data: &[u8]) -> Result<(), ProcessError>;

    fn resize(&mut self, size: TerminalSize) -> Result<(), ProcessError>;

    /// Kills the process. Its `Exited` event still arrives on the stream.
    fn terminate(&mut self) -> Result<(), ProcessError>;

    fn pid(&self) -> Option<u32>;
}

pub trait ProcessBackend: Send + Sync {
    /// Starts a process and begins forwarding its output as events.
    ///
    /// May block on process startup.
    fn spawn(
        &self,
        spec: &SpawnSpec,
        events: EventSender,
    ) -> Result<Box<dyn ProcessHandle>, ProcessError>;
}
