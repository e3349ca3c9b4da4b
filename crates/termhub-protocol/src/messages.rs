use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::ErrorKind;
use crate::SplitGroupDto;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub cols: u16,
    pub rows: u16,
}

impl Size {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Spawning,
    Active,
    Detached,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Horizontal,
    Vertical,
}

/// Where the new pane is dropped relative to the target pane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitDirection {
    Left,
    Right,
    Up,
    Down,
}

/// What triggered a resize request on the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeReason {
    /// The outermost container's pixel size actually changed.
    #[default]
    Container,
    /// Pane focus or selection moved.
    Focus,
    /// Internal layout recalculation.
    Layout,
    /// Browser window resize.
    Window,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpawnArgs {
    pub command: Option<String>,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub env: BTreeMap<String, String>,
    /// Back the session with the external multiplexer.
    pub persistent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitRequest {
    pub session_id: String,
    pub direction: SplitDirection,
    #[serde(default)]
    pub multiplexer_layout: bool,
}

/// Reconnect target: an explicit id, or the `(kind, windowId)` heuristic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttachTarget {
    #[serde(rename_all = "camelCase")]
    Session { session_id: String },
    #[serde(rename_all = "camelCase")]
    Heuristic { kind: String, window_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Spawn {
        request_id: String,
        kind: String,
        size: Size,
        window_id: String,
        #[serde(default)]
        spawn_args: SpawnArgs,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        split: Option<SplitRequest>,
    },
    Attach {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(flatten)]
        target: AttachTarget,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        exclude: Vec<String>,
    },
    Input {
        session_id: String,
        #[serde(with = "crate::b64")]
        data: Vec<u8>,
    },
    Resize {
        session_id: String,
        cols: u16,
        rows: u16,
        #[serde(default)]
        reason: ResizeReason,
    },
    Detach {
        session_id: String,
        keep_alive: bool,
    },
    Close {
        session_id: String,
    },
    Split {
        session_id: String,
        other_session_id: String,
        direction: SplitDirection,
    },
    MovePane {
        session_id: String,
        window_id: String,
    },
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl ClientMessage {
    /// Parses and validates one text frame.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let message: ClientMessage = serde_json::from_str(text)?;
        message.validate()?;
        Ok(message)
    }

    pub fn validate(&self) -> Result<(), ParseError> {
        match self {
            ClientMessage::Spawn {
                request_id,
                kind,
                size,
                window_id,
                split,
                ..
            } => {
                require_non_empty("requestId", request_id)?;
                require_non_empty("kind", kind)?;
                require_non_empty("windowId", window_id)?;
                require_size(size.cols, size.rows)?;
                if let Some(split) = split {
                    require_non_empty("split.sessionId", &split.session_id)?;
                }
                Ok(())
            }
            ClientMessage::Attach {
                request_id, target, ..
            } => {
                if let Some(request_id) = request_id {
                    require_non_empty("requestId", request_id)?;
                }
                match target {
                    AttachTarget::Session { session_id } => {
                        require_non_empty("sessionId", session_id)
                    }
                    AttachTarget::Heuristic { kind, window_id } => {
                        require_non_empty("kind", kind)?;
                        require_non_empty("windowId", window_id)
                    }
                }
            }
            ClientMessage::Input { session_id, .. }
            | ClientMessage::Detach { session_id, .. }
            | ClientMessage::Close { session_id } => require_non_empty("sessionId", session_id),
            ClientMessage::Resize {
                session_id,
                cols,
                rows,
                ..
            } => {
                require_non_empty("sessionId", session_id)?;
                require_size(*cols, *rows)
            }
            ClientMessage::Split {
                session_id,
                other_session_id,
                ..
            } => {
                require_non_empty("sessionId", session_id)?;
                require_non_empty("otherSessionId", other_session_id)
            }
            ClientMessage::MovePane {
                session_id,
                window_id,
            } => {
                require_non_empty("sessionId", session_id)?;
                require_non_empty("windowId", window_id)
            }
        }
    }

    /// Window named by the message, if any.
    pub fn window_id(&self) -> Option<&str> {
        match self {
            ClientMessage::Spawn { window_id, .. } => Some(window_id),
            ClientMessage::Attach {
                target: AttachTarget::Heuristic { window_id, .. },
                ..
            } => Some(window_id),
            _ => None,
        }
    }
}

fn require_non_empty(field: &'static str, value: &str) -> Result<(), ParseError> {
    if value.trim().is_empty() {
        return Err(ParseError::InvalidField {
            field,
            reason: "must not be empty".to_string(),
        });
    }
    Ok(())
}

fn require_size(cols: u16, rows: u16) -> Result<(), ParseError> {
    if cols == 0 || rows == 0 {
        return Err(ParseError::InvalidField {
            field: "size",
            reason: format!("{cols}x{rows} has a zero dimension"),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Spawned {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        session_id: String,
        kind: String,
        size: Size,
        /// True when an existing session was reattached rather than spawned.
        #[serde(default)]
        attached: bool,
    },
    SpawnError {
        request_id: String,
        kind: ErrorKind,
        code: i32,
        reason: String,
    },
    Output {
        session_id: String,
        #[serde(with = "crate::b64")]
        data: Vec<u8>,
    },
    Exited {
        session_id: String,
        code: Option<i32>,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        kind: ErrorKind,
        code: i32,
        reason: String,
    },
    Detached {
        session_id: String,
    },
    SplitChanged {
        group: SplitGroupDto,
    },
    SplitDissolved {
        group_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        survivor: Option<String>,
    },
}

impl ServerMessage {
    pub fn error(session_id: Option<String>, kind: ErrorKind, reason: impl Into<String>) -> Self {
        ServerMessage::Error {
            session_id,
            kind,
            code: kind.code(),
            reason: reason.into(),
        }
    }

    pub fn spawn_error(request_id: impl Into<String>, kind: ErrorKind, reason: impl Into<String>) -> Self {
        ServerMessage::SpawnError {
            request_id: request_id.into(),
            kind,
            code: kind.code(),
            reason: reason.into(),
        }
    }

    /// Session the message is about, when it is about exactly one.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            ServerMessage::Spawned { session_id, .. }
            | ServerMessage::Output { session_id, .. }
            | ServerMessage::Exited { session_id, .. }
            | ServerMessage::Detached { session_id } => Some(session_id),
            ServerMessage::Error { session_id, .. } => session_id.as_deref(),
            _ => None,
        }
    }
}
