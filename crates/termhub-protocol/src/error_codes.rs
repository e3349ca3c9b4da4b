//! Semantic error codes reported to clients.
//!
//! Codes sit in the JSON-RPC 2.0 server-error range (-32000 to -32099) so
//! they can be carried unchanged over any JSON transport.

use serde::Deserialize;
use serde::Serialize;

pub const SPAWN_FAILED: i32 = -32001;
pub const SESSION_GONE: i32 = -32002;
pub const NOT_OWNER: i32 = -32003;
pub const WINDOW_MISMATCH: i32 = -32004;
pub const DUPLICATE_SPAWN_SUPPRESSED: i32 = -32005;
pub const INVALID_SPLIT_OPERATION: i32 = -32006;
pub const LIMIT_REACHED: i32 = -32007;
pub const SPAWN_TIMEOUT: i32 = -32008;
pub const INVALID_MESSAGE: i32 = -32009;
pub const INTERNAL: i32 = -32000;

/// Error category for programmatic handling by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Target session (or match candidate) does not exist
    NotFound,
    /// Malformed or disallowed request
    InvalidInput,
    /// Resource limit or in-flight operation
    Busy,
    /// Server-side failure
    Internal,
    /// Process or multiplexer failure
    External,
    /// Operation did not complete in time
    Timeout,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::InvalidInput => "invalid_input",
            ErrorCategory::Busy => "busy",
            ErrorCategory::Internal => "internal",
            ErrorCategory::External => "external",
            ErrorCategory::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The client-visible error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    SpawnFailed,
    SpawnTimeout,
    SessionGone,
    NotOwner,
    WindowMismatch,
    DuplicateSpawnSuppressed,
    InvalidSplitOperation,
    LimitReached,
    InvalidMessage,
    Internal,
}

impl ErrorKind {
    pub fn code(&self) -> i32 {
        match self {
            ErrorKind::SpawnFailed => SPAWN_FAILED,
            ErrorKind::SpawnTimeout => SPAWN_TIMEOUT,
            ErrorKind::SessionGone => SESSION_GONE,
            ErrorKind::NotOwner => NOT_OWNER,
            ErrorKind::WindowMismatch => WINDOW_MISMATCH,
            ErrorKind::DuplicateSpawnSuppressed => DUPLICATE_SPAWN_SUPPRESSED,
            ErrorKind::InvalidSplitOperation => INVALID_SPLIT_OPERATION,
            ErrorKind::LimitReached => LIMIT_REACHED,
            ErrorKind::InvalidMessage => INVALID_MESSAGE,
            ErrorKind::Internal => INTERNAL,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        category_for_code(self.code())
    }

    pub fn is_retryable(&self) -> bool {
        is_retryable(self.code())
    }
}

/// Transient conditions where repeating the same request may succeed.
pub fn is_retryable(code: i32) -> bool {
    matches!(code, SPAWN_TIMEOUT | LIMIT_REACHED | DUPLICATE_SPAWN_SUPPRESSED)
}

pub fn category_for_code(code: i32) -> ErrorCategory {
    match code {
        SESSION_GONE => ErrorCategory::NotFound,
        NOT_OWNER | WINDOW_MISMATCH | INVALID_SPLIT_OPERATION | INVALID_MESSAGE => {
            ErrorCategory::InvalidInput
        }
        LIMIT_REACHED | DUPLICATE_SPAWN_SUPPRESSED => ErrorCategory::Busy,
        SPAWN_FAILED => ErrorCategory::External,
        SPAWN_TIMEOUT => ErrorCategory::Timeout,
        _ => ErrorCategory::Internal,
    }
}
