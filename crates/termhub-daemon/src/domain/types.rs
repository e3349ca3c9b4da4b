//! Domain value objects for the session router.
//!
//! These types stay free of wire concerns; conversion to protocol DTOs
//! happens in `dto`.

use std::fmt;
use std::ops::Deref;

/// Error returned when an identifier fails validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdError {
    pub what: &'static str,
}

impl fmt::Display for IdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} cannot be empty or whitespace-only", self.what)
    }
}

impl std::error::Error for IdError {}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $what:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            /// Validating constructor for ids arriving from clients.
            pub fn try_new(id: impl Into<String>) -> Result<Self, IdError> {
                let id = id.into();
                if id.trim().is_empty() {
                    return Err(IdError { what: $what });
                }
                Ok(Self(id))
            }

            /// Unchecked constructor for ids generated in-process.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Deref for $name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Opaque session identifier, stable for the life of the backing process.
    SessionId,
    "session id"
);
string_id!(
    /// Logical browser-window identity supplied by the client.
    ///
    /// Survives page reloads; a reload yields a new `ConnectionId` but the
    /// same `WindowId`.
    WindowId,
    "window id"
);
string_id!(
    /// Client-generated key of a spawn intent.
    RequestId,
    "request id"
);
string_id!(
    /// Identity of a split group, never shared with a member session.
    GroupId,
    "group id"
);
string_id!(
    /// What was spawned (`shell`, an editor, a tool name).
    SessionKind,
    "session kind"
);

/// One client connection instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Error returned when TerminalSize validation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalSizeError {
    pub message: String,
}

impl fmt::Display for TerminalSizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TerminalSizeError {}

/// Terminal dimensions with validation.
///
/// # Invariants
/// - Columns must be between 2 and 1000
/// - Rows must be between 1 and 500
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TerminalSize {
    cols: u16,
    rows: u16,
}

impl TerminalSize {
    pub const MIN_COLS: u16 = 2;
    pub const MAX_COLS: u16 = 1000;
    pub const MIN_ROWS: u16 = 1;
    pub const MAX_ROWS: u16 = 500;

    pub fn try_new(cols: u16, rows: u16) -> Result<Self, TerminalSizeError> {
        if !(Self::MIN_COLS..=Self::MAX_COLS).contains(&cols) {
            return Err(TerminalSizeError {
                message: format!(
                    "columns must be between {} and {}, got {}",
                    Self::MIN_COLS,
                    Self::MAX_COLS,
                    cols
                ),
            });
        }
        if !(Self::MIN_ROWS..=Self::MAX_ROWS).contains(&rows) {
            return Err(TerminalSizeError {
                message: format!(
                    "rows must be between {} and {}, got {}",
                    Self::MIN_ROWS,
                    Self::MAX_ROWS,
                    rows
                ),
            });
        }
        Ok(Self { cols, rows })
    }

    pub fn cols(&self) -> u16 {
        self.cols
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

impl fmt::Display for TerminalSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    Spawning,
    Active,
    Detached,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Spawning => "spawning",
            SessionStatus::Active => "active",
            SessionStatus::Detached => "detached",
            SessionStatus::Closed => "closed",
        }
    }

    /// Reconnect candidates are live sessions that finished spawning.
    pub fn is_attachable(&self) -> bool {
        matches!(self, SessionStatus::Active | SessionStatus::Detached)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Orientation {
    Horizontal,
    Vertical,
}
