mod types;

use chrono::DateTime;
use chrono::Utc;

pub use types::ConnectionId;
pub use types::GroupId;
pub use types::IdError;
pub use types::Orientation;
pub use types::RequestId;
pub use types::SessionId;
pub use types::SessionKind;
pub use types::SessionStatus;
pub use types::TerminalSize;
pub use types::TerminalSizeError;
pub use types::WindowId;

/// Point-in-time view of a registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub kind: SessionKind,
    pub status: SessionStatus,
    pub size: TerminalSize,
    pub created_at: DateTime<Utc>,
    /// Creation order; breaks `created_at` ties.
    pub seq: u64,
    pub window: Option<WindowId>,
    pub multiplexer_name: Option<String>,
    pub pid: Option<u32>,
}

impl SessionInfo {
    pub fn is_backed(&self) -> bool {
        self.multiplexer_name.is_some()
    }

    /// Sort key for "most recent" comparisons.
    pub fn recency(&self) -> (DateTime<Utc>, u64) {
        (self.created_at, self.seq)
    }
}
