use chrono::DateTime;
use chrono::Utc;

use crate::domain::TerminalSize;
use crate::error::MultiplexerError;
use crate::ports::LaunchSpec;

/// User options stored on multiplexer sessions so the registry can be rebuilt
/// after a restart.
pub const TAG_SESSION_ID: &str = "@termhub_id";
pub const TAG_KIND: &str = "@termhub_kind";
pub const TAG_WINDOW: &str = "@termhub_window";

/// A session as listed by the multiplexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxSession {
    pub name: String,
    pub session_id: Option<String>,
    pub kind: Option<String>,
    pub window: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// An external persistent-session service addressable by name.
pub trait Multiplexer: Send + Sync {
    /// Name prefix of sessions this daemon manages.
    fn prefix(&self) -> &str;

    fn list(&self) -> Result<Vec<MuxSession>, MultiplexerError>;

    fn has_session(&self, name: &str) -> Result<bool, MultiplexerError>;

    /// Starts a detached multiplexer session running `launch`.
    fn create(
        &self,
        name: &str,
        launch: &LaunchSpec,
        size: TerminalSize,
    ) -> Result<(), MultiplexerError>;

    /// Client command that attaches a PTY to the named session.
    fn attach_command(&self, name: &str) -> LaunchSpec;

    fn tag(&self, name: &str, key: &str, value: &str) -> Result<(), MultiplexerError>;

    fn rename(&self, name: &str, new_name: &str) -> Result<(), MultiplexerError>;

    fn kill(&self, name: &str) -> Result<(), MultiplexerError>;

    fn session_name(&self, session_id: &str) -> String {
        format!("{}-{}", self.prefix(), session_id)
    }
}
