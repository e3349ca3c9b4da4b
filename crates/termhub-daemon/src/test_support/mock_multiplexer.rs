//! In-memory stand-in for tmux.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::DateTime;
use chrono::Utc;

use termhub_common::mutex_lock_or_recover;

use crate::domain::TerminalSize;
use crate::error::MultiplexerError;
use crate::ports::LaunchSpec;
use crate::ports::MuxSession;
use crate::ports::Multiplexer;
use crate::ports::TAG_KIND;
use crate::ports::TAG_SESSION_ID;
use crate::ports::TAG_WINDOW;

#[derive(Debug, Clone)]
struct MuxRecord {
    tags: BTreeMap<String, String>,
    created_at: DateTime<Utc>,
    launch: Option<LaunchSpec>,
    size: TerminalSize,
}

pub struct MockMultiplexer {
    prefix: String,
    sessions: Mutex<BTreeMap<String, MuxRecord>>,
}

fn missing(command: &str, name: &str) -> MultiplexerError {
    MultiplexerError::Command {
        command: command.to_string(),
        stderr: format!("can't find session: {name}"),
    }
}

impl MockMultiplexer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            sessions: Mutex::new(BTreeMap::new()),
        }
    }

    /// Adds a session as if it survived from an earlier daemon run.
    pub fn seed(&self, name: &str, kind: Option<&str>, window: Option<&str>) {
        let mut tags = BTreeMap::new();
        if let Some(kind) = kind {
            tags.insert(TAG_KIND.to_string(), kind.to_string());
        }
        if let Some(window) = window {
            tags.insert(TAG_WINDOW.to_string(), window.to_string());
        }
        mutex_lock_or_recover(&self.sessions).insert(
            name.to_string(),
            MuxRecord {
                tags,
                created_at: Utc::now(),
                launch: None,
                size: TerminalSize::default(),
            },
        );
    }

    pub fn names(&self) -> Vec<String> {
        mutex_lock_or_recover(&self.sessions).keys().cloned().collect()
    }

    pub fn tag_of(&self, name: &str, key: &str) -> Option<String> {
        mutex_lock_or_recover(&self.sessions)
            .get(name)
            .and_then(|record| record.tags.get(key).cloned())
    }

    pub fn launch_of(&self, name: &str) -> Option<LaunchSpec> {
        mutex_lock_or_recover(&self.sessions)
            .get(name)
            .and_then(|record| record.launch.clone())
    }

    pub fn size_of(&self, name: &str) -> Option<TerminalSize> {
        mutex_lock_or_recover(&self.sessions)
            .get(name)
            .map(|record| record.size)
    }
}

impl Multiplexer for MockMultiplexer {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn list(&self) -> Result<Vec<MuxSession>, MultiplexerError> {
        Ok(mutex_lock_or_recover(&self.sessions)
            .iter()
            .map(|(name, record)| MuxSession {
                name: name.clone(),
                session_id: record.tags.get(TAG_SESSION_ID).cloned(),
                kind: record.tags.get(TAG_KIND).cloned(),
                window: record.tags.get(TAG_WINDOW).cloned(),
                created_at: Some(record.created_at),
            })
            .collect())
    }

    fn has_session(&self, name: &str) -> Result<bool, MultiplexerError> {
        Ok(mutex_lock_or_recover(&self.sessions).contains_key(name))
    }

    fn create(
        &self,
        name: &str,
        launch: &LaunchSpec,
        size: TerminalSize,
    ) -> Result<(), MultiplexerError> {
        let mut sessions = mutex_lock_or_recover(&self.sessions);
        if sessions.contains_key(name) {
            return Err(MultiplexerError::Command {
                command: "new-session".to_string(),
                stderr: format!("duplicate session: {name}"),
            });
        }
        sessions.insert(
            name.to_string(),
            MuxRecord {
                tags: BTreeMap::new(),
                created_at: Utc::now(),
                launch: Some(launch.clone()),
                size,
            },
        );
        Ok(())
    }

    fn attach_command(&self, name: &str) -> LaunchSpec {
        LaunchSpec::new("mock-mux").with_args(vec!["attach".to_string(), name.to_string()])
    }

    fn tag(&self, name: &str, key: &str, value: &str) -> Result<(), MultiplexerError> {
        let mut sessions = mutex_lock_or_recover(&self.sessions);
        let record = sessions
            .get_mut(name)
            .ok_or_else(|| missing("set-option", name))?;
        record.tags.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn rename(&self, name: &str, new_name: &str) -> Result<(), MultiplexerError> {
        let mut sessions = mutex_lock_or_recover(&self.sessions);
        let record = sessions
            .remove(name)
            .ok_or_else(|| missing("rename-session", name))?;
        sessions.insert(new_name.to_string(), record);
        Ok(())
    }

    fn kill(&self, name: &str) -> Result<(), MultiplexerError> {
        mutex_lock_or_recover(&self.sessions)
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| missing("kill-session", name))
    }
}
