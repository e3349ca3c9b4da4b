//! Network surface configuration.

use serde::Serialize;
use tracing::warn;

use crate::app::commands::ServeArgs;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:7681";
pub const DEFAULT_MAX_CONNECTIONS: usize = 64;

pub(crate) const LISTEN_ENV: &str = "TERMHUB_LISTEN";
pub(crate) const ALLOW_REMOTE_ENV: &str = "TERMHUB_ALLOW_REMOTE";
const MAX_CONNECTIONS_ENV: &str = "TERMHUB_MAX_CONNECTIONS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerConfig {
    pub listen: String,
    pub allow_remote: bool,
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            allow_remote: false,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let listen = std::env::var(LISTEN_ENV)
            .ok()
            .and_then(non_empty)
            .unwrap_or(defaults.listen);
        let allow_remote = env_bool(ALLOW_REMOTE_ENV).unwrap_or(defaults.allow_remote);
        let max_connections = match std::env::var(MAX_CONNECTIONS_ENV).ok().and_then(non_empty) {
            None => defaults.max_connections,
            Some(raw) => match raw.parse::<usize>() {
                Ok(value) if value > 0 => value,
                _ => {
                    warn!(
                        env = MAX_CONNECTIONS_ENV,
                        value = %raw,
                        default = defaults.max_connections,
                        "Invalid connection limit; using default"
                    );
                    defaults.max_connections
                }
            },
        };
        Self {
            listen,
            allow_remote,
            max_connections,
        }
    }

    /// Command-line flags win over the environment.
    pub fn with_args(mut self, args: &ServeArgs) -> Self {
        if let Some(listen) = args.listen.clone().and_then(non_empty) {
            self.listen = listen;
        }
        if args.allow_remote {
            self.allow_remote = true;
        }
        self
    }

    pub fn with_listen(mut self, listen: impl Into<String>) -> Self {
        self.listen = listen.into();
        self
    }

    pub fn with_allow_remote(mut self, allow: bool) -> Self {
        self.allow_remote = allow;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max.max(1);
        self
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key).ok().and_then(|value| parse_bool(&value))
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
