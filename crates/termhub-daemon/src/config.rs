//! Daemon configuration.

use std::env;
use std::time::Duration;

use tracing::warn;

pub const DEFAULT_MAX_SESSIONS: usize = 64;
const DEFAULT_RESIZE_QUIET_MS: u64 = 250;
const DEFAULT_SPAWN_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_PENDING_RETENTION_MS: u64 = 30_000;
const DEFAULT_MUX_PREFIX: &str = "termhub";
const FALLBACK_SHELL: &str = "/bin/sh";

/// Which persistence backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiplexerMode {
    /// tmux when its binary is on PATH, otherwise none.
    Auto,
    Tmux,
    Disabled,
}

impl MultiplexerMode {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "tmux" => Some(Self::Tmux),
            "none" | "off" | "disabled" => Some(Self::Disabled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Tmux => "tmux",
            Self::Disabled => "none",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    max_sessions: usize,
    resize_quiet: Duration,
    spawn_timeout: Duration,
    pending_retention: Duration,
    multiplexer: MultiplexerMode,
    mux_prefix: String,
    shell: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl DaemonConfig {
    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Quiet interval a resize burst must settle for before it is applied.
    pub fn resize_quiet(&self) -> Duration {
        self.resize_quiet
    }

    pub fn spawn_timeout(&self) -> Duration {
        self.spawn_timeout
    }

    /// How long a resolved spawn request is remembered for replays.
    pub fn pending_retention(&self) -> Duration {
        self.pending_retention
    }

    pub fn multiplexer(&self) -> MultiplexerMode {
        self.multiplexer
    }

    pub fn mux_prefix(&self) -> &str {
        &self.mux_prefix
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    pub fn from_env() -> Self {
        Self {
            max_sessions: parse_env_usize("TERMHUB_MAX_SESSIONS", DEFAULT_MAX_SESSIONS),
            resize_quiet: Duration::from_millis(parse_env_u64(
                "TERMHUB_RESIZE_QUIET_MS",
                DEFAULT_RESIZE_QUIET_MS,
            )),
            spawn_timeout: Duration::from_millis(parse_env_u64(
                "TERMHUB_SPAWN_TIMEOUT_MS",
                DEFAULT_SPAWN_TIMEOUT_MS,
            )),
            pending_retention: Duration::from_millis(parse_env_u64(
                "TERMHUB_PENDING_RETENTION_MS",
                DEFAULT_PENDING_RETENTION_MS,
            )),
            multiplexer: parse_env_mode("TERMHUB_MULTIPLEXER"),
            mux_prefix: env_non_empty("TERMHUB_MUX_PREFIX")
                .unwrap_or_else(|| DEFAULT_MUX_PREFIX.to_string()),
            shell: env_non_empty("TERMHUB_SHELL")
                .or_else(|| env_non_empty("SHELL"))
                .unwrap_or_else(|| FALLBACK_SHELL.to_string()),
        }
    }

    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    pub fn with_resize_quiet(mut self, quiet: Duration) -> Self {
        self.resize_quiet = quiet;
        self
    }

    pub fn with_spawn_timeout(mut self, timeout: Duration) -> Self {
        self.spawn_timeout = timeout;
        self
    }

    pub fn with_pending_retention(mut self, retention: Duration) -> Self {
        self.pending_retention = retention;
        self
    }

    pub fn with_multiplexer(mut self, mode: MultiplexerMode) -> Self {
        self.multiplexer = mode;
        self
    }

    pub fn with_mux_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.mux_prefix = prefix.into();
        self
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env_mode(key: &str) -> MultiplexerMode {
    let Some(value) = env_non_empty(key) else {
        return MultiplexerMode::Auto;
    };
    match MultiplexerMode::parse(&value) {
        Some(mode) => mode,
        None => {
            warn!(value = %value, key, "Unknown multiplexer; using auto");
            MultiplexerMode::Auto
        }
    }
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return default,
    };
    if value.trim().is_empty() {
        return default;
    }
    match value.trim().parse::<usize>() {
        Ok(parsed) => parsed,
        Err(_) => {
            warn!(value = %value, key, "Invalid numeric config; using default");
            default
        }
    }
}

fn parse_env_u64(key: &str, default: u64) -> u64 {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return default,
    };
    if value.trim().is_empty() {
        return default;
    }
    match value.trim().parse::<u64>() {
        Ok(parsed) => parsed,
        Err(_) => {
            warn!(value = %value, key, "Invalid numeric config; using default");
            default
        }
    }
}
