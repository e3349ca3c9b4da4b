#![expect(clippy::print_stdout, reason = "CLI output is emitted here")]
#![expect(clippy::print_stderr, reason = "CLI output is emitted here")]

//! CLI application layer and composition root wiring.

use std::io;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use clap::CommandFactory;
use clap::Parser;
use clap_complete::generate;
use serde::Serialize;
use termhub_common::init_tracing;
use termhub_daemon::ports::Multiplexer;
use termhub_daemon::DaemonConfig;
use termhub_daemon::MultiplexerMode;
use termhub_daemon::PtyBackend;
use termhub_daemon::TerminalHub;
use termhub_daemon::TmuxMultiplexer;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;
use tracing::warn;

pub mod commands;
pub mod server;
#[cfg(unix)]
mod signal_handler;

use crate::app::commands::Cli;
use crate::app::commands::Commands;
use crate::app::commands::ServeArgs;
use crate::app::server::ServerConfig;
use crate::app::server::ServerError;

const PROGRAM_NAME: &str = "termhub";

/// Exit codes following sysexits.h.
mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const USAGE: i32 = 64;
    pub const UNAVAILABLE: i32 = 69;
}

/// Everything `termhub config` reports.
#[derive(Debug, Serialize)]
struct EffectiveConfig {
    version: &'static str,
    server: ServerConfig,
    daemon: DaemonSection,
}

#[derive(Debug, Serialize)]
struct DaemonSection {
    max_sessions: usize,
    resize_quiet_ms: u64,
    spawn_timeout_ms: u64,
    pending_retention_ms: u64,
    multiplexer: &'static str,
    mux_prefix: String,
    shell: String,
}

impl From<&DaemonConfig> for DaemonSection {
    fn from(config: &DaemonConfig) -> Self {
        Self {
            max_sessions: config.max_sessions(),
            resize_quiet_ms: config.resize_quiet().as_millis() as u64,
            spawn_timeout_ms: config.spawn_timeout().as_millis() as u64,
            pending_retention_ms: config.pending_retention().as_millis() as u64,
            multiplexer: config.multiplexer().as_str(),
            mux_prefix: config.mux_prefix().to_string(),
            shell: config.shell().to_string(),
        }
    }
}

fn daemon_config(args: &ServeArgs) -> DaemonConfig {
    let config = DaemonConfig::from_env();
    if args.no_multiplexer {
        config.with_multiplexer(MultiplexerMode::Disabled)
    } else {
        config
    }
}

/// Picks the persistence backend. `auto` falls back to plain PTYs when no
/// tmux binary answers.
fn select_multiplexer(config: &DaemonConfig) -> Option<Arc<dyn Multiplexer>> {
    let tmux = || -> Arc<dyn Multiplexer> { Arc::new(TmuxMultiplexer::new(config.mux_prefix())) };
    match config.multiplexer() {
        MultiplexerMode::Disabled => None,
        MultiplexerMode::Tmux => {
            if !TmuxMultiplexer::detect() {
                warn!("TERMHUB_MULTIPLEXER=tmux but tmux did not answer; persistent sessions will fail");
            }
            Some(tmux())
        }
        MultiplexerMode::Auto => {
            if TmuxMultiplexer::detect() {
                Some(tmux())
            } else {
                info!("tmux not found; sessions end with the server");
                None
            }
        }
    }
}

pub struct Application;

impl Default for Application {
    fn default() -> Self {
        Self::new()
    }
}

impl Application {
    pub fn new() -> Self {
        Self
    }

    pub fn run(&self) -> Result<i32> {
        let exit_code = match self.execute() {
            Ok(()) => exit_codes::SUCCESS,
            Err(e) => self.handle_error(e),
        };
        Ok(exit_code)
    }

    fn execute(&self) -> Result<()> {
        let cli = Cli::parse();
        let default_level = match (&cli.command, cli.verbose) {
            (_, true) => "debug",
            (Commands::Serve(_), false) => "info",
            _ => "warn",
        };
        let _telemetry = init_tracing(default_level);
        debug!(command = ?cli.command, "CLI command parsed");

        match &cli.command {
            Commands::Serve(args) => self.serve(args),
            Commands::Config(args) => self.print_config(args),
            Commands::Completions { shell } => {
                let mut cmd = Cli::command();
                generate(*shell, &mut cmd, PROGRAM_NAME, &mut io::stdout());
                Ok(())
            }
        }
    }

    fn print_config(&self, args: &ServeArgs) -> Result<()> {
        let daemon = daemon_config(args);
        let effective = EffectiveConfig {
            version: env!("CARGO_PKG_VERSION"),
            server: ServerConfig::from_env().with_args(args),
            daemon: DaemonSection::from(&daemon),
        };
        let json = serde_json::to_string_pretty(&effective).context("failed to encode config")?;
        println!("{json}");
        Ok(())
    }

    fn serve(&self, args: &ServeArgs) -> Result<()> {
        let server_config = ServerConfig::from_env().with_args(args);
        let daemon_config = daemon_config(args);
        let (listener, _) = server::bind_listener(&server_config)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("termhub-worker")
            .build()
            .context("failed to start async runtime")?;

        runtime.block_on(async move {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let _signals = install_signal_handler(shutdown_tx)?;

            let multiplexer = select_multiplexer(&daemon_config);
            let hub = TerminalHub::start(daemon_config, Arc::new(PtyBackend::new()), multiplexer);

            let result = server::run(listener, &server_config, Arc::clone(&hub), shutdown_rx).await;
            hub.shutdown().await;
            result.map_err(anyhow::Error::from)
        })
    }

    fn handle_error(&self, e: anyhow::Error) -> i32 {
        eprintln!("Error: {e:#}");
        match e.downcast_ref::<ServerError>() {
            Some(ServerError::InvalidListen { .. }) => exit_codes::USAGE,
            Some(ServerError::Io { .. }) => exit_codes::UNAVAILABLE,
            None => exit_codes::GENERAL_ERROR,
        }
    }
}

#[cfg(unix)]
fn install_signal_handler(shutdown: watch::Sender<bool>) -> Result<signal_handler::SignalHandler> {
    signal_handler::SignalHandler::setup(shutdown)
}

#[cfg(not(unix))]
fn install_signal_handler(shutdown: watch::Sender<bool>) -> Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, initiating graceful shutdown");
            let _ = shutdown.send(true);
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_multiplexer_flag_disables_persistence() {
        let args = ServeArgs {
            no_multiplexer: true,
            ..ServeArgs::default()
        };
        let config = daemon_config(&args);
        assert_eq!(config.multiplexer(), MultiplexerMode::Disabled);
        assert!(select_multiplexer(&config).is_none());
    }

    #[test]
    fn test_effective_config_serializes_both_sections() {
        let daemon = DaemonConfig::from_env().with_multiplexer(MultiplexerMode::Disabled);
        let effective = EffectiveConfig {
            version: env!("CARGO_PKG_VERSION"),
            server: ServerConfig::default(),
            daemon: DaemonSection::from(&daemon),
        };
        let value = serde_json::to_value(&effective).unwrap();
        assert_eq!(value["server"]["listen"], "127.0.0.1:7681");
        assert_eq!(value["daemon"]["multiplexer"], "none");
        assert!(value["daemon"]["max_sessions"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_listen_errors_exit_with_usage() {
        let app = Application::new();
        let err = anyhow::Error::from(ServerError::InvalidListen {
            message: "nope".to_string(),
        });
        assert_eq!(app.handle_error(err), exit_codes::USAGE);
        assert_eq!(
            app.handle_error(anyhow::anyhow!("something else")),
            exit_codes::GENERAL_ERROR
        );
    }
}
