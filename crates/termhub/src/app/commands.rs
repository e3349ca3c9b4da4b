use clap::Args;
use clap::Parser;
use clap::Subcommand;
pub use clap_complete::Shell;

const LONG_ABOUT: &str = "\
Share terminal sessions between browser windows.\n\
\n\
Each browser window connects to /ws?window=<id> and spawns, attaches to,\n\
splits and detaches terminal sessions. With tmux available, sessions\n\
survive server restarts and are restored on startup.";

const AFTER_LONG_HELP: &str = r#"ENVIRONMENT:
    TERMHUB_LISTEN                Listen address (default 127.0.0.1:7681)
    TERMHUB_ALLOW_REMOTE          Allow non-loopback listen addresses
    TERMHUB_MAX_CONNECTIONS       Concurrent WebSocket connections (default 64)
    TERMHUB_MAX_SESSIONS          Live sessions (default 64)
    TERMHUB_MULTIPLEXER           auto | tmux | none
    TERMHUB_SHELL                 Command for the "shell" kind
    TERMHUB_LOG, RUST_LOG         Log file and filter

EXAMPLES:
    termhub serve
    termhub serve --listen 0.0.0.0:7681 --allow-remote
    termhub config
    termhub completions zsh > ~/.zfunc/_termhub"#;

#[derive(Parser)]
#[command(name = "termhub")]
#[command(author, version, propagate_version = true)]
#[command(about = "Share terminal sessions between browser windows")]
#[command(long_about = LONG_ABOUT)]
#[command(after_long_help = AFTER_LONG_HELP)]
#[command(subcommand_required = true, arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the session server
    Serve(ServeArgs),

    /// Print the effective configuration as JSON
    Config(ServeArgs),

    /// Generate shell completion scripts
    #[command(long_about = "\
Generate shell completion scripts for termhub.

Write the output to a file your shell loads on startup.")]
    Completions {
        #[arg(value_enum, value_name = "SHELL")]
        shell: Shell,
    },
}

/// Overrides applied on top of the environment configuration.
#[derive(Debug, Clone, Default, Args)]
pub struct ServeArgs {
    /// Address to listen on (host:port)
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<String>,

    /// Allow binding a non-loopback address
    #[arg(long)]
    pub allow_remote: bool,

    /// Run without tmux; sessions end with the server
    #[arg(long)]
    pub no_multiplexer: bool,
}
