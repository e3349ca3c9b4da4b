//! Production adapters for the process and multiplexer ports.

mod pty;
mod tmux;

pub use pty::PtyBackend;
pub use tmux::TmuxMultiplexer;
