//! Session router for browser windows that share terminal sessions.
//!
//! [`TerminalHub`] is the entry point: transports connect a window, feed it
//! client messages and drain the connection's outbox. The registry, router,
//! matcher, debouncer and split state machine it composes are public so they
//! can be exercised on their own.

#![deny(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

mod config;
pub mod debounce;
pub mod domain;
mod dto;
mod error;
mod hub;
mod infra;
pub mod matcher;
mod metrics;
pub mod ports;
pub mod registry;
pub mod router;
pub mod split;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use config::DaemonConfig;
pub use config::MultiplexerMode;
pub use config::DEFAULT_MAX_SESSIONS;
pub use debounce::ResizeDebouncer;
pub use debounce::ResizeReason;
pub use domain::ConnectionId;
pub use domain::SessionId;
pub use domain::SessionInfo;
pub use domain::SessionKind;
pub use domain::SessionStatus;
pub use domain::TerminalSize;
pub use domain::WindowId;
pub use error::HubError;
pub use error::MatchError;
pub use error::MultiplexerError;
pub use error::ProcessError;
pub use error::RegistryError;
pub use error::RouterError;
pub use error::SplitError;
pub use hub::launch_for;
pub use hub::TerminalHub;
pub use infra::PtyBackend;
pub use infra::TmuxMultiplexer;
pub use matcher::ReconnectionMatcher;
pub use metrics::DaemonMetrics;
pub use registry::SessionRegistry;
pub use router::OutboxReceiver;
pub use router::OwnershipRouter;
pub use split::SplitPaneStateMachine;
