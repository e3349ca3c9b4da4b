//! axum server: the per-window WebSocket channel and the HTTP control plane.

mod config;
mod error;
mod http_api;
mod ws;

use std::net::SocketAddr;
use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::delete;
use axum::routing::get;
use axum::routing::post;
use axum::Router;
use termhub_daemon::TerminalHub;
use tokio::sync::watch;
use tokio::sync::Semaphore;
use tracing::info;
use tracing::warn;

pub use config::ServerConfig;
pub use config::DEFAULT_LISTEN;
pub use config::DEFAULT_MAX_CONNECTIONS;
pub use error::ServerError;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub(crate) struct AppState {
    hub: Arc<TerminalHub>,
    ws_limits: Arc<Semaphore>,
    shutdown: watch::Receiver<bool>,
}

pub fn router(
    hub: Arc<TerminalHub>,
    max_connections: usize,
    shutdown: watch::Receiver<bool>,
) -> Router {
    let state = AppState {
        hub,
        ws_limits: Arc::new(Semaphore::new(max_connections)),
        shutdown,
    };
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/api/sessions", get(http_api::sessions_handler))
        .route("/api/sessions/:id", delete(http_api::kill_handler))
        .route("/api/sessions/:id/rename", post(http_api::rename_handler))
        .route("/api/groups", get(http_api::groups_handler))
        .route("/api/health", get(http_api::health_handler))
        .with_state(state)
}

/// Resolves the listen address, refusing non-loopback binds unless remote
/// access is explicitly allowed.
pub fn bind_listener(
    config: &ServerConfig,
) -> Result<(std::net::TcpListener, SocketAddr), ServerError> {
    let mut addrs = config
        .listen
        .to_socket_addrs()
        .map_err(|e| ServerError::InvalidListen {
            message: format!("{}: {e}", config.listen),
        })?;
    let addr = addrs.next().ok_or_else(|| ServerError::InvalidListen {
        message: format!("{}: no resolved address", config.listen),
    })?;

    if !config.allow_remote && !addr.ip().is_loopback() {
        return Err(ServerError::InvalidListen {
            message: format!(
                "refusing to bind non-loopback address {addr} without {}=1 or --allow-remote",
                config::ALLOW_REMOTE_ENV
            ),
        });
    }

    let listener = std::net::TcpListener::bind(addr).map_err(|e| ServerError::Io {
        operation: "bind",
        source: e,
    })?;
    listener
        .set_nonblocking(true)
        .map_err(|e| ServerError::Io {
            operation: "set non-blocking",
            source: e,
        })?;
    let local_addr = listener.local_addr().map_err(|e| ServerError::Io {
        operation: "local address",
        source: e,
    })?;
    Ok((listener, local_addr))
}

/// Serves on an already bound listener until `shutdown` turns true, then
/// gives open connections a short grace period.
pub async fn run(
    listener: std::net::TcpListener,
    config: &ServerConfig,
    hub: Arc<TerminalHub>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), ServerError> {
    let local_addr = listener.local_addr().map_err(|e| ServerError::Io {
        operation: "local address",
        source: e,
    })?;
    let listener = tokio::net::TcpListener::from_std(listener).map_err(|e| ServerError::Io {
        operation: "register listener",
        source: e,
    })?;
    info!(
        listen = %local_addr,
        max_connections = config.max_connections,
        "termhub listening"
    );

    let app = router(hub, config.max_connections, shutdown.clone());
    let graceful = wait_for_shutdown(shutdown.clone());
    let mut server =
        tokio::spawn(async move { axum::serve(listener, app).with_graceful_shutdown(graceful).await });

    tokio::select! {
        joined = &mut server => {
            return match joined {
                Ok(result) => result.map_err(|e| ServerError::Io {
                    operation: "serve",
                    source: e,
                }),
                Err(err) => Err(ServerError::Io {
                    operation: "serve",
                    source: std::io::Error::other(err.to_string()),
                }),
            };
        }
        _ = wait_for_shutdown(shutdown) => {}
    }

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut server).await {
        Ok(Ok(Ok(()))) => info!("Server stopped"),
        Ok(Ok(Err(err))) => warn!(error = %err, "Server stopped with error"),
        Ok(Err(err)) => warn!(error = %err, "Server task failed"),
        Err(_) => {
            warn!(
                timeout_ms = SHUTDOWN_TIMEOUT.as_millis() as u64,
                "Server shutdown timed out; aborting"
            );
            server.abort();
        }
    }
    Ok(())
}

/// Resolves once the shutdown flag is set or its sender is gone.
pub(crate) async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    loop {
        let stop = *shutdown.borrow_and_update();
        if stop || shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_listener_rejects_non_loopback_without_allow_remote() {
        let config = ServerConfig::default().with_listen("0.0.0.0:0");

        let err = bind_listener(&config).expect_err("expected non-loopback bind rejection");
        let message = err.to_string();
        assert!(message.contains("TERMHUB_ALLOW_REMOTE=1"), "{message}");
    }

    #[test]
    fn test_bind_listener_accepts_loopback_ephemeral_port() {
        let config = ServerConfig::default().with_listen("127.0.0.1:0");

        let (_listener, addr) = bind_listener(&config).unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn test_bind_listener_rejects_unparsable_address() {
        let config = ServerConfig::default().with_listen("not an address");

        let err = bind_listener(&config).unwrap_err();
        assert!(matches!(err, ServerError::InvalidListen { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_returns_when_flag_set() {
        let (tx, rx) = watch::channel(false);
        let waiter = tokio::spawn(wait_for_shutdown(rx));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_returns_when_sender_dropped() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), wait_for_shutdown(rx))
            .await
            .unwrap();
    }
}
