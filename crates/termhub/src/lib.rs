//! termhub: a session router that lets browser windows share terminal
//! sessions over a WebSocket channel.
//!
//! The binary is a thin composition root. Session routing lives in
//! `termhub-daemon`; this crate adds the CLI, the axum WebSocket endpoint,
//! the HTTP control plane and signal handling.

#![deny(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod app;
