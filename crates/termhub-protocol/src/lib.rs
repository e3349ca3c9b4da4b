//! Wire schema shared by the termhub server and its clients.
//!
//! Every message kind on the per-client channel is a variant of a closed,
//! internally tagged enum, so the server validates the whole shape at parse
//! time instead of probing loosely typed payloads.

#![deny(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

mod b64;
mod control;
pub mod error_codes;
mod messages;

pub use control::DiagnosticsDto;
pub use control::HealthDto;
pub use control::RenameRequest;
pub use control::SessionSummary;
pub use control::SplitGroupDto;
pub use error_codes::ErrorCategory;
pub use error_codes::ErrorKind;
pub use messages::AttachTarget;
pub use messages::ClientMessage;
pub use messages::Orientation;
pub use messages::ParseError;
pub use messages::ResizeReason;
pub use messages::ServerMessage;
pub use messages::SessionStatus;
pub use messages::Size;
pub use messages::SpawnArgs;
pub use messages::SplitDirection;
pub use messages::SplitRequest;
