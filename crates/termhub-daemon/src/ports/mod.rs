//! Boundaries to the external collaborators: the process spawner and the
//! persistent-session multiplexer.

mod multiplexer;
mod process;

pub use multiplexer::MuxSession;
pub use multiplexer::Multiplexer;
pub use multiplexer::TAG_KIND;
pub use multiplexer::TAG_SESSION_ID;
pub use multiplexer::TAG_WINDOW;
pub use process::EventSender;
pub use process::LaunchSpec;
pub use process::ProcessBackend;
pub use process::ProcessEvent;
pub use process::ProcessHandle;
pub use process::SpawnErrorKind;
pub use process::SpawnSpec;
