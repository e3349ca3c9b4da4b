//! In-memory doubles for the process and multiplexer ports.

mod mock_multiplexer;
mod mock_process;

pub use mock_multiplexer::MockMultiplexer;
pub use mock_process::MockProcessBackend;
pub use mock_process::MockProcessBackendBuilder;
