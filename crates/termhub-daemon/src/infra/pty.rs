//! Real processes on native pseudo-terminals.

use std::io;
use std::io::Read;
use std::io::Write;

use bytes::Bytes;
use portable_pty::native_pty_system;
use portable_pty::Child;
use portable_pty::ChildKiller;
use portable_pty::CommandBuilder;
use portable_pty::MasterPty;
use portable_pty::PtySize;
use tracing::debug;
use tracing::warn;

use crate::domain::SessionId;
use crate::domain::TerminalSize;
use crate::error::ProcessError;
use crate::ports::EventSender;
use crate::ports::ProcessBackend;
use crate::ports::ProcessEvent;
use crate::ports::ProcessHandle;
use crate::ports::SpawnErrorKind;
use crate::ports::SpawnSpec;

const READ_BUFFER_SIZE: usize = 8192;
const TERM: &str = "xterm-256color";

fn pty_size(size: TerminalSize) -> PtySize {
    PtySize {
        rows: size.rows(),
        cols: size.cols(),
        pixel_width: 0,
        pixel_height: 0,
    }
}

fn classify_spawn_error(err: &(dyn std::error::Error + 'static)) -> SpawnErrorKind {
    match err.downcast_ref::<io::Error>().map(io::Error::kind) {
        Some(io::ErrorKind::NotFound) => SpawnErrorKind::NotFound,
        Some(io::ErrorKind::PermissionDenied) => SpawnErrorKind::PermissionDenied,
        _ => SpawnErrorKind::Other,
    }
}

/// Spawns each session's process on its own PTY pair.
#[derive(Debug, Default, Clone, Copy)]
pub struct PtyBackend;

impl PtyBackend {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessBackend for PtyBackend {
    fn spawn(
        &self,
        spec: &SpawnSpec,
        events: EventSender,
    ) -> Result<Box<dyn ProcessHandle>, ProcessError> {
        let pair = native_pty_system()
            .openpty(pty_size(spec.size))
            .map_err(|e| ProcessError::Open(e.to_string()))?;

        let launch = &spec.launch;
        let mut cmd = CommandBuilder::new(&launch.program);
        cmd.args(&launch.args);
        if let Some(dir) = &launch.cwd {
            cmd.cwd(dir);
        }
        for (key, value) in &launch.env {
            cmd.env(key, value);
        }
        cmd.env("TERM", TERM);

        let child = pair.slave.spawn_command(cmd).map_err(|e| ProcessError::Spawn {
            program: launch.program.clone(),
            reason: e.to_string(),
            kind: classify_spawn_error(&*e),
        })?;
        // The master only sees EOF once every slave handle is closed.
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| ProcessError::Open(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| ProcessError::Open(e.to_string()))?;

        spawn_reader(spec.session_id.clone(), spec.epoch, reader, child, events)?;
        debug!(
            session_id = %spec.session_id,
            epoch = spec.epoch,
            pid = ?pid,
            program = %launch.program,
            "PTY process started"
        );

        Ok(Box::new(PtyProcess {
            master: pair.master,
            writer,
            killer,
            pid,
            terminated: false,
        }))
    }
}

struct PtyProcess {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    pid: Option<u32>,
    terminated: bool,
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        if !self.terminated {
            let _ = self.killer.kill();
        }
    }
}

impl ProcessHandle for PtyProcess {
    fn write(&mut self, data: &[u8]) -> Result<(), ProcessError> {
        let mut offset = 0;
        while offset < data.len() {
            match self.writer.write(&data[offset..]) {
                Ok(0) => {
                    return Err(ProcessError::Write(
                        "write returned 0 bytes, PTY closed".to_string(),
                    ));
                }
                Ok(n) => offset += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ProcessError::Write(e.to_string())),
            }
        }
        self.writer
            .flush()
            .map_err(|e| ProcessError::Write(e.to_string()))
    }

    fn resize(&mut self, size: TerminalSize) -> Result<(), ProcessError> {
        self.master
            .resize(pty_size(size))
            .map_err(|e| ProcessError::Resize(e.to_string()))
    }

    fn terminate(&mut self) -> Result<(), ProcessError> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;
        match self.killer.kill() {
            Ok(()) => Ok(()),
            // Already reaped.
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ProcessError::Terminate(e.to_string())),
        }
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}

/// Forwards output until EOF, then reaps the child and reports its exit.
fn spawn_reader(
    session_id: SessionId,
    epoch: u64,
    mut reader: Box<dyn Read + Send>,
    mut child: Box<dyn Child + Send + Sync>,
    events: EventSender,
) -> Result<(), ProcessError> {
    let span = tracing::debug_span!("pty_reader", session_id = %session_id, epoch);
    std::thread::Builder::new()
        .name("pty-reader".to_string())
        .spawn(move || {
            let _guard = span.enter();
            let mut buf = [0u8; READ_BUFFER_SIZE];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => {
                        debug!("PTY reader EOF");
                        break;
                    }
                    Ok(n) => {
                        let event = ProcessEvent::Output {
                            session_id: session_id.clone(),
                            epoch,
                            data: Bytes::copy_from_slice(&buf[..n]),
                        };
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        // Linux reports EIO once the slave side hangs up.
                        debug!(error = %e, "PTY reader closed");
                        break;
                    }
                }
            }

            let code = match child.wait() {
                Ok(status) => i32::try_from(status.exit_code()).ok(),
                Err(e) => {
                    warn!(error = %e, "Failed to reap PTY child");
                    None
                }
            };
            let _ = events.send(ProcessEvent::Exited {
                session_id,
                epoch,
                code,
            });
        })
        .map(|_| ())
        .map_err(|e| ProcessError::Open(format!("failed to start PTY reader: {e}")))
}
