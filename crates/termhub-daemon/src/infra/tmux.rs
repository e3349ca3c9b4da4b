//! tmux as the persistent-session multiplexer.
//!
//! Sessions are created detached and tagged with user options so a restarted
//! daemon can rebuild its registry from `list-sessions`. Clients attach
//! through a PTY running `tmux new-session -A`.

use std::process::Command;
use std::process::Stdio;

use chrono::DateTime;
use chrono::TimeZone;
use chrono::Utc;
use tracing::debug;

use crate::domain::TerminalSize;
use crate::error::MultiplexerError;
use crate::ports::LaunchSpec;
use crate::ports::MuxSession;
use crate::ports::Multiplexer;
use crate::ports::TAG_KIND;
use crate::ports::TAG_SESSION_ID;
use crate::ports::TAG_WINDOW;

const TMUX: &str = "tmux";
const FIELD_SEPARATOR: char = '\t';

/// stderr fragments meaning "no server", which is an empty session list.
const NO_SERVER_MARKERS: &[&str] = &["no server running", "error connecting to", "no sessions"];

pub struct TmuxMultiplexer {
    program: String,
    prefix: String,
}

impl TmuxMultiplexer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            program: TMUX.to_string(),
            prefix: prefix.into(),
        }
    }

    /// True when a tmux binary answers `tmux -V`.
    pub fn detect() -> bool {
        Command::new(TMUX)
            .arg("-V")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    fn run(&self, operation: &'static str, args: &[String]) -> Result<String, MultiplexerError> {
        debug!(operation, args = ?args, "tmux");
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| MultiplexerError::Io { operation, source })?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(MultiplexerError::Command {
                command: operation.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

/// `=` pins the target to an exact session name instead of a prefix match.
fn exact(name: &str) -> String {
    format!("={name}")
}

fn list_format() -> String {
    [
        "#{session_name}".to_string(),
        "#{session_created}".to_string(),
        format!("#{{{TAG_SESSION_ID}}}"),
        format!("#{{{TAG_KIND}}}"),
        format!("#{{{TAG_WINDOW}}}"),
    ]
    .join(&FIELD_SEPARATOR.to_string())
}

fn non_empty(field: Option<&str>) -> Option<String> {
    field
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn parse_created(field: Option<&str>) -> Option<DateTime<Utc>> {
    let secs = field?.trim().parse::<i64>().ok()?;
    Utc.timestamp_opt(secs, 0).single()
}

fn parse_list_line(line: &str) -> Option<MuxSession> {
    let mut fields = line.split(FIELD_SEPARATOR);
    let name = non_empty(fields.next())?;
    let created_at = parse_created(fields.next());
    Some(MuxSession {
        name,
        created_at,
        session_id: non_empty(fields.next()),
        kind: non_empty(fields.next()),
        window: non_empty(fields.next()),
    })
}

fn parse_list_output(stdout: &str) -> Vec<MuxSession> {
    stdout.lines().filter_map(parse_list_line).collect()
}

fn is_no_server(stderr: &str) -> bool {
    NO_SERVER_MARKERS
        .iter()
        .any(|marker| stderr.contains(marker))
}

fn new_session_args(name: &str, launch: &LaunchSpec, size: TerminalSize) -> Vec<String> {
    let mut args = vec![
        "new-session".to_string(),
        "-d".to_string(),
        "-s".to_string(),
        name.to_string(),
        "-x".to_string(),
        size.cols().to_string(),
        "-y".to_string(),
        size.rows().to_string(),
    ];
    if let Some(cwd) = &launch.cwd {
        args.push("-c".to_string());
        args.push(cwd.clone());
    }
    for (key, value) in &launch.env {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }
    args.push("--".to_string());
    args.push(launch.program.clone());
    args.extend(launch.args.iter().cloned());
    args
}

impl Multiplexer for TmuxMultiplexer {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn list(&self) -> Result<Vec<MuxSession>, MultiplexerError> {
        let args = vec!["list-sessions".to_string(), "-F".to_string(), list_format()];
        match self.run("list-sessions", &args) {
            Ok(stdout) => Ok(parse_list_output(&stdout)),
            Err(MultiplexerError::Command { stderr, .. }) if is_no_server(&stderr) => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    fn has_session(&self, name: &str) -> Result<bool, MultiplexerError> {
        let args = vec!["has-session".to_string(), "-t".to_string(), exact(name)];
        match self.run("has-session", &args) {
            Ok(_) => Ok(true),
            Err(MultiplexerError::Command { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn create(
        &self,
        name: &str,
        launch: &LaunchSpec,
        size: TerminalSize,
    ) -> Result<(), MultiplexerError> {
        self.run("new-session", &new_session_args(name, launch, size))
            .map(|_| ())
    }

    fn attach_command(&self, name: &str) -> LaunchSpec {
        LaunchSpec::new(&self.program).with_args(vec![
            "new-session".to_string(),
            "-A".to_string(),
            "-s".to_string(),
            name.to_string(),
        ])
    }

    fn tag(&self, name: &str, key: &str, value: &str) -> Result<(), MultiplexerError> {
        let args = vec![
            "set-option".to_string(),
            "-t".to_string(),
            exact(name),
            key.to_string(),
            value.to_string(),
        ];
        self.run("set-option", &args).map(|_| ())
    }

    fn rename(&self, name: &str, new_name: &str) -> Result<(), MultiplexerError> {
        let args = vec![
            "rename-session".to_string(),
            "-t".to_string(),
            exact(name),
            new_name.to_string(),
        ];
        self.run("rename-session", &args).map(|_| ())
    }

    fn kill(&self, name: &str) -> Result<(), MultiplexerError> {
        let args = vec!["kill-session".to_string(), "-t".to_string(), exact(name)];
        self.run("kill-session", &args).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_format_includes_tags() {
        let format = list_format();
        assert_eq!(
            format,
            "#{session_name}\t#{session_created}\t#{@termhub_id}\t#{@termhub_kind}\t#{@termhub_window}"
        );
    }

    #[test]
    fn test_parse_list_line_with_tags() {
        let session = parse_list_line("termhub-abc\t1700000000\tabc\tshell\tw1").unwrap();
        assert_eq!(session.name, "termhub-abc");
        assert_eq!(session.session_id.as_deref(), Some("abc"));
        assert_eq!(session.kind.as_deref(), Some("shell"));
        assert_eq!(session.window.as_deref(), Some("w1"));
        assert_eq!(session.created_at.map(|t| t.timestamp()), Some(1_700_000_000));
    }

    #[test]
    fn test_parse_list_line_without_tags() {
        let session = parse_list_line("scratch\t1700000000\t\t\t").unwrap();
        assert_eq!(session.name, "scratch");
        assert_eq!(session.session_id, None);
        assert_eq!(session.kind, None);
        assert_eq!(session.window, None);
    }

    #[test]
    fn test_parse_list_output_skips_blank_lines() {
        let out = "a\t1\t\t\t\n\nb\tnot-a-number\tb\t\t\n";
        let sessions = parse_list_output(out);
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[1].name, "b");
        assert_eq!(sessions[1].created_at, None);
    }

    #[test]
    fn test_no_server_is_empty_list() {
        assert!(is_no_server("no server running on /tmp/tmux-1000/default"));
        assert!(is_no_server("error connecting to /tmp/tmux-0/default (No such file or directory)"));
        assert!(!is_no_server("unknown option -- z"));
    }

    #[test]
    fn test_new_session_args_order() {
        let mut launch = LaunchSpec::new("htop").with_args(vec!["-d".to_string(), "10".to_string()]);
        launch.cwd = Some("/tmp".to_string());
        launch.env.insert("FOO".to_string(), "bar".to_string());
        let size = TerminalSize::try_new(100, 30).unwrap();

        let args = new_session_args("termhub-x", &launch, size);
        assert_eq!(
            args,
            vec![
                "new-session", "-d", "-s", "termhub-x", "-x", "100", "-y", "30", "-c", "/tmp",
                "-e", "FOO=bar", "--", "htop", "-d", "10",
            ]
        );
    }

    #[test]
    fn test_attach_command_reattaches_by_name() {
        let mux = TmuxMultiplexer::new("termhub");
        let launch = mux.attach_command("termhub-x");
        assert_eq!(launch.program, "tmux");
        assert_eq!(launch.args, vec!["new-session", "-A", "-s", "termhub-x"]);
        assert_eq!(mux.session_name("x"), "termhub-x");
    }
}
