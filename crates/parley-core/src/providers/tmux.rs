//! Thin wrapper over the tmux CLI.
//!
//! One gateway per session, namespaced by a unique name. All text enters
//! the session through `load-buffer` + `paste-buffer -p -r` (bracketed,
//! raw) so embedded newlines, `$`, backticks, and quotes arrive as
//! characters instead of being interpreted by the backend's prompt.

use std::io::{ErrorKind, Write};
use std::process::{Command, Stdio};

use crate::providers::shared::SessionError;

/// Handle to one named tmux session.
#[derive(Debug, Clone)]
pub struct TmuxGateway {
    name: String,
}

impl TmuxGateway {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn session_name(&self) -> &str {
        &self.name
    }

    /// Kills any prior session of the same name, then spawns a detached
    /// session of the given geometry running `argv` with extra environment.
    pub fn create_session(
        &self,
        cols: u16,
        rows: u16,
        argv: &[&str],
        env: &[(&str, &str)],
    ) -> Result<(), SessionError> {
        self.kill_session();

        let mut cmd = Command::new("tmux");
        cmd.args(["new-session", "-d", "-s", &self.name])
            .args(["-x", &cols.to_string(), "-y", &rows.to_string()]);
        // `env K=V... argv` keeps the variables scoped to the backend
        // process without touching the server environment.
        if !env.is_empty() {
            cmd.arg("env");
            for (key, value) in env {
                cmd.arg(format!("{key}={value}"));
            }
        }
        cmd.args(argv);

        let output = cmd.output().map_err(map_spawn_error)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SessionError::Command(format!(
                "new-session: {}",
                stderr.trim()
            )));
        }
        Ok(())
    }

    /// Captures the pane as plain text, including the last
    /// `scrollback_lines` of history.
    pub fn capture(&self, scrollback_lines: u32) -> Result<String, SessionError> {
        let start = format!("-{scrollback_lines}");
        self.run_capture(&["capture-pane", "-t", &self.name, "-p", "-S", &start])
    }

    /// Captures only the visible pane (startup probing).
    pub fn capture_visible(&self) -> Result<String, SessionError> {
        self.run_capture(&["capture-pane", "-t", &self.name, "-p"])
    }

    /// Loads `data` into the paste buffer and pastes it in bracketed + raw
    /// mode. The sole ingestion path for prompt text.
    pub fn paste(&self, data: &str) -> Result<(), SessionError> {
        let mut child = Command::new("tmux")
            .args(["load-buffer", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(map_spawn_error)?;

        if let Some(stdin) = child.stdin.as_mut() {
            stdin
                .write_all(data.as_bytes())
                .map_err(|e| SessionError::Command(format!("load-buffer: {e}")))?;
        }
        let status = child
            .wait()
            .map_err(|e| SessionError::Command(format!("load-buffer: {e}")))?;
        if !status.success() {
            return Err(SessionError::Command("load-buffer failed".to_string()));
        }

        self.run_silent(&["paste-buffer", "-p", "-r", "-t", &self.name])
    }

    /// Sends a named key (`Enter`, `Escape`, `Down`, ...).
    pub fn send_key(&self, key: &str) -> Result<(), SessionError> {
        self.run_silent(&["send-keys", "-t", &self.name, key])
    }

    /// True when the session is still alive on the tmux server.
    pub fn has_session(&self) -> bool {
        Command::new("tmux")
            .args(["has-session", "-t", &self.name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Kills the session; missing sessions are not an error.
    pub fn kill_session(&self) {
        let _ = Command::new("tmux")
            .args(["kill-session", "-t", &self.name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }

    fn run_capture(&self, args: &[&str]) -> Result<String, SessionError> {
        let output = Command::new("tmux")
            .args(args)
            .output()
            .map_err(map_spawn_error)?;
        if !output.status.success() {
            return Err(SessionError::SessionDead);
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn run_silent(&self, args: &[&str]) -> Result<(), SessionError> {
        let output = Command::new("tmux")
            .args(args)
            .output()
            .map_err(map_spawn_error)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SessionError::Command(format!(
                "{}: {}",
                args.first().copied().unwrap_or("tmux"),
                stderr.trim()
            )));
        }
        Ok(())
    }
}

fn map_spawn_error(err: std::io::Error) -> SessionError {
    if err.kind() == ErrorKind::NotFound {
        SessionError::MultiplexerMissing
    } else {
        SessionError::Command(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_maps_to_multiplexer_missing() {
        let err = map_spawn_error(std::io::Error::from(ErrorKind::NotFound));
        assert_eq!(err, SessionError::MultiplexerMissing);

        let err = map_spawn_error(std::io::Error::from(ErrorKind::PermissionDenied));
        assert!(matches!(err, SessionError::Command(_)));
    }
}
