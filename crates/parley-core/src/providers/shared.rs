//! Backend-agnostic records shared by the pane parsers, sessions, and the
//! debate coordinator.
//!
//! Both CLI backends render tool activity in different on-screen formats;
//! everything downstream of the parsers sees only the types in this module.

use std::fmt;
use std::time::Duration;

use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Marker synthesized into extracted Gemini replies to carry shell output
/// out of the tool box. Stripped from anything user-facing.
pub const SHELL_OUTPUT_MARKER: &str = "__SHELL_OUTPUT__:";

/// Sentinel content returned when a polling loop hits its deadline.
pub const TIMEOUT_SENTINEL: &str = "⚠️ Timeout";

/// Uniform tool identifiers across backends.
///
/// Claude renders `Write`/`Update`/`Bash`/`Read`/`Delete`; Gemini renders
/// `WriteFile`/`Edit`/`Shell`/`ReadFile`/`DeleteFile`. Both normalize here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Shell,
    WriteFile,
    Edit,
    ReadFile,
    DeleteFile,
}

impl ToolKind {
    /// Maps a raw on-screen tool name (either backend's vocabulary) to the
    /// uniform kind. Extend this map when adding a backend.
    pub fn normalize(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "bash" | "shell" => Some(ToolKind::Shell),
            "write" | "writefile" => Some(ToolKind::WriteFile),
            "update" | "edit" | "editfile" => Some(ToolKind::Edit),
            "read" | "readfile" => Some(ToolKind::ReadFile),
            "delete" | "deletefile" => Some(ToolKind::DeleteFile),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Shell => "shell",
            ToolKind::WriteFile => "write_file",
            ToolKind::Edit => "edit",
            ToolKind::ReadFile => "read_file",
            ToolKind::DeleteFile => "delete_file",
        }
    }

    /// True for the tools whose `file_path` names an actual file.
    pub fn is_file_tool(&self) -> bool {
        matches!(self, ToolKind::WriteFile | ToolKind::Edit)
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diff line classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffMarker {
    Added,
    Removed,
    Context,
}

impl DiffMarker {
    pub fn as_char(&self) -> char {
        match self {
            DiffMarker::Added => '+',
            DiffMarker::Removed => '-',
            DiffMarker::Context => ' ',
        }
    }
}

/// One line of a parsed diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffLine {
    pub marker: DiffMarker,
    pub content: String,
}

impl DiffLine {
    pub fn new(marker: DiffMarker, content: impl Into<String>) -> Self {
        Self {
            marker,
            content: content.into(),
        }
    }

    pub fn added(content: impl Into<String>) -> Self {
        Self::new(DiffMarker::Added, content)
    }

    pub fn removed(content: impl Into<String>) -> Self {
        Self::new(DiffMarker::Removed, content)
    }

    pub fn context(content: impl Into<String>) -> Self {
        Self::new(DiffMarker::Context, content)
    }
}

/// Parsed tool invocation record.
///
/// For `shell`, `file_path` carries the raw command segment (possibly with
/// an annotation suffix). `is_new_file` is decided by a filesystem stat at
/// parse time, never inferred from the tool name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub kind: ToolKind,
    pub file_path: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub diff_lines: Vec<DiffLine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell_output: Option<String>,
    #[serde(default)]
    pub is_new_file: bool,
}

impl ToolInfo {
    pub fn new(kind: ToolKind, file_path: impl Into<String>) -> Self {
        Self {
            kind,
            file_path: file_path.into(),
            description: String::new(),
            diff_lines: Vec::new(),
            exit_code: None,
            shell_output: None,
            is_new_file: false,
        }
    }

    /// Splits the diff into (search, replace) sides: removed lines go to
    /// search only, added lines to replace only, context lines to both.
    /// The partition is stable: no line is lost or reordered.
    pub fn search_replace_sides(&self) -> (Vec<&str>, Vec<&str>) {
        let mut search = Vec::new();
        let mut replace = Vec::new();
        for line in &self.diff_lines {
            match line.marker {
                DiffMarker::Removed => search.push(line.content.as_str()),
                DiffMarker::Added => replace.push(line.content.as_str()),
                DiffMarker::Context => {
                    search.push(line.content.as_str());
                    replace.push(line.content.as_str());
                }
            }
        }
        (search, replace)
    }

    /// Renders the diff as a search/replace block for approval display.
    pub fn to_search_replace(&self) -> String {
        if self.diff_lines.is_empty() {
            if self.description.is_empty() {
                return format!("{}: {}", self.kind, self.file_path);
            }
            return self.description.clone();
        }

        let (search, replace) = self.search_replace_sides();
        format!(
            "<<<<<<< SEARCH\n{}\n=======\n{}\n>>>>>>> REPLACE",
            search.join("\n"),
            replace.join("\n")
        )
    }

    /// Renders a plain-text fallback description of the tool action.
    pub fn to_raw_context(&self) -> String {
        let mut lines = vec![format!(
            "{}: {}",
            self.kind.as_str().to_uppercase(),
            self.file_path
        )];

        if !self.description.is_empty() {
            lines.push(self.description.clone());
        }

        if !self.diff_lines.is_empty() {
            lines.push(String::new());
            for line in &self.diff_lines {
                lines.push(format!("{} {}", line.marker.as_char(), line.content));
            }
        }

        lines.join("\n")
    }
}

/// A completed turn's materialized result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedResponse {
    pub content: String,
    pub exit_code: Option<i32>,
    pub shell_output: Option<String>,
}

impl ParsedResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            exit_code: None,
            shell_output: None,
        }
    }

    pub fn timeout() -> Self {
        Self::text(TIMEOUT_SENTINEL)
    }
}

/// A pending approval extracted from the pane.
///
/// `prior_*` carry the result of a tool that completed before this
/// confirmation was raised (the chained case).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedConfirmation {
    pub context: String,
    pub prior_result: Option<String>,
    pub prior_exit_code: Option<i32>,
    pub prior_shell_output: Option<String>,
}

impl ParsedConfirmation {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            prior_result: None,
            prior_exit_code: None,
            prior_shell_output: None,
        }
    }
}

/// Outcome of a blocking `ask` / `wait_response` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionReply {
    Response(ParsedResponse),
    Confirmation(ParsedConfirmation),
}

/// Why a streaming completion ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// Turn completed; the chunk carries the final response content.
    Stop,
    /// Backend is waiting for an approval; the chunk carries the raw
    /// confirmation context.
    Confirmation,
}

/// One unit of a streaming completion.
///
/// Partial chunks (`finish_reason == None`) carry the full latest reply
/// text, not a delta: consumers replace, never append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionChunk {
    pub content: String,
    pub finish_reason: Option<FinishReason>,
}

impl CompletionChunk {
    pub fn partial(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finish_reason: None,
        }
    }

    pub fn stop(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finish_reason: Some(FinishReason::Stop),
        }
    }

    pub fn confirmation(context: impl Into<String>) -> Self {
        Self {
            content: context.into(),
            finish_reason: Some(FinishReason::Confirmation),
        }
    }
}

/// Boxed stream of completion chunks.
pub type BackendStream = BoxStream<'static, CompletionChunk>;

/// Typed session failures (spec'd error policies depend on the kind).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The tmux binary is not on PATH.
    MultiplexerMissing,
    /// The tmux session vanished under us.
    SessionDead,
    /// The backend CLI never reached its ready prompt.
    StartTimeout(&'static str),
    /// A tmux invocation failed for another reason.
    Command(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::MultiplexerMissing => {
                write!(f, "tmux not found. Install: sudo apt install tmux")
            }
            SessionError::SessionDead => write!(f, "tmux session dead. Restart the backend."),
            SessionError::StartTimeout(backend) => {
                write!(f, "{backend} CLI start timeout. Check: {backend} auth status")
            }
            SessionError::Command(detail) => write!(f, "tmux command failed: {detail}"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Partial-update callback handed into the blocking polling loops.
pub type OnUpdate<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// Blocking per-backend session contract.
///
/// Implementations own one tmux session from `start` to `close` and run
/// entirely on worker threads;
/// [`TmuxBackend`](crate::providers::backend::TmuxBackend) bridges them to
/// the async side. This trait is the seam for additional backends and for
/// scripted sessions in tests.
pub trait CliSession: Send + Sync {
    /// Human-readable backend name for diagnostics.
    fn name(&self) -> &'static str;

    /// Creates the tmux session and waits for the backend's ready prompt.
    fn start(&self) -> Result<(), SessionError>;

    /// Pastes a prompt, presses Enter, and polls until the turn resolves.
    fn ask(
        &self,
        prompt: &str,
        timeout: Duration,
        on_update: Option<OnUpdate<'_>>,
    ) -> Result<SessionReply, SessionError>;

    /// Answers a pending confirmation (Enter for yes, Escape for no).
    fn respond_confirmation(&self, approve: bool) -> Result<(), SessionError>;

    /// Polls for the next turn resolution without sending input.
    fn wait_response(
        &self,
        timeout: Duration,
        on_update: Option<OnUpdate<'_>>,
    ) -> Result<SessionReply, SessionError>;

    /// Interrupts in-flight generation (Escape keypress).
    fn interrupt(&self) -> Result<(), SessionError>;

    /// Sends the backend's exit command and kills the session.
    fn close(&self);
}
