//! CLI backend implementations.
//!
//! Each backend is an interactive assistant CLI driven through a tmux
//! session: a gateway wraps the tmux binary, a session adapter owns the
//! polling state machine, a pane parser turns captures into records, and
//! `TmuxBackend` bridges the blocking session to an async chunk stream.

pub mod backend;
pub mod claude;
pub mod debug_trace;
pub mod gemini;
pub mod pane;
pub mod shared;
pub mod tmux;

pub use backend::TmuxBackend;
pub use claude::parser::ClaudeParser;
pub use claude::ClaudeSession;
pub use gemini::parser::GeminiParser;
pub use gemini::GeminiSession;
pub use shared::{
    BackendStream, CliSession, CompletionChunk, DiffLine, DiffMarker, FinishReason, OnUpdate,
    ParsedConfirmation, ParsedResponse, SessionError, SessionReply, ToolInfo, ToolKind,
    SHELL_OUTPUT_MARKER, TIMEOUT_SENTINEL,
};
pub use tmux::TmuxGateway;
