//! Runtime configuration for the orchestration layer.
//!
//! Everything here is injected by the embedding application; the core
//! itself loads and persists nothing.

use std::time::Duration;

/// Default per-turn timeout for a backend call.
pub const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(720);
/// Deadline for a backend CLI to reach its ready prompt.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(15);
/// Polling cadence against the captured pane.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Scrollback depth per capture; deep enough to survive moderate churn.
pub const DEFAULT_SCROLLBACK_LINES: u32 = 500;
/// Context window (messages) handed to a backend per turn.
pub const DEFAULT_CONTEXT_LIMIT: usize = 5;
/// Conversation log cap; older entries are evicted.
pub const DEFAULT_MAX_MESSAGES: usize = 100;

/// Configuration for the whole debate layer.
#[derive(Debug, Clone)]
pub struct DebateConfig {
    pub turn_timeout: Duration,
    pub start_timeout: Duration,
    pub poll_interval: Duration,
    pub scrollback_lines: u32,
    pub context_limit: usize,
    pub max_messages: usize,
    pub claude: ClaudeConfig,
    pub gemini: GeminiConfig,
}

impl Default for DebateConfig {
    fn default() -> Self {
        Self {
            turn_timeout: DEFAULT_TURN_TIMEOUT,
            start_timeout: DEFAULT_START_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            scrollback_lines: DEFAULT_SCROLLBACK_LINES,
            context_limit: DEFAULT_CONTEXT_LIMIT,
            max_messages: DEFAULT_MAX_MESSAGES,
            claude: ClaudeConfig::default(),
            gemini: GeminiConfig::default(),
        }
    }
}

/// Claude CLI backend settings.
#[derive(Debug, Clone)]
pub struct ClaudeConfig {
    pub model: String,
    pub pane_cols: u16,
    pub pane_rows: u16,
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            model: "haiku".to_string(),
            pane_cols: 150,
            pane_rows: 50,
        }
    }
}

/// Gemini CLI backend settings.
///
/// Gemini gets a wider pane: its tool boxes truncate paths earlier.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub model: String,
    pub pane_cols: u16,
    pub pane_rows: u16,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".to_string(),
            pane_cols: 200,
            pane_rows: 50,
        }
    }
}
