//! Debug trace helpers for raw prompt/pane capture.
//!
//! Parser regressions against live CLI output are only debuggable with the
//! exact bytes that came off the pane. Set `PARLEY_DEBUG_TRACE=1` (or to a
//! directory path) and each session writes its prompts, confirmation
//! contexts, and final captures under a per-session prefix.

use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

static TRACE_COUNTER: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone)]
pub struct DebugTrace {
    prefix: String,
    dir: PathBuf,
}

impl DebugTrace {
    /// Activates tracing from `PARLEY_DEBUG_TRACE`. Returns `None` when the
    /// variable is unset/empty or the trace directory cannot be created.
    pub fn from_env(backend: &str) -> Option<Self> {
        let raw = std::env::var("PARLEY_DEBUG_TRACE").ok()?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        let dir = if trimmed == "1" || trimmed.eq_ignore_ascii_case("true") {
            std::env::temp_dir().join("parley-trace")
        } else {
            PathBuf::from(trimmed)
        };

        if fs::create_dir_all(&dir).is_err() {
            return None;
        }

        let counter = TRACE_COUNTER.fetch_add(1, Ordering::Relaxed);
        Some(Self {
            prefix: format!("{backend}_{counter}"),
            dir,
        })
    }

    pub fn write_prompt(&self, turn: usize, prompt: &str) {
        self.write(&format!("{}_turn{turn}_prompt.txt", self.prefix), prompt);
    }

    pub fn write_pane(&self, turn: usize, pane: &str) {
        self.write(&format!("{}_turn{turn}_pane.txt", self.prefix), pane);
    }

    pub fn write_confirmation(&self, turn: usize, context: &str) {
        self.write(
            &format!("{}_turn{turn}_confirmation.txt", self.prefix),
            context,
        );
    }

    fn write(&self, name: &str, body: &str) {
        if let Ok(mut file) = File::create(self.dir.join(name)) {
            let _ = file.write_all(body.as_bytes());
        }
    }
}
