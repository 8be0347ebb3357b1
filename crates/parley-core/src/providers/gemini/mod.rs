//! Gemini CLI session driven through tmux.
//!
//! Gemini prefixes replies with `✦`/`✧`, so delta detection counts reply
//! markers instead of tracking a marker line. Shell output lives inside
//! the tool box; extraction lifts it into a `__SHELL_OUTPUT__:` marker so
//! the parser can recover `(exit_code, shell_output)` from reply text.

pub mod parser;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::{DebateConfig, GeminiConfig};
use crate::providers::debug_trace::DebugTrace;
use crate::providers::pane;
use crate::providers::shared::{
    CliSession, OnUpdate, ParsedConfirmation, ParsedResponse, SessionError, SessionReply,
    SHELL_OUTPUT_MARKER,
};
use crate::providers::tmux::TmuxGateway;
use parser::GeminiParser;

const READY_PROMPT: &str = "Type your message";
const CONFIRM_WAITING: &str = "Waiting for user confirmation";
const CONFIRM_APPLY: &str = "Apply this change?";
const CANCEL_HINT: &str = "esc to cancel";
const SPINNERS: [char; 10] = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];
const EXIT_COMMAND: &str = "/exit";
const SLOW_CYCLE: Duration = Duration::from_millis(500);
const PASTE_SETTLE: Duration = Duration::from_millis(300);
/// Gemini repaints the final box late; wait a beat before the last capture.
const COMPLETION_SETTLE: Duration = Duration::from_secs(1);

pub struct GeminiSession {
    gateway: TmuxGateway,
    config: GeminiConfig,
    start_timeout: Duration,
    poll_interval: Duration,
    scrollback_lines: u32,
    parser: GeminiParser,
    trace: Option<DebugTrace>,
    turn: AtomicUsize,
}

impl GeminiSession {
    pub fn new(session_name: impl Into<String>, config: &DebateConfig) -> Self {
        Self {
            gateway: TmuxGateway::new(session_name),
            config: config.gemini.clone(),
            start_timeout: config.start_timeout,
            poll_interval: config.poll_interval,
            scrollback_lines: config.scrollback_lines,
            parser: GeminiParser::new(),
            trace: DebugTrace::from_env("gemini"),
            turn: AtomicUsize::new(0),
        }
    }

    fn capture(&self) -> Result<String, SessionError> {
        self.gateway.capture(self.scrollback_lines)
    }

    fn build_confirmation(&self, output: &str, capture_prior: bool, skip_count: isize) -> ParsedConfirmation {
        let mut confirmation = ParsedConfirmation::new(extract_confirmation_context(output));
        if capture_prior {
            let prior = extract_response(output, skip_count);
            if !prior.is_empty() {
                let (code, shell_output) = self.parser.parse_tool_result(&prior);
                confirmation.prior_exit_code = code;
                confirmation.prior_shell_output = shell_output;
                confirmation.prior_result = Some(prior);
            }
        }
        confirmation
    }
}

impl CliSession for GeminiSession {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn start(&self) -> Result<(), SessionError> {
        // A neutral shell suppresses user-dotfile banners that would
        // otherwise pollute the captured pane.
        self.gateway.create_session(
            self.config.pane_cols,
            self.config.pane_rows,
            &["gemini", "--model", &self.config.model],
            &[("SHELL", "/bin/bash")],
        )?;

        let deadline = Instant::now() + self.start_timeout;
        while Instant::now() < deadline {
            thread::sleep(Duration::from_secs(1));
            let pane = self.gateway.capture_visible()?;
            if pane.contains(READY_PROMPT) {
                return Ok(());
            }
        }
        Err(SessionError::StartTimeout("gemini"))
    }

    fn ask(
        &self,
        prompt: &str,
        timeout: Duration,
        on_update: Option<OnUpdate<'_>>,
    ) -> Result<SessionReply, SessionError> {
        if !self.gateway.has_session() {
            return Err(SessionError::SessionDead);
        }

        let before = self.capture()?;
        let responses_before = count_reply_markers(&before);

        let turn = self.turn.fetch_add(1, Ordering::Relaxed);
        if let Some(trace) = &self.trace {
            trace.write_prompt(turn, prompt);
        }

        self.gateway.paste(prompt)?;
        thread::sleep(PASTE_SETTLE);
        self.gateway.send_key("Enter")?;

        let start = Instant::now();
        let skip_count = responses_before as isize;
        let mut last_output = String::new();
        let mut last_partial = String::new();

        while start.elapsed() < timeout {
            thread::sleep(self.poll_interval);

            let cycle_start = Instant::now();
            let output = self.capture()?;
            if output == last_output {
                continue;
            }

            if let Some(cb) = on_update {
                let partial = extract_response(&output, skip_count);
                let cycle = cycle_start.elapsed();
                if cycle > SLOW_CYCLE {
                    tracing::warn!(
                        backend = "gemini",
                        elapsed_ms = cycle.as_millis() as u64,
                        "slow poll cycle"
                    );
                }
                if !partial.is_empty() && partial != last_partial {
                    cb(&format!("{partial} ▌"));
                    last_partial = partial;
                }
            }

            if output.contains(CONFIRM_WAITING) || output.contains(CONFIRM_APPLY) {
                let confirmation = self.build_confirmation(&output, false, skip_count);
                if let Some(trace) = &self.trace {
                    trace.write_confirmation(turn, &confirmation.context);
                }
                return Ok(SessionReply::Confirmation(confirmation));
            }

            // A turn is complete once a new reply marker appeared AND the
            // ready prompt is back without a spinner.
            let responses_now = count_reply_markers(&output);
            if responses_now > responses_before
                && output.contains(READY_PROMPT)
                && !has_spinner(&output)
                && !output.contains(CANCEL_HINT)
            {
                thread::sleep(COMPLETION_SETTLE);
                let settled = self.capture()?;
                if let Some(trace) = &self.trace {
                    trace.write_pane(turn, &settled);
                }
                let content = extract_response(&settled, skip_count);
                return Ok(SessionReply::Response(ParsedResponse::text(content)));
            }

            last_output = output;
        }

        Ok(SessionReply::Response(ParsedResponse::timeout()))
    }

    fn respond_confirmation(&self, approve: bool) -> Result<(), SessionError> {
        self.gateway.send_key(if approve { "Enter" } else { "Escape" })
    }

    fn wait_response(
        &self,
        timeout: Duration,
        on_update: Option<OnUpdate<'_>>,
    ) -> Result<SessionReply, SessionError> {
        let turn = self.turn.load(Ordering::Relaxed).saturating_sub(1);
        let before = self.capture()?;
        // The in-progress reply already has its marker on screen.
        let skip_count = count_reply_markers(&before) as isize - 1;

        let start = Instant::now();
        let mut last_output = String::new();
        let mut last_partial = String::new();

        while start.elapsed() < timeout {
            thread::sleep(self.poll_interval);

            let cycle_start = Instant::now();
            let output = self.capture()?;
            if output == last_output {
                continue;
            }

            if let Some(cb) = on_update {
                let partial = extract_response(&output, skip_count);
                let cycle = cycle_start.elapsed();
                if cycle > SLOW_CYCLE {
                    tracing::warn!(
                        backend = "gemini",
                        elapsed_ms = cycle.as_millis() as u64,
                        "slow poll cycle"
                    );
                }
                if !partial.is_empty() && partial != last_partial {
                    cb(&format!("{partial} ▌"));
                    last_partial = partial;
                }
            }

            // A chained confirmation: the prior tool's result is still in
            // the buffer and travels with the new confirmation.
            if output.contains(CONFIRM_WAITING) || output.contains(CONFIRM_APPLY) {
                let confirmation = self.build_confirmation(&output, true, skip_count);
                if let Some(trace) = &self.trace {
                    trace.write_confirmation(turn, &confirmation.context);
                }
                return Ok(SessionReply::Confirmation(confirmation));
            }

            if output.contains(READY_PROMPT)
                && !has_spinner(&output)
                && !output.contains(CANCEL_HINT)
            {
                if let Some(trace) = &self.trace {
                    trace.write_pane(turn, &output);
                }
                let raw_content = extract_response(&output, skip_count);
                let (exit_code, shell_output) = self.parser.parse_tool_result(&raw_content);
                let content = strip_shell_marker(&raw_content);
                return Ok(SessionReply::Response(ParsedResponse {
                    content,
                    exit_code,
                    shell_output,
                }));
            }

            last_output = output;
        }

        Ok(SessionReply::Response(ParsedResponse::timeout()))
    }

    fn interrupt(&self) -> Result<(), SessionError> {
        self.gateway.send_key("Escape")
    }

    fn close(&self) {
        let _ = self.gateway.send_key(EXIT_COMMAND);
        let _ = self.gateway.send_key("Enter");
        thread::sleep(Duration::from_secs(1));
        self.gateway.kill_session();
    }
}

fn count_reply_markers(output: &str) -> usize {
    output.chars().filter(|c| *c == '✦' || *c == '✧').count()
}

fn has_spinner(output: &str) -> bool {
    output.chars().any(|c| SPINNERS.contains(&c))
}

/// Removes the synthesized shell marker (and everything after it).
fn strip_shell_marker(content: &str) -> String {
    match content.find(SHELL_OUTPUT_MARKER) {
        Some(pos) => content[..pos].trim().to_string(),
        None => content.trim().to_string(),
    }
}

/// Extracts the latest reply, keeping tool boxes out of the text but
/// lifting shell output and exit trailers into a `__SHELL_OUTPUT__:`
/// marker appended after the reply.
///
/// `skip_count` is the number of replies already on screen before this
/// turn; nothing is returned until a newer reply appears.
fn extract_response(raw: &str, skip_count: isize) -> String {
    let lines: Vec<&str> = raw.trim().lines().collect();
    if lines.is_empty() {
        return String::new();
    }

    let marker_idxs: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| is_reply_marker(line.trim()))
        .map(|(i, _)| i)
        .collect();
    let last_marker_idx = marker_idxs.last().copied().unwrap_or(0);

    // Shell boxes are only searched between the previous reply and the
    // current one, so stale boxes cannot pollute a new message.
    let search_start = if marker_idxs.len() > 1 {
        marker_idxs[marker_idxs.len() - 2]
    } else {
        last_marker_idx.saturating_sub(210)
    };

    let mut exit_code_line: Option<String> = None;
    let mut shell_output_lines: Vec<String> = Vec::new();
    let mut in_shell_box = false;

    for line in &lines[search_start..=last_marker_idx] {
        let stripped = line.trim();
        let clean = stripped
            .trim_matches(|c: char| c == '│' || c.is_whitespace())
            .to_string();

        // Each new shell box resets the collected output.
        if stripped.contains('✓') && stripped.contains("Shell") {
            in_shell_box = true;
            shell_output_lines.clear();
            exit_code_line = None;
            continue;
        }
        if stripped.starts_with('╰') || is_reply_marker(stripped) {
            in_shell_box = false;
            continue;
        }
        if in_shell_box && !clean.is_empty() {
            if clean.contains("Command exited with code:") || clean.contains("Error: Exit code") {
                exit_code_line = Some(clean);
            } else if !clean.starts_with('╭') {
                shell_output_lines.push(clean);
            }
        }
    }

    let mut all_responses: Vec<String> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut in_response = false;

    for line in &lines {
        let stripped = line.trim();

        if is_reply_marker(stripped) {
            if !current.is_empty() {
                all_responses.push(current.join("\n"));
            }
            let text = stripped[stripped.chars().next().map_or(0, char::len_utf8)..].trim_start();
            current = if text.is_empty() {
                Vec::new()
            } else {
                vec![text.to_string()]
            };
            in_response = true;
        } else if in_response {
            if stripped.contains(READY_PROMPT) {
                if !current.is_empty() {
                    all_responses.push(current.join("\n"));
                    current = Vec::new();
                }
                in_response = false;
            } else if !stripped.is_empty() && !is_noise(stripped) {
                current.push(stripped.to_string());
            }
        }
    }
    if !current.is_empty() && in_response {
        all_responses.push(current.join("\n"));
    }

    let mut result = if all_responses.len() as isize > skip_count {
        all_responses.last().cloned().unwrap_or_default()
    } else {
        String::new()
    };

    if !shell_output_lines.is_empty() {
        let mut marker = format!("{SHELL_OUTPUT_MARKER}{}", shell_output_lines.join("\n"));
        if let Some(exit_line) = exit_code_line {
            marker.push('\n');
            marker.push_str(&exit_line);
        }
        result = if result.is_empty() {
            marker
        } else {
            format!("{result}\n{marker}")
        };
    } else if let Some(exit_line) = exit_code_line
        && !result.is_empty()
    {
        result = format!("{result}\n{exit_line}");
    }

    result
}

fn is_reply_marker(stripped: &str) -> bool {
    stripped.starts_with('✦') || stripped.starts_with('✧')
}

/// Input-box chrome, status footers, and tool-box interiors.
fn is_noise(stripped: &str) -> bool {
    let lower = stripped.to_lowercase();

    if pane::is_horizontal_rule(stripped) {
        return true;
    }
    if lower.contains("type your message")
        || lower.contains("esc to cancel")
        || lower.contains("auto |")
        || lower.contains("sandbox")
        || lower.contains("gemini.md")
        || lower.contains("yolo mode")
        || lower.contains("responding with gemini")
        || lower.contains("waiting for user confirmation")
        || lower.contains("request cancelled")
    {
        return true;
    }
    if lower.starts_with("using:") {
        return true;
    }
    if pane::is_box_start(stripped) || pane::is_box_end(stripped) {
        return true;
    }
    if let Some(inner) = stripped.strip_prefix('│') {
        let inner = inner.trim_start();
        if inner.is_empty() {
            return true;
        }
        if let Some(after) = inner.strip_prefix('>')
            && after.trim_start().to_lowercase().starts_with("type your")
        {
            return true;
        }
        if let Some(first) = inner.chars().next()
            && matches!(first, '✓' | '⊷' | '-' | '+' | '?')
        {
            let rest = inner[first.len_utf8()..].trim_start();
            if ["ReadFile", "WriteFile", "EditFile", "DeleteFile", "Shell"]
                .iter()
                .any(|name| rest.starts_with(name))
            {
                return true;
            }
        }
        let digits = inner.chars().take_while(char::is_ascii_digit).count();
        if digits > 0 {
            let after = inner[digits..].trim_start();
            if after.starts_with('-') || after.starts_with('+') {
                return true;
            }
        }
    }
    false
}

/// Extracts the raw confirmation context, box characters intact, from the
/// last tool header down to the `Apply this change?` prompt. The parser
/// needs the borders to recognize the tool box.
fn extract_confirmation_context(raw: &str) -> String {
    const FALLBACK: &str = "Action pending confirmation";
    const TOOL_PATTERNS: [&str; 4] = ["WriteFile", "Shell", "EditFile", "DeleteFile"];

    let lines: Vec<&str> = raw.trim().lines().collect();

    let last_tool_idx = lines.iter().rposition(|line| {
        TOOL_PATTERNS.iter().any(|p| line.contains(p))
            || (line.contains('?') && line.contains("Edit"))
    });
    let Some(start) = last_tool_idx else {
        return FALLBACK.to_string();
    };

    let mut context: Vec<&str> = Vec::new();
    for line in &lines[start..] {
        if line.contains(CONFIRM_APPLY) {
            break;
        }
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            context.push(trimmed);
        }
    }

    if context.is_empty() {
        FALLBACK.to_string()
    } else {
        context.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_response_takes_latest_reply() {
        let raw = "\
✦ First reply.
Type your message
✦ Second reply.
with a continuation";
        let result = extract_response(raw, 0);
        assert_eq!(result, "Second reply.\nwith a continuation");
    }

    #[test]
    fn extract_response_respects_skip_count() {
        let raw = "✦ Only reply so far.";
        // One reply was already on screen before this turn.
        assert_eq!(extract_response(raw, 1), "");
        assert_eq!(extract_response(raw, 0), "Only reply so far.");
    }

    #[test]
    fn extract_response_filters_chrome() {
        let raw = "\
✦ The result is ready.
───────────────
Type your message
auto | model: gemini";
        let result = extract_response(raw, 0);
        assert_eq!(result, "The result is ready.");
    }

    #[test]
    fn shell_output_lifted_into_marker() {
        let raw = "\
✧ Running the command.
│ ✓  Shell ls /tmp │
│ file1            │
│ file2            │
│ Command exited with code: 0 │
╰──────────────────╯
✦ Done.";
        let result = extract_response(raw, 0);

        assert!(result.starts_with("Done."));
        assert!(result.contains(SHELL_OUTPUT_MARKER));
        assert!(result.contains("file1\nfile2"));
        assert!(result.contains("Command exited with code: 0"));
    }

    #[test]
    fn stale_shell_box_does_not_pollute_new_reply() {
        let raw = "\
│ ✓  Shell old-command │
│ old output           │
╰──────────────────────╯
✦ Old reply.
✦ New reply without tools.";
        let result = extract_response(raw, 1);
        // The box belongs to the old reply zone; the new reply is clean.
        assert_eq!(result, "New reply without tools.");
    }

    #[test]
    fn reply_marker_variants_counted() {
        assert_eq!(count_reply_markers("✦ a\n✧ b\nplain"), 2);
    }

    #[test]
    fn spinner_detection() {
        assert!(has_spinner("⠋ working"));
        assert!(!has_spinner("done"));
    }

    #[test]
    fn strip_shell_marker_removes_tail() {
        let content = format!("Done.\n{SHELL_OUTPUT_MARKER}out\nCommand exited with code: 0");
        assert_eq!(strip_shell_marker(&content), "Done.");
        assert_eq!(strip_shell_marker("plain"), "plain");
    }

    #[test]
    fn confirmation_context_keeps_box_characters() {
        let raw = "\
✦ I'll write the file.
? WriteFile Writing to /tmp/x.txt
╭────────────╮
│ 1 hello    │
╰────────────╯
Apply this change?";
        let context = extract_confirmation_context(raw);

        assert!(context.starts_with("? WriteFile"));
        assert!(context.contains('╭'));
        assert!(context.contains("1 hello"));
        assert!(!context.contains("Apply this change?"));
    }

    #[test]
    fn confirmation_context_fallback() {
        assert_eq!(
            extract_confirmation_context("✦ nothing pending"),
            "Action pending confirmation"
        );
    }

    #[test]
    fn noise_filters_tool_box_interiors() {
        assert!(is_noise("│ ✓ ReadFile src/main.rs"));
        assert!(is_noise("│ 12 + added"));
        assert!(is_noise("│   "));
        assert!(is_noise("│ > Type your message"));
        assert!(!is_noise("│ plain box text"));
        assert!(!is_noise("ordinary reply line"));
    }
}
