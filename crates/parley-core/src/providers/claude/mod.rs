//! Claude CLI session driven through tmux.
//!
//! The CLI renders replies behind `●` bullets and shows a `✻` spinner
//! while generating. Delta detection keys on the *content* of the line
//! where the latest reply begins (scrollback renumbers indices as the
//! buffer grows) plus the bullet count, which catches two consecutive
//! replies with byte-identical text.

pub mod parser;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::{ClaudeConfig, DebateConfig};
use crate::providers::debug_trace::DebugTrace;
use crate::providers::pane;
use crate::providers::shared::{
    CliSession, OnUpdate, ParsedConfirmation, ParsedResponse, SessionError, SessionReply,
};
use crate::providers::tmux::TmuxGateway;
use parser::ClaudeParser;

const SPINNER: char = '✻';
const TRUST_PROMPT: &str = "Yes, I accept";
const CONFIRM_PROMPT: &str = "Do you want to";
const CONFIRM_MENU: &str = "1. Yes";
const EXIT_COMMAND: &str = "/exit";
/// A poll cycle slower than this gets a warning; it starves the UI loop.
const SLOW_CYCLE: Duration = Duration::from_millis(500);
/// Pause between paste and Enter so the CLI registers the buffer.
const PASTE_SETTLE: Duration = Duration::from_millis(300);
/// Final re-capture delay once the ready prompt appears.
const COMPLETION_SETTLE: Duration = Duration::from_millis(500);

pub struct ClaudeSession {
    gateway: TmuxGateway,
    config: ClaudeConfig,
    start_timeout: Duration,
    poll_interval: Duration,
    scrollback_lines: u32,
    parser: ClaudeParser,
    trace: Option<DebugTrace>,
    turn: AtomicUsize,
}

impl ClaudeSession {
    pub fn new(session_name: impl Into<String>, config: &DebateConfig) -> Self {
        Self {
            gateway: TmuxGateway::new(session_name),
            config: config.claude.clone(),
            start_timeout: config.start_timeout,
            poll_interval: config.poll_interval,
            scrollback_lines: config.scrollback_lines,
            parser: ClaudeParser::new(),
            trace: DebugTrace::from_env("claude"),
            turn: AtomicUsize::new(0),
        }
    }

    fn capture(&self) -> Result<String, SessionError> {
        self.gateway.capture(self.scrollback_lines)
    }

    /// Shared polling loop for `ask` and `wait_response`.
    ///
    /// `capture_prior` controls whether a detected confirmation also
    /// carries the result of a tool that completed just before it (the
    /// chained case, only meaningful after an approval).
    fn poll(
        &self,
        timeout: Duration,
        on_update: Option<OnUpdate<'_>>,
        mut last_marker_line: String,
        mut last_marker_count: usize,
        capture_prior: bool,
        turn: usize,
    ) -> Result<SessionReply, SessionError> {
        let start = Instant::now();
        let mut last_output = String::new();

        while start.elapsed() < timeout {
            thread::sleep(self.poll_interval);

            let cycle_start = Instant::now();
            let output = self.capture()?;

            // Byte-identity fast path: an unchanged buffer was fully
            // evaluated last cycle.
            if output == last_output {
                continue;
            }

            if let Some(cb) = on_update {
                let (partial, marker_idx) = extract_response(&output);
                let (current_marker_line, current_marker_count) =
                    marker_state(&output, marker_idx);

                let cycle = cycle_start.elapsed();
                if cycle > SLOW_CYCLE {
                    tracing::warn!(
                        backend = "claude",
                        elapsed_ms = cycle.as_millis() as u64,
                        "slow poll cycle"
                    );
                }

                let is_new_message = current_marker_line != last_marker_line
                    || current_marker_count > last_marker_count;

                if !partial.is_empty() && is_new_message {
                    cb(&format!("{partial} ▌"));
                    last_marker_line = current_marker_line;
                    last_marker_count = current_marker_count;
                }
            }

            if output.contains(CONFIRM_PROMPT) && output.contains(CONFIRM_MENU) {
                let context = extract_confirmation_context(&output);
                if let Some(trace) = &self.trace {
                    trace.write_confirmation(turn, &context);
                }

                let mut confirmation = ParsedConfirmation::new(context);
                if capture_prior {
                    let (prior, _) = extract_response(&output);
                    if prior.is_empty() {
                        let (code, shell_output) = self.parser.parse_tool_result(&output);
                        confirmation.prior_exit_code = code;
                        confirmation.prior_shell_output = shell_output;
                    } else {
                        confirmation.prior_result = Some(prior);
                    }
                }
                return Ok(SessionReply::Confirmation(confirmation));
            }

            // Completion needs both: ready prompt visible and no spinner.
            let has_spinner = output.contains(SPINNER);
            if prompt_ready(&output) && !has_spinner {
                thread::sleep(COMPLETION_SETTLE);
                let settled = self.capture()?;
                if let Some(trace) = &self.trace {
                    trace.write_pane(turn, &settled);
                }
                let (content, _) = extract_response(&settled);
                let (exit_code, shell_output) = self.parser.parse_tool_result(&settled);
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
}

impl CliSession for ClaudeSession {
    fn name(&self) -> &'static str {
        "claude"
    }

    fn start(&self) -> Result<(), SessionError> {
        self.gateway.create_session(
            self.config.pane_cols,
            self.config.pane_rows,
            &[
                "claude",
                "--permission-mode",
                "default",
                "--model",
                &self.config.model,
            ],
            &[],
        )?;

        let deadline = Instant::now() + self.start_timeout;
        while Instant::now() < deadline {
            thread::sleep(Duration::from_secs(1));
            let pane = self.gateway.capture_visible()?;

            // First-run trust dialog: accept and keep waiting.
            if pane.contains(TRUST_PROMPT) {
                self.gateway.send_key("Down")?;
                thread::sleep(Duration::from_millis(200));
                self.gateway.send_key("Enter")?;
                continue;
            }
            if pane.contains('>') {
                return Ok(());
            }
        }
        Err(SessionError::StartTimeout("claude"))
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

        // Record the pre-prompt reply marker so buffer scrolling during the
        // turn cannot be mistaken for a new reply.
        let before = self.capture()?;
        let (_, marker_idx) = extract_response(&before);
        let (last_marker_line, last_marker_count) = marker_state(&before, marker_idx);

        let turn = self.turn.fetch_add(1, Ordering::Relaxed);
        if let Some(trace) = &self.trace {
            trace.write_prompt(turn, prompt);
        }

        self.gateway.paste(prompt)?;
        thread::sleep(PASTE_SETTLE);
        self.gateway.send_key("Enter")?;

        self.poll(
            timeout,
            on_update,
            last_marker_line,
            last_marker_count,
            false,
            turn,
        )
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
        self.poll(timeout, on_update, String::new(), 0, true, turn)
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

/// Ready prompt check: `>` in the last few lines (the footer can sit below
/// the prompt, so the last line alone is not enough).
fn prompt_ready(output: &str) -> bool {
    output
        .trim_end()
        .lines()
        .rev()
        .take(5)
        .map(str::trim)
        .any(|line| line == ">" || line.starts_with("> "))
}

/// Reply-marker identity for delta detection: the content of the line
/// where the latest reply begins plus the total bullet count.
fn marker_state(raw: &str, marker_idx: Option<usize>) -> (String, usize) {
    let lines: Vec<&str> = raw.trim().lines().collect();
    let marker_line = marker_idx
        .and_then(|i| lines.get(i))
        .map(|l| l.trim().to_string())
        .unwrap_or_default();
    let marker_count = lines.iter().filter(|l| l.trim().starts_with('●')).count();
    (marker_line, marker_count)
}

/// Extracts the latest reply (text bullets plus inline tool summaries)
/// from a capture. Returns the cleaned text and the index of the line
/// where that reply begins.
fn extract_response(raw: &str) -> (String, Option<usize>) {
    let lines: Vec<&str> = raw.trim().lines().collect();

    // The reply starts at the last text bullet (tool bullets don't count).
    let mut last_text_idx = None;
    for (i, line) in lines.iter().enumerate() {
        let stripped = line.trim();
        if stripped.starts_with('●') && parse_tool_bullet(stripped).is_none() {
            last_text_idx = Some(i);
        }
    }
    let Some(start) = last_text_idx else {
        return (String::new(), None);
    };

    let mut result_lines: Vec<String> = Vec::new();
    let mut in_response = false;
    let mut in_tool = false;
    let mut in_tool_box = false;
    let mut in_diff_block = false;
    let mut tool_summary: Option<String> = None;
    let mut tool_has_error = false;

    for line in &lines[start..] {
        let stripped = line.trim();

        if stripped.starts_with("╭─") {
            in_tool_box = true;
            continue;
        }
        if stripped.starts_with("╰─") {
            in_tool_box = false;
            continue;
        }
        if in_tool_box {
            continue;
        }

        if pane::is_edit_separator(stripped) {
            in_diff_block = !in_diff_block;
            continue;
        }
        if in_diff_block {
            continue;
        }

        if is_tool_label(stripped) {
            continue;
        }

        if let Some((name, args)) = parse_tool_bullet(stripped) {
            if let Some(summary) = tool_summary.take() {
                result_lines.push(tool_summary_line(&summary, tool_has_error));
            }
            tool_summary = Some(format!("{name}: {}", clean_tool_args(&args)));
            tool_has_error = false;
            in_tool = true;
            continue;
        }

        if stripped.starts_with('⎿') {
            in_tool = true;
            if stripped.to_lowercase().contains("error") {
                tool_has_error = true;
            }
            continue;
        }

        if in_tool {
            if stripped.starts_with('…') || stripped.contains("(ctrl+o") {
                continue;
            }
            if stripped.to_lowercase().contains("error") {
                tool_has_error = true;
            }
            if line.starts_with("     ") || line.starts_with('\t') {
                continue;
            }
            if let Some(summary) = tool_summary.take() {
                result_lines.push(tool_summary_line(&summary, tool_has_error));
            }
            in_tool = false;
        }

        if stripped.starts_with('●') {
            let text = stripped.trim_start_matches('●').trim_start();
            if !text.is_empty() {
                result_lines.push(text.to_string());
            }
            in_response = true;
            continue;
        }

        // The echoed user prompt (`> [...`) ends the reply region.
        if is_user_prompt_echo(stripped) {
            break;
        }

        if in_response && !stripped.is_empty() && !is_noise(stripped) {
            result_lines.push(stripped.to_string());
        }
    }

    if let Some(summary) = tool_summary {
        result_lines.push(tool_summary_line(&summary, tool_has_error));
    }

    let mut result = result_lines.join("\n");

    // Box skipping above drops the exit-code trailer; reattach it so the
    // caller still sees the failure.
    if !result.is_empty()
        && !result.contains("Error: Exit code")
        && let Some(code) = find_error_exit_code(raw)
    {
        result.push_str(&format!("\nError: Exit code {code}"));
    }

    (result, Some(start))
}

fn tool_summary_line(summary: &str, has_error: bool) -> String {
    let status = if has_error { '✗' } else { '✓' };
    format!("  ⎿ {summary} {status}")
}

/// `● Name(args` or `● Name: args`: a tool bullet rather than reply text.
fn parse_tool_bullet(stripped: &str) -> Option<(String, String)> {
    let rest = stripped.strip_prefix('●')?.trim_start();
    let ident_len = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .count();
    if ident_len == 0 {
        return None;
    }
    let (name, after) = rest.split_at(ident_len);

    if let Some(args) = after.strip_prefix('(') {
        let args = args.trim_end().trim_end_matches(')').trim().to_string();
        return Some((name.to_string(), args));
    }
    if matches!(name, "Write" | "Update" | "Read" | "Bash" | "Delete")
        && let Some(args) = after.strip_prefix(':')
    {
        return Some((name.to_string(), args.trim().to_string()));
    }
    None
}

/// Strips trailing status glyphs and truncates long arguments for the
/// inline tool summary.
fn clean_tool_args(args: &str) -> String {
    let trimmed = args
        .trim_end()
        .trim_end_matches(['✓', '✗'])
        .trim_end()
        .to_string();
    if trimmed.chars().count() > 50 {
        let cut: String = trimmed.chars().take(47).collect();
        format!("{cut}...")
    } else {
        trimmed
    }
}

/// Out-of-box tool labels that precede diff blocks.
fn is_tool_label(stripped: &str) -> bool {
    stripped.starts_with("Edit file")
        || stripped.starts_with("Create file")
        || stripped.starts_with("Bash command")
}

fn is_user_prompt_echo(stripped: &str) -> bool {
    stripped
        .strip_prefix('>')
        .map(|rest| rest.trim_start().starts_with('['))
        .unwrap_or(false)
}

/// UI chrome and status lines that must not leak into reply text.
fn is_noise(stripped: &str) -> bool {
    let lower = stripped.to_lowercase();

    if stripped.starts_with(SPINNER) && lower.contains("interrupt") {
        return true;
    }
    if !stripped.is_empty() && stripped.chars().all(|c| c == '─') {
        return true;
    }
    if lower.contains("thinking")
        || lower.contains("philosophising")
        || lower.contains("pondering")
        || lower.contains("reasoning")
        || lower.contains("ctrl-g")
        || lower.contains("ctrl-c")
        || lower.contains("tab to toggle")
        || lower.contains("shift+tab")
        || lower.contains("shift + enter")
        || lower.contains("bypass permissions")
        || lower.contains("to cycle")
        || lower.contains("welcome back")
        || lower.contains("tips for getting")
        || lower.contains("default mode")
        || lower.contains("plan mode")
        || lower.contains("esc to interrupt")
    {
        return true;
    }
    if let Some(rest) = stripped.strip_prefix('>') {
        let rest = rest.trim_start();
        if rest.is_empty() || rest.starts_with("Try") {
            return true;
        }
    }
    if lower.starts_with("do you want to") || lower.starts_with("esc to cancel") {
        return true;
    }
    is_menu_option(stripped)
}

/// Confirmation menu entries: `❯ 1. Yes`, `2. No`, `3. Type ...`.
fn is_menu_option(stripped: &str) -> bool {
    let rest = stripped.strip_prefix('❯').unwrap_or(stripped).trim_start();
    let digits = rest.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return false;
    }
    let Some(after_dot) = rest[digits..].strip_prefix('.') else {
        return false;
    };
    let lower = after_dot.trim_start().to_lowercase();
    lower.starts_with("yes") || lower.starts_with("no") || lower.starts_with("type")
}

/// `Error: Exit code N` anywhere in the raw capture (case-insensitive).
fn find_error_exit_code(raw: &str) -> Option<i32> {
    let lower = raw.to_lowercase();
    let pos = lower.find("error: exit code")?;
    let digits: String = lower[pos + "error: exit code".len()..]
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Extracts the confirmation dialog content: everything between the
/// horizontal rule the CLI draws above the dialog and the `Do you want to`
/// prompt line.
fn extract_confirmation_context(raw: &str) -> String {
    const FALLBACK: &str = "Action pending confirmation";
    let lines: Vec<&str> = raw.trim().lines().collect();

    let Some(confirm_idx) = lines.iter().position(|l| l.contains(CONFIRM_PROMPT)) else {
        return FALLBACK.to_string();
    };

    let separator_idx = lines[..confirm_idx]
        .iter()
        .rposition(|l| pane::is_horizontal_rule(l.trim()));

    let start_idx = if let Some(sep) = separator_idx {
        sep + 1
    } else if let Some(tool_use) = lines[..confirm_idx]
        .iter()
        .position(|l| l.trim() == "Tool use")
    {
        tool_use
    } else if let Some(bullet) = lines[..confirm_idx].iter().rposition(|l| l.contains('●')) {
        bullet
    } else {
        confirm_idx.saturating_sub(10)
    };

    let context: Vec<&str> = lines[start_idx..confirm_idx]
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect();

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
    fn extract_response_filters_noise() {
        let raw = "\
● Here is the response.
This is the actual content.
Thinking about the problem.
More content here.
ctrl-c to cancel
Final content.";
        let (result, idx) = extract_response(raw);

        assert!(!result.contains("Thinking"));
        assert!(!result.contains("ctrl-c"));
        assert!(result.contains("actual content"));
        assert!(result.contains("More content here."));
        assert!(result.contains("Final content."));
        assert_eq!(idx, Some(0));
    }

    #[test]
    fn extract_response_noise_is_case_insensitive() {
        let raw = "\
● Response start.
Real content here.
THINKING loudly.
More real content.";
        let (result, _) = extract_response(raw);

        assert!(!result.contains("THINKING"));
        assert!(result.contains("Real content here."));
        assert!(result.contains("More real content."));
    }

    #[test]
    fn extract_response_empty_buffer() {
        assert_eq!(extract_response(""), (String::new(), None));
        assert_eq!(extract_response("   \n\t  \n  "), (String::new(), None));
    }

    #[test]
    fn extract_response_without_marker() {
        let raw = "Some content without marker.\nNo bullet anywhere.";
        assert_eq!(extract_response(raw), (String::new(), None));
    }

    #[test]
    fn extract_response_takes_last_text_bullet() {
        let raw = "\
● First reply.
old line
● Second reply.
new line";
        let (result, idx) = extract_response(raw);
        assert_eq!(result, "Second reply.\nnew line");
        assert_eq!(idx, Some(2));
    }

    #[test]
    fn tool_bullets_become_summaries_not_reply_starts() {
        let raw = "\
● Let me check the directory.
● Bash(ls /tmp)
  ⎿  file1
next steps below";
        let (result, idx) = extract_response(raw);

        // The reply starts at the text bullet, not the Bash bullet.
        assert_eq!(idx, Some(0));
        assert!(result.starts_with("Let me check the directory."));
        assert!(result.contains("⎿ Bash: ls /tmp ✓"));
    }

    #[test]
    fn tool_error_marks_summary() {
        let raw = "\
● Running it now.
● Bash(false)
  ⎿  Error: Exit code 1
done";
        let (result, _) = extract_response(raw);
        assert!(result.contains("⎿ Bash: false ✗"), "got: {result}");
    }

    #[test]
    fn box_content_skipped_but_exit_code_reattached() {
        let raw = "\
● Applying the edit.
╭────────╮
│ Error: Exit code 2 │
╰────────╯
wrap up";
        let (result, _) = extract_response(raw);
        assert!(!result.contains('╭'));
        assert!(result.contains("Error: Exit code 2"));
    }

    #[test]
    fn diff_blocks_are_skipped() {
        let raw = "\
● Editing the file.
╌╌╌╌╌╌╌╌
10 + added line
╌╌╌╌╌╌╌╌
after the diff";
        let (result, _) = extract_response(raw);
        assert!(!result.contains("added line"));
        assert!(result.contains("after the diff"));
    }

    #[test]
    fn reply_stops_at_user_prompt_echo() {
        let raw = "\
● The answer is 4.
> [User] what about 5?";
        let (result, _) = extract_response(raw);
        assert_eq!(result, "The answer is 4.");
    }

    #[test]
    fn long_tool_args_truncated() {
        let args = "a".repeat(80);
        let cleaned = clean_tool_args(&args);
        assert_eq!(cleaned.chars().count(), 50);
        assert!(cleaned.ends_with("..."));
    }

    #[test]
    fn prompt_ready_checks_last_lines() {
        assert!(prompt_ready("● reply\n> \nfooter line"));
        assert!(prompt_ready("● reply\n>"));
        assert!(!prompt_ready("● reply\nstill working"));
    }

    #[test]
    fn confirmation_context_between_rule_and_prompt() {
        let raw = "\
● Creating the file.
──────────────────────
Create file
notes.txt
Do you want to create notes.txt?
❯ 1. Yes
  2. No";
        let context = extract_confirmation_context(raw);
        assert_eq!(context, "Create file\nnotes.txt");
    }

    #[test]
    fn confirmation_context_fallback_to_bullet() {
        let raw = "\
● Write(notes.txt)
some detail
Do you want to proceed?
1. Yes";
        let context = extract_confirmation_context(raw);
        assert!(context.starts_with("● Write(notes.txt)"));
        assert!(context.contains("some detail"));
    }

    #[test]
    fn confirmation_context_without_prompt_uses_fallback() {
        assert_eq!(
            extract_confirmation_context("● nothing pending"),
            "Action pending confirmation"
        );
    }

    #[test]
    fn marker_state_counts_bullets() {
        let raw = "● one\ntext\n● two";
        let (_, idx) = extract_response(raw);
        let (line, count) = marker_state(raw, idx);
        assert_eq!(line, "● two");
        assert_eq!(count, 2);
    }

    #[test]
    fn menu_options_are_noise() {
        assert!(is_noise("❯ 1. Yes"));
        assert!(is_noise("2. No"));
        assert!(is_noise("3. Type here"));
        assert!(!is_noise("1. First item of a list"));
    }
}
