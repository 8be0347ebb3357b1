//! Debate coordinator.
//!
//! Owns the conversation log and per-backend last-seen cursors, routes
//! user turns to the chosen backend, streams reply updates as events, and
//! mediates tool approvals, including chains, where each approved step's
//! completion data arrives smuggled inside the next confirmation.

use std::collections::HashMap;

use futures_util::StreamExt;

use crate::config::DebateConfig;
use crate::core::events::{DebateEvent, EventSender};
use crate::core::routing::{self, Message, Target};
use crate::providers::pane;
use crate::providers::shared::{
    FinishReason, SessionError, SessionReply, ToolInfo, ToolKind, SHELL_OUTPUT_MARKER,
};
use crate::providers::{ClaudeParser, GeminiParser, TmuxBackend};

/// Synthetic notice emitted when an approved step immediately raises the
/// next confirmation; the UI loops back into the approval flow.
pub const CHAINED_CONFIRMATION_NOTICE: &str = "[Another confirmation required]";

/// Caps for the action-context block injected into history.
const ACTION_DIFF_LINE_CAP: usize = 50;
const ACTION_OUTPUT_LINE_CAP: usize = 20;

/// The approval the coordinator is currently blocked on. At most one
/// exists at any time.
#[derive(Debug, Clone)]
pub struct PendingConfirmation {
    pub target: Target,
    pub context: String,
}

pub struct DebateCoordinator {
    config: DebateConfig,
    claude: Option<TmuxBackend>,
    gemini: Option<TmuxBackend>,
    backend_errors: HashMap<Target, String>,
    claude_parser: ClaudeParser,
    gemini_parser: GeminiParser,

    messages: Vec<Message>,
    last_seen_claude: i64,
    last_seen_gemini: i64,

    pending_confirmation: Option<PendingConfirmation>,
    pending_tool_info: Option<ToolInfo>,
    /// Tool summaries accumulated across a confirmation chain, flushed
    /// into the history entry when the chain ends.
    action_contexts: Vec<String>,
}

impl DebateCoordinator {
    /// Coordinator with no backends attached; usable for history-only
    /// operations and as the base for [`attach_backend`].
    ///
    /// [`attach_backend`]: Self::attach_backend
    pub fn new(config: DebateConfig) -> Self {
        Self {
            config,
            claude: None,
            gemini: None,
            backend_errors: HashMap::new(),
            claude_parser: ClaudeParser::new(),
            gemini_parser: GeminiParser::new(),
            messages: Vec::new(),
            last_seen_claude: -1,
            last_seen_gemini: -1,
            pending_confirmation: None,
            pending_tool_info: None,
            action_contexts: Vec::new(),
        }
    }

    /// Starts both CLI backends independently. A failed side is recorded
    /// in `backend_errors` and the coordinator continues with the other.
    pub async fn start(config: DebateConfig) -> Self {
        let mut coordinator = Self::new(config);
        let claude = TmuxBackend::claude(&coordinator.config);
        let gemini = TmuxBackend::gemini(&coordinator.config);

        let (claude_result, gemini_result) = tokio::join!(claude.start(), gemini.start());
        coordinator.install(Target::Claude, claude, claude_result);
        coordinator.install(Target::Gemini, gemini, gemini_result);
        coordinator
    }

    /// Starts and installs one backend (also the injection point for
    /// scripted sessions in tests).
    pub async fn attach_backend(&mut self, target: Target, backend: TmuxBackend) {
        let result = backend.start().await;
        self.install(target, backend, result);
    }

    fn install(&mut self, target: Target, backend: TmuxBackend, result: Result<(), SessionError>) {
        match result {
            Ok(()) => {
                let slot = match target {
                    Target::Claude => &mut self.claude,
                    Target::Gemini => &mut self.gemini,
                };
                *slot = Some(backend);
            }
            Err(err) => {
                tracing::warn!(backend = target.id(), error = %err, "backend failed to start");
                self.backend_errors.insert(target, err.to_string());
            }
        }
    }

    fn backend(&self, target: Target) -> Option<&TmuxBackend> {
        match target {
            Target::Claude => self.claude.as_ref(),
            Target::Gemini => self.gemini.as_ref(),
        }
    }

    fn parse_for(&self, target: Target, raw: &str) -> (String, Option<ToolInfo>) {
        match target {
            Target::Claude => self.claude_parser.parse(raw),
            Target::Gemini => self.gemini_parser.parse(raw),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_seen(&self, target: Target) -> i64 {
        match target {
            Target::Claude => self.last_seen_claude,
            Target::Gemini => self.last_seen_gemini,
        }
    }

    fn set_last_seen(&mut self, target: Target, index: i64) {
        match target {
            Target::Claude => self.last_seen_claude = index,
            Target::Gemini => self.last_seen_gemini = index,
        }
    }

    pub fn backend_error(&self, target: Target) -> Option<&str> {
        self.backend_errors.get(&target).map(String::as_str)
    }

    pub fn has_pending_confirmation(&self) -> bool {
        self.pending_confirmation.is_some()
    }

    pub fn pending_target(&self) -> Option<Target> {
        self.pending_confirmation.as_ref().map(|p| p.target)
    }

    pub fn pending_context(&self) -> Option<&str> {
        self.pending_confirmation.as_ref().map(|p| p.context.as_str())
    }

    pub fn pending_tool_info(&self) -> Option<&ToolInfo> {
        self.pending_tool_info.as_ref()
    }

    pub fn clear_pending_tool_info(&mut self) {
        self.pending_tool_info = None;
    }

    /// Empties the log and resets all cursors. Sessions stay alive.
    pub fn clear_history(&mut self) {
        self.messages.clear();
        self.last_seen_claude = -1;
        self.last_seen_gemini = -1;
        self.action_contexts.clear();
    }

    /// Closes both backend sessions.
    pub async fn close(&mut self) {
        if let Some(backend) = self.claude.take() {
            backend.close().await;
        }
        if let Some(backend) = self.gemini.take() {
            backend.close().await;
        }
    }

    /// Routes a user message.
    ///
    /// With no explicit `target` and no `@` tag in the input, nothing
    /// happens; the caller is expected to show a target selector. A
    /// confirmation terminating the stream parks the turn in
    /// `pending_confirmation`; history is only updated once the approval
    /// resolves.
    pub async fn route_message(
        &mut self,
        user_input: &str,
        target: Option<Target>,
        events: &EventSender,
    ) {
        let (parsed_target, clean_message) = routing::parse_routing_tag(user_input);
        let Some(target) = target.or(parsed_target) else {
            return;
        };

        if self.backend(target).is_none() {
            let detail = self
                .backend_errors
                .get(&target)
                .cloned()
                .unwrap_or_else(|| "not started".to_string());
            events
                .send_important(DebateEvent::Error {
                    message: format!("{} backend is not available: {detail}", target.label()),
                })
                .await;
            return;
        }

        self.push_message(Message::user(clean_message.clone()));

        let context = routing::build_context(
            &self.messages[..self.messages.len() - 1],
            self.last_seen(target),
            self.config.context_limit,
        );
        let prompt = routing::build_prompt(&context, &clean_message);
        tracing::debug!(backend = target.id(), prompt_len = prompt.len(), "routing turn");

        let mut stream = match self.backend(target) {
            Some(backend) => backend.complete_streaming(prompt).await,
            None => return,
        };

        let mut full_response = String::new();
        let mut last_emitted = String::new();

        while let Some(chunk) = stream.next().await {
            if chunk.finish_reason == Some(FinishReason::Confirmation) {
                let context = chunk.content;
                let (_, tool_info) = self.parse_for(target, &context);
                self.pending_tool_info = tool_info;
                self.pending_confirmation = Some(PendingConfirmation { target, context });
                return;
            }

            let is_final = chunk.finish_reason.is_some();
            let clean_content = strip_cursor(&chunk.content).to_string();
            if !clean_content.is_empty() && clean_content != strip_cursor(&full_response) {
                full_response = chunk.content;
                let display = strip_shell_markers(&clean_content).trim().to_string();
                if !display.is_empty() && display != last_emitted {
                    let event = DebateEvent::AssistantText {
                        target,
                        content: display.clone(),
                    };
                    if is_final {
                        events.send_important(event).await;
                    } else {
                        events.send_delta(event);
                    }
                    last_emitted = display;
                }
            }

            if is_final {
                break;
            }
        }

        if !full_response.is_empty() {
            let final_text = strip_shell_markers(strip_cursor(&full_response))
                .trim()
                .to_string();
            if !final_text.is_empty() {
                self.push_message(Message::new(target.into(), final_text));
            }
            self.set_last_seen(target, self.messages.len() as i64 - 1);
        }
    }

    /// Delivers the user's approval decision for the pending confirmation.
    ///
    /// Rejection discards the pending tool (and any chain record) without
    /// touching history. Approval waits for the turn to resolve: either a
    /// final response, or another confirmation (the chained case), which
    /// re-parks the coordinator and notifies the UI to loop.
    pub async fn handle_confirmation(&mut self, approved: bool, events: &EventSender) {
        let Some(pending) = self.pending_confirmation.take() else {
            return;
        };
        let target = pending.target;

        let Some(backend) = self.backend(target) else {
            self.pending_tool_info = None;
            self.action_contexts.clear();
            return;
        };

        if let Err(err) = backend.respond_confirmation(approved).await {
            self.pending_tool_info = None;
            self.action_contexts.clear();
            events
                .send_important(DebateEvent::Error {
                    message: format!("{} confirmation failed: {err}", target.label()),
                })
                .await;
            return;
        }

        if !approved {
            // Rejection output is noise; nothing to wait for.
            self.pending_tool_info = None;
            self.action_contexts.clear();
            return;
        }

        let reply = match self.backend(target) {
            Some(backend) => backend.wait_response().await,
            None => return,
        };

        match reply {
            SessionReply::Confirmation(confirmation) => {
                self.backfill_pending_shell(
                    confirmation.prior_exit_code,
                    confirmation.prior_shell_output.as_deref(),
                    confirmation.prior_result.as_deref(),
                );

                if let Some(info) = self.pending_tool_info.take() {
                    self.action_contexts.push(build_action_context(&info, target));
                    events
                        .send_important(DebateEvent::CliToolResult { tool_info: info })
                        .await;
                }

                let context = confirmation.context;
                let (_, tool_info) = self.parse_for(target, &context);
                self.pending_tool_info = tool_info;
                self.pending_confirmation = Some(PendingConfirmation { target, context });

                events
                    .send_important(DebateEvent::AssistantText {
                        target,
                        content: CHAINED_CONFIRMATION_NOTICE.to_string(),
                    })
                    .await;
            }
            SessionReply::Response(response) => {
                self.backfill_pending_shell(
                    response.exit_code,
                    response.shell_output.as_deref(),
                    Some(&response.content),
                );

                if let Some(info) = self.pending_tool_info.take() {
                    self.action_contexts.push(build_action_context(&info, target));
                    events
                        .send_important(DebateEvent::CliToolResult { tool_info: info })
                        .await;
                }

                // Shell metadata is rendered by the tool-result widget;
                // the text event carries only the cleaned reply.
                let content = strip_shell_markers(&response.content).trim().to_string();

                let ui_content = content.clone();
                let history_content = if self.action_contexts.is_empty() {
                    content
                } else {
                    let actions = self.action_contexts.join("\n\n");
                    self.action_contexts.clear();
                    if content.is_empty() {
                        actions
                    } else {
                        format!("{content}\n\n{actions}")
                    }
                };

                if !history_content.is_empty() {
                    self.push_message(Message::new(target.into(), history_content));
                    self.set_last_seen(target, self.messages.len() as i64 - 1);
                }

                if !ui_content.is_empty() {
                    events
                        .send_important(DebateEvent::AssistantText {
                            target,
                            content: ui_content,
                        })
                        .await;
                }
            }
        }
    }

    /// Completes the pending shell tool with its execution result:
    /// structured fields when the backend supplied them, text scraping as
    /// the fallback.
    fn backfill_pending_shell(
        &mut self,
        exit_code: Option<i32>,
        shell_output: Option<&str>,
        result_text: Option<&str>,
    ) {
        let Some(info) = self.pending_tool_info.as_mut() else {
            return;
        };
        if info.kind != ToolKind::Shell {
            return;
        }

        if let Some(code) = exit_code {
            info.exit_code = Some(code);
        }
        if let Some(output) = shell_output {
            info.shell_output = Some(output.to_string());
        }

        let Some(text) = result_text else {
            return;
        };
        if info.exit_code.is_none() {
            info.exit_code = pane::find_exit_code(text);
        }
        if info.shell_output.is_none() {
            if let Some(output) = scrape_shell_output(text) {
                info.shell_output = Some(output);
            } else {
                let cleaned = remove_exit_trailers(text).trim().to_string();
                if !cleaned.is_empty() {
                    info.shell_output = Some(cleaned);
                }
            }
        }
    }

    fn push_message(&mut self, message: Message) {
        self.messages.push(message);

        let max = self.config.max_messages;
        if self.messages.len() > max {
            let excess = self.messages.len() - max;
            self.messages.drain(..excess);
            for target in Target::all() {
                let adjusted = (self.last_seen(*target) - excess as i64).max(-1);
                self.set_last_seen(*target, adjusted);
            }
        }
    }
}

/// Strips the trailing block-cursor glyph the sessions append to partials.
fn strip_cursor(text: &str) -> &str {
    text.trim_end_matches([' ', '▌'])
}

/// Removes the synthesized shell-output marker (everything from it to the
/// end) and any exit-code trailers from display text.
fn strip_shell_markers(text: &str) -> String {
    let without_marker = match text.find(SHELL_OUTPUT_MARKER) {
        Some(pos) => &text[..pos],
        None => text,
    };
    remove_exit_trailers(without_marker)
}

/// Removes `Command exited with code: N` fragments, case-insensitively.
fn remove_exit_trailers(text: &str) -> String {
    const PATTERN: &str = "command exited with code:";
    let lower = text.to_lowercase();
    let bytes = text.as_bytes();

    let mut out = String::with_capacity(text.len());
    let mut idx = 0;
    while let Some(rel) = lower[idx..].find(PATTERN) {
        let start = idx + rel;
        out.push_str(&text[idx..start]);
        let mut end = start + PATTERN.len();
        while end < bytes.len() && bytes[end] == b' ' {
            end += 1;
        }
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        idx = end;
    }
    out.push_str(&text[idx..]);
    out
}

/// Text after the shell-output marker, up to any exit-code trailer.
fn scrape_shell_output(text: &str) -> Option<String> {
    let pos = text.find(SHELL_OUTPUT_MARKER)?;
    let after = &text[pos + SHELL_OUTPUT_MARKER.len()..];
    let lower = after.to_lowercase();
    let end = lower.find("command exited").unwrap_or(after.len());
    let output = after[..end].trim().to_string();
    (!output.is_empty()).then_some(output)
}

/// One-paragraph summary of a completed tool, injected into history so
/// the *other* backend can read what happened without replaying the
/// opaque CLI UI.
fn build_action_context(info: &ToolInfo, target: Target) -> String {
    let mut lines = vec![format!(
        "[{} ACTION: {} {}]",
        target.id().to_uppercase(),
        info.kind.as_str().to_uppercase(),
        info.file_path
    )];

    for line in info.diff_lines.iter().take(ACTION_DIFF_LINE_CAP) {
        lines.push(format!("{} {}", line.marker.as_char(), line.content));
    }
    if info.diff_lines.len() > ACTION_DIFF_LINE_CAP {
        lines.push(format!(
            "... ({} more lines)",
            info.diff_lines.len() - ACTION_DIFF_LINE_CAP
        ));
    }

    if let Some(output) = &info.shell_output {
        let output_lines: Vec<&str> = output.lines().collect();
        for line in output_lines.iter().take(ACTION_OUTPUT_LINE_CAP) {
            lines.push((*line).to_string());
        }
        if output_lines.len() > ACTION_OUTPUT_LINE_CAP {
            lines.push(format!(
                "... ({} more lines)",
                output_lines.len() - ACTION_OUTPUT_LINE_CAP
            ));
        }
    }

    if let Some(code) = info.exit_code {
        lines.push(format!("Exit: {code}"));
    }

    lines.join("\n")
}
