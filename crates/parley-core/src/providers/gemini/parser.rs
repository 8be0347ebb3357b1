//! Parser for Gemini CLI tool output.
//!
//! Gemini draws tool activity in `╭─╮ │ ╰─╯` boxes whose first interior
//! line is `<status-glyph> <ToolName> <args>` (`✓` completed, `✗` failed,
//! `?` pending, `⊷` queued), with numbered diff lines inside:
//!
//! ```text
//! ╭──────────────────────────────────────╮
//! │ ✓  Edit test.py: old => new          │
//! │                                      │
//! │ 36      raise ValueError("Cannot")   │
//! │ 39 +    def power(self, x, y):       │
//! ╰──────────────────────────────────────╯
//! ```
//!
//! Shell output never reaches this parser raw: the session lifts it out of
//! the box into a `__SHELL_OUTPUT__:` marker appended to the extracted
//! reply, which `parse_tool_result` decodes.

use std::path::Path;

use crate::providers::pane;
use crate::providers::shared::{DiffLine, ToolInfo, ToolKind, SHELL_OUTPUT_MARKER};

/// Longest-first so `EditFile` is not read as `Edit` + junk.
const TOOL_NAMES: [&str; 6] = [
    "WriteFile",
    "DeleteFile",
    "ReadFile",
    "EditFile",
    "Shell",
    "Edit",
];

const STATUS_GLYPHS: [char; 4] = ['✓', '✗', '?', '⊷'];

#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiParser;

impl GeminiParser {
    pub fn new() -> Self {
        Self
    }

    /// Parses a pane snapshot into cleaned text plus an optional tool
    /// record. Unrecognized layouts degrade to text; this never fails.
    pub fn parse(&self, raw: &str) -> (String, Option<ToolInfo>) {
        let lines = pane::preprocess(raw);

        let mut text_lines: Vec<String> = Vec::new();
        let mut tool_info: Option<ToolInfo> = None;
        let mut pending: Option<(ToolKind, String)> = None;

        let mut i = 0;
        while i < lines.len() {
            let line = &lines[i];

            if pane::strip_box_sides(line).is_none()
                && let Some((kind, args)) = parse_tool_header(line)
            {
                pending = Some((kind, extract_path(&args)));
                i += 1;
                continue;
            }

            if pane::is_box_start(line) {
                let (box_lines, end_idx) = pane::extract_box(&lines, i);
                if !box_lines.is_empty() {
                    if let Some(parsed) = parse_box(&box_lines) {
                        tool_info = Some(parsed);
                    } else if let Some((kind, path)) = pending.take() {
                        tool_info = Some(build_tool(kind, path, &box_lines));
                    }
                }
                pending = None;
                i = end_idx + 1;
                continue;
            }

            text_lines.push(line.clone());
            i += 1;
        }

        if tool_info.is_none()
            && let Some((kind, path)) = pending.take()
        {
            tool_info = Some(build_tool(kind, path, &text_lines));
        }

        if let Some(info) = tool_info.as_mut() {
            if info.kind == ToolKind::Shell {
                info.exit_code = lines.iter().find_map(|l| pane::find_exit_code(l));
            }
            if info.kind.is_file_tool() && !info.file_path.is_empty() {
                info.is_new_file = !Path::new(&info.file_path).exists();
            }
        }

        (text_lines.join("\n").trim().to_string(), tool_info)
    }

    /// Decodes the `__SHELL_OUTPUT__:` marker (plus exit-code trailer) that
    /// the session synthesizes into extracted replies.
    ///
    /// An implicit failure (command ran, no trailer emitted) reports
    /// `exit_code = None` with the output intact; interpreting that is the
    /// caller's decision.
    pub fn parse_tool_result(&self, content: &str) -> (Option<i32>, Option<String>) {
        let exit_code = pane::find_exit_code(content);

        let output = content.find(SHELL_OUTPUT_MARKER).and_then(|pos| {
            let after = &content[pos + SHELL_OUTPUT_MARKER.len()..];
            let mut collected: Vec<&str> = Vec::new();
            for line in after.lines() {
                let lower = line.to_lowercase();
                if lower.contains("command exited with code:") || lower.contains("error: exit code")
                {
                    break;
                }
                collected.push(line);
            }
            let joined = collected.join("\n").trim().to_string();
            (!joined.is_empty()).then_some(joined)
        });

        (exit_code, output)
    }
}

/// `<status-glyph>? <ToolName> <args>` with args required.
fn parse_tool_header(line: &str) -> Option<(ToolKind, String)> {
    let mut rest = line.trim_start();
    if let Some(first) = rest.chars().next()
        && STATUS_GLYPHS.contains(&first)
    {
        rest = rest[first.len_utf8()..].trim_start();
    }

    for name in TOOL_NAMES {
        if rest.len() > name.len() && rest[..name.len()].eq_ignore_ascii_case(name) {
            let after = &rest[name.len()..];
            if !after.starts_with(char::is_whitespace) {
                continue;
            }
            let args = after.trim();
            if args.is_empty() {
                continue;
            }
            let kind = ToolKind::normalize(name)?;
            return Some((kind, args.to_string()));
        }
    }
    None
}

/// Pulls the file path out of header arguments: `Writing to X`,
/// `path: description`, or the bare path, trimmed of scroll indicators.
fn extract_path(args: &str) -> String {
    const WRITING_TO: &str = "writing to ";
    if args.len() > WRITING_TO.len() && args[..WRITING_TO.len()].eq_ignore_ascii_case(WRITING_TO) {
        return pane::clean_path(&args[WRITING_TO.len()..]);
    }
    if let Some((before, _)) = args.split_once(':') {
        return pane::clean_path(before);
    }
    pane::clean_path(args)
}

fn build_tool(kind: ToolKind, path: String, lines: &[String]) -> ToolInfo {
    let mut info = ToolInfo::new(kind, path);
    if kind != ToolKind::Shell {
        let promote = kind == ToolKind::WriteFile;
        info.diff_lines = extract_diff_from_lines(lines, promote);
    }
    info
}

/// Header-inside-box form.
fn parse_box(box_lines: &[String]) -> Option<ToolInfo> {
    let mut kind = None;
    let mut file_path = String::new();
    let mut description = String::new();
    let mut diff_lines = Vec::new();

    for line in box_lines {
        let stripped = line.trim();
        if stripped.is_empty() {
            continue;
        }

        if let Some((header_kind, args)) = parse_tool_header(stripped) {
            kind = Some(header_kind);
            if let Some((before, after)) = args.split_once(':') {
                file_path = before.trim().to_string();
                description = after.trim().to_string();
            } else {
                file_path = args;
            }
            continue;
        }

        if let Some(diff) = pane::parse_numbered_diff_line(stripped, false) {
            diff_lines.push(diff);
        }
    }

    let kind = kind?;
    if file_path.is_empty() {
        return None;
    }
    let mut info = ToolInfo::new(kind, file_path);
    info.description = description;
    if kind != ToolKind::Shell {
        info.diff_lines = diff_lines;
    }
    Some(info)
}

/// Gemini diffs always carry line numbers; anything else is ignored.
fn extract_diff_from_lines(lines: &[String], promote_context: bool) -> Vec<DiffLine> {
    lines
        .iter()
        .filter_map(|line| {
            let stripped = line.trim();
            if stripped.is_empty() {
                return None;
            }
            pane::parse_numbered_diff_line(stripped, promote_context)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::shared::DiffMarker;

    const WRITEFILE_CONFIRMATION: &str = "\
? WriteFile Writing to /tmp/parley-gemini-missing.txt
╭──────────────────────────────────────╮
│ 1 hello                              │
│ 2 world                              │
╰──────────────────────────────────────╯";

    #[test]
    fn writefile_header_outside_box() {
        let (text, info) = GeminiParser::new().parse(WRITEFILE_CONFIRMATION);
        let info = info.expect("tool info");

        assert_eq!(info.kind, ToolKind::WriteFile);
        assert_eq!(info.file_path, "/tmp/parley-gemini-missing.txt");
        // New-file creation promotes context lines to additions.
        assert_eq!(
            info.diff_lines,
            vec![DiffLine::added("hello"), DiffLine::added("world")]
        );
        assert!(info.is_new_file);
        assert!(!text.contains('╭'));
    }

    #[test]
    fn edit_box_with_header_inside() {
        let raw = "\
╭──────────────────────────────────────╮
│ ✓  Edit test.py: old => new          │
│                                      │
│ 36      raise ValueError(\"Cannot\")   │
│ 39 +    def power(self, x, y):       │
│ 40 +        return x ** y            │
╰──────────────────────────────────────╯";
        let (_, info) = GeminiParser::new().parse(raw);
        let info = info.unwrap();

        assert_eq!(info.kind, ToolKind::Edit);
        assert_eq!(info.file_path, "test.py");
        assert_eq!(info.description, "old => new");
        assert_eq!(info.diff_lines.len(), 3);
        assert_eq!(info.diff_lines[0].marker, DiffMarker::Context);
        assert_eq!(info.diff_lines[1], DiffLine::added("def power(self, x, y):"));
    }

    #[test]
    fn shell_header_keeps_command_and_exit_code() {
        let raw = "\
✓ Shell ls /nonexistent
Command exited with code: 2";
        let (_, info) = GeminiParser::new().parse(raw);
        let info = info.unwrap();

        assert_eq!(info.kind, ToolKind::Shell);
        assert_eq!(info.file_path, "ls /nonexistent");
        assert!(info.diff_lines.is_empty());
        assert_eq!(info.exit_code, Some(2));
    }

    #[test]
    fn scroll_indicator_trimmed_from_path() {
        let raw = "? WriteFile /tmp/some/long/path.txt  ←";
        let (_, info) = GeminiParser::new().parse(raw);
        assert_eq!(info.unwrap().file_path, "/tmp/some/long/path.txt");
    }

    #[test]
    fn plain_reply_has_no_tool() {
        let (text, info) = GeminiParser::new().parse("A haiku:\nline one\nline two");
        assert!(info.is_none());
        assert_eq!(text, "A haiku:\nline one\nline two");
    }

    #[test]
    fn tool_result_decodes_marker_and_exit_code() {
        let content = "Done.\n__SHELL_OUTPUT__:file1\nfile2\nCommand exited with code: 0";
        let (code, output) = GeminiParser::new().parse_tool_result(content);
        assert_eq!(code, Some(0));
        assert_eq!(output.as_deref(), Some("file1\nfile2"));
    }

    #[test]
    fn tool_result_implicit_failure_has_no_exit_code() {
        let content = "__SHELL_OUTPUT__:error: unknown flag";
        let (code, output) = GeminiParser::new().parse_tool_result(content);
        assert_eq!(code, None);
        assert_eq!(output.as_deref(), Some("error: unknown flag"));
    }

    #[test]
    fn tool_result_without_marker() {
        let (code, output) = GeminiParser::new().parse_tool_result("plain reply");
        assert_eq!(code, None);
        assert_eq!(output, None);
    }
}
