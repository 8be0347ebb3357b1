//! Parser for Claude CLI tool output.
//!
//! Claude renders assistant text behind `●` bullets and tool activity in
//! several shapes: `● Write(path)` headers followed by `╭─╮` boxes,
//! `Edit file PATH` headers followed by `╌╌╌` dashed diff blocks,
//! `Overwrite file` / `Create file` dialogs with the path on the first box
//! line, and bare `Bash command` labels with the command on the next line.
//! Diff content is raw code without line numbers (unlike Gemini), so a
//! numbered-line pass runs first and falls back to raw content.

use std::path::Path;

use crate::providers::pane;
use crate::providers::shared::{DiffLine, DiffMarker, ToolInfo, ToolKind};

/// Where a pending header's file path comes from.
enum PathSource {
    Known(String),
    /// `Overwrite file` / `Create file`: the path is the first box line.
    FromBox,
}

struct PendingHeader {
    kind: ToolKind,
    path: PathSource,
    description: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClaudeParser;

impl ClaudeParser {
    pub fn new() -> Self {
        Self
    }

    /// Parses a pane snapshot into cleaned text plus an optional tool
    /// record. Unrecognized layouts degrade to text; this never fails.
    pub fn parse(&self, raw: &str) -> (String, Option<ToolInfo>) {
        let lines = pane::preprocess(raw);

        let mut text_lines: Vec<String> = Vec::new();
        let mut tool_info: Option<ToolInfo> = None;
        let mut pending: Option<PendingHeader> = None;

        let mut i = 0;
        while i < lines.len() {
            let line = &lines[i];

            if let Some(path) = parse_edit_file_header(line) {
                pending = Some(PendingHeader {
                    kind: ToolKind::Edit,
                    path: PathSource::Known(path),
                    description: String::new(),
                });
                i += 1;
                continue;
            }

            if is_file_action_header(line) {
                pending = Some(PendingHeader {
                    kind: ToolKind::WriteFile,
                    path: PathSource::FromBox,
                    description: String::new(),
                });
                i += 1;
                continue;
            }

            // Bare `Bash command` label: command on the next line, free-text
            // description on the one after.
            if is_bash_command_header(line) {
                let command = lines.get(i + 1).map(|l| l.trim()).unwrap_or_default();
                let description = lines.get(i + 2).map(|l| l.trim()).unwrap_or_default();
                let mut info = ToolInfo::new(ToolKind::Shell, command);
                info.description = description.to_string();
                tool_info = Some(info);
                i += 3;
                continue;
            }

            if pane::strip_box_sides(line).is_none()
                && let Some((kind, args)) = parse_tool_header(line)
            {
                pending = Some(resolve_header(kind, &args));
                i += 1;
                continue;
            }

            if pane::is_box_start(line) {
                let (box_lines, end_idx) = pane::extract_box(&lines, i);
                if !box_lines.is_empty() {
                    if let Some(parsed) = parse_box(&box_lines) {
                        tool_info = Some(parsed);
                    } else if let Some(header) = pending.take() {
                        tool_info = Some(build_from_box(header, box_lines));
                    }
                }
                pending = None;
                i = end_idx + 1;
                continue;
            }

            // Dashed separators delimit an inline edit diff.
            if pane::is_edit_separator(line) && pending.is_some() {
                let mut block = Vec::new();
                i += 1;
                while i < lines.len() {
                    if pane::is_edit_separator(&lines[i]) {
                        i += 1;
                        break;
                    }
                    block.push(lines[i].clone());
                    i += 1;
                }
                if let Some(header) = pending.take() {
                    tool_info = Some(build_from_lines(header, &block));
                }
                continue;
            }

            text_lines.push(line.clone());
            i += 1;
        }

        // Header with no box at all: the diff, if any, is in the loose text.
        if tool_info.is_none()
            && let Some(header) = pending.take()
        {
            tool_info = Some(build_from_lines(header, &text_lines));
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

    /// Extracts exit code and output from the first completed `Bash` tool
    /// in the buffer. A second tool stops the scan, so chained commands
    /// report the first result only.
    ///
    /// Error shape:
    /// ```text
    /// ● Bash(command)
    ///   ⎿  Error: Exit code 1
    ///      stderr line
    /// ```
    /// Success shape puts the output inline after `⎿`.
    pub fn parse_tool_result(&self, raw: &str) -> (Option<i32>, Option<String>) {
        let mut exit_code = None;
        let mut output_lines: Vec<&str> = Vec::new();
        let mut in_result = false;
        let mut found_first = false;

        for line in raw.trim().lines() {
            let stripped = line.trim();

            if is_bash_header(stripped) {
                if found_first {
                    break;
                }
                found_first = true;
                continue;
            }

            if found_first && stripped.starts_with('⎿') {
                in_result = true;
                if stripped.contains("Error: Exit code") {
                    exit_code = pane::find_exit_code(stripped);
                } else {
                    let inline = stripped.trim_start_matches('⎿').trim_start();
                    if !inline.is_empty() {
                        output_lines.push(inline);
                    }
                }
                continue;
            }

            if in_result {
                if stripped.is_empty()
                    || stripped.starts_with('●')
                    || stripped.starts_with('>')
                    || stripped.starts_with('─')
                {
                    break;
                }
                // Stderr continuation lines sit under the `⎿` marker.
                if line.starts_with("     ") {
                    output_lines.push(stripped);
                }
            }
        }

        let output = if output_lines.is_empty() {
            None
        } else {
            Some(output_lines.join("\n"))
        };
        (exit_code, output)
    }
}

/// `● Bash(` with optional spaces after the bullet.
fn is_bash_header(stripped: &str) -> bool {
    stripped
        .strip_prefix('●')
        .map(|rest| rest.trim_start().starts_with("Bash("))
        .unwrap_or(false)
}

/// `Edit file PATH`.
fn parse_edit_file_header(line: &str) -> Option<String> {
    let rest = strip_prefix_ignore_case(line, "edit file")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let path = pane::clean_path(rest.trim());
    (!path.is_empty()).then_some(path)
}

/// `Overwrite file` / `Create file` with nothing else on the line.
fn is_file_action_header(line: &str) -> bool {
    let trimmed = line.trim_end();
    trimmed.eq_ignore_ascii_case("overwrite file") || trimmed.eq_ignore_ascii_case("create file")
}

fn is_bash_command_header(line: &str) -> bool {
    line.trim_end().eq_ignore_ascii_case("bash command")
}

/// `● Name(args)` or `Name(args)` where Name is one of Claude's tools.
/// Returns the normalized kind plus the argument text inside the parens.
fn parse_tool_header(line: &str) -> Option<(ToolKind, String)> {
    let trimmed = line.trim_start();
    let rest = trimmed.strip_prefix('●').unwrap_or(trimmed).trim_start();

    for name in ["Write", "Update", "Bash", "Read", "Delete"] {
        if let Some(after) = strip_prefix_ignore_case(rest, name) {
            let after = after.trim_start();
            if let Some(args) = after.strip_prefix('(') {
                let args = args.trim_end();
                let args = args.strip_suffix(')').unwrap_or(args).trim();
                if args.is_empty() {
                    return None;
                }
                let kind = ToolKind::normalize(name)?;
                return Some((kind, args.to_string()));
            }
        }
    }
    None
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    if text.len() >= prefix.len() && text[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&text[prefix.len()..])
    } else {
        None
    }
}

/// Resolves a header-outside-box match into a pending header, applying the
/// `cat > / cat >>` shell reclassification so the approval UI can show a
/// diff instead of a command string.
fn resolve_header(kind: ToolKind, args: &str) -> PendingHeader {
    let (kind, path) = if kind == ToolKind::Shell {
        match parse_cat_redirect(args) {
            Some((redirect_kind, path)) => (redirect_kind, path),
            None => (ToolKind::Shell, pane::clean_path(args)),
        }
    } else if let Some(rest) = strip_prefix_ignore_case(args, "writing to ") {
        (kind, pane::clean_path(rest))
    } else if let Some((before, _)) = args.split_once(':') {
        (kind, pane::clean_path(before))
    } else {
        (kind, pane::clean_path(args))
    };

    PendingHeader {
        kind,
        path: PathSource::Known(path),
        description: String::new(),
    }
}

/// `cat > PATH` becomes a file creation, `cat >> PATH` an edit.
fn parse_cat_redirect(args: &str) -> Option<(ToolKind, String)> {
    let rest = args.strip_prefix("cat")?.trim_start();
    let rest = rest.strip_prefix('>')?;
    let (kind, rest) = match rest.strip_prefix('>') {
        Some(after) => (ToolKind::Edit, after),
        None => (ToolKind::WriteFile, rest),
    };
    let path: String = rest
        .trim_start()
        .chars()
        .take_while(|c| !c.is_whitespace() && *c != '<')
        .collect();
    (!path.is_empty()).then(|| (kind, pane::clean_path(&path)))
}

/// Header-inside-box form: `✓ Edit test.py: old => new` plus numbered
/// diff lines.
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

fn build_from_box(header: PendingHeader, mut box_lines: Vec<String>) -> ToolInfo {
    let file_path = match header.path {
        PathSource::Known(path) => path,
        PathSource::FromBox => {
            // First box line is the file name, not diff content.
            let first = box_lines.first().map(|l| pane::clean_path(l)).unwrap_or_default();
            if !box_lines.is_empty() {
                box_lines.remove(0);
            }
            first
        }
    };

    let promote = header.kind == ToolKind::WriteFile;
    let mut info = ToolInfo::new(header.kind, file_path);
    info.description = header.description;
    if header.kind != ToolKind::Shell {
        info.diff_lines = extract_diff_from_lines(&box_lines, promote);
    }
    info
}

fn build_from_lines(header: PendingHeader, lines: &[String]) -> ToolInfo {
    let file_path = match header.path {
        PathSource::Known(path) => path,
        PathSource::FromBox => String::new(),
    };
    let promote = header.kind == ToolKind::WriteFile;
    let mut info = ToolInfo::new(header.kind, file_path);
    info.description = header.description;
    if header.kind != ToolKind::Shell {
        info.diff_lines = extract_diff_from_lines(lines, promote);
    }
    info
}

/// Diff extraction: numbered lines win when present; otherwise the lines
/// are raw code (Claude omits line numbers), filtered of heredoc and
/// status noise. For a file creation every raw line is an addition.
fn extract_diff_from_lines(lines: &[String], promote_context: bool) -> Vec<DiffLine> {
    let mut numbered = Vec::new();
    for line in lines {
        let stripped = line.trim();
        if stripped.is_empty() {
            continue;
        }
        if let Some(diff) = pane::parse_numbered_diff_line(stripped, promote_context) {
            numbered.push(diff);
        }
    }
    if !numbered.is_empty() {
        return numbered;
    }

    let mut start_idx = 0;
    if let Some(first) = lines.first() {
        let first = first.trim();
        let looks_like_name = (first.contains('.') && !first.contains('/') && first.len() < 100)
            || first.starts_with('/');
        if looks_like_name {
            start_idx = 1;
        }
    }

    let marker = if promote_context {
        DiffMarker::Added
    } else {
        DiffMarker::Context
    };

    lines[start_idx..]
        .iter()
        .filter(|line| {
            let stripped = line.trim();
            !stripped.is_empty() && !is_diff_noise(stripped)
        })
        .map(|line| DiffLine::new(marker, line.trim_end()))
        .collect()
}

/// Lines that belong to Claude's command scaffolding, not file content.
fn is_diff_noise(stripped: &str) -> bool {
    let lower = stripped.to_lowercase();
    lower.starts_with("cat >")
        || lower.starts_with("cat>")
        || lower == "eof"
        || lower.starts_with("<<")
        || stripped.starts_with('⎿')
        || pane::is_horizontal_rule(stripped)
        || lower == "bash command"
        || (lower.starts_with("create ") && lower.ends_with(" file"))
        || lower.starts_with("running")
}
