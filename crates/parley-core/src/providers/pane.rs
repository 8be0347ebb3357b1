//! Shared helpers for scanning captured pane text.
//!
//! Both backend parsers consume tmux `capture-pane` output: box-drawing
//! borders, numbered diff lines, exit-code trailers, and (when the pane is
//! itself embedded in another box) an outer `│ … │` wrapper per line.

use crate::providers::shared::{DiffLine, DiffMarker};

/// Splits a raw capture into lines with one outer tmux wrapper removed.
///
/// A line is treated as wrapped when it is enclosed in `│ … │` and the
/// inner text starts with a space or a box corner; genuine single-column
/// box content keeps its borders so the parsers can still see them.
pub fn preprocess(raw: &str) -> Vec<String> {
    raw.trim()
        .lines()
        .map(|raw_line| {
            let stripped = raw_line.trim();
            if let Some(inner) = stripped.strip_prefix('│').and_then(|s| s.strip_suffix('│'))
                && !inner.is_empty()
                && (inner.starts_with(' ') || inner.starts_with('╭') || inner.starts_with('╰'))
            {
                return inner.trim().to_string();
            }
            stripped.to_string()
        })
        .collect()
}

/// `╭───…──╮` (closing corner optional in truncated captures).
pub fn is_box_start(line: &str) -> bool {
    let Some(rest) = line.strip_prefix('╭') else {
        return false;
    };
    let rest = rest.strip_suffix('╮').unwrap_or(rest);
    !rest.is_empty() && rest.chars().all(|c| c == '─')
}

/// `╰───…──╯` (closing corner optional).
pub fn is_box_end(line: &str) -> bool {
    let Some(rest) = line.strip_prefix('╰') else {
        return false;
    };
    let rest = rest.strip_suffix('╯').unwrap_or(rest);
    !rest.is_empty() && rest.chars().all(|c| c == '─')
}

/// Dashed separator Claude draws around inline edit diffs.
pub fn is_edit_separator(line: &str) -> bool {
    line.chars().count() >= 3 && line.chars().all(|c| c == '╌')
}

/// Full-width horizontal rule (confirmation dialogs, turn dividers).
pub fn is_horizontal_rule(line: &str) -> bool {
    line.chars().count() >= 3 && line.chars().all(|c| c == '─')
}

/// Strips `│` borders from a box-interior line, if both are present.
pub fn strip_box_sides(line: &str) -> Option<&str> {
    line.strip_prefix('│')?.strip_suffix('│')
}

/// Parses a numbered diff line: `N + content`, `N - content`, or
/// `N  content` (context). Context lines become additions when
/// `promote_context` is set (pure-insertion file creation).
pub fn parse_numbered_diff_line(line: &str, promote_context: bool) -> Option<DiffLine> {
    let trimmed = line.trim();
    let digits = trimmed.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }

    let rest = &trimmed[digits..];
    let after_spaces = rest.trim_start_matches(' ');

    if let Some(content) = after_spaces.strip_prefix('+') {
        return Some(DiffLine::added(content.trim_start_matches(' ')));
    }
    if let Some(content) = after_spaces.strip_prefix('-') {
        return Some(DiffLine::removed(content.trim_start_matches(' ')));
    }

    // Context requires at least one space between the number and content.
    if rest.starts_with(' ') {
        let marker = if promote_context {
            DiffMarker::Added
        } else {
            DiffMarker::Context
        };
        return Some(DiffLine::new(marker, after_spaces));
    }

    None
}

/// Collects the interior of a box starting at `start_idx` (a `╭─` line).
///
/// Returns the content lines and the index of the closing border, or of
/// the last line when the capture cut the box off. Border characters may
/// already be gone after [`preprocess`]; bare lines are kept as content.
pub fn extract_box(lines: &[String], start_idx: usize) -> (Vec<String>, usize) {
    let mut box_lines = Vec::new();
    let mut i = start_idx + 1;

    while i < lines.len() {
        let line = lines[i].trim();
        if is_box_end(line) {
            return (box_lines, i);
        }
        if let Some(inner) = strip_box_sides(line) {
            box_lines.push(inner.to_string());
        } else if let Some(inner) = line.strip_prefix('│') {
            box_lines.push(inner.trim_end_matches('│').trim_end().to_string());
        } else {
            box_lines.push(line.to_string());
        }
        i += 1;
    }

    (box_lines, i.saturating_sub(1))
}

const EXIT_PATTERNS: [&str; 2] = ["command exited with code:", "error: exit code"];

/// Scans text for the first exit-code trailer, case-insensitively.
///
/// Recognizes both backends' spellings: `Command exited with code: N` and
/// `Error: Exit code N`.
pub fn find_exit_code(text: &str) -> Option<i32> {
    let lower = text.to_lowercase();
    let after = first_exit_pattern_end(&lower)?;
    let digits: String = lower[after..]
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

fn first_exit_pattern_end(lower: &str) -> Option<usize> {
    EXIT_PATTERNS
        .iter()
        .filter_map(|p| lower.find(p).map(|pos| (pos, pos + p.len())))
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, end)| end)
}

/// Strips trailing whitespace and an optional scroll-indicator glyph (`←`)
/// that Gemini pads long paths with.
pub fn clean_path(path: &str) -> String {
    let trimmed = path.trim_end();
    let trimmed = trimmed.strip_suffix('←').unwrap_or(trimmed);
    trimmed.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preprocess_strips_outer_wrapper_only() {
        let raw = "│ ✦ Hello there │\n│ ╭────╮ │\nplain line";
        let lines = preprocess(raw);
        assert_eq!(lines[0], "✦ Hello there");
        assert_eq!(lines[1], "╭────╮");
        assert_eq!(lines[2], "plain line");
    }

    #[test]
    fn preprocess_keeps_tight_box_content() {
        // No leading space after the border: not a tmux wrapper.
        let lines = preprocess("│✓ Shell ls│");
        assert_eq!(lines[0], "│✓ Shell ls│");
    }

    #[test]
    fn box_borders_detected() {
        assert!(is_box_start("╭──────╮"));
        assert!(is_box_start("╭──────"));
        assert!(!is_box_start("╭╮"));
        assert!(is_box_end("╰──────╯"));
        assert!(!is_box_end("──────"));
        assert!(is_edit_separator("╌╌╌╌╌╌"));
        assert!(!is_edit_separator("╌╌"));
        assert!(is_horizontal_rule("─────"));
    }

    #[test]
    fn numbered_diff_lines_parse() {
        assert_eq!(
            parse_numbered_diff_line("39 +     def power(self, x, y):", false),
            Some(DiffLine::added("def power(self, x, y):"))
        );
        assert_eq!(
            parse_numbered_diff_line("12 - removed()", false),
            Some(DiffLine::removed("removed()"))
        );
        assert_eq!(
            parse_numbered_diff_line("36           raise ValueError", false),
            Some(DiffLine::context("raise ValueError"))
        );
        assert_eq!(
            parse_numbered_diff_line("1  hello", true),
            Some(DiffLine::added("hello"))
        );
        assert_eq!(parse_numbered_diff_line("not a diff", false), None);
        assert_eq!(parse_numbered_diff_line("42", false), None);
    }

    #[test]
    fn exit_code_both_spellings() {
        assert_eq!(find_exit_code("Command exited with code: 2"), Some(2));
        assert_eq!(find_exit_code("  ⎿  Error: Exit code 127"), Some(127));
        assert_eq!(find_exit_code("error: exit code 1"), Some(1));
        assert_eq!(find_exit_code("all good"), None);
    }

    #[test]
    fn exit_code_takes_first_match() {
        let text = "Command exited with code: 3\nError: Exit code 9";
        assert_eq!(find_exit_code(text), Some(3));
    }

    #[test]
    fn clean_path_strips_scroll_indicator() {
        assert_eq!(clean_path("/tmp/test.py  ←  "), "/tmp/test.py");
        assert_eq!(clean_path("/tmp/test.py"), "/tmp/test.py");
    }
}
