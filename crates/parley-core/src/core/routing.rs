//! Routing primitives: targets, the conversation log record, `@` tag
//! parsing, and the unseen-messages context builder.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Header that tells the backend it is reading chat history, not a shell
/// transcript.
const CONTEXT_HEADER: &str = "[Chat context, reply to last USER message]";

/// One of the two driven backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Claude,
    Gemini,
}

impl Target {
    pub fn all() -> &'static [Target] {
        &[Target::Claude, Target::Gemini]
    }

    pub fn id(&self) -> &'static str {
        match self {
            Target::Claude => "claude",
            Target::Gemini => "gemini",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Target::Claude => "Claude",
            Target::Gemini => "Gemini",
        }
    }
}

/// Speaker of a conversation log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Claude,
    Gemini,
}

impl Role {
    fn context_label(&self) -> &'static str {
        match self {
            Role::User => "USER said",
            Role::Claude => "CLAUDE said",
            Role::Gemini => "GEMINI said",
        }
    }
}

impl From<Target> for Role {
    fn from(target: Target) -> Self {
        match target {
            Target::Claude => Role::Claude,
            Target::Gemini => Role::Gemini,
        }
    }
}

/// Single entry in the conversation log. Ordering is insertion order and
/// is the sole authority for who-said-what-when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Local>,
    /// Ephemeral entries are excluded from context building.
    #[serde(default)]
    pub ephemeral: bool,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Local::now(),
            ephemeral: false,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn ephemeral(role: Role, content: impl Into<String>) -> Self {
        let mut msg = Self::new(role, content);
        msg.ephemeral = true;
        msg
    }
}

/// Routing tags, short and long form per backend.
pub const ROUTING_TAGS: [(&str, Target); 4] = [
    ("@cc", Target::Claude),
    ("@claude", Target::Claude),
    ("@g", Target::Gemini),
    ("@gemini", Target::Gemini),
];

/// Parses an optional routing tag out of a message.
///
/// A tag is a whitespace-delimited token (`@cc`, `@claude`, `@g`,
/// `@gemini`, case-insensitive). All tag tokens are stripped, the first
/// decides the target, and internal whitespace collapses to single
/// spaces. `None` means "ask the UI to choose", not an error.
pub fn parse_routing_tag(text: &str) -> (Option<Target>, String) {
    let mut target = None;
    let mut kept: Vec<&str> = Vec::new();

    for token in text.split_whitespace() {
        match tag_target(token) {
            Some(tag) => {
                if target.is_none() {
                    target = Some(tag);
                }
            }
            None => kept.push(token),
        }
    }

    (target, kept.join(" "))
}

fn tag_target(token: &str) -> Option<Target> {
    ROUTING_TAGS
        .iter()
        .find(|(tag, _)| token.eq_ignore_ascii_case(tag))
        .map(|(_, target)| *target)
}

/// Builds the chat-context block for `target`: everything strictly after
/// its last-seen cursor, capped to the `limit` most recent entries, with
/// ephemeral messages filtered out. Empty when there is nothing new.
pub fn build_context(messages: &[Message], last_seen_idx: i64, limit: usize) -> String {
    if messages.is_empty() {
        return String::new();
    }

    let first_unseen = (last_seen_idx + 1).max(0) as usize;
    let mut unseen: Vec<&Message> = messages
        .get(first_unseen..)
        .unwrap_or_default()
        .iter()
        .collect();

    if unseen.len() > limit {
        unseen = unseen.split_off(unseen.len() - limit);
    }

    let relevant: Vec<&&Message> = unseen.iter().filter(|m| !m.ephemeral).collect();
    if relevant.is_empty() {
        return String::new();
    }

    let body = relevant
        .iter()
        .map(|m| format!("{} {}", m.role.context_label(), m.content))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!("{CONTEXT_HEADER}\n{body}")
}

/// Assembles the prompt pasted into the backend.
///
/// No colon after `asks`: the interactive CLIs treat a leading
/// `WORD:`-shaped line as a command prefix.
pub fn build_prompt(context: &str, clean_message: &str) -> String {
    if context.is_empty() {
        format!("USER asks {clean_message}")
    } else {
        format!("{context}\nUSER asks {clean_message}")
    }
}
