//! One-shot approval rendezvous between the coordinator and the UI.
//!
//! One request, exactly one decision. The responder is consumed by the
//! decision, so a second answer is unrepresentable; a decision delivered
//! after the waiter gave up (cancel) is silently dropped. Timeouts are
//! the waiting side's business, not the channel's.

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::providers::shared::{ToolInfo, ToolKind};

/// What the UI shows for a pending approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolArgs {
    /// File edits and writes render as a search/replace block.
    SearchReplace { search: String, replace: String },
    /// Shell proposals render the command text.
    Command { command: String },
    /// Anything the parser could not shape into a diff.
    Raw { context: String },
}

impl ToolArgs {
    /// Derives the approval surface from a parsed tool record.
    pub fn from_tool_info(info: &ToolInfo) -> Self {
        match info.kind {
            ToolKind::Shell => ToolArgs::Command {
                command: info.file_path.clone(),
            },
            ToolKind::WriteFile | ToolKind::Edit if !info.diff_lines.is_empty() => {
                let (search, replace) = info.search_replace_sides();
                ToolArgs::SearchReplace {
                    search: search.join("\n"),
                    replace: replace.join("\n"),
                }
            }
            _ => ToolArgs::Raw {
                context: info.to_raw_context(),
            },
        }
    }
}

/// The UI's answer to an approval request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    Yes,
    /// Approve and allow this tool for the rest of the session. Delivered
    /// to the backend as a plain yes; the allow-list side effect is the
    /// caller's.
    YesAlwaysTool,
    No { reason: Option<String> },
}

impl ApprovalDecision {
    /// What actually goes to the backend CLI.
    pub fn approves(&self) -> bool {
        !matches!(self, ApprovalDecision::No { .. })
    }
}

/// A pending approval handed to the UI.
#[derive(Debug)]
pub struct ApprovalRequest {
    pub tool_name: String,
    pub tool_args: ToolArgs,
    responder: oneshot::Sender<ApprovalDecision>,
}

impl ApprovalRequest {
    /// Creates a request plus the waiter for its decision.
    pub fn new(tool_name: impl Into<String>, tool_args: ToolArgs) -> (Self, ApprovalWaiter) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tool_name: tool_name.into(),
                tool_args,
                responder: tx,
            },
            ApprovalWaiter { rx },
        )
    }

    /// Builds a request from a parsed tool record.
    pub fn for_tool(info: &ToolInfo) -> (Self, ApprovalWaiter) {
        Self::new(info.kind.as_str(), ToolArgs::from_tool_info(info))
    }

    /// Delivers the decision, consuming the request. Returns false when
    /// the waiter is gone (cancelled); the decision is dropped.
    pub fn respond(self, decision: ApprovalDecision) -> bool {
        self.responder.send(decision).is_ok()
    }
}

/// Waits for the single decision of one request.
#[derive(Debug)]
pub struct ApprovalWaiter {
    rx: oneshot::Receiver<ApprovalDecision>,
}

impl ApprovalWaiter {
    /// Resolves to `None` when the request was dropped undecided.
    pub async fn decision(self) -> Option<ApprovalDecision> {
        self.rx.await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::shared::DiffLine;

    #[test]
    fn shell_tool_surfaces_command() {
        let info = ToolInfo::new(ToolKind::Shell, "rm -rf build");
        assert_eq!(
            ToolArgs::from_tool_info(&info),
            ToolArgs::Command {
                command: "rm -rf build".to_string()
            }
        );
    }

    #[test]
    fn edit_with_diff_surfaces_search_replace() {
        let mut info = ToolInfo::new(ToolKind::Edit, "a.rs");
        info.diff_lines = vec![DiffLine::removed("old"), DiffLine::added("new")];

        match ToolArgs::from_tool_info(&info) {
            ToolArgs::SearchReplace { search, replace } => {
                assert_eq!(search, "old");
                assert_eq!(replace, "new");
            }
            other => panic!("expected search/replace, got {other:?}"),
        }
    }

    #[test]
    fn diffless_write_falls_back_to_raw() {
        let info = ToolInfo::new(ToolKind::WriteFile, "a.txt");
        assert!(matches!(
            ToolArgs::from_tool_info(&info),
            ToolArgs::Raw { .. }
        ));
    }

    #[tokio::test]
    async fn one_decision_per_request() {
        let (request, waiter) = ApprovalRequest::new("shell", ToolArgs::Command {
            command: "ls".into(),
        });

        assert!(request.respond(ApprovalDecision::Yes));
        assert_eq!(waiter.decision().await, Some(ApprovalDecision::Yes));
    }

    #[tokio::test]
    async fn late_decision_after_cancel_is_dropped() {
        let (request, waiter) = ApprovalRequest::new("shell", ToolArgs::Command {
            command: "ls".into(),
        });

        drop(waiter);
        assert!(!request.respond(ApprovalDecision::Yes));
    }

    #[tokio::test]
    async fn dropped_request_resolves_to_none() {
        let (request, waiter) = ApprovalRequest::new("shell", ToolArgs::Command {
            command: "ls".into(),
        });

        drop(request);
        assert_eq!(waiter.decision().await, None);
    }

    #[test]
    fn always_tool_counts_as_yes() {
        assert!(ApprovalDecision::Yes.approves());
        assert!(ApprovalDecision::YesAlwaysTool.approves());
        assert!(!ApprovalDecision::No { reason: None }.approves());
    }
}
