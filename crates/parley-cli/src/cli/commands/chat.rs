//! Chat command handler: a line-oriented REPL over the debate coordinator.
//!
//! Routes each input line (by `@` tag or an explicit selection), prints
//! the event stream as it arrives, and resolves approval requests against
//! the terminal, honoring a session-wide always-allow set.

use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use parley_core::core::approval::{ApprovalDecision, ApprovalRequest, ToolArgs};
use parley_core::core::coordinator::DebateCoordinator;
use parley_core::core::events::{create_event_channel, DebateEvent, EventSender};
use parley_core::core::routing::Target;
use parley_core::providers::ToolInfo;
use parley_core::DebateConfig;
use tokio::task;

pub async fn run(config: DebateConfig) -> Result<()> {
    println!("Starting backend sessions (this can take a few seconds)...");
    let mut coordinator = DebateCoordinator::start(config).await;

    for target in Target::all() {
        match coordinator.backend_error(*target) {
            Some(error) => println!("⚠ {} unavailable: {error}", target.label()),
            None => println!("✓ {} ready", target.label()),
        }
    }
    println!("Tag messages with @cc/@claude or @g/@gemini. /clear resets history, /quit exits.");

    let (tx, mut rx) = create_event_channel();
    let sender = EventSender::new(tx);

    // Printer task: renders events as they stream in.
    let printer = task::spawn(async move {
        let mut last_rendered = String::new();
        while let Some(event) = rx.recv().await {
            render_event(&event, &mut last_rendered);
        }
    });

    let mut always_allow: HashSet<String> = HashSet::new();

    loop {
        let Some(line) = read_line("\nyou> ").await? else {
            break;
        };
        let input = line.trim().to_string();
        if input.is_empty() {
            continue;
        }

        match input.as_str() {
            "/quit" | "/exit" => break,
            "/clear" => {
                coordinator.clear_history();
                println!("History cleared.");
                continue;
            }
            "/status" => {
                for target in Target::all() {
                    let state = match coordinator.backend_error(*target) {
                        Some(error) => format!("unavailable ({error})"),
                        None => "ready".to_string(),
                    };
                    println!("{}: {state}", target.label());
                }
                println!("messages: {}", coordinator.messages().len());
                continue;
            }
            _ => {}
        }

        // No tag means the user has to pick a target.
        let target = match parley_core::core::routing::parse_routing_tag(&input).0 {
            Some(_) => None,
            None => match select_target().await? {
                Some(target) => Some(target),
                None => continue,
            },
        };

        coordinator.route_message(&input, target, &sender).await;

        // Approval flow, looping while the backend chains confirmations.
        while coordinator.has_pending_confirmation() {
            let decision = resolve_approval(&coordinator, &always_allow).await?;
            let Some(decision) = decision else {
                coordinator.handle_confirmation(false, &sender).await;
                continue;
            };
            if decision == ApprovalDecision::YesAlwaysTool
                && let Some(info) = coordinator.pending_tool_info()
            {
                always_allow.insert(info.kind.as_str().to_string());
            }
            let approved = decision.approves();
            coordinator.handle_confirmation(approved, &sender).await;
        }
    }

    println!("Closing sessions...");
    coordinator.close().await;
    drop(sender);
    let _ = printer.await;
    Ok(())
}

/// Builds the approval request for the pending confirmation, resolves it
/// against the terminal (or the always-allow set), and returns the
/// decision. `None` means the request could not be resolved (treated as
/// rejection by the caller).
async fn resolve_approval(
    coordinator: &DebateCoordinator,
    always_allow: &HashSet<String>,
) -> Result<Option<ApprovalDecision>> {
    let (tool_name, tool_args) = match coordinator.pending_tool_info() {
        Some(info) => (info.kind.as_str().to_string(), ToolArgs::from_tool_info(info)),
        None => (
            "action".to_string(),
            ToolArgs::Raw {
                context: coordinator
                    .pending_context()
                    .unwrap_or("Action pending confirmation")
                    .to_string(),
            },
        ),
    };

    if always_allow.contains(&tool_name) {
        println!("[auto-approved: {tool_name} is allowed this session]");
        return Ok(Some(ApprovalDecision::Yes));
    }

    let (request, waiter) = ApprovalRequest::new(tool_name, tool_args);
    prompt_for_decision(coordinator.pending_tool_info(), request).await?;
    Ok(waiter.decision().await)
}

/// Shows the pending action and reads one decision from the terminal.
async fn prompt_for_decision(info: Option<&ToolInfo>, request: ApprovalRequest) -> Result<()> {
    let target = info.map(|i| i.kind.as_str()).unwrap_or("action");
    println!("\n⚠ Approval required: {target}");
    println!("{}", render_tool_args(&request.tool_args));
    println!("  [y] yes   [a] yes, always allow {} this session   [n] no", request.tool_name);

    let Some(line) = read_line("approve? ").await? else {
        // EOF: drop the request undecided; the waiter sees a rejection.
        return Ok(());
    };

    let decision = match line.trim().to_lowercase().as_str() {
        "y" | "yes" | "1" => ApprovalDecision::Yes,
        "a" | "always" | "2" => ApprovalDecision::YesAlwaysTool,
        other => ApprovalDecision::No {
            reason: other
                .strip_prefix("n ")
                .map(|reason| reason.trim().to_string()),
        },
    };
    request.respond(decision);
    Ok(())
}

async fn select_target() -> Result<Option<Target>> {
    let Some(line) = read_line("send to [c]laude / [g]emini (empty to cancel)? ").await? else {
        return Ok(None);
    };
    Ok(match line.trim().to_lowercase().as_str() {
        "c" | "claude" => Some(Target::Claude),
        "g" | "gemini" => Some(Target::Gemini),
        _ => None,
    })
}

fn render_event(event: &Arc<DebateEvent>, last_rendered: &mut String) {
    match event.as_ref() {
        DebateEvent::AssistantText { target, content } => {
            // Events carry the full latest text; print only what grew,
            // reprint from scratch when the reply was rewritten.
            if let Some(suffix) = content.strip_prefix(last_rendered.as_str()) {
                if last_rendered.is_empty() {
                    print!("\n{}> {suffix}", target.label());
                } else {
                    print!("{suffix}");
                }
            } else {
                print!("\n{}> {content}", target.label());
            }
            let _ = std::io::stdout().flush();
            *last_rendered = content.clone();
        }
        DebateEvent::CliToolResult { tool_info } => {
            last_rendered.clear();
            println!("\n{}", render_tool_result(tool_info));
        }
        DebateEvent::Error { message } => {
            last_rendered.clear();
            eprintln!("\nerror: {message}");
        }
    }
}

fn render_tool_result(info: &ToolInfo) -> String {
    let mut lines = vec![match info.exit_code {
        Some(0) | None => format!("[{} {}]", info.kind, info.file_path),
        Some(code) => format!("[{} {} — exit {code}]", info.kind, info.file_path),
    }];
    if let Some(output) = &info.shell_output {
        lines.extend(output.lines().take(20).map(|l| format!("  {l}")));
    }
    lines.join("\n")
}

fn render_tool_args(args: &ToolArgs) -> String {
    match args {
        ToolArgs::Command { command } => format!("  $ {command}"),
        ToolArgs::SearchReplace { search, replace } => format!(
            "  <<<<<<< SEARCH\n{search}\n  =======\n{replace}\n  >>>>>>> REPLACE"
        ),
        ToolArgs::Raw { context } => context.clone(),
    }
}

/// Reads one line from stdin on a worker thread; `None` on EOF.
async fn read_line(prompt: &str) -> Result<Option<String>> {
    print!("{prompt}");
    std::io::stdout().flush().context("flush stdout")?;

    task::spawn_blocking(|| {
        let mut line = String::new();
        match std::io::stdin().read_line(&mut line) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(line)),
            Err(e) => Err(anyhow::Error::from(e)).context("read stdin"),
        }
    })
    .await
    .context("stdin worker failed")?
}
