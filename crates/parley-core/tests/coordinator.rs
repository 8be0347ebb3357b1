//! Coordinator scenarios driven end-to-end through the streaming bridge
//! with a scripted session standing in for the CLI backends.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use parley_core::config::DebateConfig;
use parley_core::core::coordinator::{DebateCoordinator, CHAINED_CONFIRMATION_NOTICE};
use parley_core::core::events::{create_event_channel, DebateEvent, DebateEventRx, EventSender};
use parley_core::core::routing::{Role, Target};
use parley_core::providers::{
    CliSession, OnUpdate, ParsedConfirmation, ParsedResponse, SessionError, SessionReply,
    TmuxBackend, ToolKind,
};

/// One scripted `ask` turn: partial updates, then the reply.
struct AskTurn {
    partials: Vec<&'static str>,
    reply: Result<SessionReply, SessionError>,
}

#[derive(Default)]
struct ScriptedSession {
    start_error: Mutex<Option<SessionError>>,
    asks: Mutex<VecDeque<AskTurn>>,
    waits: Mutex<VecDeque<Result<SessionReply, SessionError>>>,
    prompts: Mutex<Vec<String>>,
    decisions: Mutex<Vec<bool>>,
}

impl ScriptedSession {
    fn failing_start(error: SessionError) -> Self {
        let session = Self::default();
        *session.start_error.lock().unwrap() = Some(error);
        session
    }

    fn push_ask(&self, partials: Vec<&'static str>, reply: SessionReply) {
        self.asks
            .lock()
            .unwrap()
            .push_back(AskTurn {
                partials,
                reply: Ok(reply),
            });
    }

    fn push_wait(&self, reply: SessionReply) {
        self.waits.lock().unwrap().push_back(Ok(reply));
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    fn decisions(&self) -> Vec<bool> {
        self.decisions.lock().unwrap().clone()
    }
}

impl CliSession for ScriptedSession {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn start(&self) -> Result<(), SessionError> {
        match self.start_error.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn ask(
        &self,
        prompt: &str,
        _timeout: Duration,
        on_update: Option<OnUpdate<'_>>,
    ) -> Result<SessionReply, SessionError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let turn = self
            .asks
            .lock()
            .unwrap()
            .pop_front()
            .expect("unscripted ask");
        if let Some(cb) = on_update {
            for partial in &turn.partials {
                cb(partial);
            }
        }
        turn.reply
    }

    fn respond_confirmation(&self, approve: bool) -> Result<(), SessionError> {
        self.decisions.lock().unwrap().push(approve);
        Ok(())
    }

    fn wait_response(
        &self,
        _timeout: Duration,
        _on_update: Option<OnUpdate<'_>>,
    ) -> Result<SessionReply, SessionError> {
        self.waits
            .lock()
            .unwrap()
            .pop_front()
            .expect("unscripted wait_response")
    }

    fn interrupt(&self) -> Result<(), SessionError> {
        Ok(())
    }

    fn close(&self) {}
}

async fn coordinator_with(
    claude: Option<Arc<ScriptedSession>>,
    gemini: Option<Arc<ScriptedSession>>,
) -> DebateCoordinator {
    let config = DebateConfig::default();
    let mut coordinator = DebateCoordinator::new(config.clone());
    if let Some(session) = claude {
        let backend = TmuxBackend::new(session, config.turn_timeout);
        coordinator.attach_backend(Target::Claude, backend).await;
    }
    if let Some(session) = gemini {
        let backend = TmuxBackend::new(session, config.turn_timeout);
        coordinator.attach_backend(Target::Gemini, backend).await;
    }
    coordinator
}

fn drain(rx: &mut DebateEventRx) -> Vec<DebateEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event.as_ref().clone());
    }
    events
}

fn response(content: &str) -> SessionReply {
    SessionReply::Response(ParsedResponse::text(content))
}

#[tokio::test(flavor = "multi_thread")]
async fn tagged_turn_streams_and_advances_cursor() {
    // S1: empty log, user sends `@g write a haiku`.
    let gemini = Arc::new(ScriptedSession::default());
    gemini.push_ask(
        vec!["Autumn ▌", "Autumn leaves ▌"],
        response("Autumn leaves"),
    );

    let mut c = coordinator_with(None, Some(Arc::clone(&gemini))).await;
    let (tx, mut rx) = create_event_channel();
    let sender = EventSender::new(tx);

    c.route_message("@g write a haiku", None, &sender).await;

    assert_eq!(gemini.prompts(), vec!["USER asks write a haiku"]);

    let events = drain(&mut rx);
    let texts: Vec<&str> = events
        .iter()
        .map(|e| match e {
            DebateEvent::AssistantText { content, .. } => content.as_str(),
            other => panic!("unexpected event {other:?}"),
        })
        .collect();
    // Cursor glyph stripped; each delta carries the full latest text.
    assert_eq!(texts, vec!["Autumn", "Autumn leaves"]);

    assert_eq!(c.messages().len(), 2);
    assert_eq!(c.messages()[0].role, Role::User);
    assert_eq!(c.messages()[0].content, "write a haiku");
    assert_eq!(c.messages()[1].role, Role::Gemini);
    assert_eq!(c.messages()[1].content, "Autumn leaves");
    assert_eq!(c.last_seen(Target::Gemini), 1);
    assert_eq!(c.last_seen(Target::Claude), -1);
}

#[tokio::test(flavor = "multi_thread")]
async fn second_turn_carries_unseen_context() {
    // S2: after a Gemini turn, `@cc improve it` hands Claude the context
    // it has not seen.
    let gemini = Arc::new(ScriptedSession::default());
    gemini.push_ask(vec![], response("haiku text"));
    let claude = Arc::new(ScriptedSession::default());
    claude.push_ask(vec![], response("improved haiku"));

    let mut c = coordinator_with(Some(Arc::clone(&claude)), Some(Arc::clone(&gemini))).await;
    let (tx, mut rx) = create_event_channel();
    let sender = EventSender::new(tx);

    c.route_message("@g write a haiku", None, &sender).await;
    c.route_message("@cc improve it", None, &sender).await;
    drain(&mut rx);

    assert_eq!(
        claude.prompts(),
        vec![
            "[Chat context, reply to last USER message]\n\
             USER said write a haiku\n\n\
             GEMINI said haiku text\n\
             USER asks improve it"
        ]
    );
    assert_eq!(c.last_seen(Target::Claude), 3);
    assert_eq!(c.last_seen(Target::Gemini), 1);
}

const WRITEFILE_CONTEXT: &str = "\
? WriteFile Writing to /tmp/parley-scenario-missing.txt
╭──────────────╮
│ 1 hello      │
╰──────────────╯";

#[tokio::test(flavor = "multi_thread")]
async fn confirmation_parks_turn_and_approval_resolves_it() {
    // S3: WriteFile confirmation, approved, single response.
    let gemini = Arc::new(ScriptedSession::default());
    gemini.push_ask(
        vec![],
        SessionReply::Confirmation(ParsedConfirmation::new(WRITEFILE_CONTEXT)),
    );
    gemini.push_wait(response("Done."));

    let mut c = coordinator_with(None, Some(Arc::clone(&gemini))).await;
    let (tx, mut rx) = create_event_channel();
    let sender = EventSender::new(tx);

    c.route_message("@g create the file", None, &sender).await;

    // Turn is parked: only the user message is in the log.
    assert_eq!(c.messages().len(), 1);
    assert!(c.has_pending_confirmation());
    assert_eq!(c.pending_target(), Some(Target::Gemini));
    let info = c.pending_tool_info().expect("parsed tool info");
    assert_eq!(info.kind, ToolKind::WriteFile);
    assert_eq!(info.file_path, "/tmp/parley-scenario-missing.txt");
    assert!(info.is_new_file);
    assert!(drain(&mut rx).is_empty());

    c.handle_confirmation(true, &sender).await;

    assert_eq!(gemini.decisions(), vec![true]);
    assert!(!c.has_pending_confirmation());

    let events = drain(&mut rx);
    assert_eq!(events.len(), 2);
    assert!(matches!(
        &events[0],
        DebateEvent::CliToolResult { tool_info } if tool_info.kind == ToolKind::WriteFile
    ));
    assert!(matches!(
        &events[1],
        DebateEvent::AssistantText { content, .. } if content == "Done."
    ));

    // UI content stays lean; history carries the action context.
    assert_eq!(c.messages().len(), 2);
    assert_eq!(
        c.messages()[1].content,
        "Done.\n\n[GEMINI ACTION: WRITE_FILE /tmp/parley-scenario-missing.txt]\n+ hello"
    );
    assert_eq!(c.last_seen(Target::Gemini), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_confirmation_discards_pending_tool() {
    let gemini = Arc::new(ScriptedSession::default());
    gemini.push_ask(
        vec![],
        SessionReply::Confirmation(ParsedConfirmation::new(WRITEFILE_CONTEXT)),
    );

    let mut c = coordinator_with(None, Some(Arc::clone(&gemini))).await;
    let (tx, mut rx) = create_event_channel();
    let sender = EventSender::new(tx);

    c.route_message("@g create the file", None, &sender).await;
    c.handle_confirmation(false, &sender).await;

    assert_eq!(gemini.decisions(), vec![false]);
    assert_eq!(c.messages().len(), 1);
    assert!(c.pending_tool_info().is_none());
    assert!(!c.has_pending_confirmation());
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn chained_confirmations_emit_one_event_per_tool() {
    // S4: two chained shell approvals; one history message with both
    // action contexts.
    let claude = Arc::new(ScriptedSession::default());
    claude.push_ask(
        vec![],
        SessionReply::Confirmation(ParsedConfirmation::new(
            "● Bash(ls)\nDo you want to run ls?",
        )),
    );
    claude.push_wait(SessionReply::Confirmation(ParsedConfirmation {
        context: "● Bash(echo done)\nDo you want to run echo?".to_string(),
        prior_result: None,
        prior_exit_code: Some(0),
        prior_shell_output: Some("file1\nfile2".to_string()),
    }));
    claude.push_wait(SessionReply::Response(ParsedResponse {
        content: String::new(),
        exit_code: Some(0),
        shell_output: Some("done".to_string()),
    }));

    let mut c = coordinator_with(Some(Arc::clone(&claude)), None).await;
    let (tx, mut rx) = create_event_channel();
    let sender = EventSender::new(tx);

    c.route_message("@cc run ls then echo", None, &sender).await;
    let info = c.pending_tool_info().expect("first pending tool");
    assert_eq!(info.kind, ToolKind::Shell);
    assert_eq!(info.file_path, "ls");

    // First approval: completed tool event + chained notice, new pending.
    c.handle_confirmation(true, &sender).await;
    let events = drain(&mut rx);
    assert_eq!(events.len(), 2);
    match &events[0] {
        DebateEvent::CliToolResult { tool_info } => {
            assert_eq!(tool_info.file_path, "ls");
            assert_eq!(tool_info.exit_code, Some(0));
            assert_eq!(tool_info.shell_output.as_deref(), Some("file1\nfile2"));
        }
        other => panic!("expected tool result, got {other:?}"),
    }
    assert!(matches!(
        &events[1],
        DebateEvent::AssistantText { content, .. } if content == CHAINED_CONFIRMATION_NOTICE
    ));
    assert!(c.has_pending_confirmation());
    assert_eq!(
        c.pending_tool_info().map(|i| i.file_path.as_str()),
        Some("echo done")
    );
    assert_eq!(c.messages().len(), 1);

    // Second approval: terminal response; one history entry, two blocks.
    c.handle_confirmation(true, &sender).await;
    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    match &events[0] {
        DebateEvent::CliToolResult { tool_info } => {
            assert_eq!(tool_info.file_path, "echo done");
            assert_eq!(tool_info.exit_code, Some(0));
            assert_eq!(tool_info.shell_output.as_deref(), Some("done"));
        }
        other => panic!("expected tool result, got {other:?}"),
    }

    assert_eq!(c.messages().len(), 2);
    let history = &c.messages()[1].content;
    assert_eq!(
        history,
        "[CLAUDE ACTION: SHELL ls]\nfile1\nfile2\nExit: 0\n\n\
         [CLAUDE ACTION: SHELL echo done]\ndone\nExit: 0"
    );
    assert_eq!(c.last_seen(Target::Claude), 1);
    assert_eq!(claude.decisions(), vec![true, true]);
}

#[tokio::test(flavor = "multi_thread")]
async fn timeout_sentinel_becomes_the_turn_output() {
    let gemini = Arc::new(ScriptedSession::default());
    gemini.push_ask(vec![], response("⚠️ Timeout"));

    let mut c = coordinator_with(None, Some(gemini)).await;
    let (tx, mut rx) = create_event_channel();
    let sender = EventSender::new(tx);

    c.route_message("@g anything", None, &sender).await;

    let events = drain(&mut rx);
    assert!(matches!(
        &events[..],
        [DebateEvent::AssistantText { content, .. }] if content == "⚠️ Timeout"
    ));
    assert_eq!(c.messages().len(), 2);
    assert_eq!(c.messages()[1].content, "⚠️ Timeout");
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_backend_start_keeps_coordinator_usable() {
    // S6: Claude's start times out; Gemini keeps working.
    let claude = Arc::new(ScriptedSession::failing_start(SessionError::StartTimeout(
        "claude",
    )));
    let gemini = Arc::new(ScriptedSession::default());
    gemini.push_ask(vec![], response("still here"));

    let mut c = coordinator_with(Some(claude), Some(Arc::clone(&gemini))).await;
    let (tx, mut rx) = create_event_channel();
    let sender = EventSender::new(tx);

    assert!(c.backend_error(Target::Claude).is_some());
    assert!(c.backend_error(Target::Gemini).is_none());

    c.route_message("@cc hello", None, &sender).await;
    let events = drain(&mut rx);
    assert!(matches!(&events[..], [DebateEvent::Error { .. }]));
    assert!(c.messages().is_empty());

    c.route_message("@g hello", None, &sender).await;
    assert_eq!(c.messages().len(), 2);
    assert_eq!(c.messages()[1].content, "still here");
}

#[tokio::test(flavor = "multi_thread")]
async fn clear_history_keeps_sessions_usable() {
    let gemini = Arc::new(ScriptedSession::default());
    gemini.push_ask(vec![], response("one"));
    gemini.push_ask(vec![], response("two"));

    let mut c = coordinator_with(None, Some(Arc::clone(&gemini))).await;
    let (tx, mut rx) = create_event_channel();
    let sender = EventSender::new(tx);

    c.route_message("@g first", None, &sender).await;
    c.clear_history();
    assert!(c.messages().is_empty());
    assert_eq!(c.last_seen(Target::Gemini), -1);

    c.route_message("@g second", None, &sender).await;
    drain(&mut rx);

    // The cleared log means no context block on the second turn.
    assert_eq!(gemini.prompts()[1], "USER asks second");
    assert_eq!(c.messages().len(), 2);
    assert_eq!(c.last_seen(Target::Gemini), 1);
}
