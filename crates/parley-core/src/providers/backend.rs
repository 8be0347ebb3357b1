//! Tmux-backed completion backend.
//!
//! Adapts a blocking [`CliSession`] to the async streaming contract the
//! coordinator consumes. Pane capture is a subprocess call, so each call
//! runs the session on a `spawn_blocking` worker; a bounded channel
//! bridges its partial-update callback to the returned chunk stream.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task;
use uuid::Uuid;

use crate::config::DebateConfig;
use crate::providers::claude::ClaudeSession;
use crate::providers::gemini::GeminiSession;
use crate::providers::shared::{
    BackendStream, CliSession, CompletionChunk, ParsedResponse, SessionError, SessionReply,
};

/// Bounded bridge between the worker thread and the chunk stream. Partial
/// chunks are frequent but small; the terminal chunk must always fit.
const CHUNK_CHANNEL_CAPACITY: usize = 64;

pub struct TmuxBackend {
    session: Arc<dyn CliSession>,
    timeout: Duration,
}

impl TmuxBackend {
    pub fn new(session: Arc<dyn CliSession>, timeout: Duration) -> Self {
        Self { session, timeout }
    }

    /// Backend wired to a fresh Claude CLI session.
    pub fn claude(config: &DebateConfig) -> Self {
        let name = format!("claude_{}", session_suffix());
        Self::new(
            Arc::new(ClaudeSession::new(name, config)),
            config.turn_timeout,
        )
    }

    /// Backend wired to a fresh Gemini CLI session.
    pub fn gemini(config: &DebateConfig) -> Self {
        let name = format!("gemini_{}", session_suffix());
        Self::new(
            Arc::new(GeminiSession::new(name, config)),
            config.turn_timeout,
        )
    }

    pub fn backend_name(&self) -> &'static str {
        self.session.name()
    }

    /// Starts the underlying session (creates the tmux session and waits
    /// for the backend's ready prompt).
    pub async fn start(&self) -> Result<(), SessionError> {
        let session = Arc::clone(&self.session);
        run_blocking(move || session.start()).await
    }

    /// Streams a completion: partial chunks carry the full latest reply
    /// text; the terminal chunk bears `Stop` (with the final response
    /// content, timeout sentinel included) or `Confirmation` (with the raw
    /// confirmation context).
    pub async fn complete_streaming(&self, prompt: String) -> BackendStream {
        let (tx, rx) = mpsc::channel::<CompletionChunk>(CHUNK_CHANNEL_CAPACITY);
        let session = Arc::clone(&self.session);
        let timeout = self.timeout;

        task::spawn_blocking(move || {
            let update_tx = tx.clone();
            let on_update = move |text: &str| {
                // A full channel or a gone consumer just drops the delta;
                // the terminal send below is what completes the turn.
                let _ = update_tx.try_send(CompletionChunk::partial(text));
            };

            let reply = session.ask(&prompt, timeout, Some(&on_update));
            let _ = tx.blocking_send(terminal_chunk(reply, session.name()));
        });

        stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (chunk, rx))
        })
        .boxed()
    }

    /// Non-streaming completion.
    pub async fn complete(&self, prompt: String) -> CompletionChunk {
        let session = Arc::clone(&self.session);
        let timeout = self.timeout;
        let name = self.session.name();
        match task::spawn_blocking(move || session.ask(&prompt, timeout, None)).await {
            Ok(reply) => terminal_chunk(reply, name),
            Err(join_err) => {
                tracing::error!(backend = name, error = %join_err, "completion worker failed");
                CompletionChunk::stop("")
            }
        }
    }

    /// Delivers an approval decision to the backend.
    pub async fn respond_confirmation(&self, approve: bool) -> Result<(), SessionError> {
        let session = Arc::clone(&self.session);
        run_blocking(move || session.respond_confirmation(approve)).await
    }

    /// Waits for the turn to resolve after an approval. Session errors
    /// become a user-visible sentinel response rather than tearing down
    /// the coordinator.
    pub async fn wait_response(&self) -> SessionReply {
        let session = Arc::clone(&self.session);
        let timeout = self.timeout;
        let name = self.session.name();
        match task::spawn_blocking(move || session.wait_response(timeout, None)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => SessionReply::Response(ParsedResponse::text(format!("❌ {err}"))),
            Err(join_err) => {
                tracing::error!(backend = name, error = %join_err, "wait worker failed");
                SessionReply::Response(ParsedResponse::default())
            }
        }
    }

    /// Interrupts in-flight generation.
    pub async fn interrupt(&self) -> Result<(), SessionError> {
        let session = Arc::clone(&self.session);
        run_blocking(move || session.interrupt()).await
    }

    /// Crude token estimate; the backends expose no tokenizer and nothing
    /// in the core gates on accuracy.
    pub fn count_tokens(&self, text: &str) -> usize {
        text.chars().count() / 4
    }

    /// Sends the backend's exit command and kills the tmux session.
    pub async fn close(&self) {
        let session = Arc::clone(&self.session);
        let _ = task::spawn_blocking(move || session.close()).await;
    }
}

async fn run_blocking<T: Send + 'static>(
    f: impl FnOnce() -> Result<T, SessionError> + Send + 'static,
) -> Result<T, SessionError> {
    task::spawn_blocking(f)
        .await
        .map_err(|e| SessionError::Command(format!("worker failed: {e}")))?
}

fn session_suffix() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Maps the session's final word into the terminal chunk. Dead-session and
/// missing-tmux failures stay user-visible; anything else is logged and
/// ends the stream with an empty stop chunk.
fn terminal_chunk(reply: Result<SessionReply, SessionError>, backend: &str) -> CompletionChunk {
    match reply {
        Ok(SessionReply::Response(response)) => CompletionChunk::stop(response.content),
        Ok(SessionReply::Confirmation(confirmation)) => {
            CompletionChunk::confirmation(confirmation.context)
        }
        Err(err @ (SessionError::SessionDead | SessionError::MultiplexerMissing)) => {
            CompletionChunk::stop(format!("❌ {err}"))
        }
        Err(err) => {
            tracing::error!(backend, error = %err, "backend runtime error");
            CompletionChunk::stop("")
        }
    }
}
