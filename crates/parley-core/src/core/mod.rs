//! Core module: UI-agnostic orchestration.
//!
//! This module contains:
//! - `events`: boundary events streamed to the UI
//! - `routing`: targets, `@` tags, conversation log records, context
//! - `coordinator`: the debate coordinator
//! - `approval`: one-shot approval rendezvous with the UI

pub mod approval;
pub mod coordinator;
pub mod events;
pub mod routing;
