//! Core parley library: tmux gateway, pane parsers, session adapters,
//! and the debate coordinator.

pub mod config;
pub mod core;
pub mod providers;

pub use crate::config::DebateConfig;
pub use crate::core::coordinator::DebateCoordinator;
pub use crate::core::events::{create_event_channel, DebateEvent, EventSender};
pub use crate::core::routing::Target;
