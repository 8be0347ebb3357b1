//! CLI command handlers.

pub mod chat;
