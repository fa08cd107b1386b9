#![deny(unsafe_code)]

/// Terminal shell and process wiring.
pub mod app;
/// Conversation screen, streaming pipeline and history paging.
pub mod chat;
/// Settings persistence.
pub mod settings;
