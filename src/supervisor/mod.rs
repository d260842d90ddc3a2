//! Streaming engine: drives a bidirectional Claude Code session and reports
//! its progress through callbacks.

mod request;
mod runner;
mod state;
mod team;

pub use request::*;
pub use runner::*;
pub use state::*;
pub use team::{InboxMessage, InboxRelay, TeamWatcher, PREVIEW_MAX_CHARS};
