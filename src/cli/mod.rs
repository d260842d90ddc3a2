//! CLI module for Claude Code process spawning, stream parsing, stdin
//! messaging and one-shot calls.

mod events;
mod input;
mod oneshot;
mod process;
mod stream;

pub use events::*;
pub use input::*;
pub use oneshot::*;
pub use process::*;
pub use stream::*;
