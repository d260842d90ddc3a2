//! Claude Runner - drive the Claude Code CLI as a subprocess.

pub mod cli;
pub mod config;
pub mod display;
pub mod queue;
pub mod supervisor;
