//! Colored CLI display utilities for runner output.
//!
//! This module provides functions for printing colored, formatted output
//! to the terminal while a run or a one-shot call is in progress.

use std::io::{self, Write};

use chrono::Utc;
use owo_colors::OwoColorize;

use crate::cli::PlanApprovalRequest;
use crate::supervisor::QuestionRequest;

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Truncate a string to at most `max_chars` characters, ending in an
/// ellipsis if anything was cut.
#[must_use]
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else if max_chars <= 3 {
        "...".to_string()
    } else {
        let kept: String = s.chars().take(max_chars - 3).collect();
        format!("{kept}...")
    }
}

/// Print run start information.
pub fn print_run_start(run_id: &str, pid: u32, team: bool) {
    let mode = if team { "team" } else { "single" };
    println!(
        "{} {} pid={}, mode={} {}",
        timestamp().dimmed(),
        "[RUN]".blue().bold(),
        pid,
        mode.cyan(),
        format!("run={}", truncate(run_id, 12)).dimmed()
    );
    let _ = io::stdout().flush();
}

/// Print the session id once it is known.
pub fn print_session(session_id: &str) {
    println!(
        "{} {} session={}",
        timestamp().dimmed(),
        "[SESSION]".blue().bold(),
        session_id.cyan()
    );
    let _ = io::stdout().flush();
}

/// Print a progress line.
pub fn print_progress(text: &str) {
    println!("{} {}", "[PROGRESS]".cyan().bold(), text);
    let _ = io::stdout().flush();
}

/// Print a question from the agent.
pub fn print_question(question: &QuestionRequest) {
    if question.questions.is_empty() {
        println!("{} {}", "[QUESTION]".yellow().bold(), question.input);
    }
    for q in &question.questions {
        println!("{} {}", "[QUESTION]".yellow().bold(), q);
    }
    let _ = io::stdout().flush();
}

/// Print a plan awaiting approval.
pub fn print_plan(request: &PlanApprovalRequest) {
    println!(
        "{} {} {}",
        "[PLAN]".magenta().bold(),
        request.request_id.dimmed(),
        request.plan
    );
    let _ = io::stdout().flush();
}

/// Print a completed run.
pub fn print_complete(result: &str, files: &[String]) {
    println!(
        "{} {} {}",
        timestamp().dimmed(),
        "[DONE]".green().bold(),
        result
    );
    if !files.is_empty() {
        println!(
            "{} {}",
            "[FILES]".green().bold(),
            files.join(", ").dimmed()
        );
    }
    let _ = io::stdout().flush();
}

/// Print text content.
pub fn print_text(text: &str) {
    print!("{text}");
    let _ = io::stdout().flush();
}

/// Print an error message.
pub fn print_error(message: &str) {
    println!("{} {}", "[ERROR]".red().bold(), message);
    let _ = io::stdout().flush();
}
