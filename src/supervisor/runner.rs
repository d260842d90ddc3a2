//! Streaming runner for orchestrating Claude Code sessions.
//!
//! This module connects the process spawner, line framing, the run
//! accumulator and the team relay. A run owns its subprocess from spawn to
//! exit and reports through the request's callbacks.

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cli::{
    drain_bounded, resolve_binary, ClaudeProcess, ClaudeProcessBuilder, ExitClass, InputBridge,
    LineBuffer, SpawnError, StreamParser, READ_CHUNK_SIZE, STDERR_LIMIT,
};
use crate::config::{RunnerConfig, TeamConfig};
use crate::supervisor::team::{follow_team, TeamWatcher};
use crate::supervisor::{Effect, RunCallbacks, RunMode, RunRequest, RunState, RunStatus};

/// How long to keep reading after a kill before giving up on EOF.
pub const KILL_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Error type for runs that could not start.
#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    /// A child pipe was not captured.
    #[error("Process {0} not available")]
    MissingPipe(&'static str),
}

/// Result of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Session identifier, if the CLI reported one.
    pub session_id: Option<String>,
    pub status: RunStatus,
    /// Team the run created, if any.
    pub team_id: Option<String>,
}

impl RunOutcome {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status.is_completed()
    }
}

/// Runs tasks through a bidirectional stream-json session.
#[derive(Debug, Clone)]
pub struct StreamingRunner {
    binary: Option<PathBuf>,
    configured_binary: Option<PathBuf>,
    team: TeamConfig,
}

impl Default for StreamingRunner {
    fn default() -> Self {
        Self::new(&RunnerConfig::default())
    }
}

impl StreamingRunner {
    #[must_use]
    pub fn new(config: &RunnerConfig) -> Self {
        Self {
            binary: None,
            configured_binary: config.cli.binary.clone(),
            team: config.team.clone(),
        }
    }

    /// Use this binary regardless of environment and config.
    #[must_use]
    pub fn with_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary = Some(path.into());
        self
    }

    /// Run a task to completion.
    ///
    /// Resolves once the subprocess has exited. The outcome is also delivered
    /// through `on_complete` or `on_error`, exactly once.
    ///
    /// # Errors
    ///
    /// Returns `RunError` if the process cannot be started. `on_error` is
    /// called with the same message.
    pub async fn run(&self, request: RunRequest) -> Result<RunOutcome, RunError> {
        let RunRequest {
            task,
            working_dir,
            resume_session,
            mode,
            callbacks,
            kill,
        } = request;

        let mut builder = ClaudeProcessBuilder::session(mode.is_team());
        if let Some(id) = resume_session {
            builder = builder.resume(id);
        }
        if let Some(dir) = working_dir {
            builder = builder.working_dir(dir);
        }
        let binary = resolve_binary(self.binary.as_deref(), self.configured_binary.as_deref());

        let watcher = TeamWatcher::snapshot(&self.team).await;

        let started = ClaudeProcess::spawn_with_binary(&binary, &builder)
            .map_err(RunError::from)
            .and_then(|mut process| {
                let stdin = process.take_stdin().ok_or(RunError::MissingPipe("stdin"))?;
                let stdout = process.take_stdout().ok_or(RunError::MissingPipe("stdout"))?;
                let stderr = process.take_stderr().ok_or(RunError::MissingPipe("stderr"))?;
                Ok((process, stdin, stdout, stderr))
            });
        let (mut process, stdin, mut stdout, stderr) = match started {
            Ok(parts) => parts,
            Err(e) => {
                tracing::error!(error = %e, "Failed to start Claude process");
                if let Some(ref f) = callbacks.on_error {
                    f(&e.to_string());
                }
                return Err(e);
            }
        };

        let pid = process.id().unwrap_or_default();
        let bridge = InputBridge::new(stdin);
        if let Err(e) = bridge.send_user_message(&task).await {
            tracing::warn!(pid, error = %e, "Failed to send task to Claude process");
        }
        if let Some(ref f) = callbacks.on_start {
            f(pid, bridge.clone());
        }
        tracing::info!(pid, team = mode.is_team(), "Run started");

        let stderr_task = tokio::spawn(drain_bounded(stderr, STDERR_LIMIT));
        let mut session = Session {
            state: RunState::new(mode),
            callbacks,
            bridge,
            watcher,
            team_cancel: CancellationToken::new(),
            team_task: None,
        };

        let mut lines = LineBuffer::new();
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        let mut drain_deadline: Option<Instant> = None;

        loop {
            let read = tokio::select! {
                read = stdout.read(&mut buf) => read,
                () = kill.killed(), if drain_deadline.is_none() => {
                    tracing::info!(pid, "Killing Claude process");
                    process.start_kill();
                    drain_deadline = Some(Instant::now() + KILL_DRAIN_GRACE);
                    continue;
                }
                () = sleep_until(drain_deadline) => {
                    tracing::warn!(pid, "No EOF after kill, abandoning output");
                    break;
                }
            };
            match read {
                Ok(0) => break,
                Ok(n) => {
                    for line in lines.push(&buf[..n]) {
                        session.handle_line(&line).await;
                    }
                }
                Err(e) => {
                    tracing::warn!(pid, error = %e, "Failed to read Claude output");
                    break;
                }
            }
        }
        if let Some(tail) = lines.finish() {
            session.handle_line(&tail).await;
        }

        session.team_cancel.cancel();
        let discovered = match session.team_task.take() {
            Some(handle) => handle.await.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Team task failed");
                None
            }),
            None => None,
        };

        session.bridge.close().await;
        let exit = match process.wait().await {
            Ok(status) => ExitClass::from_status(&status),
            Err(e) => {
                tracing::warn!(pid, error = %e, "Failed to wait for Claude process");
                ExitClass::Failed(None)
            }
        };
        let stderr = stderr_task.await.unwrap_or_default();
        tracing::debug!(pid, exit = %exit, stderr_bytes = stderr.text.len(), "Claude process exited");

        if let Some(status) = session.state.finish(exit, kill.is_killed(), &stderr.render()) {
            session.report(&status);
        }

        let team_id = discovered.or_else(|| session.state.team_name().map(str::to_string));
        let session_id = session.state.session_id().map(str::to_string);
        let status = session.state.into_status();
        tracing::info!(
            pid,
            session_id = session_id.as_deref().unwrap_or("unknown"),
            completed = status.is_completed(),
            "Run finished"
        );

        Ok(RunOutcome {
            session_id,
            status,
            team_id,
        })
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Per-run dispatch context.
struct Session {
    state: RunState,
    callbacks: RunCallbacks,
    bridge: InputBridge,
    watcher: TeamWatcher,
    team_cancel: CancellationToken,
    team_task: Option<JoinHandle<Option<String>>>,
}

impl Session {
    async fn handle_line(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        let event = match StreamParser::parse_line(line) {
            Ok(Some(event)) => event,
            Ok(None) => return,
            Err(e) => {
                tracing::trace!(error = %e, "Skipping malformed stream line");
                return;
            }
        };

        for effect in self.state.apply(event) {
            self.perform(effect).await;
        }
    }

    async fn perform(&mut self, effect: Effect) {
        match effect {
            Effect::SessionStarted(id) => {
                if let Some(ref f) = self.callbacks.on_session_id {
                    f(&id);
                }
            }
            Effect::Progress(text) => self.callbacks.progress(&text),
            Effect::Question(question) => {
                if let Some(ref f) = self.callbacks.on_question {
                    f(&question);
                }
            }
            Effect::PlanApproval(request) => {
                if let Some(ref f) = self.callbacks.on_plan_approval {
                    f(&request);
                }
            }
            Effect::TeamCreated(name) => self.start_team(name),
            Effect::Finished(status) => {
                self.report(&status);
                // The CLI keeps reading stdin after a result; closing it lets
                // the process exit.
                self.bridge.close().await;
            }
        }
    }

    fn start_team(&mut self, requested: String) {
        if self.team_task.is_some() {
            return;
        }
        let relay = self.state.mode() == RunMode::Team;
        self.team_task = Some(tokio::spawn(follow_team(
            self.watcher.clone(),
            requested,
            self.bridge.clone(),
            self.callbacks.clone(),
            relay,
            self.team_cancel.clone(),
        )));
    }

    fn report(&self, status: &RunStatus) {
        match status {
            RunStatus::Completed { result, files } => {
                tracing::info!(files = files.len(), "Run completed");
                if let Some(ref f) = self.callbacks.on_complete {
                    f(result, files);
                }
            }
            RunStatus::Failed { error } => {
                tracing::warn!(%error, "Run failed");
                if let Some(ref f) = self.callbacks.on_error {
                    f(error);
                }
            }
        }
    }
}
