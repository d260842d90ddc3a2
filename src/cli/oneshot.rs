//! One-shot prompt/response calls against the Claude CLI.
//!
//! A one-shot call spawns `claude -p <prompt>`, reads stdout to EOF under a
//! wall-clock or idle deadline, and maps the exit status to a result. The
//! streaming variant asks for stream-json output so it can report the
//! session id and partial text while the call runs.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;

use crate::cli::{
    drain_bounded, resolve_binary, BoundedOutput, ClaudeEvent, ClaudeProcess,
    ClaudeProcessBuilder, ExitClass, LineBuffer, OutputFormat, ResultSubtype, SpawnError,
    StreamParser, DEFAULT_MODEL, READ_CHUNK_SIZE, STDERR_LIMIT,
};
use crate::config::CliConfig;

/// How long a call may run before it is killed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// Total time from spawn to exit.
    WallClock(Duration),
    /// Time since the last byte of output.
    Idle(Duration),
}

impl Deadline {
    /// The configured duration.
    #[must_use]
    pub fn duration(self) -> Duration {
        match self {
            Self::WallClock(d) | Self::Idle(d) => d,
        }
    }
}

impl fmt::Display for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WallClock(d) => write!(f, "timed out after {}ms", d.as_millis()),
            Self::Idle(d) => write!(f, "no output for {}ms (idle timeout)", d.as_millis()),
        }
    }
}

/// Error type for one-shot calls.
#[derive(thiserror::Error, Debug)]
pub enum InvokeError {
    /// The CLI could not be started.
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    /// The deadline passed and the process was killed.
    #[error("claude {deadline}")]
    Timeout {
        /// Deadline that expired.
        deadline: Deadline,
    },
    /// Clean exit without output.
    #[error("empty response")]
    EmptyResponse,
    /// The agent reported a failed turn.
    #[error("agent error: {0}")]
    Agent(String),
    /// Non-zero exit.
    #[error("{}", exit.describe(stderr))]
    Exit {
        /// Exit classification.
        exit: ExitClass,
        /// Captured stderr, bounded.
        stderr: String,
    },
    /// Pipe I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl InvokeError {
    /// Returns true if the call hit its deadline.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true if the CLI could not be started.
    #[must_use]
    pub fn is_spawn(&self) -> bool {
        matches!(self, Self::Spawn(_))
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    /// Model name. Falls back to the client default.
    pub model: Option<String>,
    /// Session to resume.
    pub resume: Option<String>,
    /// Explicit binary path, overriding environment and config.
    pub binary: Option<PathBuf>,
    /// Working directory for the child.
    pub working_dir: Option<PathBuf>,
    /// Deadline. Falls back to the client default.
    pub deadline: Option<Deadline>,
}

impl InvokeOptions {
    /// Create default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the model.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Resume a session.
    #[must_use]
    pub fn resume(mut self, session_id: impl Into<String>) -> Self {
        self.resume = Some(session_id.into());
        self
    }

    /// Override the binary path.
    #[must_use]
    pub fn binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary = Some(path.into());
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set a wall-clock timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Deadline::WallClock(timeout));
        self
    }

    /// Set an idle timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Deadline::Idle(timeout));
        self
    }
}

type TextHook = Box<dyn Fn(&str) + Send + Sync>;

/// Callbacks for the streaming variant.
#[derive(Default)]
pub struct StreamHooks {
    on_session_id: Option<TextHook>,
    on_text: Option<TextHook>,
}

impl StreamHooks {
    /// Create hooks that do nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once with the session id from the `init` event.
    #[must_use]
    pub fn on_session_id(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_session_id = Some(Box::new(f));
        self
    }

    /// Called with every assistant text block.
    #[must_use]
    pub fn on_text(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_text = Some(Box::new(f));
        self
    }
}

/// Reply from the streaming variant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamedReply {
    /// Final text (the result, or the best partial text).
    pub text: String,
    /// Session id reported by the CLI.
    pub session_id: Option<String>,
    /// True if the process ended via SIGINT/SIGTERM and `text` is partial.
    pub cancelled: bool,
}

/// Async seam for anything that answers a prompt.
#[async_trait]
pub trait Completion: Send + Sync {
    /// Answer a prompt.
    ///
    /// # Errors
    ///
    /// Returns `InvokeError` if the call fails.
    async fn complete(&self, prompt: &str, options: &InvokeOptions) -> Result<String, InvokeError>;
}

/// Tries a primary provider and falls back when it timed out or could not
/// start.
pub struct Fallback<P, S> {
    primary: P,
    secondary: S,
}

impl<P, S> Fallback<P, S> {
    /// Combine two providers.
    pub fn new(primary: P, secondary: S) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl<P, S> Completion for Fallback<P, S>
where
    P: Completion,
    S: Completion,
{
    async fn complete(&self, prompt: &str, options: &InvokeOptions) -> Result<String, InvokeError> {
        match self.primary.complete(prompt, options).await {
            Err(e) if e.is_timeout() || e.is_spawn() => {
                tracing::warn!(error = %e, "Primary provider unavailable, using fallback");
                self.secondary.complete(prompt, options).await
            }
            other => other,
        }
    }
}

/// Client for one-shot CLI calls.
#[derive(Debug, Clone)]
pub struct ClaudeCli {
    binary: Option<PathBuf>,
    model: String,
    deadline: Option<Deadline>,
}

impl Default for ClaudeCli {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaudeCli {
    /// Create a client with built-in defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            binary: None,
            model: DEFAULT_MODEL.to_string(),
            deadline: None,
        }
    }

    /// Create a client from the `[cli]` config section.
    #[must_use]
    pub fn from_config(config: &CliConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            model: config.model.clone(),
            deadline: config.deadline(),
        }
    }

    /// Default model for calls that do not name one.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn builder(&self, prompt: &str, options: &InvokeOptions, format: OutputFormat) -> ClaudeProcessBuilder {
        let mut builder = ClaudeProcessBuilder::oneshot(prompt)
            .model(options.model.as_deref().unwrap_or(&self.model))
            .output_format(format);
        if let Some(ref id) = options.resume {
            builder = builder.resume(id.clone());
        }
        if let Some(ref dir) = options.working_dir {
            builder = builder.working_dir(dir.clone());
        }
        builder
    }

    fn spawn(&self, builder: &ClaudeProcessBuilder, options: &InvokeOptions) -> Result<ClaudeProcess, SpawnError> {
        let binary = resolve_binary(options.binary.as_deref(), self.binary.as_deref());
        ClaudeProcess::spawn_with_binary(&binary, builder)
    }

    /// Run a prompt and return the trimmed stdout.
    ///
    /// # Errors
    ///
    /// Returns `InvokeError` on spawn failure, timeout, empty output, or a
    /// non-zero exit.
    pub async fn invoke(&self, prompt: &str, options: &InvokeOptions) -> Result<String, InvokeError> {
        let builder = self.builder(prompt, options, OutputFormat::Text);
        let process = self.spawn(&builder, options)?;
        let deadline = options.deadline.or(self.deadline);

        let mut stdout = Vec::new();
        let finished = drive(process, deadline, |chunk| stdout.extend_from_slice(chunk)).await?;

        match ExitClass::from_status(&finished.status) {
            ExitClass::Success => {
                let text = String::from_utf8_lossy(&stdout).trim().to_string();
                if text.is_empty() {
                    Err(InvokeError::EmptyResponse)
                } else {
                    Ok(text)
                }
            }
            exit => Err(InvokeError::Exit {
                exit,
                stderr: finished.stderr.render(),
            }),
        }
    }

    /// Run a prompt with stream-json output.
    ///
    /// Exit codes 130 and 143 are treated as graceful cancellation: the call
    /// returns whatever text accumulated instead of failing.
    ///
    /// # Errors
    ///
    /// Returns `InvokeError` on spawn failure, timeout, empty output, an
    /// agent-reported error, or a non-graceful non-zero exit.
    pub async fn invoke_streaming(
        &self,
        prompt: &str,
        options: &InvokeOptions,
        hooks: &StreamHooks,
    ) -> Result<StreamedReply, InvokeError> {
        let builder = self.builder(prompt, options, OutputFormat::StreamJson);
        let process = self.spawn(&builder, options)?;
        let deadline = options.deadline.or(self.deadline);

        let mut collector = ReplyCollector::new(hooks);
        let mut lines = LineBuffer::new();
        let finished = drive(process, deadline, |chunk| {
            for line in lines.push(chunk) {
                collector.feed(&line);
            }
        })
        .await?;
        if let Some(tail) = lines.finish() {
            collector.feed(&tail);
        }

        match ExitClass::from_status(&finished.status) {
            ExitClass::Success => collector.into_reply(),
            ExitClass::Graceful(code) => {
                tracing::info!(code, "Claude process interrupted, returning partial output");
                Ok(collector.into_partial())
            }
            exit => Err(InvokeError::Exit {
                exit,
                stderr: finished.stderr.render(),
            }),
        }
    }
}

#[async_trait]
impl Completion for ClaudeCli {
    async fn complete(&self, prompt: &str, options: &InvokeOptions) -> Result<String, InvokeError> {
        self.invoke(prompt, options).await
    }
}

/// Accumulates stream-json events for a one-shot call.
struct ReplyCollector<'a> {
    hooks: &'a StreamHooks,
    session_id: Option<String>,
    texts: Vec<String>,
    result: Option<String>,
    error: Option<String>,
}

impl<'a> ReplyCollector<'a> {
    fn new(hooks: &'a StreamHooks) -> Self {
        Self {
            hooks,
            session_id: None,
            texts: Vec::new(),
            result: None,
            error: None,
        }
    }

    fn feed(&mut self, line: &str) {
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

        match event {
            ClaudeEvent::Init { session_id } => {
                if self.session_id.is_none() {
                    if let Some(ref f) = self.hooks.on_session_id {
                        f(&session_id);
                    }
                    self.session_id = Some(session_id);
                }
            }
            ClaudeEvent::Assistant(message) => {
                if let Some(text) = message.text.filter(|t| !t.trim().is_empty()) {
                    if let Some(ref f) = self.hooks.on_text {
                        f(&text);
                    }
                    self.texts.push(text);
                }
            }
            ClaudeEvent::Result(result) => {
                if self.session_id.is_none() {
                    self.session_id.clone_from(&result.session_id);
                }
                match result.subtype {
                    ResultSubtype::Success => self.result = result.result,
                    ResultSubtype::Error(subtype) => {
                        self.error = Some(result.error.or(result.result).unwrap_or(subtype));
                    }
                }
            }
            ClaudeEvent::ToolUse(_) | ClaudeEvent::PlanApprovalRequest(_) => {}
        }
    }

    fn into_reply(self) -> Result<StreamedReply, InvokeError> {
        if let Some(error) = self.error {
            return Err(InvokeError::Agent(error));
        }
        let text = self
            .result
            .or_else(|| self.texts.last().cloned())
            .map(|t| t.trim().to_string())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(InvokeError::EmptyResponse);
        }
        Ok(StreamedReply {
            text,
            session_id: self.session_id,
            cancelled: false,
        })
    }

    fn into_partial(self) -> StreamedReply {
        let text = self.result.unwrap_or_else(|| self.texts.join("\n"));
        StreamedReply {
            text: text.trim().to_string(),
            session_id: self.session_id,
            cancelled: true,
        }
    }
}

/// Deadline bookkeeping for one call.
struct Clock {
    deadline: Option<Deadline>,
    started: Instant,
    last_activity: Instant,
}

impl Clock {
    fn new(deadline: Option<Deadline>) -> Self {
        let now = Instant::now();
        Self {
            deadline,
            started: now,
            last_activity: now,
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    async fn bound<F: Future>(&self, fut: F) -> Result<F::Output, InvokeError> {
        let Some(deadline) = self.deadline else {
            return Ok(fut.await);
        };
        let at = match deadline {
            Deadline::WallClock(d) => self.started + d,
            Deadline::Idle(d) => self.last_activity + d,
        };
        tokio::time::timeout_at(at.into(), fut)
            .await
            .map_err(|_| InvokeError::Timeout { deadline })
    }
}

struct Finished {
    status: ExitStatus,
    stderr: BoundedOutput,
}

/// Pump stdout into `on_chunk` and wait for exit, all under the deadline.
///
/// On timeout the child is killed before the error is returned.
async fn drive<F>(
    mut process: ClaudeProcess,
    deadline: Option<Deadline>,
    mut on_chunk: F,
) -> Result<Finished, InvokeError>
where
    F: FnMut(&[u8]),
{
    let missing = || std::io::Error::other("child pipe was not captured");
    let mut stdout = process.take_stdout().ok_or_else(missing)?;
    let stderr = process.take_stderr().ok_or_else(missing)?;
    let stderr_task = tokio::spawn(drain_bounded(stderr, STDERR_LIMIT));

    let mut clock = Clock::new(deadline);
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    let outcome: Result<ExitStatus, InvokeError> = async {
        loop {
            let n = clock.bound(stdout.read(&mut buf)).await??;
            if n == 0 {
                break;
            }
            clock.touch();
            on_chunk(&buf[..n]);
        }
        Ok::<_, InvokeError>(clock.bound(process.wait()).await??)
    }
    .await;

    match outcome {
        Ok(status) => {
            let stderr = stderr_task.await.unwrap_or_default();
            tracing::debug!(status = %status, stderr_bytes = stderr.text.len(), "Claude process exited");
            Ok(Finished { status, stderr })
        }
        Err(e) => {
            if let InvokeError::Timeout { deadline } = &e {
                tracing::warn!(%deadline, pid = ?process.id(), "Killing Claude process after deadline");
            }
            if let Err(kill_err) = process.kill().await {
                tracing::debug!(error = %kill_err, "Kill after failure was not delivered");
            }
            stderr_task.abort();
            Err(e)
        }
    }
}
