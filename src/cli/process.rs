//! Claude Code process spawning and control.
//!
//! This module provides a builder for the two ways the CLI is launched
//! (one-shot `-p` calls and long-lived stream-json sessions), the environment
//! sanitation applied to every child, binary path resolution, and the exit
//! status classification shared by the one-shot call and the streaming engine.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

/// Environment variable holding an explicit path to the CLI binary.
pub const BINARY_ENV: &str = "CLAUDE_CLI_PATH";

/// Legacy environment variable naming the CLI binary.
pub const LEGACY_BINARY_ENV: &str = "CLAUDE_BIN";

/// Binary name used when nothing else is configured.
pub const DEFAULT_BINARY: &str = "claude";

/// Model used by one-shot calls unless overridden.
pub const DEFAULT_MODEL: &str = "haiku";

/// Variables that make the CLI believe it runs nested inside another session.
///
/// They are never forwarded to a child.
pub const NESTED_SESSION_ENV: &[&str] = &["CLAUDECODE", "CLAUDE_CODE_ENTRYPOINT"];

/// Marker set on every child so it knows it runs as a supervised subprocess.
pub const SUBPROCESS_ENV: &str = "CLAUDE_RUNNER_SUBPROCESS";

/// Marker enabling multi-agent team support in the child.
pub const TEAM_MODE_ENV: &str = "CLAUDE_CODE_EXPERIMENTAL_AGENT_TEAMS";

/// Exit codes produced when the child itself caught SIGINT or SIGTERM.
pub const GRACEFUL_EXIT_CODES: &[i32] = &[130, 143];

/// Error returned when the CLI process cannot be created at all.
///
/// The message names the resolved binary, the OS error, and how to point the
/// runner at a different binary, so "not installed" reads differently from
/// "ran and failed".
#[derive(thiserror::Error, Debug)]
#[error(
    "failed to spawn {}: {}. Is the Claude CLI installed? Set {BINARY_ENV} or `cli.binary` in the config file to its path",
    binary.display(),
    os_error_text(source)
)]
pub struct SpawnError {
    /// Binary that was resolved and attempted.
    pub binary: PathBuf,
    /// Underlying OS error.
    pub source: std::io::Error,
}

impl SpawnError {
    /// Create a `SpawnError` for the given binary.
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self {
            binary: binary.into(),
            source,
        }
    }

    /// Returns true if the binary does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.source.kind() == std::io::ErrorKind::NotFound
    }

    /// Returns true if the binary exists but cannot be executed.
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        self.source.kind() == std::io::ErrorKind::PermissionDenied
    }
}

/// Render an I/O error with its symbolic errno name when one is available.
///
/// `ENOENT` reads better in an operator-facing message than `os error 2`.
#[must_use]
pub fn os_error_text(err: &std::io::Error) -> String {
    #[cfg(unix)]
    {
        if let Some(code) = err.raw_os_error() {
            return nix::errno::Errno::from_raw(code).to_string();
        }
    }
    err.to_string()
}

/// Resolve the CLI binary from the process environment.
///
/// Priority: explicit override, `CLAUDE_CLI_PATH`, `CLAUDE_BIN`, configured
/// path, then the literal `claude`.
#[must_use]
pub fn resolve_binary(explicit: Option<&Path>, configured: Option<&Path>) -> PathBuf {
    resolve_binary_with(explicit, configured, |key| std::env::var(key).ok())
}

/// Resolve the CLI binary using a custom environment lookup.
#[must_use]
pub fn resolve_binary_with<F>(explicit: Option<&Path>, configured: Option<&Path>, lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    for key in [BINARY_ENV, LEGACY_BINARY_ENV] {
        if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
            return PathBuf::from(value.trim());
        }
    }
    configured.map_or_else(|| PathBuf::from(DEFAULT_BINARY), Path::to_path_buf)
}

/// Remove nested-session markers and tag the child as a subprocess. The
/// team marker is set only in team mode, never inherited.
pub fn sanitize_env(cmd: &mut Command, team_mode: bool) {
    for key in NESTED_SESSION_ENV {
        cmd.env_remove(key);
    }
    cmd.env(SUBPROCESS_ENV, "1");
    if team_mode {
        cmd.env(TEAM_MODE_ENV, "1");
    } else {
        cmd.env_remove(TEAM_MODE_ENV);
    }
}

/// Output format requested from a one-shot call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Plain text on stdout.
    #[default]
    Text,
    /// Line-delimited JSON events on stdout.
    StreamJson,
}

impl OutputFormat {
    fn as_arg(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::StreamJson => "stream-json",
        }
    }
}

#[derive(Debug, Clone)]
enum ProcessKind {
    OneShot {
        prompt: String,
        model: String,
        format: OutputFormat,
    },
    Session {
        team: bool,
    },
}

/// Builder for configuring Claude Code process arguments.
#[derive(Debug, Clone)]
pub struct ClaudeProcessBuilder {
    kind: ProcessKind,
    resume_session: Option<String>,
    working_dir: Option<PathBuf>,
}

impl ClaudeProcessBuilder {
    /// Create a builder for a one-shot `-p` call with text output.
    #[must_use]
    pub fn oneshot(prompt: impl Into<String>) -> Self {
        Self {
            kind: ProcessKind::OneShot {
                prompt: prompt.into(),
                model: DEFAULT_MODEL.to_string(),
                format: OutputFormat::Text,
            },
            resume_session: None,
            working_dir: None,
        }
    }

    /// Create a builder for a bidirectional stream-json session.
    ///
    /// In team mode the single-shot `-p` flag is omitted so the process
    /// stays alive past the first result.
    #[must_use]
    pub fn session(team: bool) -> Self {
        Self {
            kind: ProcessKind::Session { team },
            resume_session: None,
            working_dir: None,
        }
    }

    /// Set the model for a one-shot call. Ignored for sessions.
    #[must_use]
    pub fn model(mut self, name: impl Into<String>) -> Self {
        if let ProcessKind::OneShot { model, .. } = &mut self.kind {
            *model = name.into();
        }
        self
    }

    /// Set the output format for a one-shot call. Ignored for sessions.
    #[must_use]
    pub fn output_format(mut self, value: OutputFormat) -> Self {
        if let ProcessKind::OneShot { format, .. } = &mut self.kind {
            *format = value;
        }
        self
    }

    /// Resume an existing session.
    #[must_use]
    pub fn resume(mut self, session_id: impl Into<String>) -> Self {
        self.resume_session = Some(session_id.into());
        self
    }

    /// Set the working directory for the Claude process.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Returns true for a stream-json session started in team mode.
    #[must_use]
    pub fn is_team(&self) -> bool {
        matches!(self.kind, ProcessKind::Session { team: true })
    }

    /// Returns true for a bidirectional session (stdin is piped).
    #[must_use]
    pub fn is_session(&self) -> bool {
        matches!(self.kind, ProcessKind::Session { .. })
    }

    /// Build the command-line arguments.
    #[must_use]
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        match &self.kind {
            ProcessKind::OneShot {
                prompt,
                model,
                format,
            } => {
                args.push("-p".to_string());
                args.push(prompt.clone());
                args.push("--output-format".to_string());
                args.push(format.as_arg().to_string());
                if *format == OutputFormat::StreamJson {
                    args.push("--verbose".to_string());
                }
                args.push("--model".to_string());
                args.push(model.clone());
            }
            ProcessKind::Session { team } => {
                if !team {
                    args.push("-p".to_string());
                }
                args.extend(
                    [
                        "--output-format",
                        "stream-json",
                        "--input-format",
                        "stream-json",
                        "--verbose",
                        "--dangerously-skip-permissions",
                    ]
                    .map(String::from),
                );
            }
        }

        if let Some(session_id) = &self.resume_session {
            args.push("--resume".to_string());
            args.push(session_id.clone());
        }

        args
    }

    /// Build a ready-to-spawn command for the given binary.
    #[must_use]
    pub fn build_command(&self, binary: &Path) -> Command {
        let mut cmd = Command::new(binary);
        cmd.args(self.build_args())
            .stdin(if self.is_session() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        sanitize_env(&mut cmd, self.is_team());

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        cmd
    }
}

/// A running Claude Code process.
#[derive(Debug)]
pub struct ClaudeProcess {
    child: Child,
}

impl ClaudeProcess {
    /// Spawn a process using the given binary and builder configuration.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process fails to spawn.
    pub fn spawn_with_binary(
        binary: &Path,
        builder: &ClaudeProcessBuilder,
    ) -> Result<Self, SpawnError> {
        let child = builder
            .build_command(binary)
            .spawn()
            .map_err(|e| SpawnError::new(binary, e))?;

        tracing::debug!(
            binary = %binary.display(),
            pid = ?child.id(),
            session = builder.is_session(),
            team = builder.is_team(),
            "Spawned Claude process"
        );

        Ok(Self { child })
    }

    /// Take ownership of the stdin handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// Take ownership of the stdout handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take ownership of the stderr handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Get the process ID, if still running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the process to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting fails.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Send a kill signal without waiting. Safe to call after exit.
    pub fn start_kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(error = %e, "Kill signal not delivered, process likely exited");
        }
    }

    /// Forcefully kill the process and reap it.
    ///
    /// # Errors
    ///
    /// Returns an error if the kill signal cannot be sent.
    pub async fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill().await
    }
}

/// Exit code of a finished process.
///
/// On Unix a death by signal is reported shell-style as `128 + signal`.
#[must_use]
pub fn exit_code(status: &ExitStatus) -> Option<i32> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.code().or_else(|| status.signal().map(|sig| 128 + sig))
    }

    #[cfg(not(unix))]
    {
        status.code()
    }
}

/// Classification of a process exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    /// Exit code 0.
    Success,
    /// The process caught SIGINT or SIGTERM and ended itself.
    Graceful(i32),
    /// Any other exit. `None` when no code is available.
    Failed(Option<i32>),
}

impl ExitClass {
    /// Classify an exit status.
    #[must_use]
    pub fn from_status(status: &ExitStatus) -> Self {
        Self::from_code(exit_code(status))
    }

    /// Classify a raw exit code.
    #[must_use]
    pub fn from_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => Self::Success,
            Some(c) if GRACEFUL_EXIT_CODES.contains(&c) => Self::Graceful(c),
            other => Self::Failed(other),
        }
    }

    /// The underlying exit code, if any.
    #[must_use]
    pub fn code(self) -> Option<i32> {
        match self {
            Self::Success => Some(0),
            Self::Graceful(c) => Some(c),
            Self::Failed(c) => c,
        }
    }
}

impl ExitClass {
    /// Failure message for this exit: `exit N`, followed by stderr when
    /// there is any.
    #[must_use]
    pub fn describe(self, stderr: &str) -> String {
        if stderr.trim().is_empty() {
            format!("exit {self}")
        } else {
            format!("exit {self} — {stderr}")
        }
    }
}

impl fmt::Display for ExitClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code() {
            Some(code) => write!(f, "{code}"),
            None => f.write_str("unknown"),
        }
    }
}
