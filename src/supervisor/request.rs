//! Inputs to a streaming run: the task, its mode, callbacks and kill switch.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cli::{InputBridge, PlanApprovalRequest};

/// How the subprocess is driven.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunMode {
    /// One task, terminated by the first result event.
    #[default]
    Single,
    /// Multi-turn team session. The run ends only when the process exits.
    Team,
}

impl RunMode {
    /// Returns true for team mode.
    #[must_use]
    pub fn is_team(self) -> bool {
        matches!(self, Self::Team)
    }
}

/// A question the agent asked through its question tool.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionRequest {
    /// Tool call id to answer with `InputBridge::send_tool_result`.
    pub tool_use_id: String,
    /// Question texts, in order.
    pub questions: Vec<String>,
    /// Raw tool input.
    pub input: serde_json::Value,
}

impl QuestionRequest {
    pub(crate) fn from_input(tool_use_id: &str, input: &serde_json::Value) -> Self {
        let questions = input
            .get("questions")
            .and_then(serde_json::Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|q| {
                        q.get("question")
                            .and_then(serde_json::Value::as_str)
                            .or_else(|| q.as_str())
                    })
                    .map(str::to_string)
                    .collect()
            })
            .or_else(|| {
                input
                    .get("question")
                    .and_then(serde_json::Value::as_str)
                    .map(|q| vec![q.to_string()])
            })
            .unwrap_or_default();

        Self {
            tool_use_id: tool_use_id.to_string(),
            questions,
            input: input.clone(),
        }
    }
}

type StartFn = Arc<dyn Fn(u32, InputBridge) + Send + Sync>;
type TextFn = Arc<dyn Fn(&str) + Send + Sync>;
type QuestionFn = Arc<dyn Fn(&QuestionRequest) + Send + Sync>;
type PlanFn = Arc<dyn Fn(&PlanApprovalRequest) + Send + Sync>;
type CompleteFn = Arc<dyn Fn(&str, &[String]) + Send + Sync>;

/// Callbacks invoked during a run. Every callback is optional.
///
/// Callbacks run on the engine task, except `on_progress`, which the team
/// relay also calls from its poller. Keep them short.
#[derive(Clone, Default)]
pub struct RunCallbacks {
    pub(crate) on_start: Option<StartFn>,
    pub(crate) on_session_id: Option<TextFn>,
    pub(crate) on_progress: Option<TextFn>,
    pub(crate) on_question: Option<QuestionFn>,
    pub(crate) on_plan_approval: Option<PlanFn>,
    pub(crate) on_complete: Option<CompleteFn>,
    pub(crate) on_error: Option<TextFn>,
}

impl fmt::Debug for RunCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunCallbacks")
            .field("on_start", &self.on_start.is_some())
            .field("on_session_id", &self.on_session_id.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .field("on_question", &self.on_question.is_some())
            .field("on_plan_approval", &self.on_plan_approval.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl RunCallbacks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once after spawn with the pid and the input bridge.
    #[must_use]
    pub fn on_start(mut self, f: impl Fn(u32, InputBridge) + Send + Sync + 'static) -> Self {
        self.on_start = Some(Arc::new(f));
        self
    }

    /// Called once when the session id is known.
    #[must_use]
    pub fn on_session_id(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_session_id = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_progress(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_question(mut self, f: impl Fn(&QuestionRequest) + Send + Sync + 'static) -> Self {
        self.on_question = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_plan_approval(
        mut self,
        f: impl Fn(&PlanApprovalRequest) + Send + Sync + 'static,
    ) -> Self {
        self.on_plan_approval = Some(Arc::new(f));
        self
    }

    /// Called at most once with the result text and the files touched.
    #[must_use]
    pub fn on_complete(mut self, f: impl Fn(&str, &[String]) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(f));
        self
    }

    /// Called at most once with the failure message.
    #[must_use]
    pub fn on_error(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub(crate) fn progress(&self, text: &str) {
        if let Some(ref f) = self.on_progress {
            f(text);
        }
    }
}

/// Stops a run from any task. Cloneable; killing twice is a no-op.
#[derive(Debug, Clone, Default)]
pub struct KillSwitch {
    token: CancellationToken,
}

impl KillSwitch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the run be killed.
    pub fn kill(&self) {
        if !self.token.is_cancelled() {
            tracing::info!("Kill requested");
        }
        self.token.cancel();
    }

    #[must_use]
    pub fn is_killed(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) async fn killed(&self) {
        self.token.cancelled().await;
    }
}

/// A task to run through the streaming engine.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// First user message.
    pub task: String,
    /// Directory the subprocess runs in.
    pub working_dir: Option<PathBuf>,
    /// Session to resume.
    pub resume_session: Option<String>,
    pub mode: RunMode,
    pub callbacks: RunCallbacks,
    pub kill: KillSwitch,
}

impl RunRequest {
    /// Create a single-mode request with no callbacks.
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            working_dir: None,
            resume_session: None,
            mode: RunMode::Single,
            callbacks: RunCallbacks::default(),
            kill: KillSwitch::new(),
        }
    }

    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn resume(mut self, session_id: impl Into<String>) -> Self {
        self.resume_session = Some(session_id.into());
        self
    }

    #[must_use]
    pub fn mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn callbacks(mut self, callbacks: RunCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Use an existing kill switch, so the caller can keep a clone.
    #[must_use]
    pub fn kill_switch(mut self, kill: KillSwitch) -> Self {
        self.kill = kill;
        self
    }
}
