//! Run accumulator.
//!
//! [`RunState`] folds decoded events into what the run has learned so far
//! and returns the [`Effect`]s the engine turns into callbacks. It holds no
//! I/O, so the whole dispatch table is testable without a process.

use crate::cli::{ClaudeEvent, ExitClass, PlanApprovalRequest, ResultSubtype, ToolUse, TurnResult};
use crate::display::truncate;
use crate::supervisor::{QuestionRequest, RunMode};

/// Progress summaries of assistant text are capped at this many characters.
pub const SUMMARY_MAX_CHARS: usize = 200;

/// Shell commands in progress summaries are capped at this many characters.
pub const COMMAND_MAX_CHARS: usize = 100;

/// Tools that write files.
pub const FILE_TOOLS: &[&str] = &["Write", "Edit", "MultiEdit", "NotebookEdit"];

/// Input keys that carry a file path, in lookup order.
pub const PATH_KEYS: &[&str] = &["file_path", "notebook_path", "path"];

/// Tools that run shell commands.
pub const SHELL_TOOLS: &[&str] = &["Bash"];

/// Tool the agent uses to ask the user a question.
pub const QUESTION_TOOL: &str = "AskUserQuestion";

/// Tool the agent uses to create a team.
pub const TEAM_CREATE_TOOL: &str = "TeamCreate";

/// Result text used when nothing better was seen.
pub const FALLBACK_RESULT: &str = "Task completed";

/// Final status of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Completed {
        /// Result text.
        result: String,
        /// Files touched, in first-seen order.
        files: Vec<String>,
    },
    Failed {
        error: String,
    },
}

impl RunStatus {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Something the engine must do in response to an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Session id learned for the first time.
    SessionStarted(String),
    Progress(String),
    Question(QuestionRequest),
    PlanApproval(PlanApprovalRequest),
    /// A team was created under the requested name.
    TeamCreated(String),
    /// The run reached its terminal outcome.
    Finished(RunStatus),
}

/// Accumulated state of one run.
#[derive(Debug, Clone)]
pub struct RunState {
    mode: RunMode,
    session_id: Option<String>,
    files: Vec<String>,
    last_text: Option<String>,
    result_seen: bool,
    latest_result: Option<String>,
    team_name: Option<String>,
    outcome: Option<RunStatus>,
}

impl RunState {
    #[must_use]
    pub fn new(mode: RunMode) -> Self {
        Self {
            mode,
            session_id: None,
            files: Vec::new(),
            last_text: None,
            result_seen: false,
            latest_result: None,
            team_name: None,
            outcome: None,
        }
    }

    #[must_use]
    pub fn mode(&self) -> RunMode {
        self.mode
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    #[must_use]
    pub fn files(&self) -> &[String] {
        &self.files
    }

    #[must_use]
    pub fn last_text(&self) -> Option<&str> {
        self.last_text.as_deref()
    }

    /// Returns true once a result event was observed.
    #[must_use]
    pub fn result_seen(&self) -> bool {
        self.result_seen
    }

    /// Team name the agent requested, if a team was created.
    #[must_use]
    pub fn team_name(&self) -> Option<&str> {
        self.team_name.as_deref()
    }

    /// Terminal outcome, once reached.
    #[must_use]
    pub fn outcome(&self) -> Option<&RunStatus> {
        self.outcome.as_ref()
    }

    /// Fold one event into the state.
    pub fn apply(&mut self, event: ClaudeEvent) -> Vec<Effect> {
        let mut effects = Vec::new();
        match event {
            ClaudeEvent::Init { session_id } => self.record_session(session_id, &mut effects),
            ClaudeEvent::Assistant(message) => {
                if let Some(text) = message.text.filter(|t| !t.trim().is_empty()) {
                    effects.push(Effect::Progress(truncate(text.trim(), SUMMARY_MAX_CHARS)));
                    self.last_text = Some(text);
                }
                for tool in &message.tool_uses {
                    self.apply_tool(tool, &mut effects);
                }
            }
            ClaudeEvent::ToolUse(tool) => self.apply_tool(&tool, &mut effects),
            ClaudeEvent::PlanApprovalRequest(request) => {
                effects.push(Effect::PlanApproval(request));
            }
            ClaudeEvent::Result(result) => self.apply_result(result, &mut effects),
        }
        effects
    }

    fn record_session(&mut self, session_id: String, effects: &mut Vec<Effect>) {
        if self.session_id.is_none() && !session_id.is_empty() {
            tracing::debug!(%session_id, "Session started");
            self.session_id = Some(session_id.clone());
            effects.push(Effect::SessionStarted(session_id));
        }
    }

    fn apply_tool(&mut self, tool: &ToolUse, effects: &mut Vec<Effect>) {
        let name = tool.name.as_str();

        if FILE_TOOLS.contains(&name) {
            match PATH_KEYS.iter().find_map(|key| tool.str_arg(key)) {
                Some(path) => {
                    if !self.files.iter().any(|f| f == path) {
                        self.files.push(path.to_string());
                    }
                    effects.push(Effect::Progress(format!("{name}: {path}")));
                }
                None => effects.push(Effect::Progress(name.to_string())),
            }
        } else if SHELL_TOOLS.contains(&name) {
            let command = tool.str_arg("command").unwrap_or_default();
            effects.push(Effect::Progress(format!(
                "bash: {}",
                truncate(command, COMMAND_MAX_CHARS)
            )));
        } else if name == QUESTION_TOOL {
            effects.push(Effect::Question(QuestionRequest::from_input(
                &tool.id,
                &tool.input,
            )));
        } else {
            if name == TEAM_CREATE_TOOL {
                self.capture_team(tool, effects);
            }
            effects.push(Effect::Progress(name.to_string()));
        }
    }

    fn capture_team(&mut self, tool: &ToolUse, effects: &mut Vec<Effect>) {
        let Some(team) = tool.str_arg("team_name").or_else(|| tool.str_arg("name")) else {
            tracing::debug!("Team created without a name");
            return;
        };
        if self.team_name.is_some() {
            tracing::debug!(team, "Ignoring additional team creation");
            return;
        }
        tracing::info!(team, "Team created");
        self.team_name = Some(team.to_string());
        effects.push(Effect::TeamCreated(team.to_string()));
    }

    fn apply_result(&mut self, result: TurnResult, effects: &mut Vec<Effect>) {
        if let Some(id) = result.session_id.clone() {
            self.record_session(id, effects);
        }
        self.result_seen = true;

        match result.subtype {
            ResultSubtype::Success => {
                let text = result.result.filter(|t| !t.trim().is_empty());
                if self.mode.is_team() {
                    if text.is_some() {
                        self.latest_result = text;
                    }
                } else {
                    let result = text
                        .or_else(|| self.last_text.clone())
                        .unwrap_or_else(|| FALLBACK_RESULT.to_string());
                    self.finish_with(
                        RunStatus::Completed {
                            result,
                            files: self.files.clone(),
                        },
                        effects,
                    );
                }
            }
            ResultSubtype::Error(subtype) => {
                tracing::warn!(%subtype, "Turn ended with error");
                let error = result
                    .error
                    .or(result.result)
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| "Unknown error".to_string());
                self.finish_with(RunStatus::Failed { error }, effects);
            }
        }
    }

    fn finish_with(&mut self, status: RunStatus, effects: &mut Vec<Effect>) {
        if self.outcome.is_none() {
            self.outcome = Some(status.clone());
            effects.push(Effect::Finished(status));
        }
    }

    /// Decide the outcome after the process exited.
    ///
    /// Returns `None` when the outcome was already reported from the stream.
    pub fn finish(&mut self, exit: ExitClass, killed: bool, stderr: &str) -> Option<RunStatus> {
        if self.outcome.is_some() {
            return None;
        }

        let status = if killed {
            RunStatus::Failed {
                error: "killed by user".to_string(),
            }
        } else {
            match exit {
                ExitClass::Success => self.completed(),
                ExitClass::Graceful(code) if !self.mode.is_team() => {
                    tracing::info!(code, "Claude process interrupted, completing with partial output");
                    self.completed()
                }
                exit => RunStatus::Failed {
                    error: exit.describe(stderr),
                },
            }
        };

        self.outcome = Some(status.clone());
        Some(status)
    }

    /// Consume the state, yielding the terminal outcome. A state that never
    /// reached one completes with what it has.
    #[must_use]
    pub fn into_status(mut self) -> RunStatus {
        match self.outcome.take() {
            Some(status) => status,
            None => self.completed(),
        }
    }

    fn completed(&self) -> RunStatus {
        let result = self
            .latest_result
            .clone()
            .or_else(|| self.last_text.clone())
            .unwrap_or_else(|| FALLBACK_RESULT.to_string());
        RunStatus::Completed {
            result,
            files: self.files.clone(),
        }
    }
}
