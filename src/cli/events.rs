//! Event types from Claude Code stream-json output.
//!
//! Lines are decoded at the boundary into the closed [`ClaudeEvent`] set.
//! Shapes the runner does not act on (stream deltas, user echoes, system
//! notices other than `init`) decode to `None` and never travel further.

use serde::Deserialize;

/// Tool use request data.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolUse {
    /// Unique identifier for this tool use. Empty if the CLI omitted it.
    #[serde(default)]
    pub id: String,
    /// Name of the tool being invoked.
    pub name: String,
    /// Tool input parameters.
    #[serde(default)]
    pub input: serde_json::Value,
}

impl ToolUse {
    /// Get a string argument from the tool input.
    #[must_use]
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.input.get(key).and_then(serde_json::Value::as_str)
    }
}

/// Assistant message content.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantMessage {
    /// Concatenated text blocks, if the message carried any text.
    pub text: Option<String>,
    /// Tool-use blocks nested in the message content.
    pub tool_uses: Vec<ToolUse>,
}

/// Plan approval request emitted when the agent wants a plan signed off.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlanApprovalRequest {
    /// Identifier to echo back in the decision message.
    pub request_id: String,
    /// Plan text.
    #[serde(default)]
    pub plan: String,
}

/// Result subtype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultSubtype {
    /// The turn succeeded.
    Success,
    /// Any other subtype (e.g. `error_max_turns`, `error_during_execution`).
    Error(String),
}

/// Turn result event data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnResult {
    /// Result subtype.
    pub subtype: ResultSubtype,
    /// Final text of the turn.
    pub result: Option<String>,
    /// Error text for failed turns.
    pub error: Option<String>,
    /// Session identifier.
    pub session_id: Option<String>,
}

impl TurnResult {
    /// Returns true for a successful turn.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.subtype == ResultSubtype::Success
    }
}

/// Events emitted by Claude Code in stream-json format.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaudeEvent {
    /// System initialization carrying the session id.
    Init {
        /// Session identifier.
        session_id: String,
    },
    /// Assistant message.
    Assistant(AssistantMessage),
    /// Top-level tool use request.
    ToolUse(ToolUse),
    /// Plan approval request.
    PlanApprovalRequest(PlanApprovalRequest),
    /// Turn result.
    Result(TurnResult),
}

impl ClaudeEvent {
    /// Decode one stream-json line.
    ///
    /// Returns `Ok(None)` for well-formed JSON of a shape the runner ignores.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the line is not a recognizable event object.
    pub fn decode(line: &str) -> Result<Option<Self>, serde_json::Error> {
        let wire: WireEvent = serde_json::from_str(line)?;
        Ok(wire.into_event())
    }

    /// Returns true if this is a result event.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Result(_))
    }

    /// Returns the tool name if this is a `ToolUse` event.
    #[must_use]
    pub fn tool_name(&self) -> Option<&str> {
        match self {
            Self::ToolUse(tool_use) => Some(&tool_use.name),
            _ => None,
        }
    }

    /// Returns the session ID if available.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Init { session_id } => Some(session_id),
            Self::Result(result) => result.session_id.as_deref(),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    System {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },
    Assistant {
        message: WireMessage,
    },
    ToolUse(ToolUse),
    PlanApprovalRequest(PlanApprovalRequest),
    Result {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: WireContent,
}

#[derive(Deserialize, Default)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Blocks(Vec<WireBlock>),
    #[default]
    Empty,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    ToolUse {
        #[serde(default)]
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

impl WireEvent {
    fn into_event(self) -> Option<ClaudeEvent> {
        match self {
            Self::System {
                subtype,
                session_id,
            } => {
                if subtype.as_deref() != Some("init") {
                    return None;
                }
                session_id
                    .filter(|id| !id.is_empty())
                    .map(|session_id| ClaudeEvent::Init { session_id })
            }
            Self::Assistant { message } => Some(ClaudeEvent::Assistant(message.content.into())),
            Self::ToolUse(tool_use) => Some(ClaudeEvent::ToolUse(tool_use)),
            Self::PlanApprovalRequest(request) => Some(ClaudeEvent::PlanApprovalRequest(request)),
            Self::Result {
                subtype,
                result,
                error,
                session_id,
            } => {
                let subtype = match subtype.as_deref() {
                    Some("success") => ResultSubtype::Success,
                    Some(other) => ResultSubtype::Error(other.to_string()),
                    None => ResultSubtype::Error("unknown".to_string()),
                };
                Some(ClaudeEvent::Result(TurnResult {
                    subtype,
                    result,
                    error,
                    session_id,
                }))
            }
            Self::Unknown => None,
        }
    }
}

impl From<WireContent> for AssistantMessage {
    fn from(content: WireContent) -> Self {
        match content {
            WireContent::Text(text) => Self {
                text: Some(text),
                tool_uses: Vec::new(),
            },
            WireContent::Blocks(blocks) => {
                let mut texts = Vec::new();
                let mut tool_uses = Vec::new();
                for block in blocks {
                    match block {
                        WireBlock::Text { text } => texts.push(text),
                        WireBlock::ToolUse { id, name, input } => {
                            tool_uses.push(ToolUse { id, name, input });
                        }
                        WireBlock::Other => {}
                    }
                }
                Self {
                    text: (!texts.is_empty()).then(|| texts.join("\n")),
                    tool_uses,
                }
            }
            WireContent::Empty => Self::default(),
        }
    }
}
