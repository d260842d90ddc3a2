//! Input bridge for a running stream-json session.
//!
//! The bridge encodes individual protocol messages, writes each one as a
//! single newline-terminated JSON line to the child's stdin, and reports
//! whether the child is still accepting input. It holds no protocol state.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Error type for bridge writes.
#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    /// The process has exited or its stdin was closed.
    #[error("Process is no longer accepting input")]
    Closed,
    /// Writing to the pipe failed.
    #[error("Failed to write to process stdin: {0}")]
    Io(#[from] std::io::Error),
    /// The message could not be encoded.
    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Messages accepted on the child's stdin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputMessage {
    /// A user turn.
    User {
        /// Message body.
        message: UserContent,
    },
    /// Answer to a tool call, such as a question asked by the agent.
    ToolResult {
        /// Tool use being answered.
        tool_use_id: String,
        /// Answer text.
        content: String,
    },
    /// Decision on a plan approval request.
    PlanApprovalResponse {
        /// Request being answered.
        request_id: String,
        /// Whether the plan is approved.
        approve: bool,
        /// Optional feedback for the agent.
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
}

/// Body of a user message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserContent {
    /// Always `"user"`.
    pub role: &'static str,
    /// Message text.
    pub content: String,
}

impl InputMessage {
    /// Build a user message.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::User {
            message: UserContent {
                role: "user",
                content: text.into(),
            },
        }
    }

    /// Encode as one newline-terminated JSON line.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_line(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut bytes = serde_json::to_vec(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

type Writer = Pin<Box<dyn AsyncWrite + Send>>;

/// Cloneable handle for writing protocol messages to a running process.
#[derive(Clone)]
pub struct InputBridge {
    writer: Arc<Mutex<Option<Writer>>>,
    alive: Arc<AtomicBool>,
}

impl std::fmt::Debug for InputBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputBridge")
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

impl InputBridge {
    /// Wrap a writer (normally the child's stdin).
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + 'static,
    {
        Self {
            writer: Arc::new(Mutex::new(Some(Box::pin(writer)))),
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Returns true while the process is running and its stdin is open.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Mark the process as gone and drop the pipe. Idempotent.
    pub async fn close(&self) {
        self.alive.store(false, Ordering::Release);
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                tracing::trace!(error = %e, "Closing stdin failed");
            }
        }
    }

    /// Mark the process as gone without touching the pipe.
    pub fn mark_dead(&self) {
        self.alive.store(false, Ordering::Release);
    }

    /// Send a user message.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError` if the process is gone or the write fails.
    pub async fn send_user_message(&self, text: &str) -> Result<(), BridgeError> {
        self.send(&InputMessage::user(text)).await
    }

    /// Answer a tool call.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError` if the process is gone or the write fails.
    pub async fn send_tool_result(&self, tool_use_id: &str, content: &str) -> Result<(), BridgeError> {
        self.send(&InputMessage::ToolResult {
            tool_use_id: tool_use_id.to_string(),
            content: content.to_string(),
        })
        .await
    }

    /// Approve or reject a plan.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError` if the process is gone or the write fails.
    pub async fn send_plan_decision(
        &self,
        request_id: &str,
        approve: bool,
        feedback: Option<&str>,
    ) -> Result<(), BridgeError> {
        self.send(&InputMessage::PlanApprovalResponse {
            request_id: request_id.to_string(),
            approve,
            content: feedback.map(str::to_string),
        })
        .await
    }

    /// Write one message line and flush it.
    ///
    /// A failed write marks the bridge dead.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError` if the process is gone or the write fails.
    pub async fn send(&self, message: &InputMessage) -> Result<(), BridgeError> {
        if !self.is_alive() {
            return Err(BridgeError::Closed);
        }
        let line = message.to_line()?;

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(BridgeError::Closed)?;

        let result = async {
            writer.write_all(&line).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(error = %e, "Write to process stdin failed, marking bridge dead");
            self.alive.store(false, Ordering::Release);
            guard.take();
            return Err(BridgeError::Io(e));
        }
        Ok(())
    }
}
