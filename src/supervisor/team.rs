//! Team discovery and inbox relay.
//!
//! When the agent creates a team, the CLI makes a directory for it under the
//! teams root. The name it picks can differ from the one requested, so the
//! watcher compares the root against a listing taken before the run started.
//! Once the team is known, messages workers leave in the lead's inbox are
//! copied back into the session as user messages.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;
use tokio_stream::wrappers::ReadDirStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::cli::{BridgeError, InputBridge};
use crate::config::TeamConfig;
use crate::display::truncate;
use crate::supervisor::RunCallbacks;

/// Relayed message previews are capped at this many characters.
pub const PREVIEW_MAX_CHARS: usize = 150;

/// Locates team directories created during a run.
#[derive(Debug, Clone)]
pub struct TeamWatcher {
    root: PathBuf,
    snapshot: HashSet<String>,
    timeout: Duration,
    interval: Duration,
    inbox_poll: Duration,
    lead_inbox: String,
}

impl TeamWatcher {
    /// List the teams root now so later listings can be compared to it.
    pub async fn snapshot(config: &TeamConfig) -> Self {
        let root = config.teams_root();
        let snapshot = list_dirs(&root).await;
        tracing::trace!(root = %root.display(), existing = snapshot.len(), "Snapshotted teams root");
        Self {
            root,
            snapshot,
            timeout: config.discovery_timeout(),
            interval: config.discovery_interval(),
            inbox_poll: config.inbox_poll(),
            lead_inbox: config.lead_inbox.clone(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Find the directory created for `requested`.
    ///
    /// A new directory named exactly `requested` wins; otherwise the first new
    /// directory in name order. Falls back to `requested` once the discovery
    /// timeout passes.
    pub async fn discover(&self, requested: &str) -> String {
        let deadline = Instant::now() + self.timeout;
        loop {
            let mut created: Vec<String> = list_dirs(&self.root)
                .await
                .into_iter()
                .filter(|name| !self.snapshot.contains(name))
                .collect();

            if created.iter().any(|name| name == requested) {
                tracing::debug!(team = requested, "Team directory found");
                return requested.to_string();
            }
            created.sort();
            if let Some(name) = created.into_iter().next() {
                tracing::info!(requested, team = %name, "Team directory found under a different name");
                return name;
            }

            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(self.interval).await;
        }

        tracing::debug!(team = requested, "No new team directory, using requested name");
        requested.to_string()
    }

    /// Inbox file the lead agent reads.
    #[must_use]
    pub fn inbox_path(&self, team: &str) -> PathBuf {
        self.root
            .join(team)
            .join("inboxes")
            .join(format!("{}.json", self.lead_inbox))
    }

    /// Interval between inbox reads.
    #[must_use]
    pub fn inbox_poll(&self) -> Duration {
        self.inbox_poll
    }
}

async fn list_dirs(root: &Path) -> HashSet<String> {
    let mut names = HashSet::new();
    let Ok(entries) = tokio::fs::read_dir(root).await else {
        return names;
    };
    let mut entries = ReadDirStream::new(entries);
    while let Some(entry) = entries.next().await {
        let Ok(entry) = entry else {
            continue;
        };
        let is_dir = entry.file_type().await.is_ok_and(|t| t.is_dir());
        if is_dir {
            if let Some(name) = entry.file_name().to_str() {
                names.insert(name.to_string());
            }
        }
    }
    names
}

/// One message in a team inbox file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InboxMessage {
    pub from: String,
    pub text: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Copies new inbox messages into the session.
#[derive(Debug)]
pub struct InboxRelay {
    path: PathBuf,
    consumed: usize,
}

impl InboxRelay {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path, consumed: 0 }
    }

    /// Messages delivered so far.
    #[must_use]
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Read the inbox and deliver messages not yet seen.
    ///
    /// A missing or unparseable file delivers nothing. A file shorter than
    /// the consumed count is treated as replaced and read from the start.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError` if a message cannot be written to the session.
    pub async fn poll_once(
        &mut self,
        bridge: &InputBridge,
        callbacks: &RunCallbacks,
    ) -> Result<usize, BridgeError> {
        let Ok(content) = tokio::fs::read_to_string(&self.path).await else {
            return Ok(0);
        };
        let messages: Vec<InboxMessage> = match serde_json::from_str(&content) {
            Ok(messages) => messages,
            Err(e) => {
                tracing::trace!(path = %self.path.display(), error = %e, "Inbox not readable yet");
                return Ok(0);
            }
        };

        if messages.len() < self.consumed {
            tracing::debug!(path = %self.path.display(), "Inbox shrank, starting over");
            self.consumed = 0;
        }

        let mut delivered = 0;
        for message in &messages[self.consumed..] {
            bridge
                .send_user_message(&format!("[Message from {}]: {}", message.from, message.text))
                .await?;
            self.consumed += 1;
            delivered += 1;
            callbacks.progress(&format!(
                "{}: {}",
                message.from,
                truncate(message.text.trim(), PREVIEW_MAX_CHARS)
            ));
        }
        if delivered > 0 {
            tracing::debug!(delivered, consumed = self.consumed, "Relayed inbox messages");
        }
        Ok(delivered)
    }
}

/// Discover the team and, when `relay` is set, forward its inbox until the
/// session ends or `cancel` fires.
///
/// Returns the discovered team id, or `None` if cancelled before discovery
/// finished.
pub(crate) async fn follow_team(
    watcher: TeamWatcher,
    requested: String,
    bridge: InputBridge,
    callbacks: RunCallbacks,
    relay: bool,
    cancel: CancellationToken,
) -> Option<String> {
    let team = tokio::select! {
        team = watcher.discover(&requested) => team,
        () = cancel.cancelled() => return None,
    };
    if !relay {
        return Some(team);
    }

    let mut inbox = InboxRelay::new(watcher.inbox_path(&team));
    tracing::debug!(team = %team, inbox = %watcher.inbox_path(&team).display(), "Relaying team inbox");
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(watcher.inbox_poll()) => {}
        }
        if !bridge.is_alive() {
            break;
        }
        if let Err(e) = inbox.poll_once(&bridge, &callbacks).await {
            tracing::debug!(team = %team, error = %e, "Stopping inbox relay");
            break;
        }
    }
    tracing::trace!(team = %team, consumed = inbox.consumed(), "Inbox relay stopped");
    Some(team)
}
