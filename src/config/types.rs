//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::{Deadline, DEFAULT_MODEL};

/// Settings for spawning the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Path to the CLI binary. Environment overrides take priority.
    pub binary: Option<PathBuf>,
    /// Model used by one-shot calls.
    pub model: String,
    /// Wall-clock timeout for one-shot calls, in seconds. `0` disables it.
    pub timeout_secs: Option<u64>,
    /// Idle timeout for one-shot calls, in seconds. Wins over `timeout_secs`
    /// unless `0`.
    pub idle_timeout_secs: Option<u64>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            binary: None,
            model: DEFAULT_MODEL.to_string(),
            timeout_secs: Some(120),
            idle_timeout_secs: None,
        }
    }
}

impl CliConfig {
    /// Deadline applied to one-shot calls that do not set their own.
    #[must_use]
    pub fn deadline(&self) -> Option<Deadline> {
        let secs = |v: Option<u64>| v.filter(|&s| s > 0).map(Duration::from_secs);
        secs(self.idle_timeout_secs)
            .map(Deadline::Idle)
            .or_else(|| secs(self.timeout_secs).map(Deadline::WallClock))
    }
}

/// Settings for multi-agent team runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamConfig {
    /// Directory the CLI creates team workspaces in. Defaults to
    /// `~/.claude/teams`.
    pub root: Option<PathBuf>,
    /// How long to look for the team directory after a team is created.
    pub discovery_timeout_ms: u64,
    /// Interval between team directory listings.
    pub discovery_interval_ms: u64,
    /// Interval between inbox reads.
    pub inbox_poll_ms: u64,
    /// Inbox file name (without extension) read for the supervising agent.
    pub lead_inbox: String,
}

impl Default for TeamConfig {
    fn default() -> Self {
        Self {
            root: None,
            discovery_timeout_ms: 10_000,
            discovery_interval_ms: 500,
            inbox_poll_ms: 2_000,
            lead_inbox: "team-lead".to_string(),
        }
    }
}

impl TeamConfig {
    /// Resolved teams root.
    #[must_use]
    pub fn teams_root(&self) -> PathBuf {
        self.root.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".claude")
                .join("teams")
        })
    }

    /// Discovery timeout as a duration.
    #[must_use]
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    /// Discovery interval as a duration.
    #[must_use]
    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms.max(1))
    }

    /// Inbox poll interval as a duration.
    #[must_use]
    pub fn inbox_poll(&self) -> Duration {
        Duration::from_millis(self.inbox_poll_ms.max(1))
    }
}

/// Settings for the per-key queue registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Idle keys older than this are evicted by `cleanup`.
    pub idle_evict_secs: u64,
    /// How long `shutdown` waits for in-flight work.
    pub shutdown_grace_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            idle_evict_secs: 600,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl QueueConfig {
    /// Idle threshold as a duration.
    #[must_use]
    pub fn idle_evict(&self) -> Duration {
        Duration::from_secs(self.idle_evict_secs)
    }

    /// Shutdown grace as a duration.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// CLI settings.
    pub cli: CliConfig,
    /// Team settings.
    pub team: TeamConfig,
    /// Queue settings.
    pub queue: QueueConfig,
}
