use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GridError;

/// Queue priority of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Drain order for the scheduler: high first.
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

impl FromStr for Priority {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => Err(GridError::Validation(format!(
                "Unknown priority: {}",
                other
            ))),
        }
    }
}

/// Target environment a job runs against. Doubles as an agent capability.
///
/// `browserstack` is accepted as a legacy spelling of `cloud`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Emulator,
    Device,
    #[serde(alias = "browserstack")]
    Cloud,
}

impl Default for Target {
    fn default() -> Self {
        Target::Emulator
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Emulator => write!(f, "emulator"),
            Target::Device => write!(f, "device"),
            Target::Cloud => write!(f, "cloud"),
        }
    }
}

impl FromStr for Target {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "emulator" => Ok(Target::Emulator),
            "device" => Ok(Target::Device),
            "cloud" | "browserstack" => Ok(Target::Cloud),
            other => Err(GridError::Validation(format!("Unknown target: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    Pending,
    QueuedForGroup,
    Running,
    Retrying,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    /// Legal edges of the job state machine. Everything else is rejected.
    pub fn can_transition(self, to: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, to),
            (Pending, QueuedForGroup)
                | (Pending, Running)
                | (Pending, Cancelled)
                | (Pending, Failed)
                | (QueuedForGroup, Running)
                | (QueuedForGroup, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Retrying)
                | (Running, Cancelled)
                | (Retrying, Pending)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::QueuedForGroup => write!(f, "queued-for-group"),
            JobState::Running => write!(f, "running"),
            JobState::Retrying => write!(f, "retrying"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
            JobState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A unit of work: a test artifact executed against a target environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub tenant: String,
    /// App build identifier; jobs sharing a build are affinity-grouped.
    pub build: String,
    /// What to execute. Opaque to the orchestrator.
    pub artifact: String,
    pub priority: Priority,
    pub target: Target,
    pub state: JobState,
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_agent: Option<String>,
    /// Set while the job sits in a build-affinity group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Opaque result payload reported by the agent on terminal states.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl Job {
    pub fn new(
        id: Option<String>,
        tenant: String,
        build: String,
        artifact: String,
        priority: Priority,
        target: Target,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            tenant,
            build,
            artifact,
            priority,
            target,
            state: JobState::Pending,
            attempt: 0,
            last_error: None,
            assigned_agent: None,
            group_key: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            result: None,
        }
    }
}

/// Optional fields applied alongside a state transition. The transition
/// function in the job registry is the only place timestamps are stamped.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub assigned_agent: Option<String>,
    pub group_key: Option<String>,
    pub last_error: Option<String>,
    pub result: Option<serde_json::Value>,
}

impl JobPatch {
    pub fn assigned_agent(agent_id: impl Into<String>) -> Self {
        Self {
            assigned_agent: Some(agent_id.into()),
            ..Default::default()
        }
    }

    pub fn last_error(error: impl Into<String>) -> Self {
        Self {
            last_error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn result(result: serde_json::Value) -> Self {
        Self {
            result: Some(result),
            ..Default::default()
        }
    }
}
