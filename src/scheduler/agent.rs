use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{GridError, Result};
use crate::scheduler::job::Target;
use crate::store::{agent_key, StateStore, AGENT_PREFIX};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Idle,
    Busy,
    Maintenance,
    Offline,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentState::Idle => write!(f, "idle"),
            AgentState::Busy => write!(f, "busy"),
            AgentState::Maintenance => write!(f, "maintenance"),
            AgentState::Offline => write!(f, "offline"),
        }
    }
}

/// A worker process that executes jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    /// Which targets this agent can service.
    pub capabilities: Vec<Target>,
    pub state: AgentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_job: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Agent {
    pub fn can_service(&self, target: Target) -> bool {
        self.capabilities.contains(&target)
    }

    /// Live means the last heartbeat landed within the liveness window.
    /// Non-live agents are invisible to scheduling regardless of state.
    pub fn is_live(&self, liveness_ttl: Duration) -> bool {
        let since = Utc::now().signed_duration_since(self.last_seen);
        since.num_milliseconds() < liveness_ttl.as_millis() as i64
    }
}

/// Registration, heartbeat, and state bookkeeping for agents.
#[derive(Clone)]
pub struct AgentRegistry {
    store: Arc<dyn StateStore>,
    record_ttl: Duration,
    liveness_ttl: Duration,
}

impl AgentRegistry {
    pub fn new(store: Arc<dyn StateStore>, record_ttl: Duration, liveness_ttl: Duration) -> Self {
        Self {
            store,
            record_ttl,
            liveness_ttl,
        }
    }

    pub fn liveness_ttl(&self) -> Duration {
        self.liveness_ttl
    }

    pub async fn register(
        &self,
        name: &str,
        capabilities: Vec<Target>,
        metadata: HashMap<String, String>,
    ) -> Result<Agent> {
        if name.trim().is_empty() {
            return Err(GridError::Validation("Agent name must not be empty".into()));
        }
        if capabilities.is_empty() {
            return Err(GridError::Validation(
                "Agent must declare at least one capability".into(),
            ));
        }

        let now = Utc::now();
        let agent = Agent {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            capabilities,
            state: AgentState::Idle,
            current_job: None,
            metadata,
            registered_at: now,
            last_seen: now,
        };
        self.save(&agent).await?;
        tracing::info!(agent_id = %agent.id, name = %agent.name, "Agent registered");
        Ok(agent)
    }

    pub async fn get(&self, id: &str) -> Result<Agent> {
        self.try_get(id)
            .await?
            .ok_or_else(|| GridError::NotFound(format!("Agent not found: {}", id)))
    }

    pub async fn try_get(&self, id: &str) -> Result<Option<Agent>> {
        match self.store.get(&agent_key(id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Refresh `last_seen` and the record TTL. Everything else is untouched.
    pub async fn heartbeat(&self, id: &str) -> Result<Agent> {
        let mut agent = self.get(id).await?;
        agent.last_seen = Utc::now();
        self.save(&agent).await?;
        Ok(agent)
    }

    /// Set the agent state. `busy` requires a current job; any other state
    /// must not carry one.
    pub async fn set_state(
        &self,
        id: &str,
        state: AgentState,
        current_job: Option<String>,
    ) -> Result<Agent> {
        match state {
            AgentState::Busy if current_job.is_none() => {
                return Err(GridError::Validation(
                    "Busy agents must reference their current job".into(),
                ));
            }
            AgentState::Busy => {}
            _ if current_job.is_some() => {
                return Err(GridError::Validation(format!(
                    "State {} cannot carry a current job",
                    state
                )));
            }
            _ => {}
        }

        let mut agent = self.get(id).await?;
        agent.state = state;
        agent.current_job = current_job;
        agent.last_seen = Utc::now();
        self.save(&agent).await?;
        tracing::debug!(agent_id = %id, state = %state, "Agent state updated");
        Ok(agent)
    }

    /// Agents whose last heartbeat is within the liveness window. Expired
    /// records are skipped; the store TTL garbage-collects them passively.
    pub async fn live_agents(&self) -> Result<Vec<Agent>> {
        let mut live: Vec<Agent> = self
            .all_agents()
            .await?
            .into_iter()
            .filter(|a| a.is_live(self.liveness_ttl))
            .collect();
        live.sort_by(|a, b| a.registered_at.cmp(&b.registered_at));
        Ok(live)
    }

    /// Every agent record still present in the store, live or not. Used by
    /// the reconciliation sweep, which needs to see stale-but-unexpired
    /// records too.
    pub async fn all_agents(&self) -> Result<Vec<Agent>> {
        let keys = self.store.scan(AGENT_PREFIX).await?;
        let mut agents = Vec::with_capacity(keys.len());
        for key in keys {
            // A record may expire between scan and get.
            if let Some(raw) = self.store.get(&key).await? {
                match serde_json::from_str::<Agent>(&raw) {
                    Ok(agent) => agents.push(agent),
                    Err(err) => {
                        tracing::warn!(key = %key, error = %err, "Skipping unreadable agent record");
                    }
                }
            }
        }
        Ok(agents)
    }

    pub(crate) async fn save(&self, agent: &Agent) -> Result<()> {
        let raw = serde_json::to_string(agent)?;
        self.store
            .put(&agent_key(&agent.id), &raw, Some(self.record_ttl))
            .await
    }
}
