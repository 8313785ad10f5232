use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

/// Weight assigned to tenants without an explicit entry in the mapping.
pub const DEFAULT_TENANT_WEIGHT: i64 = 10;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Store backend endpoint. `redis://...` selects the Redis backend,
    /// anything else the in-memory backend.
    pub store_endpoint: String,
    /// Bind address for the JSON dashboard (optional).
    pub dashboard_addr: Option<SocketAddr>,
    /// Cadence of the scheduler tick.
    pub tick_interval: Duration,
    /// An agent whose last heartbeat is older than this is invisible to
    /// scheduling even if its record has not expired yet.
    pub liveness_ttl: Duration,
    /// Store TTL for agent records, refreshed on every heartbeat.
    pub agent_record_ttl: Duration,
    /// Store TTL for job records, refreshed on every write.
    pub job_record_ttl: Duration,
    /// Non-processing affinity groups older than this are discarded.
    pub group_max_idle: Duration,
    /// Running jobs older than this are treated as crashed and re-queued.
    pub job_max_runtime: Duration,
    /// Total executions allowed per job, counting the first attempt.
    pub max_attempts: u32,
    /// Tenant fairness weights; higher sorts earlier within a queue.
    pub tenant_weights: HashMap<String, i64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            store_endpoint: "memory://".to_string(),
            dashboard_addr: None,
            tick_interval: Duration::from_secs(5),
            liveness_ttl: Duration::from_secs(120),
            agent_record_ttl: Duration::from_secs(300),
            job_record_ttl: Duration::from_secs(24 * 60 * 60),
            group_max_idle: Duration::from_secs(10 * 60),
            job_max_runtime: Duration::from_secs(30 * 60),
            max_attempts: 3,
            tenant_weights: HashMap::new(),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_tenant_weight(mut self, tenant: impl Into<String>, weight: i64) -> Self {
        self.tenant_weights.insert(tenant.into(), weight);
        self
    }

    /// Weight used when sorting a queue; unknown tenants get the default.
    pub fn weight_for(&self, tenant: &str) -> i64 {
        self.tenant_weights
            .get(tenant)
            .copied()
            .unwrap_or(DEFAULT_TENANT_WEIGHT)
    }
}
