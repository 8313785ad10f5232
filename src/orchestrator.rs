use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::OrchestratorConfig;
use crate::dashboard::run_dashboard;
use crate::error::Result;
use crate::scheduler::group::shared_groups;
use crate::scheduler::{
    Agent, AgentRegistry, AgentState, Assigner, CompletionReport, Job, JobFilter, JobPatch,
    JobRegistry, JobState, Lifecycle, Priority, PriorityQueues, SubmitRequest, Target,
};
use crate::store::StateStore;

/// Main handle that wires the components together and exposes the public
/// operation surface. Background loops (scheduler tick, group housekeeping,
/// dashboard) are spawned by [`Orchestrator::run`].
pub struct Orchestrator {
    config: OrchestratorConfig,
    store: Arc<dyn StateStore>,
    jobs: JobRegistry,
    agents: AgentRegistry,
    queues: PriorityQueues,
    lifecycle: Lifecycle,
    assigner: Assigner,
    /// Wakes the scheduler loop early on submit/complete.
    kick: Notify,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, store: Arc<dyn StateStore>) -> Self {
        let queues = PriorityQueues::new(store.clone());
        let jobs = JobRegistry::new(store.clone(), queues.clone(), config.job_record_ttl);
        let agents = AgentRegistry::new(
            store.clone(),
            config.agent_record_ttl,
            config.liveness_ttl,
        );
        let groups = shared_groups();
        let lifecycle = Lifecycle::new(
            jobs.clone(),
            agents.clone(),
            queues.clone(),
            groups.clone(),
            config.max_attempts,
        );
        let assigner = Assigner::new(
            jobs.clone(),
            agents.clone(),
            queues.clone(),
            groups,
            lifecycle.clone(),
            config.clone(),
        );

        Self {
            config,
            store,
            jobs,
            agents,
            queues,
            lifecycle,
            assigner,
            kick: Notify::new(),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // --- job operations ---

    pub async fn submit(&self, req: SubmitRequest) -> Result<(Job, u64)> {
        let submitted = self.jobs.submit(req).await?;
        self.kick.notify_one();
        Ok(submitted)
    }

    pub async fn get_job(&self, id: &str) -> Result<Job> {
        self.jobs.get(id).await
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        self.jobs.list(filter).await
    }

    pub async fn cancel_job(&self, id: &str) -> Result<Job> {
        self.jobs.cancel(id).await
    }

    pub async fn transition_job(&self, id: &str, to: JobState, patch: JobPatch) -> Result<Job> {
        self.jobs.transition(id, to, patch).await
    }

    // --- agent operations ---

    pub async fn register_agent(
        &self,
        name: &str,
        capabilities: Vec<Target>,
        metadata: HashMap<String, String>,
    ) -> Result<Agent> {
        self.agents.register(name, capabilities, metadata).await
    }

    pub async fn heartbeat_agent(&self, id: &str) -> Result<Agent> {
        self.agents.heartbeat(id).await
    }

    pub async fn set_agent_state(
        &self,
        id: &str,
        state: AgentState,
        current_job: Option<String>,
    ) -> Result<Agent> {
        self.agents.set_state(id, state, current_job).await
    }

    pub async fn list_agents(&self) -> Result<Vec<Agent>> {
        self.agents.live_agents().await
    }

    // --- dispatch operations ---

    pub async fn claim_job(&self, agent_id: &str, job_id: &str) -> Result<Job> {
        self.lifecycle.claim(agent_id, job_id).await
    }

    pub async fn complete_job(
        &self,
        agent_id: &str,
        job_id: &str,
        report: CompletionReport,
    ) -> Result<Job> {
        let job = self.lifecycle.complete(agent_id, job_id, report).await?;
        self.kick.notify_one();
        Ok(job)
    }

    /// Current depth of each priority queue, in drain order.
    pub async fn queue_depths(&self) -> Result<Vec<(Priority, u64)>> {
        let mut depths = Vec::with_capacity(Priority::ALL.len());
        for priority in Priority::ALL {
            depths.push((priority, self.queues.len(priority).await?));
        }
        Ok(depths)
    }

    /// Resolve the current contents of one priority queue.
    pub async fn queue_snapshot(&self, priority: Priority) -> Result<Vec<Job>> {
        let ids = self.queues.snapshot(priority).await?;
        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = self.jobs.try_get(&id).await? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    /// One scheduler pass. Exposed so tests and embedders can drive the
    /// engine without the background loop.
    pub async fn tick(&self) -> Result<()> {
        self.assigner.tick().await
    }

    /// The crash-recovery sweep alone, without the assignment walk.
    pub async fn reconcile(&self) -> Result<()> {
        self.assigner.reconcile().await
    }

    /// Store liveness probe.
    pub async fn ping_store(&self) -> Result<()> {
        self.store.ping().await
    }

    /// Run the orchestrator until the token is cancelled.
    ///
    /// Spawns the scheduler loop (interval tick plus submit/complete kicks),
    /// the group housekeeping loop, and, if configured, the dashboard
    /// server. On shutdown the current tick finishes and the loops exit;
    /// in-flight assignments are left for reconciliation at next startup.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let scheduler = self.clone();
        let scheduler_token = shutdown.clone();
        let scheduler_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(scheduler.config.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = scheduler.kick.notified() => {}
                    _ = scheduler_token.cancelled() => break,
                }
                if let Err(err) = scheduler.assigner.tick().await {
                    tracing::warn!(error = %err, "Scheduler tick aborted; retrying next cadence");
                }
            }
            tracing::info!("Scheduler loop stopped");
        });

        let sweeper = self.clone();
        let sweeper_token = shutdown.clone();
        let sweeper_handle = tokio::spawn(async move {
            let cadence = sweeper.config.group_max_idle / 10;
            let mut interval = tokio::time::interval(cadence.max(std::time::Duration::from_secs(1)));
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = sweeper_token.cancelled() => break,
                }
                if let Err(err) = sweeper.assigner.sweep_groups().await {
                    tracing::warn!(error = %err, "Group sweep failed");
                }
            }
        });

        if let Some(addr) = self.config.dashboard_addr {
            let dashboard = self.clone();
            let dashboard_token = shutdown.clone();
            tokio::spawn(async move {
                run_dashboard(addr, dashboard, dashboard_token).await;
            });
        }

        shutdown.cancelled().await;
        let _ = scheduler_handle.await;
        let _ = sweeper_handle.await;
        tracing::info!("Orchestrator stopped");
    }
}
