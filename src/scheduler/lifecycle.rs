use serde::Deserialize;

use crate::error::{GridError, Result};
use crate::scheduler::agent::{AgentRegistry, AgentState};
use crate::scheduler::group::{GroupKey, SharedGroups};
use crate::scheduler::job::{Job, JobPatch, JobState};
use crate::scheduler::queue::PriorityQueues;
use crate::scheduler::registry::JobRegistry;

/// Termination report an agent sends for its current job.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletionReport {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

/// Drives job/agent state through claim, completion, retry, and group
/// advancement. Both the scheduler tick and agent-pull callers funnel
/// through here, so there is exactly one claim implementation.
#[derive(Clone)]
pub struct Lifecycle {
    jobs: JobRegistry,
    agents: AgentRegistry,
    queues: PriorityQueues,
    groups: SharedGroups,
    max_attempts: u32,
}

impl Lifecycle {
    pub fn new(
        jobs: JobRegistry,
        agents: AgentRegistry,
        queues: PriorityQueues,
        groups: SharedGroups,
        max_attempts: u32,
    ) -> Self {
        Self {
            jobs,
            agents,
            queues,
            groups,
            max_attempts,
        }
    }

    /// Bind a claimable job to a live agent.
    ///
    /// The job record is mutated first, the agent record second; the store
    /// has no transactions, so a failure between the two leaves an
    /// inconsistency the reconciliation sweep rolls back.
    pub async fn claim(&self, agent_id: &str, job_id: &str) -> Result<Job> {
        let agent = self.agents.get(agent_id).await?;
        if !agent.is_live(self.agents.liveness_ttl()) {
            return Err(GridError::Conflict(format!(
                "Agent {} has missed its heartbeat window",
                agent_id
            )));
        }
        match agent.state {
            AgentState::Idle => {}
            state => {
                return Err(GridError::Conflict(format!(
                    "Agent {} is {} and cannot claim",
                    agent_id, state
                )));
            }
        }

        let mut job = self.jobs.get(job_id).await?;
        if !matches!(job.state, JobState::Pending | JobState::QueuedForGroup) {
            return Err(GridError::Conflict(format!(
                "Job {} is {} and not claimable",
                job_id, job.state
            )));
        }
        if !agent.can_service(job.target) {
            return Err(GridError::Forbidden(format!(
                "Agent {} cannot service target {}",
                agent_id, job.target
            )));
        }

        self.jobs
            .apply(&mut job, JobState::Running, JobPatch::assigned_agent(agent_id))
            .await?;
        self.agents
            .set_state(agent_id, AgentState::Busy, Some(job.id.clone()))
            .await?;

        let mut groups = self.groups.lock().await;
        groups.remove_job(&job.id);
        groups.start(GroupKey::new(agent_id, &job.build), job.id.clone());
        drop(groups);

        tracing::info!(job_id = %job.id, agent_id = %agent_id, build = %job.build, "Job claimed");
        Ok(job)
    }

    /// Accept a termination report from the owning agent.
    ///
    /// Success finalizes the job; failure applies the retry policy. A report
    /// against an already-terminal record (cancelled mid-run, or a duplicate
    /// report) is accepted but only frees the agent and advances the group.
    pub async fn complete(
        &self,
        agent_id: &str,
        job_id: &str,
        report: CompletionReport,
    ) -> Result<Job> {
        let mut job = self.jobs.get(job_id).await?;
        if job.assigned_agent.as_deref() != Some(agent_id) {
            return Err(GridError::Forbidden(format!(
                "Job {} is not assigned to agent {}",
                job_id, agent_id
            )));
        }

        if job.state.is_terminal() {
            tracing::info!(
                job_id = %job_id,
                agent_id = %agent_id,
                state = %job.state,
                "Late report on terminal job; freeing agent"
            );
            self.advance_group(agent_id, &job.build, &job.id).await?;
            return Ok(job);
        }
        if job.state != JobState::Running {
            return Err(GridError::Forbidden(format!(
                "Job {} is {} and not awaiting a report",
                job_id, job.state
            )));
        }

        if report.success {
            let patch = JobPatch {
                result: report.result,
                ..Default::default()
            };
            self.jobs.apply(&mut job, JobState::Completed, patch).await?;
            tracing::info!(job_id = %job_id, agent_id = %agent_id, "Job completed");
        } else {
            self.handle_failure(&mut job, report).await?;
        }

        self.advance_group(agent_id, &job.build, &job.id).await?;
        Ok(job)
    }

    /// Retry policy: re-queue at the tail until the attempt budget is spent,
    /// then mark failed.
    async fn handle_failure(&self, job: &mut Job, report: CompletionReport) -> Result<()> {
        let error = report.error.unwrap_or_else(|| "test failed".to_string());
        if job.attempt + 1 < self.max_attempts {
            self.jobs
                .apply(job, JobState::Retrying, JobPatch::last_error(error.clone()))
                .await?;
            self.queues.append(job.priority, &job.id).await?;
            self.jobs
                .apply(job, JobState::Pending, JobPatch::default())
                .await?;
            tracing::info!(
                job_id = %job.id,
                attempt = job.attempt,
                error = %error,
                "Job failed; re-queued for retry"
            );
        } else {
            let patch = JobPatch {
                last_error: Some(error.clone()),
                result: report.result,
                ..Default::default()
            };
            self.jobs.apply(job, JobState::Failed, patch).await?;
            tracing::warn!(
                job_id = %job.id,
                attempt = job.attempt,
                error = %error,
                "Job failed permanently"
            );
        }
        Ok(())
    }

    /// Remove `done_id` from the agent's group and promote the next waiting
    /// member, or discard the group and idle the agent. Members whose state
    /// moved on (a cancel between promotions) are skipped.
    async fn advance_group(&self, agent_id: &str, build: &str, done_id: &str) -> Result<()> {
        let key = GroupKey::new(agent_id, build);
        let mut groups = self.groups.lock().await;
        let promoted = loop {
            let Some(group) = groups.get_mut(&key) else {
                break None;
            };
            group.jobs.retain(|id| id != done_id);
            let Some(head) = group.head().map(str::to_string) else {
                groups.remove(&key);
                break None;
            };
            match self.jobs.try_get(&head).await? {
                Some(mut next) if next.state == JobState::QueuedForGroup => {
                    self.jobs
                        .apply(
                            &mut next,
                            JobState::Running,
                            JobPatch::assigned_agent(agent_id),
                        )
                        .await?;
                    group.processing = true;
                    break Some(next);
                }
                _ => {
                    group.jobs.pop_front();
                }
            }
        };
        drop(groups);

        match promoted {
            Some(next) => {
                self.agents
                    .set_state(agent_id, AgentState::Busy, Some(next.id.clone()))
                    .await?;
                tracing::info!(
                    job_id = %next.id,
                    agent_id = %agent_id,
                    build = %build,
                    "Promoted next job in affinity group"
                );
            }
            None => self.release_agent(agent_id).await?,
        }
        Ok(())
    }

    /// Idle the agent; a record that already expired is fine.
    async fn release_agent(&self, agent_id: &str) -> Result<()> {
        match self.agents.set_state(agent_id, AgentState::Idle, None).await {
            Ok(_) => Ok(()),
            Err(GridError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }
}
