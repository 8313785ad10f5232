use std::collections::{HashMap, HashSet};

use chrono::Utc;

use crate::config::OrchestratorConfig;
use crate::error::{GridError, Result};
use crate::scheduler::agent::{Agent, AgentRegistry, AgentState};
use crate::scheduler::group::{GroupKey, GroupTable, SharedGroups};
use crate::scheduler::job::{Job, JobPatch, JobState, Priority};
use crate::scheduler::lifecycle::Lifecycle;
use crate::scheduler::queue::PriorityQueues;
use crate::scheduler::registry::{JobFilter, JobRegistry};

enum Placement {
    Placed,
    NoAgent,
}

/// The periodic matcher: reconciles crashed state, then walks the priority
/// queues binding sorted jobs to idle agents or existing affinity groups.
///
/// A tick is serialized on the scheduler task; submitters only ever append
/// to queue tails, so the snapshot-sort-drain-walk cycle here never loses
/// concurrent submissions (anything drained that was not in the snapshot is
/// re-appended untouched).
#[derive(Clone)]
pub struct Assigner {
    jobs: JobRegistry,
    agents: AgentRegistry,
    queues: PriorityQueues,
    groups: SharedGroups,
    lifecycle: Lifecycle,
    config: OrchestratorConfig,
}

impl Assigner {
    pub fn new(
        jobs: JobRegistry,
        agents: AgentRegistry,
        queues: PriorityQueues,
        groups: SharedGroups,
        lifecycle: Lifecycle,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            jobs,
            agents,
            queues,
            groups,
            lifecycle,
            config,
        }
    }

    /// One scheduler pass: reconciliation sweep, then assignment.
    pub async fn tick(&self) -> Result<()> {
        self.reconcile().await?;
        self.assign().await
    }

    async fn assign(&self) -> Result<()> {
        let mut idle: Vec<Agent> = self
            .agents
            .live_agents()
            .await?
            .into_iter()
            .filter(|a| a.state == AgentState::Idle)
            .collect();
        if idle.is_empty() {
            return Ok(());
        }

        for priority in Priority::ALL {
            self.assign_queue(priority, &mut idle).await?;
        }
        Ok(())
    }

    /// Snapshot, sort by tenant weight then age, drain, and walk one queue.
    async fn assign_queue(&self, priority: Priority, idle: &mut Vec<Agent>) -> Result<()> {
        let snapshot = self.queues.snapshot(priority).await?;
        if snapshot.is_empty() {
            return Ok(());
        }

        let mut candidates = Vec::new();
        for id in &snapshot {
            match self.jobs.try_get(id).await? {
                Some(job) if job.state == JobState::Pending => candidates.push(job),
                Some(job) => {
                    tracing::debug!(job_id = %id, state = %job.state, "Dropping advanced job from queue");
                }
                None => {
                    tracing::debug!(job_id = %id, "Dropping vanished job from queue");
                }
            }
        }
        candidates.sort_by(|a, b| {
            self.config
                .weight_for(&b.tenant)
                .cmp(&self.config.weight_for(&a.tenant))
                .then_with(|| a.created_at.cmp(&b.created_at))
        });

        // Ids that arrived between snapshot and drain go back to the tail
        // untouched; they are picked up on the next tick.
        let snapshot_set: HashSet<&String> = snapshot.iter().collect();
        let late: Vec<String> = self
            .queues
            .drain(priority)
            .await?
            .into_iter()
            .filter(|id| !snapshot_set.contains(id))
            .collect();

        let mut leftover: Vec<String> = Vec::new();
        let mut walk_error: Option<GridError> = None;
        let mut walk = candidates.into_iter();
        for job in walk.by_ref() {
            match self.place(&job, idle).await {
                Ok(Placement::Placed) => {}
                Ok(Placement::NoAgent) => leftover.push(job.id),
                Err(err) => {
                    // Abort the walk but make sure nothing drained is lost.
                    leftover.push(job.id);
                    walk_error = Some(err);
                    break;
                }
            }
        }
        leftover.extend(walk.map(|job| job.id));

        for id in leftover.iter().chain(late.iter()) {
            self.queues.append(priority, id).await?;
        }

        match walk_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Place one job: attach to a matching affinity group if one exists,
    /// otherwise claim a suitable idle agent. A job with no suitable agent
    /// does not consume one.
    async fn place(&self, job: &Job, idle: &mut Vec<Agent>) -> Result<Placement> {
        if let Some(key) = self.find_attachable_group(job).await? {
            // Re-fetch: the snapshot record may be stale by now (a cancel or
            // an agent-pull claim since the tick started).
            let mut record = match self.jobs.try_get(&job.id).await? {
                Some(fresh) if fresh.state == JobState::Pending => fresh,
                _ => return Ok(Placement::Placed),
            };
            let patch = JobPatch {
                assigned_agent: Some(key.agent_id.clone()),
                group_key: Some(key.to_string()),
                ..Default::default()
            };
            match self.jobs.apply(&mut record, JobState::QueuedForGroup, patch).await {
                Ok(()) => {}
                // The job advanced under us (an agent-pull claim); done here.
                Err(GridError::IllegalState(_)) => return Ok(Placement::Placed),
                Err(err) => return Err(err),
            }

            let mut groups = self.groups.lock().await;
            let attached = groups.enqueue(&key, record.id.clone());
            drop(groups);
            if !attached {
                // The group finished while we transitioned; put the job back.
                self.jobs.revert_to_pending(&mut record).await?;
                self.queues.append(record.priority, &record.id).await?;
                return Ok(Placement::Placed);
            }
            tracing::info!(job_id = %record.id, group = %key, "Job attached to affinity group");
            return Ok(Placement::Placed);
        }

        while let Some(pos) = idle.iter().position(|a| a.can_service(job.target)) {
            let agent = idle.remove(pos);
            match self.lifecycle.claim(&agent.id, &job.id).await {
                Ok(_) => return Ok(Placement::Placed),
                Err(GridError::Conflict(reason)) => {
                    tracing::debug!(job_id = %job.id, agent_id = %agent.id, %reason, "Claim lost a race");
                    match self.jobs.try_get(&job.id).await? {
                        // The agent was the problem; try the next one.
                        Some(j) if j.state == JobState::Pending => continue,
                        // The job moved on; nothing left to place.
                        _ => return Ok(Placement::Placed),
                    }
                }
                Err(GridError::Forbidden(_)) | Err(GridError::NotFound(_)) => continue,
                Err(GridError::IllegalState(_)) => {
                    idle.push(agent);
                    return Ok(Placement::Placed);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(Placement::NoAgent)
    }

    /// A group can take the job if it holds the same build and its agent is
    /// still live and able to service the job's target.
    async fn find_attachable_group(&self, job: &Job) -> Result<Option<GroupKey>> {
        let key = {
            let groups = self.groups.lock().await;
            match groups.find_by_build(&job.build) {
                Some(key) => key,
                None => return Ok(None),
            }
        };
        match self.agents.try_get(&key.agent_id).await? {
            Some(agent)
                if agent.is_live(self.config.liveness_ttl) && agent.can_service(job.target) =>
            {
                Ok(Some(key))
            }
            _ => Ok(None),
        }
    }

    /// Passive crash recovery, run at the head of every tick:
    ///
    /// - running jobs bound to a missing, dead, or disagreeing agent, or
    ///   older than the runtime ceiling, revert to pending (attempt is not
    ///   incremented: a crash is not a test failure) and re-queue; their
    ///   group is torn down with them
    /// - healthy running jobs lazily rebuild their singleton group after a
    ///   restart
    /// - queued-for-group jobs no group knows about revert to pending
    /// - pending jobs in no queue are re-appended once older than a tick
    /// - live busy agents bound to nothing running are released
    pub async fn reconcile(&self) -> Result<()> {
        let agents: HashMap<String, Agent> = self
            .agents
            .all_agents()
            .await?
            .into_iter()
            .map(|a| (a.id.clone(), a))
            .collect();
        let jobs = self.jobs.list(&JobFilter::default()).await?;
        let mut queued: HashSet<String> = HashSet::new();
        for priority in Priority::ALL {
            queued.extend(self.queues.snapshot(priority).await?);
        }

        let now = Utc::now();
        let max_runtime_ms = self.config.job_max_runtime.as_millis() as i64;
        let grace_ms = self.config.tick_interval.as_millis() as i64;

        let mut groups = self.groups.lock().await;
        for job in jobs {
            match job.state {
                JobState::Running => {
                    let agent_ok = job
                        .assigned_agent
                        .as_ref()
                        .and_then(|id| agents.get(id))
                        .map(|a| {
                            a.is_live(self.config.liveness_ttl)
                                && a.current_job.as_deref() == Some(job.id.as_str())
                        })
                        .unwrap_or(false);
                    let overtime = job
                        .started_at
                        .map(|t| now.signed_duration_since(t).num_milliseconds() > max_runtime_ms)
                        .unwrap_or(true);
                    if !agent_ok || overtime {
                        self.recover_running(&mut groups, job).await?;
                    } else if let Some(agent_id) = &job.assigned_agent {
                        groups.ensure(GroupKey::new(agent_id, &job.build), job.id.clone());
                    }
                }
                JobState::QueuedForGroup => {
                    if groups.key_for_job(&job.id).is_none() {
                        let mut job = job;
                        tracing::info!(job_id = %job.id, "Re-queuing orphaned grouped job");
                        self.jobs.revert_to_pending(&mut job).await?;
                        self.queues.append(job.priority, &job.id).await?;
                    }
                }
                JobState::Pending => {
                    let age_ms = now.signed_duration_since(job.updated_at).num_milliseconds();
                    if !queued.contains(&job.id)
                        && age_ms > grace_ms
                        && groups.key_for_job(&job.id).is_none()
                    {
                        tracing::info!(job_id = %job.id, "Re-queuing stranded pending job");
                        self.queues.append(job.priority, &job.id).await?;
                    }
                }
                _ => {}
            }
        }
        drop(groups);

        // Invariant repair: a live busy agent must point at a job that is
        // running on it. Dead agents are left alone; touching them would
        // refresh last_seen and revive them.
        for agent in agents.values() {
            if agent.state != AgentState::Busy || !agent.is_live(self.config.liveness_ttl) {
                continue;
            }
            let bound = match &agent.current_job {
                Some(job_id) => self
                    .jobs
                    .try_get(job_id)
                    .await?
                    .map(|j| {
                        j.state == JobState::Running
                            && j.assigned_agent.as_deref() == Some(agent.id.as_str())
                    })
                    .unwrap_or(false),
                None => false,
            };
            if !bound {
                tracing::info!(agent_id = %agent.id, "Releasing busy agent with no running job");
                match self
                    .agents
                    .set_state(&agent.id, AgentState::Idle, None)
                    .await
                {
                    Ok(_) | Err(GridError::NotFound(_)) => {}
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(())
    }

    /// Revert a crashed running job and every member of its group.
    async fn recover_running(&self, groups: &mut GroupTable, mut job: Job) -> Result<()> {
        if let Some(agent_id) = job.assigned_agent.clone() {
            let key = GroupKey::new(&agent_id, &job.build);
            if let Some(group) = groups.remove(&key) {
                for member in group.jobs {
                    if member == job.id {
                        continue;
                    }
                    if let Some(mut waiting) = self.jobs.try_get(&member).await? {
                        if waiting.state == JobState::QueuedForGroup {
                            self.jobs.revert_to_pending(&mut waiting).await?;
                            self.queues.append(waiting.priority, &waiting.id).await?;
                        }
                    }
                }
            }
        }
        tracing::warn!(
            job_id = %job.id,
            agent = ?job.assigned_agent,
            "Re-queuing running job with no healthy agent"
        );
        self.jobs.revert_to_pending(&mut job).await?;
        self.queues.append(job.priority, &job.id).await?;
        Ok(())
    }

    /// Housekeeping: drop affinity groups that sat non-processing past the
    /// idle ceiling, re-queuing their members.
    pub async fn sweep_groups(&self) -> Result<()> {
        let removed = {
            let mut groups = self.groups.lock().await;
            groups.sweep_idle(self.config.group_max_idle)
        };
        for (key, members) in removed {
            tracing::info!(group = %key, jobs = members.len(), "Dropped idle affinity group");
            for id in members {
                if let Some(mut job) = self.jobs.try_get(&id).await? {
                    if job.state == JobState::QueuedForGroup {
                        self.jobs.revert_to_pending(&mut job).await?;
                        self.queues.append(job.priority, &job.id).await?;
                    }
                }
            }
        }
        Ok(())
    }
}
