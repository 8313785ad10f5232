use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;

use crate::error::{GridError, Result};
use crate::scheduler::job::{Job, JobPatch, JobState, Priority, Target};
use crate::scheduler::queue::PriorityQueues;
use crate::store::{job_key, StateStore, JOB_PREFIX};

/// A job submission.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    pub tenant: String,
    pub build: String,
    pub artifact: String,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub target: Option<Target>,
    /// Client-supplied id; server-assigned when absent.
    #[serde(default)]
    pub id: Option<String>,
}

/// Filters for listing jobs. All criteria are conjunctive.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobFilter {
    pub tenant: Option<String>,
    pub state: Option<JobState>,
    pub build: Option<String>,
    pub limit: Option<usize>,
}

/// Persistence and state-machine authority for job records.
///
/// Every mutation of a job record goes through [`JobRegistry::apply`], which
/// validates the requested edge and stamps timestamps, so no other component
/// can produce an inconsistent record.
#[derive(Clone)]
pub struct JobRegistry {
    store: Arc<dyn StateStore>,
    queues: PriorityQueues,
    record_ttl: Duration,
}

impl JobRegistry {
    pub fn new(store: Arc<dyn StateStore>, queues: PriorityQueues, record_ttl: Duration) -> Self {
        Self {
            store,
            queues,
            record_ttl,
        }
    }

    /// Validate, persist, and enqueue a new job. The record is written
    /// before the queue append so any reader that observes the queued id can
    /// resolve it. Returns the job and its position in the queue.
    pub async fn submit(&self, req: SubmitRequest) -> Result<(Job, u64)> {
        validate_field("tenant", &req.tenant)?;
        validate_field("build", &req.build)?;
        validate_field("artifact", &req.artifact)?;
        if let Some(id) = &req.id {
            if id.trim().is_empty() {
                return Err(GridError::Validation("Job id must not be empty".into()));
            }
            if self.try_get(id).await?.is_some() {
                return Err(GridError::Conflict(format!("Job already exists: {}", id)));
            }
        }

        let job = Job::new(
            req.id,
            req.tenant,
            req.build,
            req.artifact,
            req.priority.unwrap_or_default(),
            req.target.unwrap_or_default(),
        );
        self.save(&job).await?;
        let position = self.queues.append(job.priority, &job.id).await?;
        tracing::info!(
            job_id = %job.id,
            tenant = %job.tenant,
            build = %job.build,
            priority = %job.priority,
            position,
            "Job submitted"
        );
        Ok((job, position))
    }

    pub async fn get(&self, id: &str) -> Result<Job> {
        self.try_get(id)
            .await?
            .ok_or_else(|| GridError::NotFound(format!("Job not found: {}", id)))
    }

    pub async fn try_get(&self, id: &str) -> Result<Option<Job>> {
        match self.store.get(&job_key(id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// All jobs matching the filter, newest first.
    pub async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let keys = self.store.scan(JOB_PREFIX).await?;
        let mut jobs = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(raw) = self.store.get(&key).await? else {
                continue;
            };
            let job: Job = match serde_json::from_str(&raw) {
                Ok(job) => job,
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "Skipping unreadable job record");
                    continue;
                }
            };
            if let Some(tenant) = &filter.tenant {
                if &job.tenant != tenant {
                    continue;
                }
            }
            if let Some(state) = filter.state {
                if job.state != state {
                    continue;
                }
            }
            if let Some(build) = &filter.build {
                if &job.build != build {
                    continue;
                }
            }
            jobs.push(job);
        }
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }

    /// Cancel a job. Permitted only from `pending` or `running`. A running
    /// job keeps occupying its agent until the agent reports; the late
    /// report is accepted but does not re-open the record.
    pub async fn cancel(&self, id: &str) -> Result<Job> {
        let mut job = self.get(id).await?;
        match job.state {
            JobState::Pending | JobState::Running => {
                self.apply(&mut job, JobState::Cancelled, JobPatch::default())
                    .await?;
                tracing::info!(job_id = %id, "Job cancelled");
                Ok(job)
            }
            state => Err(GridError::IllegalState(format!(
                "Job {} cannot be cancelled from state {}",
                id, state
            ))),
        }
    }

    /// Public transition operation: load, validate the edge, stamp, store.
    pub async fn transition(&self, id: &str, to: JobState, patch: JobPatch) -> Result<Job> {
        let mut job = self.get(id).await?;
        self.apply(&mut job, to, patch).await?;
        Ok(job)
    }

    /// Core transition: the single entry point for timestamp stamping.
    ///
    /// - entering `running` stamps `started_at`
    /// - entering a terminal state stamps `completed_at`
    /// - entering `retrying` increments `attempt`
    /// - entering `pending` clears the assignment fields
    pub(crate) async fn apply(&self, job: &mut Job, to: JobState, patch: JobPatch) -> Result<()> {
        if !job.state.can_transition(to) {
            return Err(GridError::IllegalState(format!(
                "Job {} cannot move from {} to {}",
                job.id, job.state, to
            )));
        }

        let now = Utc::now();
        let from = job.state;
        job.state = to;
        job.updated_at = now;
        match to {
            JobState::Running => job.started_at = Some(now),
            JobState::Retrying => job.attempt += 1,
            JobState::Pending => {
                job.assigned_agent = None;
                job.group_key = None;
                job.started_at = None;
            }
            _ if to.is_terminal() => job.completed_at = Some(now),
            _ => {}
        }
        if let Some(agent) = patch.assigned_agent {
            job.assigned_agent = Some(agent);
        }
        if let Some(group_key) = patch.group_key {
            job.group_key = Some(group_key);
        }
        if let Some(error) = patch.last_error {
            job.last_error = Some(error);
        }
        if let Some(result) = patch.result {
            job.result = Some(result);
        }

        self.save(job).await?;
        tracing::debug!(job_id = %job.id, from = %from, to = %to, "Job transitioned");
        Ok(())
    }

    /// Crash-recovery path used by reconciliation and group teardown: put a
    /// stranded job back to `pending` with its attempt counter untouched.
    /// Bypasses the public edge set, which deliberately has no
    /// `running -> pending` transition.
    pub(crate) async fn revert_to_pending(&self, job: &mut Job) -> Result<()> {
        let from = job.state;
        job.state = JobState::Pending;
        job.updated_at = Utc::now();
        job.assigned_agent = None;
        job.group_key = None;
        job.started_at = None;
        self.save(job).await?;
        tracing::info!(job_id = %job.id, from = %from, "Job reverted to pending");
        Ok(())
    }

    pub(crate) async fn save(&self, job: &Job) -> Result<()> {
        let raw = serde_json::to_string(job)?;
        self.store
            .put(&job_key(&job.id), &raw, Some(self.record_ttl))
            .await
    }
}

fn validate_field(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(GridError::Validation(format!(
            "Field '{}' must not be empty",
            name
        )));
    }
    Ok(())
}
