use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

/// Identifies a build-affinity group: the agent the build is installed on
/// and the build itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub agent_id: String,
    pub build: String,
}

impl GroupKey {
    pub fn new(agent_id: impl Into<String>, build: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            build: build.into(),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.agent_id, self.build)
    }
}

/// An ordered run of same-build jobs reserved on one agent. The head is the
/// job currently running; the rest wait in `queued-for-group`.
#[derive(Debug)]
pub struct AffinityGroup {
    pub jobs: VecDeque<String>,
    pub created_at: DateTime<Utc>,
    pub processing: bool,
}

impl AffinityGroup {
    fn new(head: String) -> Self {
        Self {
            jobs: VecDeque::from([head]),
            created_at: Utc::now(),
            processing: true,
        }
    }

    pub fn head(&self) -> Option<&str> {
        self.jobs.front().map(String::as_str)
    }
}

/// The scheduler's in-memory table of affinity groups.
///
/// The table is process-local and rebuilt lazily by reconciliation after a
/// restart. All access is serialized through [`SharedGroups`]; the tick, the
/// lifecycle driver, and housekeeping never mutate it concurrently.
#[derive(Debug, Default)]
pub struct GroupTable {
    groups: HashMap<GroupKey, AffinityGroup>,
}

/// Single-mutex handle shared by the scheduler paths.
pub type SharedGroups = Arc<Mutex<GroupTable>>;

pub fn shared_groups() -> SharedGroups {
    Arc::new(Mutex::new(GroupTable::default()))
}

impl GroupTable {
    /// Create a group with `head` as its running job. If the group already
    /// exists (an agent-pull claim racing the tick), the job is forced to
    /// the head instead.
    pub fn start(&mut self, key: GroupKey, head: String) {
        match self.groups.get_mut(&key) {
            Some(group) => {
                group.jobs.retain(|id| id != &head);
                group.jobs.push_front(head);
                group.processing = true;
            }
            None => {
                self.groups.insert(key, AffinityGroup::new(head));
            }
        }
    }

    /// Create a singleton group if none exists. Reconciliation uses this to
    /// rebuild the table after a restart.
    pub fn ensure(&mut self, key: GroupKey, head: String) {
        self.groups.entry(key).or_insert_with(|| AffinityGroup::new(head));
    }

    pub fn get(&self, key: &GroupKey) -> Option<&AffinityGroup> {
        self.groups.get(key)
    }

    pub fn get_mut(&mut self, key: &GroupKey) -> Option<&mut AffinityGroup> {
        self.groups.get_mut(key)
    }

    /// First group holding the given build, if any.
    pub fn find_by_build(&self, build: &str) -> Option<GroupKey> {
        self.groups
            .keys()
            .find(|key| key.build == build)
            .cloned()
    }

    /// Append a job at the tail of an existing group.
    pub fn enqueue(&mut self, key: &GroupKey, job_id: String) -> bool {
        match self.groups.get_mut(key) {
            Some(group) => {
                group.jobs.push_back(job_id);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, key: &GroupKey) -> Option<AffinityGroup> {
        self.groups.remove(key)
    }

    /// Drop a job from whichever group holds it. Empty groups are discarded.
    pub fn remove_job(&mut self, job_id: &str) -> Option<GroupKey> {
        let key = self.key_for_job(job_id)?;
        if let Some(group) = self.groups.get_mut(&key) {
            group.jobs.retain(|id| id != job_id);
            if group.jobs.is_empty() {
                self.groups.remove(&key);
            }
        }
        Some(key)
    }

    pub fn key_for_job(&self, job_id: &str) -> Option<GroupKey> {
        self.groups
            .iter()
            .find(|(_, group)| group.jobs.iter().any(|id| id == job_id))
            .map(|(key, _)| key.clone())
    }

    /// Remove non-processing groups older than `max_idle`. Returns the
    /// removed groups with their member job ids so the caller can re-queue
    /// them.
    pub fn sweep_idle(&mut self, max_idle: Duration) -> Vec<(GroupKey, Vec<String>)> {
        let cutoff = Utc::now();
        let stale: Vec<GroupKey> = self
            .groups
            .iter()
            .filter(|(_, group)| {
                !group.processing
                    && cutoff.signed_duration_since(group.created_at).num_milliseconds()
                        > max_idle.as_millis() as i64
            })
            .map(|(key, _)| key.clone())
            .collect();

        stale
            .into_iter()
            .filter_map(|key| {
                self.groups
                    .remove(&key)
                    .map(|group| (key, group.jobs.into_iter().collect()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
