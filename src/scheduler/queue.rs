use std::sync::Arc;

use crate::error::Result;
use crate::scheduler::job::Priority;
use crate::store::{StateStore, QUEUE_PREFIX};

pub fn queue_key(priority: Priority) -> String {
    format!("{}{}", QUEUE_PREFIX, priority)
}

/// The three FIFO lists of job ids, one per priority.
///
/// The scheduler does not rely on the stored order for fairness: each tick
/// snapshots a queue, sorts in memory, drains the list, and re-appends what
/// it could not place. Concurrent submitters only ever append to the tail.
#[derive(Clone)]
pub struct PriorityQueues {
    store: Arc<dyn StateStore>,
}

impl PriorityQueues {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Append a job id at the tail. Returns the new queue length, which
    /// submit reports back as the queue position.
    pub async fn append(&self, priority: Priority, job_id: &str) -> Result<u64> {
        self.store
            .list_push_tail(&queue_key(priority), job_id)
            .await
    }

    pub async fn pop(&self, priority: Priority) -> Result<Option<String>> {
        self.store.list_pop_head(&queue_key(priority)).await
    }

    pub async fn len(&self, priority: Priority) -> Result<u64> {
        self.store.list_len(&queue_key(priority)).await
    }

    pub async fn snapshot(&self, priority: Priority) -> Result<Vec<String>> {
        self.store.list_snapshot(&queue_key(priority)).await
    }

    /// Pop until empty, returning everything in head-first order.
    pub async fn drain(&self, priority: Priority) -> Result<Vec<String>> {
        let mut drained = Vec::new();
        while let Some(id) = self.pop(priority).await? {
            drained.push(id);
        }
        Ok(drained)
    }
}
