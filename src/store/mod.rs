//! Key-value store abstraction.
//!
//! All durable state (job records, agent records, the three priority lists)
//! lives behind [`StateStore`]. The trait mirrors the small Redis subset the
//! orchestrator needs: single-key reads and writes with optional expiry, a
//! prefix scan, and atomic list operations. The core never assumes multi-key
//! transactions; correctness comes from monotone transitions plus the
//! reconciliation sweep in the scheduler.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub mod memory;
pub mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Key prefix for job records.
pub const JOB_PREFIX: &str = "job:";
/// Key prefix for agent records.
pub const AGENT_PREFIX: &str = "agent:";
/// Key prefix for priority lists.
pub const QUEUE_PREFIX: &str = "queue:";

pub fn job_key(id: &str) -> String {
    format!("{}{}", JOB_PREFIX, id)
}

pub fn agent_key(id: &str) -> String {
    format!("{}{}", AGENT_PREFIX, id)
}

/// Backend-agnostic store interface.
///
/// Every operation is individually atomic. A missing key in `get` is not an
/// error at this layer; the registries decide which absences mean `NotFound`.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Upsert a value, optionally with an expiry.
    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// All keys starting with `prefix`.
    async fn scan(&self, prefix: &str) -> Result<Vec<String>>;

    /// Append to the tail of a list. Returns the new list length.
    async fn list_push_tail(&self, key: &str, value: &str) -> Result<u64>;

    /// Pop from the head of a list.
    async fn list_pop_head(&self, key: &str) -> Result<Option<String>>;

    async fn list_len(&self, key: &str) -> Result<u64>;

    /// Read the whole list without mutating it, head first.
    async fn list_snapshot(&self, key: &str) -> Result<Vec<String>>;

    /// Backend liveness probe.
    async fn ping(&self) -> Result<()>;
}
