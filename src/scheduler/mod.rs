//! The scheduling and dispatch engine.
//!
//! - [`job`] / [`registry`]: job records, the state machine, and persistence
//! - [`agent`]: worker registration, heartbeats, and liveness
//! - [`queue`]: the three priority FIFO lists
//! - [`group`]: in-memory build-affinity groups
//! - [`assigner`]: the periodic matcher and reconciliation sweep
//! - [`lifecycle`]: claim, completion, and retry handling

pub mod agent;
pub mod assigner;
pub mod group;
pub mod job;
pub mod lifecycle;
pub mod queue;
pub mod registry;

pub use agent::{Agent, AgentRegistry, AgentState};
pub use assigner::Assigner;
pub use group::{AffinityGroup, GroupKey, GroupTable, SharedGroups};
pub use job::{Job, JobPatch, JobState, Priority, Target};
pub use lifecycle::{CompletionReport, Lifecycle};
pub use queue::PriorityQueues;
pub use registry::{JobFilter, JobRegistry, SubmitRequest};
