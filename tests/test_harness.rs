//! Shared helpers for orchestrator tests.
//!
//! Provides a fast-timeout configuration, constructors wired to the
//! in-memory store, and polling helpers for the tests that run the
//! background loops.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use testgrid::config::OrchestratorConfig;
use testgrid::orchestrator::Orchestrator;
use testgrid::scheduler::{Agent, CompletionReport, SubmitRequest, Target};
use testgrid::store::MemoryStore;

/// Config with short windows so tests never wait on production timeouts.
/// Liveness and runtime ceilings stay comfortably above test duration;
/// tests that exercise them build their own config.
pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        tick_interval: Duration::from_millis(20),
        liveness_ttl: Duration::from_secs(5),
        agent_record_ttl: Duration::from_secs(60),
        job_record_ttl: Duration::from_secs(3600),
        group_max_idle: Duration::from_secs(30),
        job_max_runtime: Duration::from_secs(60),
        max_attempts: 3,
        ..Default::default()
    }
}

pub fn orchestrator() -> Orchestrator {
    orchestrator_with(test_config()).0
}

/// Build an orchestrator and keep a handle on its store, for tests that
/// need to poke at raw keys or simulate a restart against the same state.
pub fn orchestrator_with(config: OrchestratorConfig) -> (Orchestrator, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (Orchestrator::new(config, store.clone()), store)
}

pub fn submit_req(tenant: &str, build: &str, artifact: &str) -> SubmitRequest {
    SubmitRequest {
        tenant: tenant.to_string(),
        build: build.to_string(),
        artifact: artifact.to_string(),
        priority: None,
        target: None,
        id: None,
    }
}

pub async fn register_agent(orchestrator: &Orchestrator, name: &str, caps: &[Target]) -> Agent {
    orchestrator
        .register_agent(name, caps.to_vec(), HashMap::new())
        .await
        .expect("agent registration should succeed")
}

pub fn success_report() -> CompletionReport {
    CompletionReport {
        success: true,
        error: None,
        result: None,
    }
}

pub fn failure_report(error: &str) -> CompletionReport {
    CompletionReport {
        success: false,
        error: Some(error.to_string()),
        result: None,
    }
}

/// Wait for a condition to become true with timeout.
pub async fn wait_for<F, Fut>(
    condition: F,
    timeout_duration: Duration,
    poll_interval: Duration,
) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout_duration {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

/// Assert a condition eventually becomes true.
pub async fn assert_eventually<F, Fut>(condition: F, timeout_duration: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout_duration, Duration::from_millis(10)).await;
    assert!(result, "{}", message);
}
