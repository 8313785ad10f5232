//! Tests for agent registration, heartbeats, state changes, and liveness.

mod test_harness;

use std::collections::HashMap;
use std::time::Duration;

use test_harness::{orchestrator, orchestrator_with, register_agent, test_config};
use testgrid::error::GridError;
use testgrid::scheduler::{AgentState, Target};

#[tokio::test]
async fn test_register_defaults() {
    let orch = orchestrator();

    let agent = register_agent(&orch, "rack-1", &[Target::Emulator, Target::Device]).await;
    assert_eq!(agent.state, AgentState::Idle);
    assert!(agent.current_job.is_none());
    assert_eq!(agent.last_seen, agent.registered_at);
    assert!(agent.can_service(Target::Emulator));
    assert!(!agent.can_service(Target::Cloud));
}

#[tokio::test]
async fn test_register_validation() {
    let orch = orchestrator();

    let err = orch
        .register_agent("", vec![Target::Emulator], HashMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GridError::Validation(_)));

    let err = orch
        .register_agent("rack-1", vec![], HashMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GridError::Validation(_)));
}

#[tokio::test]
async fn test_heartbeat_touches_only_last_seen() {
    let orch = orchestrator();

    let agent = register_agent(&orch, "rack-1", &[Target::Emulator]).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let after = orch.heartbeat_agent(&agent.id).await.unwrap();
    assert!(after.last_seen > agent.last_seen);
    assert_eq!(after.name, agent.name);
    assert_eq!(after.state, agent.state);
    assert_eq!(after.capabilities, agent.capabilities);
    assert_eq!(after.current_job, agent.current_job);
    assert_eq!(after.registered_at, agent.registered_at);

    // Idempotent: a second heartbeat changes nothing but last_seen
    let again = orch.heartbeat_agent(&agent.id).await.unwrap();
    assert_eq!(again.state, after.state);
    assert_eq!(again.capabilities, after.capabilities);
}

#[tokio::test]
async fn test_heartbeat_unknown_agent() {
    let orch = orchestrator();
    let err = orch.heartbeat_agent("nope").await.unwrap_err();
    assert!(matches!(err, GridError::NotFound(_)));
}

#[tokio::test]
async fn test_set_state_rules() {
    let orch = orchestrator();
    let agent = register_agent(&orch, "rack-1", &[Target::Emulator]).await;

    // busy requires a current job
    let err = orch
        .set_agent_state(&agent.id, AgentState::Busy, None)
        .await
        .unwrap_err();
    assert!(matches!(err, GridError::Validation(_)));

    // non-busy states must not carry one
    let err = orch
        .set_agent_state(&agent.id, AgentState::Idle, Some("j1".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, GridError::Validation(_)));

    let busy = orch
        .set_agent_state(&agent.id, AgentState::Busy, Some("j1".to_string()))
        .await
        .unwrap();
    assert_eq!(busy.state, AgentState::Busy);
    assert_eq!(busy.current_job.as_deref(), Some("j1"));

    let maintenance = orch
        .set_agent_state(&agent.id, AgentState::Maintenance, None)
        .await
        .unwrap();
    assert_eq!(maintenance.state, AgentState::Maintenance);
    assert!(maintenance.current_job.is_none());
}

#[tokio::test]
async fn test_live_agents_excludes_stale() {
    let mut config = test_config();
    config.liveness_ttl = Duration::from_millis(150);
    let (orch, _store) = orchestrator_with(config);

    let fresh = register_agent(&orch, "fresh", &[Target::Emulator]).await;
    let stale = register_agent(&orch, "stale", &[Target::Emulator]).await;

    tokio::time::sleep(Duration::from_millis(250)).await;
    orch.heartbeat_agent(&fresh.id).await.unwrap();

    let live = orch.list_agents().await.unwrap();
    let ids: Vec<&str> = live.iter().map(|a| a.id.as_str()).collect();
    assert!(ids.contains(&fresh.id.as_str()));
    assert!(!ids.contains(&stale.id.as_str()));
}

#[tokio::test]
async fn test_agent_record_expires() {
    let mut config = test_config();
    config.agent_record_ttl = Duration::from_millis(100);
    let (orch, _store) = orchestrator_with(config);

    let agent = register_agent(&orch, "rack-1", &[Target::Emulator]).await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    let err = orch.heartbeat_agent(&agent.id).await.unwrap_err();
    assert!(matches!(err, GridError::NotFound(_)));
}
