//! Tests for build-affinity grouping: same-build jobs serialize on one
//! agent so the build is installed once.

mod test_harness;

use test_harness::{orchestrator, register_agent, submit_req, success_report};
use testgrid::scheduler::{AgentState, JobPatch, JobState, Priority, Target};

#[tokio::test]
async fn test_same_build_jobs_group_in_one_tick() {
    let orch = orchestrator();
    let agent = register_agent(&orch, "rack-1", &[Target::Emulator]).await;

    let (j1, _) = orch.submit(submit_req("t1", "b1", "one")).await.unwrap();
    let (j2, _) = orch.submit(submit_req("t1", "b1", "two")).await.unwrap();
    let (j3, _) = orch.submit(submit_req("t1", "b1", "three")).await.unwrap();

    orch.tick().await.unwrap();

    let first = orch.get_job(&j1.id).await.unwrap();
    assert_eq!(first.state, JobState::Running);
    assert_eq!(first.assigned_agent.as_deref(), Some(agent.id.as_str()));

    for id in [&j2.id, &j3.id] {
        let waiting = orch.get_job(id).await.unwrap();
        assert_eq!(waiting.state, JobState::QueuedForGroup);
        assert_eq!(
            waiting.group_key.as_deref(),
            Some(format!("{}/b1", agent.id).as_str())
        );
    }

    // Grouped jobs are out of the priority queue
    assert!(orch.queue_snapshot(Priority::Medium).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_group_advances_without_idling_agent() {
    let orch = orchestrator();
    let agent = register_agent(&orch, "rack-1", &[Target::Emulator]).await;

    let (j1, _) = orch.submit(submit_req("t1", "b1", "one")).await.unwrap();
    let (j2, _) = orch.submit(submit_req("t1", "b1", "two")).await.unwrap();
    orch.tick().await.unwrap();

    orch.complete_job(&agent.id, &j1.id, success_report())
        .await
        .unwrap();

    // The next group member is promoted directly; the agent never idles.
    let promoted = orch.get_job(&j2.id).await.unwrap();
    assert_eq!(promoted.state, JobState::Running);
    assert!(promoted.started_at.is_some());

    let agents = orch.list_agents().await.unwrap();
    assert_eq!(agents[0].state, AgentState::Busy);
    assert_eq!(agents[0].current_job.as_deref(), Some(j2.id.as_str()));

    orch.complete_job(&agent.id, &j2.id, success_report())
        .await
        .unwrap();
    let agents = orch.list_agents().await.unwrap();
    assert_eq!(agents[0].state, AgentState::Idle);
    assert!(agents[0].current_job.is_none());
}

#[tokio::test]
async fn test_attach_to_group_on_later_tick() {
    let orch = orchestrator();
    let agent = register_agent(&orch, "rack-1", &[Target::Emulator]).await;
    register_agent(&orch, "rack-2", &[Target::Emulator]).await;

    let (j1, _) = orch.submit(submit_req("t1", "b1", "one")).await.unwrap();
    orch.tick().await.unwrap();
    assert_eq!(
        orch.get_job(&j1.id).await.unwrap().assigned_agent.as_deref(),
        Some(agent.id.as_str())
    );

    // Submitted after the group started processing: still attaches instead
    // of claiming the second idle agent.
    let (j2, _) = orch.submit(submit_req("t1", "b1", "two")).await.unwrap();
    orch.tick().await.unwrap();

    let attached = orch.get_job(&j2.id).await.unwrap();
    assert_eq!(attached.state, JobState::QueuedForGroup);
    assert_eq!(
        attached.group_key.as_deref(),
        Some(format!("{}/b1", agent.id).as_str())
    );
}

#[tokio::test]
async fn test_different_build_waits_for_agent() {
    let orch = orchestrator();
    register_agent(&orch, "rack-1", &[Target::Emulator]).await;

    let (j1, _) = orch.submit(submit_req("t1", "b1", "one")).await.unwrap();
    let (j2, _) = orch.submit(submit_req("t1", "b2", "two")).await.unwrap();
    orch.tick().await.unwrap();

    assert_eq!(orch.get_job(&j1.id).await.unwrap().state, JobState::Running);
    // Different build, agent busy: stays pending in its queue.
    let other = orch.get_job(&j2.id).await.unwrap();
    assert_eq!(other.state, JobState::Pending);
    let queued = orch.queue_snapshot(Priority::Medium).await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].id, j2.id);
}

#[tokio::test]
async fn test_group_skips_cancelled_member() {
    let orch = orchestrator();
    let agent = register_agent(&orch, "rack-1", &[Target::Emulator]).await;

    let (j1, _) = orch.submit(submit_req("t1", "b1", "one")).await.unwrap();
    let (j2, _) = orch.submit(submit_req("t1", "b1", "two")).await.unwrap();
    let (j3, _) = orch.submit(submit_req("t1", "b1", "three")).await.unwrap();
    orch.tick().await.unwrap();

    // Cancel the middle member while it waits in the group.
    orch.transition_job(&j2.id, JobState::Cancelled, JobPatch::default())
        .await
        .unwrap();

    orch.complete_job(&agent.id, &j1.id, success_report())
        .await
        .unwrap();

    // Promotion skipped the cancelled member and ran the third job.
    assert_eq!(
        orch.get_job(&j2.id).await.unwrap().state,
        JobState::Cancelled
    );
    let third = orch.get_job(&j3.id).await.unwrap();
    assert_eq!(third.state, JobState::Running);

    orch.complete_job(&agent.id, &j3.id, success_report())
        .await
        .unwrap();
    let agents = orch.list_agents().await.unwrap();
    assert_eq!(agents[0].state, AgentState::Idle);
}
