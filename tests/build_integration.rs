//! Build orchestration integration tests
//!
//! Drives the orchestrator end to end against scripted collaborators:
//! happy-path builds, batch-aborting validation failures, markdown
//! timeouts that fail one segment while its siblings proceed, and
//! partial resynchronization failures.

#[allow(dead_code)]
mod common;

use common::{
    failed_mirror_topology, primary_only_topology, scripted_services, test_options,
    ScriptedExecutor, ScriptedFaultDetector, ScriptedProbe, ScriptedResync,
};
use mirrorgrid::{
    BuildOrchestrator, FaultCode, MirrorBuildRequest, MirrorError, MirrorPlanner, Segment,
    SegmentMode, SegmentRole, SegmentStatus,
};

fn data_dirs(count: usize) -> Vec<std::path::PathBuf> {
    (0..count)
        .map(|i| std::path::PathBuf::from(format!("/data/mirror{}", i)))
        .collect()
}

#[tokio::test]
async fn test_add_mirrors_end_to_end() {
    let planner =
        MirrorPlanner::new(primary_only_topology(3, 2), data_dirs(2), 1000).expect("planner");
    let plan = planner.group_mirrors().expect("plan");
    let mut topology = plan.topology.clone();

    let harness = scripted_services(
        ScriptedExecutor::default(),
        ScriptedFaultDetector::default(),
        ScriptedProbe::default(),
        ScriptedResync::default(),
    );
    let orchestrator = BuildOrchestrator::new(plan.requests, harness.services, test_options());
    let batch = orchestrator.build_mirrors(&mut topology).await.expect("batch");

    assert!(batch.success);
    assert_eq!(batch.results.len(), 6);

    // Fresh adds have no failed segments: no stop commands, only starts.
    assert_eq!(harness.executor.command_count(), 6);
    for (_, cmd) in harness.executor.log.lock().iter() {
        assert!(cmd.contains("start"), "unexpected command: {}", cmd);
    }

    // Every mirror was fully copied, and the topology was committed once
    // with every new mirror forced to the mirror role.
    assert_eq!(harness.resync.calls.lock().len(), 6);
    assert!(harness.resync.calls.lock().iter().all(|(_, full)| *full));
    assert_eq!(harness.config_store.commit_count(), 1);

    let commits = harness.config_store.commits.lock();
    let (committed, forced) = &commits[0];
    assert_eq!(forced.len(), 6);
    assert!(forced.values().all(|r| *r == SegmentRole::Mirror));
    for dbid in forced.keys() {
        let mirror = committed.get(*dbid).expect("committed mirror");
        assert_eq!(mirror.status, SegmentStatus::Down);
        assert_eq!(mirror.mode, SegmentMode::NotInSync);
    }
}

#[tokio::test]
async fn test_recover_in_place_stops_and_waits() {
    let mut topology = failed_mirror_topology(SegmentStatus::Up);
    let failed = topology.get(3).expect("mirror").clone();
    let live = topology.get(2).expect("primary").clone();
    let request =
        MirrorBuildRequest::recover_in_place(failed.clone(), live, false).expect("request");

    // The failed process still answers the probe, so it must be stopped.
    let mut probe = ScriptedProbe::default();
    probe.running.insert((failed.hostname.clone(), failed.port));

    let harness = scripted_services(
        ScriptedExecutor::default(),
        ScriptedFaultDetector::default(),
        probe,
        ScriptedResync::default(),
    );
    let orchestrator = BuildOrchestrator::new(vec![request], harness.services, test_options());
    let batch = orchestrator.build_mirrors(&mut topology).await.expect("batch");

    assert!(batch.success);
    let on_host = harness.executor.commands_on("sdw2");
    assert!(on_host.iter().any(|c| c.contains("stop")), "missing stop: {:?}", on_host);
    assert!(on_host.iter().any(|c| c.contains("start")), "missing start: {:?}", on_host);

    // Incremental recovery, and the live primary is now resynchronizing.
    assert_eq!(harness.resync.calls.lock().as_slice(), &[(3, false)]);
    assert_eq!(topology.get(2).expect("primary").mode, SegmentMode::Resyncing);
}

#[tokio::test]
async fn test_failover_validation_aborts_before_any_command() {
    // The failed segment was left in the new configuration: the batch must
    // abort during validation with no remote commands issued.
    let mut topology = failed_mirror_topology(SegmentStatus::Down);
    let failed = topology.get(3).expect("mirror").clone();
    let live = topology.get(2).expect("primary").clone();
    let target = Segment::new_mirror(3, 0, "sdw3", "sdw3", 41000, "/data/mirror0");
    let request =
        MirrorBuildRequest::failover_to_new(failed, live, target).expect("request");

    let harness = scripted_services(
        ScriptedExecutor::default(),
        ScriptedFaultDetector::default(),
        ScriptedProbe::default(),
        ScriptedResync::default(),
    );
    let orchestrator = BuildOrchestrator::new(vec![request], harness.services, test_options());
    let err = orchestrator
        .build_mirrors(&mut topology)
        .await
        .expect_err("validation must fail");

    assert!(matches!(err, MirrorError::Validation(_)));
    assert_eq!(harness.executor.command_count(), 0);
    assert!(harness.resync.calls.lock().is_empty());
    assert_eq!(harness.config_store.commit_count(), 0);
}

#[tokio::test]
async fn test_failover_to_new_location() {
    let mut topology = failed_mirror_topology(SegmentStatus::Down);
    let failed = topology.get(3).expect("mirror").clone();
    let live = topology.get(2).expect("primary").clone();
    let mut target = failed.clone();
    target.hostname = "sdw3".to_string();
    target.address = "sdw3".to_string();
    target.role = SegmentRole::Primary;
    topology.replace_segment(target.clone()).expect("swap in target");
    let request =
        MirrorBuildRequest::failover_to_new(failed, live, target).expect("request");
    assert!(request.is_full_synchronization());

    let harness = scripted_services(
        ScriptedExecutor::default(),
        ScriptedFaultDetector::default(),
        ScriptedProbe::default(),
        ScriptedResync::default(),
    );
    let orchestrator = BuildOrchestrator::new(vec![request], harness.services, test_options());
    let batch = orchestrator.build_mirrors(&mut topology).await.expect("batch");

    assert!(batch.success);
    // The rebuilt segment starts on the spare host and is committed with
    // the primary role forced.
    assert!(harness
        .executor
        .commands_on("sdw3")
        .iter()
        .any(|c| c.contains("start")));
    let commits = harness.config_store.commits.lock();
    assert_eq!(commits[0].1.get(&3), Some(&SegmentRole::Primary));
}

#[tokio::test]
async fn test_markdown_timeout_fails_one_segment_not_the_batch() {
    // Two failed mirrors on separate contents; the fault detector never
    // observes dbid 5 down.
    let segments = vec![
        Segment::new_primary(2, 0, "sdw1", "sdw1", 40000, "/data/primary0"),
        {
            let mut m = Segment::new_mirror(3, 0, "sdw2", "sdw2", 41000, "/data/mirror0");
            m.status = SegmentStatus::Up;
            m
        },
        Segment::new_primary(4, 1, "sdw2", "sdw2", 40000, "/data/primary1"),
        {
            let mut m = Segment::new_mirror(5, 1, "sdw1", "sdw1", 41000, "/data/mirror1");
            m.status = SegmentStatus::Up;
            m
        },
    ];
    let mut topology = mirrorgrid::ClusterTopology::new(segments).expect("topology");

    let mut requests = Vec::new();
    for (failed_dbid, live_dbid) in [(3, 2), (5, 4)] {
        let failed = topology.get(failed_dbid).expect("failed").clone();
        let live = topology.get(live_dbid).expect("live").clone();
        requests.push(MirrorBuildRequest::recover_in_place(failed, live, true).expect("request"));
    }

    let mut fault_detector = ScriptedFaultDetector::default();
    fault_detector.never_down.insert(5);

    let harness = scripted_services(
        ScriptedExecutor::default(),
        fault_detector,
        ScriptedProbe::default(),
        ScriptedResync::default(),
    );
    let orchestrator = BuildOrchestrator::new(requests, harness.services, test_options());
    let batch = orchestrator.build_mirrors(&mut topology).await.expect("batch");

    assert!(!batch.success);
    let by_dbid = |dbid| {
        batch
            .results
            .iter()
            .find(|r| r.dbid == dbid)
            .expect("result")
            .clone()
    };
    assert!(by_dbid(3).success);
    let timed_out = by_dbid(5);
    assert!(!timed_out.success);
    assert_eq!(timed_out.fault_code, Some(FaultCode::MarkdownTimeout));

    // The timed-out segment was never resynchronized or started; its
    // sibling completed both.
    assert_eq!(harness.resync.calls.lock().as_slice(), &[(3, true)]);
    assert!(harness
        .executor
        .commands_on("sdw1")
        .iter()
        .all(|c| !c.contains("start")));
}

#[tokio::test]
async fn test_forced_full_recovery_cleans_abandoned_directories() {
    // Three failed mirrors, two sharing a host; the resync of dbid 5 fails.
    let segments = vec![
        Segment::new_primary(2, 0, "sdw1", "sdw1", 40000, "/data/primary0"),
        {
            let mut m = Segment::new_mirror(3, 0, "sdw2", "sdw2", 41000, "/data/mirror0");
            m.status = SegmentStatus::Down;
            m
        },
        Segment::new_primary(4, 1, "sdw1", "sdw1", 40001, "/data/primary1"),
        {
            let mut m = Segment::new_mirror(5, 1, "sdw2", "sdw2", 41001, "/data/mirror1");
            m.status = SegmentStatus::Down;
            m
        },
        Segment::new_primary(6, 2, "sdw1", "sdw1", 40002, "/data/primary2"),
        {
            let mut m = Segment::new_mirror(7, 2, "sdw3", "sdw3", 41000, "/data/mirror0");
            m.status = SegmentStatus::Down;
            m
        },
    ];
    let mut topology = mirrorgrid::ClusterTopology::new(segments).expect("topology");

    let mut requests = Vec::new();
    for (failed_dbid, live_dbid) in [(3, 2), (5, 4), (7, 6)] {
        let failed = topology.get(failed_dbid).expect("failed").clone();
        let live = topology.get(live_dbid).expect("live").clone();
        requests.push(MirrorBuildRequest::recover_in_place(failed, live, true).expect("request"));
    }

    let mut resync = ScriptedResync::default();
    resync.fail_dbids.insert(5);

    let harness = scripted_services(
        ScriptedExecutor::default(),
        ScriptedFaultDetector::default(),
        ScriptedProbe::default(),
        resync,
    );
    let orchestrator = BuildOrchestrator::new(requests, harness.services, test_options());
    let batch = orchestrator.build_mirrors(&mut topology).await.expect("batch");
    assert!(!batch.success);

    // Exactly one cleanup command per host with recovered segments, each
    // batching every abandoned directory on that host.
    let cleans: Vec<(String, String)> = harness
        .executor
        .log
        .lock()
        .iter()
        .filter(|(_, cmd)| cmd.contains("clean"))
        .cloned()
        .collect();
    assert_eq!(cleans.len(), 2, "one cleanup command per host: {:?}", cleans);

    let on_sdw2: Vec<&String> = cleans.iter().filter(|(h, _)| h == "sdw2").map(|(_, c)| c).collect();
    assert_eq!(on_sdw2.len(), 1);
    assert!(on_sdw2[0].contains("--data-dir /data/mirror0"));
    // The segment whose resynchronization failed keeps its on-disk state.
    assert!(!on_sdw2[0].contains("/data/mirror1"));

    let on_sdw3: Vec<&String> = cleans.iter().filter(|(h, _)| h == "sdw3").map(|(_, c)| c).collect();
    assert_eq!(on_sdw3.len(), 1);
    assert!(on_sdw3[0].contains("--data-dir /data/mirror0"));
}

#[tokio::test]
async fn test_resync_failure_is_reported_per_segment() {
    let planner =
        MirrorPlanner::new(primary_only_topology(2, 2), data_dirs(2), 1000).expect("planner");
    let plan = planner.spread_mirrors().expect("plan");
    let mut topology = plan.topology.clone();
    let failing_dbid = plan.requests[0].target_segment().dbid;

    let mut resync = ScriptedResync::default();
    resync.fail_dbids.insert(failing_dbid);

    let harness = scripted_services(
        ScriptedExecutor::default(),
        ScriptedFaultDetector::default(),
        ScriptedProbe::default(),
        resync,
    );
    let orchestrator = BuildOrchestrator::new(plan.requests, harness.services, test_options());
    let batch = orchestrator.build_mirrors(&mut topology).await.expect("batch");

    assert!(!batch.success);
    assert_eq!(batch.results.len(), 4);
    for result in &batch.results {
        if result.dbid == failing_dbid {
            assert_eq!(result.fault_code, Some(FaultCode::ResyncFailed));
        } else {
            assert!(result.success);
        }
    }

    // The failed segment is excluded from the committed configuration
    // update and never started.
    let commits = harness.config_store.commits.lock();
    assert!(!commits[0].1.contains_key(&failing_dbid));
    assert_eq!(
        harness
            .executor
            .log
            .lock()
            .iter()
            .filter(|(_, c)| c.contains("start"))
            .count(),
        3
    );
}

#[tokio::test]
async fn test_start_failure_warns_and_records_fault() {
    let planner =
        MirrorPlanner::new(primary_only_topology(2, 1), data_dirs(1), 1000).expect("planner");
    let plan = planner.group_mirrors().expect("plan");
    let mut topology = plan.topology.clone();

    let mut executor = ScriptedExecutor::default();
    executor.fail_marker = Some("start".to_string());

    let harness = scripted_services(
        executor,
        ScriptedFaultDetector::default(),
        ScriptedProbe::default(),
        ScriptedResync::default(),
    );
    let orchestrator = BuildOrchestrator::new(plan.requests, harness.services, test_options());
    let batch = orchestrator.build_mirrors(&mut topology).await.expect("batch");

    assert!(!batch.success);
    assert!(batch
        .results
        .iter()
        .all(|r| r.fault_code == Some(FaultCode::StartFailed)));
    // Configuration was already committed before the start attempts.
    assert_eq!(harness.config_store.commit_count(), 1);
}

#[tokio::test]
async fn test_empty_batch_is_a_no_op() {
    let mut topology = primary_only_topology(2, 1);
    let harness = scripted_services(
        ScriptedExecutor::default(),
        ScriptedFaultDetector::default(),
        ScriptedProbe::default(),
        ScriptedResync::default(),
    );
    let orchestrator = BuildOrchestrator::new(Vec::new(), harness.services, test_options());
    let batch = orchestrator.build_mirrors(&mut topology).await.expect("batch");

    assert!(batch.success);
    assert!(batch.results.is_empty());
    assert_eq!(harness.executor.command_count(), 0);
}
