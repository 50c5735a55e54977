use super::*;
use crate::test_utils::{Harness, MemoryStore, datacenter_with_rack, harness, test_datacenter, test_task};
use crds::{
    CleanupTaskSpec, DatacenterPhase, DatacenterStatus, DecommissionTaskSpec, RebuildTaskSpec, RepairTaskSpec,
    TaskKind,
};
use sidecar_client::SidecarCall;
use std::collections::BTreeMap;

fn dc_key() -> ObjectKey {
    ObjectKey::new("default", "dc1")
}

fn task_key(name: &str) -> ObjectKey {
    ObjectKey::new("default", name)
}

fn reconciler(h: &Harness) -> TaskReconciler {
    TaskReconciler::new(Arc::clone(&h.ctx))
}

fn task_status(h: &Harness, name: &str) -> TaskStatus {
    h.store.task(&task_key(name)).status.unwrap_or_default()
}

fn repair() -> TaskKind {
    TaskKind::Repair(RepairTaskSpec::default())
}

fn cleanup() -> TaskKind {
    TaskKind::Cleanup(CleanupTaskSpec::default())
}

fn set_phase(h: &Harness, phase: DatacenterPhase) {
    h.store.edit_datacenter(&dc_key(), |dc| {
        if let Some(status) = dc.status.as_mut() {
            status.phase = phase;
        }
    });
}

#[tokio::test]
async fn test_task_waits_for_eligible_phase_then_runs_under_lock() {
    let store = MemoryStore::new();
    store.insert_datacenter(datacenter_with_rack(DatacenterPhase::Updating, 2));
    store.insert_task(test_task("repair-1", "dc1", repair()));
    let h = harness(store);
    let r = reconciler(&h);

    let outcome = r.reconcile(&task_key("repair-1")).await.unwrap();
    assert_eq!(outcome.phase, TaskPhase::Waiting);
    assert_eq!(outcome.requeue, Some(h.ctx.config.waiting_task_requeue));
    assert_eq!(task_status(&h, "repair-1").last_message.as_deref(), Some("datacenter is Updating"));
    assert!(h.store.status_writes().is_empty());
    assert!(h.sidecar.calls().is_empty());

    set_phase(&h, DatacenterPhase::Running);
    let outcome = r.reconcile(&task_key("repair-1")).await.unwrap();
    assert_eq!(outcome.phase, TaskPhase::Succeed);
    assert_eq!(outcome.requeue, None);
    assert!(!outcome.retrigger_datacenter);

    let writes = h.store.status_writes();
    assert_eq!(writes.len(), 2);
    assert!(writes[0].block.is_locked());
    assert!(writes[0].block.holds(BlockReason::Repair));
    assert_eq!(writes[0].current_task.as_deref(), Some("repair-1"));
    assert!(!writes[1].block.is_locked());
    assert!(writes[1].current_task.is_none());

    let status = task_status(&h, "repair-1");
    assert_eq!(status.pods.len(), 2);
    assert!(status.pods.values().all(|p| *p == TaskPhase::Succeed));
    assert!(status.start_time.is_some());
    assert!(status.end_time.is_some());
    assert_eq!(h.sidecar.calls().len(), 2);
}

#[tokio::test]
async fn test_task_waits_until_datacenter_has_a_ready_node() {
    let store = MemoryStore::new();
    let mut dc = test_datacenter("dc1", 2);
    dc.status = Some(DatacenterStatus::default());
    store.insert_datacenter(dc);
    store.insert_task(test_task("repair-1", "dc1", repair()));
    let h = harness(store);
    let r = reconciler(&h);

    let outcome = r.reconcile(&task_key("repair-1")).await.unwrap();
    assert_eq!(outcome.phase, TaskPhase::Waiting);
    assert_eq!(outcome.requeue, Some(h.ctx.config.waiting_task_requeue));
    let status = task_status(&h, "repair-1");
    assert_eq!(status.last_message.as_deref(), Some("datacenter dc1 has no ready node"));
    assert!(status.end_time.is_none());
    assert!(h.store.status_writes().is_empty());
    assert!(h.sidecar.calls().is_empty());

    let ready = datacenter_with_rack(DatacenterPhase::Creating, 2).status;
    h.store.edit_datacenter(&dc_key(), |dc| dc.status = ready);
    let outcome = r.reconcile(&task_key("repair-1")).await.unwrap();
    assert_eq!(outcome.phase, TaskPhase::Succeed);
    assert_eq!(h.sidecar.calls().len(), 2);
}

#[tokio::test]
async fn test_second_task_waits_for_lock_release() {
    let store = MemoryStore::new();
    store.insert_datacenter(datacenter_with_rack(DatacenterPhase::Running, 2));
    store.insert_task(test_task("cleanup-1", "dc1", cleanup()));
    let h = harness(store);
    let r = reconciler(&h);

    // repair-1 is mid-flight
    let state = lock::acquire(h.store.as_ref(), &dc_key(), "repair-1", BlockReason::Repair)
        .await
        .unwrap();
    assert_eq!(state, LockState::Acquired);

    let outcome = r.reconcile(&task_key("cleanup-1")).await.unwrap();
    assert_eq!(outcome.phase, TaskPhase::Waiting);
    assert!(outcome.requeue.is_some());
    assert_eq!(task_status(&h, "cleanup-1").last_message.as_deref(), Some("waiting for repair-1"));
    assert!(h.sidecar.calls().is_empty());
    let dc_status = h.store.datacenter(&dc_key()).status.unwrap();
    assert_eq!(dc_status.block.reasons.len(), 1);
    assert!(dc_status.block.holds(BlockReason::Repair));

    lock::release(h.store.as_ref(), &dc_key(), "repair-1", BlockReason::Repair)
        .await
        .unwrap();
    let outcome = r.reconcile(&task_key("cleanup-1")).await.unwrap();
    assert_eq!(outcome.phase, TaskPhase::Succeed);
    assert!(task_status(&h, "cleanup-1").last_message.is_none());
    assert!(h.sidecar.calls().iter().all(|c| matches!(c, SidecarCall::Cleanup { .. })));
    assert!(!h.store.datacenter(&dc_key()).status.unwrap().block.is_locked());
}

#[tokio::test]
async fn test_invalid_task_is_ignored() {
    let store = MemoryStore::new();
    store.insert_datacenter(datacenter_with_rack(DatacenterPhase::Running, 2));
    let kind = TaskKind::Rebuild(RebuildTaskSpec {
        src_dc_name: "dc1".to_string(),
        keyspace: None,
    });
    store.insert_task(test_task("rebuild-1", "dc1", kind));
    let h = harness(store);

    let outcome = reconciler(&h).reconcile(&task_key("rebuild-1")).await.unwrap();

    assert_eq!(outcome.phase, TaskPhase::Ignored);
    assert_eq!(outcome.requeue, None);
    let status = task_status(&h, "rebuild-1");
    assert!(status.last_message.unwrap().contains("source datacenter"));
    assert!(status.end_time.is_some());
    assert!(h.store.status_writes().is_empty());
}

#[tokio::test]
async fn test_task_of_unknown_datacenter_is_ignored() {
    let store = MemoryStore::new();
    store.insert_task(test_task("repair-1", "missing", repair()));
    let h = harness(store);

    let outcome = reconciler(&h).reconcile(&task_key("repair-1")).await.unwrap();

    assert_eq!(outcome.phase, TaskPhase::Ignored);
    assert_eq!(
        task_status(&h, "repair-1").last_message.as_deref(),
        Some("datacenter default/missing not found")
    );
}

#[tokio::test]
async fn test_failed_node_fails_task_and_releases_lock() {
    let store = MemoryStore::new();
    store.insert_datacenter(datacenter_with_rack(DatacenterPhase::Running, 2));
    store.insert_task(test_task("repair-1", "dc1", repair()));
    let h = harness(store);
    h.sidecar
        .fail_host("elassandra-cl1-dc1-0-0.elassandra-cl1-dc1.default.svc.cluster.local");

    let outcome = reconciler(&h).reconcile(&task_key("repair-1")).await.unwrap();

    assert_eq!(outcome.phase, TaskPhase::Failed);
    let status = task_status(&h, "repair-1");
    assert_eq!(status.pods["elassandra-cl1-dc1-0-0"], TaskPhase::Failed);
    assert_eq!(status.pods["elassandra-cl1-dc1-0-1"], TaskPhase::Succeed);
    assert!(!h.store.datacenter(&dc_key()).status.unwrap().block.is_locked());
}

#[tokio::test]
async fn test_resumed_task_only_runs_pending_pods() {
    let store = MemoryStore::new();
    store.insert_datacenter(datacenter_with_rack(DatacenterPhase::Running, 2));
    let mut task = test_task("repair-1", "dc1", repair());
    task.status = Some(TaskStatus {
        phase: TaskPhase::Running,
        pods: BTreeMap::from([
            ("elassandra-cl1-dc1-0-0".to_string(), TaskPhase::Succeed),
            ("elassandra-cl1-dc1-0-1".to_string(), TaskPhase::Waiting),
        ]),
        ..Default::default()
    });
    store.insert_task(task);
    let h = harness(store);

    let outcome = reconciler(&h).reconcile(&task_key("repair-1")).await.unwrap();

    assert_eq!(outcome.phase, TaskPhase::Succeed);
    assert_eq!(h.sidecar.calls().len(), 1);
    assert_eq!(
        h.sidecar.calls()[0].host(),
        "elassandra-cl1-dc1-0-1.elassandra-cl1-dc1.default.svc.cluster.local"
    );
    // re-acquired, then released
    let writes = h.store.status_writes();
    assert!(writes[0].block.holds(BlockReason::Repair));
    assert!(!writes.last().unwrap().block.is_locked());
}

#[tokio::test]
async fn test_resumed_task_waits_while_another_task_holds_the_block() {
    let store = MemoryStore::new();
    store.insert_datacenter(datacenter_with_rack(DatacenterPhase::Running, 2));
    let mut task = test_task("cleanup-1", "dc1", cleanup());
    task.status = Some(TaskStatus {
        phase: TaskPhase::Running,
        pods: BTreeMap::from([
            ("elassandra-cl1-dc1-0-0".to_string(), TaskPhase::Waiting),
            ("elassandra-cl1-dc1-0-1".to_string(), TaskPhase::Waiting),
        ]),
        ..Default::default()
    });
    store.insert_task(task);
    let h = harness(store);
    lock::acquire(h.store.as_ref(), &dc_key(), "repair-1", BlockReason::Repair)
        .await
        .unwrap();

    let outcome = reconciler(&h).reconcile(&task_key("cleanup-1")).await.unwrap();

    assert_eq!(outcome.phase, TaskPhase::Running);
    assert_eq!(outcome.requeue, Some(h.ctx.config.waiting_task_requeue));
    assert!(h.sidecar.calls().is_empty());
    let status = task_status(&h, "cleanup-1");
    assert_eq!(status.last_message.as_deref(), Some("waiting for repair-1"));
    assert!(status.pods.values().all(|p| *p == TaskPhase::Waiting));
    let block = h.store.datacenter(&dc_key()).status.unwrap().block;
    assert!(block.holds(BlockReason::Repair));
    assert_eq!(block.reasons.len(), 1);
}

#[tokio::test]
async fn test_finished_task_releases_leftover_lock() {
    let store = MemoryStore::new();
    store.insert_datacenter(datacenter_with_rack(DatacenterPhase::Running, 2));
    let mut task = test_task("repair-1", "dc1", repair());
    task.status = Some(TaskStatus {
        phase: TaskPhase::Succeed,
        ..Default::default()
    });
    store.insert_task(task);
    let h = harness(store);
    lock::acquire(h.store.as_ref(), &dc_key(), "repair-1", BlockReason::Repair)
        .await
        .unwrap();

    let outcome = reconciler(&h).reconcile(&task_key("repair-1")).await.unwrap();

    assert_eq!(outcome.phase, TaskPhase::Succeed);
    assert_eq!(outcome.requeue, None);
    assert!(!outcome.retrigger_datacenter);
    assert!(!h.store.datacenter(&dc_key()).status.unwrap().block.is_locked());
    assert!(h.sidecar.calls().is_empty());
}

#[tokio::test]
async fn test_decommission_retriggers_datacenter() {
    let store = MemoryStore::new();
    store.insert_datacenter(datacenter_with_rack(DatacenterPhase::Running, 1));
    store.insert_task(test_task(
        "decommission-1",
        "dc1",
        TaskKind::Decommission(DecommissionTaskSpec::default()),
    ));
    let h = harness(store);

    let outcome = reconciler(&h).reconcile(&task_key("decommission-1")).await.unwrap();

    assert_eq!(outcome.phase, TaskPhase::Succeed);
    assert!(outcome.retrigger_datacenter);
    assert_eq!(h.session.calls(), vec!["remove_dc dc1"]);
}

#[tokio::test]
async fn test_lock_conflict_keeps_task_waiting() {
    let store = MemoryStore::new();
    store.insert_datacenter(datacenter_with_rack(DatacenterPhase::Running, 1));
    store.insert_task(test_task("repair-1", "dc1", repair()));
    store.conflict_next_status_write();
    let h = harness(store);

    let outcome = reconciler(&h).reconcile(&task_key("repair-1")).await.unwrap();

    assert_eq!(outcome.phase, TaskPhase::Waiting);
    assert!(outcome.requeue.is_some());
    assert!(h.sidecar.calls().is_empty());
    assert!(h.store.task(&task_key("repair-1")).status.is_none());
}
