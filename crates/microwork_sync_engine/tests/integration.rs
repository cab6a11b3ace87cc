//! End-to-end replication between an edge and the center.

use microwork_assign::AssignmentService;
use microwork_core::{AssignmentStatus, BoxId, MicrotaskStatus, PolicyKind, Store};
use microwork_sync_engine::{CenterHandler, LoopbackTransport, SyncConfig, SyncEngine};
use microwork_testkit::{microtask, response, worker, TaskBuilder};
use std::sync::Arc;

fn setup() -> (Arc<Store>, Arc<Store>, SyncEngine<LoopbackTransport>) {
    let box_id = BoxId::new(7).unwrap();
    let center = Arc::new(Store::center());
    let edge = Arc::new(Store::edge(box_id));
    let handler = Arc::new(CenterHandler::new(center.clone()));
    let engine = SyncEngine::new(
        edge.clone(),
        LoopbackTransport::new(handler),
        SyncConfig::new(box_id),
    )
    .unwrap();
    (center, edge, engine)
}

#[test]
fn quorum_round_trip_verifies_and_credits_across_the_sync_boundary() {
    let box_id = BoxId::new(7).unwrap();
    let (center, edge, engine) = setup();

    // Operator work lives at the center.
    let task = center
        .tasks
        .insert(
            TaskBuilder::new(PolicyKind::NMatching, 2)
                .on_box(box_id)
                .build(),
        )
        .unwrap();
    let mt = center.microtasks.insert(microtask(task.id, 5.0)).unwrap();

    // First cycle delivers the task and its microtask to the edge.
    let first = engine.sync().unwrap();
    assert_eq!(first.pushed, 0);
    assert_eq!(first.pulled, 2);
    assert_eq!(edge.tasks.len(), 1);
    assert_eq!(edge.microtasks.len(), 1);

    // Two workers submit agreeing responses at the edge. The agreement
    // policy defers verification to the center.
    let service = AssignmentService::new(edge.clone());
    let w1 = edge.workers.insert(worker(Some(box_id), &[])).unwrap();
    let w2 = edge.workers.insert(worker(Some(box_id), &[])).unwrap();
    for w in [w1.id, w2.id] {
        let summary = service.assign_microtasks(w, 10.0).unwrap();
        assert_eq!(summary.assignments.len(), 1);
        let done = service
            .complete_assignment(summary.assignments[0].id, response("agreed"))
            .unwrap();
        assert_eq!(done.status, AssignmentStatus::Completed);
        assert_eq!(done.credits, 0.0);
    }

    // Second cycle pushes the submissions; the center reaches quorum,
    // verifies, credits, and the same cycle's pull brings it all back.
    let second = engine.sync().unwrap();
    assert_eq!(second.pushed, 4);
    assert_eq!(second.push_rejected, 0);

    assert_eq!(
        center.microtasks.get(mt.id).unwrap().status,
        MicrotaskStatus::Completed
    );
    for w in [w1.id, w2.id] {
        assert_eq!(center.workers.get(w).unwrap().balance, 5.0);
        assert_eq!(edge.workers.get(w).unwrap().balance, 5.0);
    }
    for a in edge.assignments.all() {
        assert_eq!(a.status, AssignmentStatus::Verified);
        assert_eq!(a.credits, 5.0);
    }
    assert_eq!(
        edge.microtasks.get(mt.id).unwrap().status,
        MicrotaskStatus::Completed
    );

    // The pulled-back center versions re-enter the push window once; the
    // center absorbs them as stale and the system converges.
    let third = engine.sync().unwrap();
    assert_eq!(third.pushed, 4);
    assert_eq!(third.push_rejected, 4);
    let fourth = engine.sync().unwrap();
    assert_eq!(fourth.pushed, 0);
    assert_eq!(fourth.pulled, 0);
}

#[test]
fn pushed_records_echoed_on_pull_are_skipped_as_stale() {
    let box_id = BoxId::new(7).unwrap();
    let (center, edge, engine) = setup();
    engine.sync().unwrap();

    edge.workers.insert(worker(Some(box_id), &[])).unwrap();

    // The center serves the just-pushed worker straight back in the same
    // cycle's pull; the edge already holds that exact version.
    let second = engine.sync().unwrap();
    assert_eq!(second.pushed, 1);
    assert_eq!(second.pull_skipped, 1);

    let third = engine.sync().unwrap();
    assert_eq!(third.pushed, 0);
    assert_eq!(third.pulled, 0);
    assert_eq!(center.workers.len(), 1);
    assert_eq!(edge.workers.len(), 1);
}

#[test]
fn count_policy_verified_at_the_edge_settles_cleanly_at_the_center() {
    let box_id = BoxId::new(7).unwrap();
    let (center, edge, engine) = setup();
    let task = center
        .tasks
        .insert(
            TaskBuilder::new(PolicyKind::NTotal, 1)
                .on_box(box_id)
                .build(),
        )
        .unwrap();
    let mt = center.microtasks.insert(microtask(task.id, 3.0)).unwrap();
    engine.sync().unwrap();

    let service = AssignmentService::new(edge.clone());
    let w = edge.workers.insert(worker(Some(box_id), &[])).unwrap();
    let summary = service.assign_microtasks(w.id, 10.0).unwrap();
    let done = service
        .complete_assignment(summary.assignments[0].id, response("said it"))
        .unwrap();
    // Count policy: verified and credited immediately at the edge.
    assert_eq!(done.status, AssignmentStatus::Verified);
    assert_eq!(edge.workers.get(w.id).unwrap().balance, 3.0);

    engine.sync().unwrap();

    // The center completes the microtask without crediting a second time.
    assert_eq!(
        center.microtasks.get(mt.id).unwrap().status,
        MicrotaskStatus::Completed
    );
    assert_eq!(center.workers.get(w.id).unwrap().balance, 3.0);
}
