//! Edge-side policy hooks.
//!
//! Edges decide what is assignable and how to react when a worker submits,
//! without seeing other edges' submissions. Cross-worker quorum decisions
//! are deferred to the center-side verification pass during sync.

use microwork_core::{
    AssignmentStatus, CoreResult, GlobalId, MicrotaskAssignmentRecord, MicrotaskGroupRecord,
    MicrotaskRecord, MicrotaskStatus, PolicyKind, Store, TaskRecord, Timestamp, WorkerRecord,
};
use tracing::debug;

/// Microtasks of a task a worker may still be assigned.
///
/// Excludes completed microtasks, microtasks the worker already attempted,
/// and microtasks that already hold `n` live assignments across workers.
pub fn assignable_microtasks(
    store: &Store,
    worker: &WorkerRecord,
    task: &TaskRecord,
) -> Vec<MicrotaskRecord> {
    let n = task.policy_params.n as usize;
    store.microtasks.filter(|m| {
        m.task_id == task.id
            && m.status == MicrotaskStatus::Incomplete
            && !worker_attempted(store, worker.id, m.id)
            && live_assignment_count(store, m.id) < n
    })
}

/// Groups of a task a worker may still be assigned.
///
/// Excludes completed groups, groups the worker already attempted, and
/// groups that already hold `n` live group assignments.
pub fn assignable_groups(
    store: &Store,
    worker: &WorkerRecord,
    task: &TaskRecord,
) -> Vec<MicrotaskGroupRecord> {
    let n = task.policy_params.n as usize;
    store.groups.filter(|g| {
        g.task_id == task.id
            && g.status == microwork_core::GroupStatus::Incomplete
            && !store
                .group_assignments
                .filter(|ga| ga.group_id == g.id && ga.worker_id == worker.id)
                .iter()
                .any(|ga| ga.status != AssignmentStatus::Expired)
            && store
                .group_assignments
                .filter(|ga| ga.group_id == g.id && ga.status != AssignmentStatus::Expired)
                .len()
                < n
    })
}

/// Reacts to a worker submission at the edge.
///
/// Count-based policies verify and credit immediately; agreement-based
/// policies leave the assignment `Completed` until the center reaches a
/// quorum across workers.
pub fn handle_assignment_completion(
    store: &Store,
    task: &TaskRecord,
    assignment_id: GlobalId,
) -> CoreResult<MicrotaskAssignmentRecord> {
    match task.policy {
        PolicyKind::NTotal | PolicyKind::NUnique => {
            let now = Timestamp::now();
            let updated = store.assignments.update(assignment_id, |a| {
                a.status = AssignmentStatus::Verified;
                a.credits = a.max_credits;
                a.verified_at = Some(now);
            })?;
            store.workers.update(updated.worker_id, |w| {
                w.balance += updated.credits;
            })?;
            debug!(assignment_id = %assignment_id, credits = updated.credits, "verified at edge");
            Ok(updated)
        }
        PolicyKind::NMatching => store.assignments.get(assignment_id),
    }
}

fn worker_attempted(store: &Store, worker_id: GlobalId, microtask_id: GlobalId) -> bool {
    store
        .assignments
        .filter(|a| a.worker_id == worker_id && a.microtask_id == microtask_id)
        .iter()
        .any(|a| a.status != AssignmentStatus::Expired)
}

fn live_assignment_count(store: &Store, microtask_id: GlobalId) -> usize {
    store
        .assignments
        .filter(|a| a.microtask_id == microtask_id && a.status != AssignmentStatus::Expired)
        .len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use microwork_testkit::{microtask, response, worker, TaskBuilder};

    #[test]
    fn attempted_and_saturated_microtasks_are_excluded() {
        let store = Store::center();
        let task = store
            .tasks
            .insert(TaskBuilder::new(PolicyKind::NTotal, 1).build())
            .unwrap();
        let mt = store.microtasks.insert(microtask(task.id, 1.0)).unwrap();
        let w1 = store.workers.insert(worker(None, &[])).unwrap();
        let w2 = store.workers.insert(worker(None, &[])).unwrap();

        assert_eq!(assignable_microtasks(&store, &w1, &task).len(), 1);

        // w1 holds the only live slot (n = 1): gone for both workers.
        store
            .assignments
            .insert(MicrotaskAssignmentRecord {
                id: GlobalId::from_value(0),
                box_id: None,
                task_id: task.id,
                microtask_id: mt.id,
                worker_id: w1.id,
                status: AssignmentStatus::Assigned,
                credits: 0.0,
                max_credits: 1.0,
                output: None,
                report: None,
                completed_at: None,
                verified_at: None,
                created_at: Timestamp::ZERO,
                last_updated_at: Timestamp::ZERO,
            })
            .unwrap();
        assert!(assignable_microtasks(&store, &w1, &task).is_empty());
        assert!(assignable_microtasks(&store, &w2, &task).is_empty());
    }

    #[test]
    fn count_policies_verify_at_the_edge() {
        let store = Store::center();
        let task = store
            .tasks
            .insert(TaskBuilder::new(PolicyKind::NTotal, 2).build())
            .unwrap();
        let mt = store.microtasks.insert(microtask(task.id, 3.0)).unwrap();
        let w = store.workers.insert(worker(None, &[])).unwrap();
        let a = store
            .assignments
            .insert(MicrotaskAssignmentRecord {
                id: GlobalId::from_value(0),
                box_id: None,
                task_id: task.id,
                microtask_id: mt.id,
                worker_id: w.id,
                status: AssignmentStatus::Completed,
                credits: 0.0,
                max_credits: 3.0,
                output: Some(response("out")),
                report: None,
                completed_at: Some(Timestamp::now()),
                verified_at: None,
                created_at: Timestamp::ZERO,
                last_updated_at: Timestamp::ZERO,
            })
            .unwrap();

        let updated = handle_assignment_completion(&store, &task, a.id).unwrap();
        assert_eq!(updated.status, AssignmentStatus::Verified);
        assert_eq!(updated.credits, 3.0);
        assert_eq!(store.workers.get(w.id).unwrap().balance, 3.0);
    }

    #[test]
    fn matching_policy_defers_to_the_center() {
        let store = Store::center();
        let task = store
            .tasks
            .insert(TaskBuilder::new(PolicyKind::NMatching, 2).build())
            .unwrap();
        let mt = store.microtasks.insert(microtask(task.id, 3.0)).unwrap();
        let w = store.workers.insert(worker(None, &[])).unwrap();
        let a = store
            .assignments
            .insert(MicrotaskAssignmentRecord {
                id: GlobalId::from_value(0),
                box_id: None,
                task_id: task.id,
                microtask_id: mt.id,
                worker_id: w.id,
                status: AssignmentStatus::Completed,
                credits: 0.0,
                max_credits: 3.0,
                output: Some(response("out")),
                report: None,
                completed_at: Some(Timestamp::now()),
                verified_at: None,
                created_at: Timestamp::ZERO,
                last_updated_at: Timestamp::ZERO,
            })
            .unwrap();

        let untouched = handle_assignment_completion(&store, &task, a.id).unwrap();
        assert_eq!(untouched.status, AssignmentStatus::Completed);
        assert_eq!(untouched.credits, 0.0);
        assert_eq!(store.workers.get(w.id).unwrap().balance, 0.0);
    }
}
