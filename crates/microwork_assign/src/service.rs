//! The assignment service.
//!
//! Allocates microtasks and microtask groups to a worker within a credit
//! ceiling, and dispatches policy hooks when the worker submits.

use crate::order::reorder;
use microwork_core::{
    AssignmentGranularity, AssignmentStatus, CoreResult, Credits, GlobalId,
    MicrotaskAssignmentRecord, MicrotaskGroupAssignmentRecord, MicrotaskRecord, Payload, Store,
    TaskRecord, TaskStatus, Timestamp, WorkerRecord,
};
use microwork_policy::{assignable_groups, assignable_microtasks, handle_assignment_completion};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Records persisted by one allocation call.
#[derive(Debug, Default)]
pub struct AllocationSummary {
    /// Newly created microtask assignments.
    pub assignments: Vec<MicrotaskAssignmentRecord>,
    /// Newly created group assignments.
    pub group_assignments: Vec<MicrotaskGroupAssignmentRecord>,
}

impl AllocationSummary {
    /// Total credits committed by this allocation.
    pub fn committed_credits(&self) -> Credits {
        self.assignments.iter().map(|a| a.max_credits).sum()
    }
}

/// Allocates work to workers on one store instance.
///
/// Two concurrent requests for the same worker would race to double-allocate,
/// so the service keeps a per-worker in-flight set; a request for a worker
/// that is already being served returns empty.
pub struct AssignmentService {
    store: Arc<Store>,
    assigning: Mutex<HashSet<GlobalId>>,
}

impl AssignmentService {
    /// Creates a service over a store.
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            assigning: Mutex::new(HashSet::new()),
        }
    }

    /// Allocates microtasks/groups to a worker within `max_credits`.
    ///
    /// The sum of `max_credits` over the returned assignments never exceeds
    /// the ceiling.
    pub fn assign_microtasks(
        &self,
        worker_id: GlobalId,
        max_credits: Credits,
    ) -> CoreResult<AllocationSummary> {
        if !self.assigning.lock().insert(worker_id) {
            debug!(%worker_id, "already assigning, skipping");
            return Ok(AllocationSummary::default());
        }
        let result = self.assign_locked(worker_id, max_credits);
        self.assigning.lock().remove(&worker_id);
        result
    }

    fn assign_locked(
        &self,
        worker_id: GlobalId,
        max_credits: Credits,
    ) -> CoreResult<AllocationSummary> {
        let store = &self.store;
        let worker = store.workers.get(worker_id)?;

        // A worker still holding unfinished assignments gets nothing new.
        let has_incomplete = !store
            .assignments
            .filter(|a| a.worker_id == worker_id && a.status == AssignmentStatus::Assigned)
            .is_empty();
        if has_incomplete {
            debug!(%worker_id, "worker has incomplete assignments");
            return Ok(AllocationSummary::default());
        }

        let mut available = max_credits;
        let mut summary = AllocationSummary::default();

        let mut tasks = store.tasks.filter(|t| eligible(t, &worker));
        tasks.sort_by_key(|t| t.id);

        for task in tasks {
            let limit = self.allocation_limit(&task, &worker);
            if limit == 0 {
                debug!(task_id = %task.id, %worker_id, "per-worker limit reached");
                continue;
            }

            match task.assignment_granularity {
                AssignmentGranularity::Group => {
                    self.choose_groups(&task, &worker, limit, &mut available, &mut summary)?;
                }
                AssignmentGranularity::Microtask => {
                    self.choose_microtasks(&task, &worker, limit, &mut available, &mut summary)?;
                }
            }
        }

        info!(
            %worker_id,
            assignments = summary.assignments.len(),
            groups = summary.group_assignments.len(),
            committed = summary.committed_credits(),
            "allocation finished"
        );
        Ok(summary)
    }

    /// Remaining per-task allocation headroom for the worker, batch-clamped.
    fn allocation_limit(&self, task: &TaskRecord, worker: &WorkerRecord) -> usize {
        let batch = task.assignment_batch_size as usize;
        match task.policy_params.max_per_worker {
            None => batch,
            Some(cap) => {
                let assigned = self
                    .store
                    .assignments
                    .filter(|a| a.worker_id == worker.id && a.task_id == task.id)
                    .len();
                (cap as usize).saturating_sub(assigned).min(batch)
            }
        }
    }

    fn choose_groups(
        &self,
        task: &TaskRecord,
        worker: &WorkerRecord,
        limit: usize,
        available: &mut Credits,
        summary: &mut AllocationSummary,
    ) -> CoreResult<()> {
        let store = &self.store;
        let mut groups = assignable_groups(store, worker, task);
        reorder(&mut groups, task.group_assignment_order);
        groups.truncate(limit);

        for group in groups {
            // The group record carries a denormalized credit total that can
            // drift; the budget is charged for what actually gets assigned,
            // so the cost is the member sum.
            let mut members = store.microtasks.filter(|m| m.group_id == Some(group.id));
            let cost: Credits = members.iter().map(|m| m.credits).sum();

            // Greedy prefix: stop at the first group that does not fit.
            if cost > *available {
                break;
            }
            *available -= cost;

            let ga = store.group_assignments.insert(MicrotaskGroupAssignmentRecord {
                id: GlobalId::from_value(0),
                box_id: worker.box_id,
                group_id: group.id,
                worker_id: worker.id,
                status: AssignmentStatus::Assigned,
                created_at: Timestamp::ZERO,
                last_updated_at: Timestamp::ZERO,
            })?;
            summary.group_assignments.push(ga);

            reorder(&mut members, task.microtask_assignment_order);
            for microtask in members {
                summary
                    .assignments
                    .push(self.persist_assignment(task, worker, &microtask)?);
            }
        }
        Ok(())
    }

    fn choose_microtasks(
        &self,
        task: &TaskRecord,
        worker: &WorkerRecord,
        limit: usize,
        available: &mut Credits,
        summary: &mut AllocationSummary,
    ) -> CoreResult<()> {
        let mut microtasks = assignable_microtasks(&self.store, worker, task);
        reorder(&mut microtasks, task.microtask_assignment_order);
        microtasks.truncate(limit);

        for microtask in microtasks {
            // Strict prefix-that-fits: no skipping ahead past an oversized unit.
            if microtask.credits > *available {
                break;
            }
            *available -= microtask.credits;
            summary
                .assignments
                .push(self.persist_assignment(task, worker, &microtask)?);
        }
        Ok(())
    }

    fn persist_assignment(
        &self,
        task: &TaskRecord,
        worker: &WorkerRecord,
        microtask: &MicrotaskRecord,
    ) -> CoreResult<MicrotaskAssignmentRecord> {
        self.store.assignments.insert(MicrotaskAssignmentRecord {
            id: GlobalId::from_value(0),
            box_id: worker.box_id,
            task_id: task.id,
            microtask_id: microtask.id,
            worker_id: worker.id,
            status: AssignmentStatus::Assigned,
            credits: 0.0,
            max_credits: microtask.credits,
            output: None,
            report: None,
            completed_at: None,
            verified_at: None,
            created_at: Timestamp::ZERO,
            last_updated_at: Timestamp::ZERO,
        })
    }

    /// Records a worker submission and dispatches the task policy's hook.
    ///
    /// Retried submissions for an already-completed assignment are a no-op,
    /// so clients may deliver at least once.
    pub fn complete_assignment(
        &self,
        assignment_id: GlobalId,
        output: Payload,
    ) -> CoreResult<MicrotaskAssignmentRecord> {
        output.validate()?;
        let store = &self.store;
        let current = store.assignments.get(assignment_id)?;
        if current.status != AssignmentStatus::Assigned {
            debug!(%assignment_id, status = ?current.status, "ignoring duplicate submission");
            return Ok(current);
        }

        let now = Timestamp::now();
        store.assignments.update(assignment_id, |a| {
            a.status = AssignmentStatus::Completed;
            a.output = Some(output.clone());
            a.completed_at = Some(now);
        })?;

        let task = store.tasks.get(current.task_id)?;
        handle_assignment_completion(store, &task, assignment_id)
    }

    /// Expires assignments whose microtask deadline has passed.
    pub fn expire_overdue(&self, now: Timestamp) -> CoreResult<usize> {
        let store = &self.store;
        let overdue: Vec<_> = store
            .assignments
            .filter(|a| a.status == AssignmentStatus::Assigned)
            .into_iter()
            .filter(|a| {
                store
                    .microtasks
                    .try_get(a.microtask_id)
                    .and_then(|m| m.deadline)
                    .map(|d| d < now)
                    .unwrap_or(false)
            })
            .collect();
        for assignment in &overdue {
            store.assignments.update(assignment.id, |a| {
                a.status = AssignmentStatus::Expired;
            })?;
        }
        Ok(overdue.len())
    }
}

/// Task-to-worker eligibility.
///
/// The task must be live, assigned to the worker's edge, and every required
/// tag (input tags, policy tags, worker-group restriction) must be covered
/// by the worker's tags or group.
fn eligible(task: &TaskRecord, worker: &WorkerRecord) -> bool {
    if task.status == TaskStatus::Completed || task.status == TaskStatus::Created {
        return false;
    }
    if let Some(box_id) = worker.box_id {
        if !task.assigned_boxes.contains(&box_id) {
            return false;
        }
    }

    let mut worker_tags: Vec<&str> = worker.tags.iter().map(String::as_str).collect();
    if let Some(group) = &worker.worker_group {
        worker_tags.push(group);
    }

    let mut required: Vec<&str> = task.input_tags.iter().map(String::as_str).collect();
    required.extend(task.policy_params.tags.iter().map(String::as_str));
    if let Some(group) = &task.worker_group {
        required.push(group);
    }

    required.iter().all(|tag| worker_tags.contains(tag))
}
