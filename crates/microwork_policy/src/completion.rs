//! Orchestration of newly-completed assignment batches.
//!
//! Runs the task's verification policy, applies its decisions (credit and
//! verify assignments, complete microtasks with an aggregated output, roll
//! groups up), and schedules the downstream backward task link when anything
//! completed.

use crate::verify::policy_for;
use microwork_core::{
    AssignmentStatus, CoreResult, GroupStatus, MicrotaskAssignmentRecord, MicrotaskRecord,
    MicrotaskStatus, Payload, Store, TaskRecord, Timestamp,
};
use serde_json::json;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Combines verified assignment outputs into a microtask's final output.
///
/// Scenario-supplied; the default collects every verified response into an
/// array envelope.
pub trait OutputAggregator: Send + Sync {
    /// Produces the completed microtask's output.
    fn aggregate(
        &self,
        task: &TaskRecord,
        microtask: &MicrotaskRecord,
        verified: &[MicrotaskAssignmentRecord],
    ) -> Payload;
}

/// Default aggregator: an array of the verified responses.
pub struct CollectResponses;

impl OutputAggregator for CollectResponses {
    fn aggregate(
        &self,
        task: &TaskRecord,
        _microtask: &MicrotaskRecord,
        verified: &[MicrotaskAssignmentRecord],
    ) -> Payload {
        let responses: Vec<_> = verified
            .iter()
            .filter_map(|a| a.output.as_ref().map(|o| o.data.clone()))
            .collect();
        Payload::new(task.scenario, json!({ "responses": responses }))
    }
}

/// Receives completed microtasks for downstream chain processing.
///
/// Backward task links are an external collaborator; the core only hands
/// them the completed set.
pub trait BackwardLinkScheduler: Send + Sync {
    /// Called once per batch that completed at least one microtask.
    fn schedule(&self, task: &TaskRecord, completed: &[MicrotaskRecord]);
}

/// Scheduler for deployments without task chains.
pub struct NoBackwardLinks;

impl BackwardLinkScheduler for NoBackwardLinks {
    fn schedule(&self, _task: &TaskRecord, _completed: &[MicrotaskRecord]) {}
}

/// Counts from one completion pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletionSummary {
    /// Assignments marked verified.
    pub verified: usize,
    /// Microtasks marked completed.
    pub completed: usize,
}

/// Applies policy decisions for batches of newly-completed assignments.
pub struct CompletionHandler<A = CollectResponses, S = NoBackwardLinks> {
    aggregator: A,
    scheduler: S,
}

impl CompletionHandler {
    /// Handler with the default aggregator and no backward links.
    pub fn new() -> Self {
        Self {
            aggregator: CollectResponses,
            scheduler: NoBackwardLinks,
        }
    }
}

impl Default for CompletionHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: OutputAggregator, S: BackwardLinkScheduler> CompletionHandler<A, S> {
    /// Handler with a scenario aggregator and a link scheduler.
    pub fn with_parts(aggregator: A, scheduler: S) -> Self {
        Self {
            aggregator,
            scheduler,
        }
    }

    /// Handles a batch of newly-completed assignments for one task.
    ///
    /// Batches are processed sequentially; all credit and status changes for
    /// one microtask happen under the store's table locks before the next
    /// microtask is considered.
    pub fn handle_newly_completed(
        &self,
        store: &Store,
        task: &TaskRecord,
        assignments: &[MicrotaskAssignmentRecord],
    ) -> CoreResult<CompletionSummary> {
        // Touched microtasks, deduplicated.
        let microtask_ids: BTreeSet<_> = assignments.iter().map(|a| a.microtask_id).collect();
        let microtasks = microtask_ids
            .into_iter()
            .map(|id| store.microtasks.get(id))
            .collect::<CoreResult<Vec<_>>>()?;

        let outcome = policy_for(task.policy).verify(store, task, assignments, &microtasks);
        debug!(
            task_id = %task.id,
            verified = outcome.verified.len(),
            completed = outcome.completed.len(),
            "policy verification pass"
        );

        for assignment in &outcome.verified {
            // Batches may replay assignments verified in an earlier pass (or
            // pre-verified at the edge); crediting twice would corrupt the
            // worker's balance.
            if store.assignments.get(assignment.id)?.status == AssignmentStatus::Verified {
                continue;
            }
            let now = Timestamp::now();
            let updated = store.assignments.update(assignment.id, |a| {
                a.status = AssignmentStatus::Verified;
                a.credits = a.max_credits;
                a.verified_at = Some(now);
            })?;
            store.workers.update(updated.worker_id, |w| {
                w.balance += updated.credits;
            })?;
        }

        for microtask in &outcome.completed {
            let verified = store.assignments.filter(|a| {
                a.microtask_id == microtask.id && a.status == AssignmentStatus::Verified
            });
            let output = self.aggregator.aggregate(task, microtask, &verified);
            store.microtasks.update(microtask.id, |m| {
                m.status = MicrotaskStatus::Completed;
                m.output = Some(output.clone());
            })?;
            self.roll_up_group(store, microtask)?;
        }

        if !outcome.completed.is_empty() {
            info!(
                task_id = %task.id,
                completed = outcome.completed.len(),
                "scheduling backward task link"
            );
            self.scheduler.schedule(task, &outcome.completed);
        }

        Ok(CompletionSummary {
            verified: outcome.verified.len(),
            completed: outcome.completed.len(),
        })
    }

    /// Marks a group completed once every member microtask is.
    fn roll_up_group(&self, store: &Store, microtask: &MicrotaskRecord) -> CoreResult<()> {
        let Some(group_id) = microtask.group_id else {
            return Ok(());
        };
        let members = store.microtasks.filter(|m| m.group_id == Some(group_id));
        if members.iter().all(|m| m.status == MicrotaskStatus::Completed) {
            store.groups.update(group_id, |g| {
                g.status = GroupStatus::Completed;
            })?;
        }
        Ok(())
    }
}
