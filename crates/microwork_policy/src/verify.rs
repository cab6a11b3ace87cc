//! Center-side verification policies.
//!
//! A policy inspects a batch of newly-completed assignments, plus the
//! microtasks they touch, and decides which assignments are verified and
//! which microtasks are done. Completion counts are computed against the
//! store, not just the supplied batch, so a microtask whose earlier
//! assignments arrived in previous batches still completes correctly.

use microwork_core::{
    AssignmentStatus, MicrotaskAssignmentRecord, MicrotaskRecord, MicrotaskStatus, PolicyKind,
    Store, TaskRecord,
};
use std::collections::BTreeMap;

/// Assignments a policy decided to verify, and microtasks it declared done.
#[derive(Debug, Default)]
pub struct VerifyOutcome {
    /// Assignments to mark `Verified` and credit.
    pub verified: Vec<MicrotaskAssignmentRecord>,
    /// Microtasks to mark `Completed`.
    pub completed: Vec<MicrotaskRecord>,
}

/// A verification strategy for one task.
pub trait VerificationPolicy: Send + Sync {
    /// Decides verified assignments and completed microtasks.
    fn verify(
        &self,
        store: &Store,
        task: &TaskRecord,
        assignments: &[MicrotaskAssignmentRecord],
        microtasks: &[MicrotaskRecord],
    ) -> VerifyOutcome;
}

/// Resolves the policy implementation for a kind.
///
/// The set is closed; unknown names were already rejected when the task's
/// policy field was parsed.
pub fn policy_for(kind: PolicyKind) -> &'static dyn VerificationPolicy {
    match kind {
        PolicyKind::NTotal => &NTotal,
        PolicyKind::NUnique => &NUnique,
        PolicyKind::NMatching => &NMatching,
    }
}

/// Assignments of a microtask that have been submitted (or already accepted).
fn submitted_assignments(store: &Store, microtask: &MicrotaskRecord) -> Vec<MicrotaskAssignmentRecord> {
    store.assignments.filter(|a| {
        a.microtask_id == microtask.id
            && matches!(a.status, AssignmentStatus::Completed | AssignmentStatus::Verified)
    })
}

/// Complete once a microtask has `n` submitted assignments.
struct NTotal;

impl VerificationPolicy for NTotal {
    fn verify(
        &self,
        store: &Store,
        task: &TaskRecord,
        assignments: &[MicrotaskAssignmentRecord],
        microtasks: &[MicrotaskRecord],
    ) -> VerifyOutcome {
        let n = task.policy_params.n as usize;
        let completed = microtasks
            .iter()
            .filter(|m| m.status != MicrotaskStatus::Completed)
            .filter(|m| submitted_assignments(store, m).len() >= n)
            .cloned()
            .collect();
        VerifyOutcome {
            verified: assignments.to_vec(),
            completed,
        }
    }
}

/// Complete once a microtask has `n` distinct responses.
struct NUnique;

impl VerificationPolicy for NUnique {
    fn verify(
        &self,
        store: &Store,
        task: &TaskRecord,
        assignments: &[MicrotaskAssignmentRecord],
        microtasks: &[MicrotaskRecord],
    ) -> VerifyOutcome {
        let n = task.policy_params.n as usize;
        let completed = microtasks
            .iter()
            .filter(|m| m.status != MicrotaskStatus::Completed)
            .filter(|m| {
                let mut keys: Vec<String> = submitted_assignments(store, m)
                    .iter()
                    .filter_map(|a| a.output.as_ref().map(|o| o.response_key()))
                    .collect();
                keys.sort();
                keys.dedup();
                keys.len() >= n
            })
            .cloned()
            .collect();
        VerifyOutcome {
            verified: assignments.to_vec(),
            completed,
        }
    }
}

/// Complete once `n` assignments share the same response.
///
/// Only assignments matching the quorum response are verified; disagreeing
/// ones stay `Completed` for out-of-band review. A microtask that already
/// completed is skipped entirely, freezing its quorum: later submissions can
/// neither be auto-verified nor flip the outcome.
struct NMatching;

impl NMatching {
    /// The response shared by the most submissions, with its count.
    ///
    /// Ties break toward the lexicographically smallest key so repeated runs
    /// over the same data pick the same quorum.
    fn quorum(submitted: &[MicrotaskAssignmentRecord]) -> Option<(String, usize)> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for assignment in submitted {
            if let Some(output) = &assignment.output {
                *counts.entry(output.response_key()).or_insert(0) += 1;
            }
        }
        counts
            .into_iter()
            .max_by(|(ka, ca), (kb, cb)| ca.cmp(cb).then(kb.cmp(ka)))
    }
}

impl VerificationPolicy for NMatching {
    fn verify(
        &self,
        store: &Store,
        task: &TaskRecord,
        _assignments: &[MicrotaskAssignmentRecord],
        microtasks: &[MicrotaskRecord],
    ) -> VerifyOutcome {
        let n = task.policy_params.n as usize;
        let mut outcome = VerifyOutcome::default();

        for microtask in microtasks {
            if microtask.status == MicrotaskStatus::Completed {
                continue;
            }
            let submitted = submitted_assignments(store, microtask);
            let Some((key, count)) = Self::quorum(&submitted) else {
                continue;
            };
            if count < n {
                continue;
            }
            outcome.completed.push(microtask.clone());
            outcome.verified.extend(
                submitted
                    .into_iter()
                    .filter(|a| a.status == AssignmentStatus::Completed)
                    .filter(|a| {
                        a.output
                            .as_ref()
                            .map(|o| o.response_key() == key)
                            .unwrap_or(false)
                    }),
            );
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use microwork_core::{GlobalId, PolicyKind};
    use microwork_testkit::{microtask, response, worker, TaskBuilder};

    struct Fixture {
        store: Store,
        task: TaskRecord,
        microtask: MicrotaskRecord,
        workers: Vec<GlobalId>,
    }

    fn fixture(policy: PolicyKind, n: u32) -> Fixture {
        let store = Store::center();
        let task = store.tasks.insert(TaskBuilder::new(policy, n).build()).unwrap();
        let mt = store.microtasks.insert(microtask(task.id, 5.0)).unwrap();
        let workers = (0..4)
            .map(|_| store.workers.insert(worker(None, &[])).unwrap().id)
            .collect();
        Fixture {
            store,
            task,
            microtask: mt,
            workers,
        }
    }

    fn submit(fx: &Fixture, worker_idx: usize, text: &str) -> MicrotaskAssignmentRecord {
        fx.store
            .assignments
            .insert(MicrotaskAssignmentRecord {
                id: GlobalId::from_value(0),
                box_id: None,
                task_id: fx.task.id,
                microtask_id: fx.microtask.id,
                worker_id: fx.workers[worker_idx],
                status: AssignmentStatus::Completed,
                credits: 0.0,
                max_credits: fx.microtask.credits,
                output: Some(response(text)),
                report: None,
                completed_at: Some(microwork_core::Timestamp::now()),
                verified_at: None,
                created_at: microwork_core::Timestamp::ZERO,
                last_updated_at: microwork_core::Timestamp::ZERO,
            })
            .unwrap()
    }

    fn run(fx: &Fixture, batch: &[MicrotaskAssignmentRecord]) -> VerifyOutcome {
        policy_for(fx.task.policy).verify(&fx.store, &fx.task, batch, &[fx.microtask.clone()])
    }

    #[test]
    fn n_total_completes_at_count_regardless_of_agreement() {
        let fx = fixture(PolicyKind::NTotal, 2);
        let a1 = submit(&fx, 0, "one");
        let outcome = run(&fx, &[a1.clone()]);
        assert_eq!(outcome.verified.len(), 1);
        assert!(outcome.completed.is_empty());

        let a2 = submit(&fx, 1, "completely different");
        let outcome = run(&fx, &[a2.clone()]);
        assert_eq!(outcome.verified.len(), 1);
        assert_eq!(outcome.completed.len(), 1);
        assert_eq!(outcome.completed[0].id, fx.microtask.id);
    }

    #[test]
    fn n_unique_needs_distinct_responses() {
        let fx = fixture(PolicyKind::NUnique, 3);
        submit(&fx, 0, "alpha");
        submit(&fx, 1, "alpha");
        let a3 = submit(&fx, 2, "beta");

        // Two identical plus one distinct: unique count is 2, not completed.
        let outcome = run(&fx, &[a3]);
        assert!(outcome.completed.is_empty());

        // A third distinct response completes it.
        let a4 = submit(&fx, 3, "gamma");
        let outcome = run(&fx, &[a4]);
        assert_eq!(outcome.completed.len(), 1);
    }

    #[test]
    fn n_matching_verifies_only_the_quorum_side() {
        let fx = fixture(PolicyKind::NMatching, 2);
        let a1 = submit(&fx, 0, "agreed");
        let outcome = run(&fx, &[a1.clone()]);
        assert!(outcome.completed.is_empty());
        assert!(outcome.verified.is_empty());

        let a2 = submit(&fx, 1, "agreed");
        let outcome = run(&fx, &[a2.clone()]);
        assert_eq!(outcome.completed.len(), 1);
        let verified_ids: Vec<_> = outcome.verified.iter().map(|a| a.id).collect();
        assert!(verified_ids.contains(&a1.id));
        assert!(verified_ids.contains(&a2.id));
    }

    #[test]
    fn n_matching_freezes_a_reached_quorum() {
        let fx = fixture(PolicyKind::NMatching, 2);
        submit(&fx, 0, "agreed");
        let a2 = submit(&fx, 1, "agreed");
        let outcome = run(&fx, &[a2]);
        assert_eq!(outcome.completed.len(), 1);

        // Mark the microtask completed, as the completion handler would.
        let frozen = fx
            .store
            .microtasks
            .update(fx.microtask.id, |m| m.status = MicrotaskStatus::Completed)
            .unwrap();

        // A later disagreeing submission is not auto-verified and the
        // completed set does not change.
        let a3 = submit(&fx, 2, "dissent");
        let outcome = policy_for(fx.task.policy).verify(&fx.store, &fx.task, &[a3.clone()], &[frozen]);
        assert!(outcome.completed.is_empty());
        assert!(outcome.verified.iter().all(|v| v.id != a3.id));
    }

    #[test]
    fn zero_submissions_never_complete() {
        let fx = fixture(PolicyKind::NTotal, 1);
        let outcome = run(&fx, &[]);
        assert!(outcome.completed.is_empty());
        assert!(outcome.verified.is_empty());
    }
}
