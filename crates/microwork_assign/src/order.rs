//! Assignment ordering.

use microwork_core::{AssignmentOrder, Record};
use rand::seq::SliceRandom;
use rand::Rng;

/// Reorders assignable units per the task's declared order.
///
/// `Sequential` sorts ascending by global ID; `Random` is a uniform
/// Fisher-Yates shuffle.
pub fn reorder<R: Record>(items: &mut [R], order: AssignmentOrder) {
    reorder_with_rng(items, order, &mut rand::thread_rng());
}

/// [`reorder`] with a caller-supplied RNG, for deterministic tests.
pub fn reorder_with_rng<R: Record, G: Rng>(items: &mut [R], order: AssignmentOrder, rng: &mut G) {
    match order {
        AssignmentOrder::Sequential => items.sort_by_key(|r| r.id()),
        AssignmentOrder::Random => items.shuffle(rng),
    }
}
