//! Typed record tables with replication-safe write semantics.
//!
//! Each [`Table`] owns one entity type and enforces three invariants:
//!
//! - IDs are allocated from the instance's own namespace, inside the same
//!   critical section as the insert (`allocate-then-insert`).
//! - `last_updated_at` is strictly increasing per record for local writes.
//! - Replica writes with a timestamp at or before the stored one are
//!   rejected with [`CoreError::StaleUpdate`], making replication idempotent
//!   and order-insensitive under retries.

use crate::error::{CoreError, CoreResult};
use crate::id::{BoxId, GlobalId};
use crate::records::{
    BoxRecord, MicrotaskAssignmentRecord, MicrotaskGroupAssignmentRecord, MicrotaskGroupRecord,
    MicrotaskRecord, PaymentsAccountRecord, PaymentsTransactionRecord, Record, TaskRecord,
    WorkerRecord,
};
use crate::time::Timestamp;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::trace;

/// Outcome of a replica upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The record did not exist locally and was inserted.
    Inserted,
    /// The record existed and was replaced by a newer version.
    Updated,
}

struct TableInner<R> {
    rows: BTreeMap<GlobalId, R>,
    next_local: u64,
}

/// A typed table of replicated records.
pub struct Table<R: Record> {
    origin: Option<BoxId>,
    inner: RwLock<TableInner<R>>,
}

impl<R: Record> Table<R> {
    fn new(origin: Option<BoxId>) -> Self {
        Self {
            origin,
            inner: RwLock::new(TableInner {
                rows: BTreeMap::new(),
                next_local: 1,
            }),
        }
    }

    /// Inserts a locally-authored record, allocating its global ID.
    pub fn insert(&self, mut record: R) -> CoreResult<R> {
        let mut inner = self.inner.write();
        let id = GlobalId::compose(self.origin, inner.next_local)?;
        inner.next_local += 1;
        let now = Timestamp::now();
        record.set_id(id);
        record.set_created_at(now);
        record.set_last_updated_at(now);
        inner.rows.insert(id, record.clone());
        trace!(entity = R::ENTITY, %id, "inserted record");
        Ok(record)
    }

    /// Fetches a record, failing with [`CoreError::RecordNotFound`].
    pub fn get(&self, id: GlobalId) -> CoreResult<R> {
        self.inner
            .read()
            .rows
            .get(&id)
            .cloned()
            .ok_or(CoreError::RecordNotFound {
                entity: R::ENTITY,
                id,
            })
    }

    /// Fetches a record if present.
    pub fn try_get(&self, id: GlobalId) -> Option<R> {
        self.inner.read().rows.get(&id).cloned()
    }

    /// Applies a local mutation and stamps a fresh update time.
    ///
    /// The stamp is the wall clock, bumped by one microsecond whenever the
    /// clock has not advanced past the stored value, so local writes always
    /// move `last_updated_at` forward.
    pub fn update<F>(&self, id: GlobalId, mutate: F) -> CoreResult<R>
    where
        F: FnOnce(&mut R),
    {
        let mut inner = self.inner.write();
        let row = inner.rows.get_mut(&id).ok_or(CoreError::RecordNotFound {
            entity: R::ENTITY,
            id,
        })?;
        let mut stamp = Timestamp::now();
        if stamp <= row.last_updated_at() {
            stamp = row.last_updated_at().succ();
        }
        mutate(row);
        row.set_last_updated_at(stamp);
        Ok(row.clone())
    }

    /// Applies a local mutation only when the stored record passes `pred`.
    ///
    /// Check and write happen under one write lock. When the predicate
    /// rejects, the row is returned unchanged with `false` and no timestamp
    /// is stamped, so a losing writer leaves no trace.
    pub fn update_if<P, F>(&self, id: GlobalId, pred: P, mutate: F) -> CoreResult<(R, bool)>
    where
        P: FnOnce(&R) -> bool,
        F: FnOnce(&mut R),
    {
        let mut inner = self.inner.write();
        let row = inner.rows.get_mut(&id).ok_or(CoreError::RecordNotFound {
            entity: R::ENTITY,
            id,
        })?;
        if !pred(row) {
            return Ok((row.clone(), false));
        }
        let mut stamp = Timestamp::now();
        if stamp <= row.last_updated_at() {
            stamp = row.last_updated_at().succ();
        }
        mutate(row);
        row.set_last_updated_at(stamp);
        Ok((row.clone(), true))
    }

    /// Applies a remote record by ID, rejecting stale versions.
    ///
    /// The incoming record keeps its own timestamps; the write is rejected
    /// when its `last_updated_at` is at or before the stored one. Replaying a
    /// batch therefore converges to the same end state.
    pub fn upsert_replica(&self, record: R) -> CoreResult<Applied> {
        let mut inner = self.inner.write();
        let id = record.id();
        if let Some(existing) = inner.rows.get(&id) {
            if record.last_updated_at() <= existing.last_updated_at() {
                return Err(CoreError::StaleUpdate {
                    entity: R::ENTITY,
                    id,
                    incoming: record.last_updated_at(),
                    stored: existing.last_updated_at(),
                });
            }
            inner.rows.insert(id, record);
            Ok(Applied::Updated)
        } else {
            inner.rows.insert(id, record);
            Ok(Applied::Inserted)
        }
    }

    /// Returns records matching a predicate.
    pub fn filter<F>(&self, pred: F) -> Vec<R>
    where
        F: Fn(&R) -> bool,
    {
        self.inner
            .read()
            .rows
            .values()
            .filter(|r| pred(r))
            .cloned()
            .collect()
    }

    /// Returns records updated within `(from, to]`.
    pub fn updated_within(&self, from: Timestamp, to: Timestamp) -> Vec<R> {
        self.filter(|r| r.last_updated_at() > from && r.last_updated_at() <= to)
    }

    /// Returns every record in ID order.
    pub fn all(&self) -> Vec<R> {
        self.inner.read().rows.values().cloned().collect()
    }

    /// Number of records in the table.
    pub fn len(&self) -> usize {
        self.inner.read().rows.len()
    }

    /// True when the table holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// All tables of one instance (center or edge).
pub struct Store {
    origin: Option<BoxId>,
    /// Edge servers and their sync watermarks.
    pub boxes: Table<BoxRecord>,
    /// Registered workers.
    pub workers: Table<WorkerRecord>,
    /// Operator-created tasks.
    pub tasks: Table<TaskRecord>,
    /// Microtask groups.
    pub groups: Table<MicrotaskGroupRecord>,
    /// Microtasks.
    pub microtasks: Table<MicrotaskRecord>,
    /// Microtask assignments.
    pub assignments: Table<MicrotaskAssignmentRecord>,
    /// Microtask-group assignments.
    pub group_assignments: Table<MicrotaskGroupAssignmentRecord>,
    /// Payout accounts.
    pub accounts: Table<PaymentsAccountRecord>,
    /// Settlement transactions.
    pub transactions: Table<PaymentsTransactionRecord>,
}

impl Store {
    fn new(origin: Option<BoxId>) -> Self {
        Self {
            origin,
            boxes: Table::new(origin),
            workers: Table::new(origin),
            tasks: Table::new(origin),
            groups: Table::new(origin),
            microtasks: Table::new(origin),
            assignments: Table::new(origin),
            group_assignments: Table::new(origin),
            accounts: Table::new(origin),
            transactions: Table::new(origin),
        }
    }

    /// Creates the center's store (reserved ID namespace).
    pub fn center() -> Self {
        Self::new(None)
    }

    /// Creates an edge store minting IDs under `box_id`.
    pub fn edge(box_id: BoxId) -> Self {
        Self::new(Some(box_id))
    }

    /// The instance's ID namespace; `None` for the center.
    pub fn origin(&self) -> Option<BoxId> {
        self.origin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn worker() -> WorkerRecord {
        WorkerRecord {
            id: GlobalId::from_value(0),
            box_id: None,
            phone_number: None,
            tags: vec!["hindi".into()],
            worker_group: None,
            balance: 0.0,
            selected_account: None,
            payments_meta: json!({}),
            created_at: Timestamp::ZERO,
            last_updated_at: Timestamp::ZERO,
        }
    }

    #[test]
    fn insert_allocates_from_own_namespace() {
        let center = Store::center();
        let a = center.workers.insert(worker()).unwrap();
        let b = center.workers.insert(worker()).unwrap();
        assert_eq!(a.id.value(), 1);
        assert_eq!(b.id.value(), 2);

        let edge = Store::edge(BoxId::new(5).unwrap());
        let c = edge.workers.insert(worker()).unwrap();
        assert_eq!(c.id.value(), (5u64 << 48) + 1);
        assert_eq!(c.id.box_part(), Some(BoxId::new(5).unwrap()));
    }

    #[test]
    fn update_always_moves_time_forward() {
        let store = Store::center();
        let w = store.workers.insert(worker()).unwrap();
        let before = w.last_updated_at;

        // Repeated updates within the same microsecond still advance.
        let u1 = store.workers.update(w.id, |r| r.balance = 1.0).unwrap();
        let u2 = store.workers.update(w.id, |r| r.balance = 2.0).unwrap();
        assert!(u1.last_updated_at > before);
        assert!(u2.last_updated_at > u1.last_updated_at);
        assert_eq!(u2.balance, 2.0);
    }

    #[test]
    fn conditional_update_leaves_no_trace_when_the_predicate_rejects() {
        let store = Store::center();
        let w = store.workers.insert(worker()).unwrap();

        let (won, swapped) = store
            .workers
            .update_if(w.id, |r| r.balance == 0.0, |r| r.balance = 5.0)
            .unwrap();
        assert!(swapped);
        assert_eq!(won.balance, 5.0);
        assert!(won.last_updated_at > w.last_updated_at);

        // The replay loses: no mutation, and no timestamp stamp either.
        let (lost, swapped) = store
            .workers
            .update_if(w.id, |r| r.balance == 0.0, |r| r.balance = 7.0)
            .unwrap();
        assert!(!swapped);
        assert_eq!(lost.balance, 5.0);
        assert_eq!(lost.last_updated_at, won.last_updated_at);
    }

    #[test]
    fn missing_records_are_fatal() {
        let store = Store::center();
        let err = store.workers.get(GlobalId::from_value(99)).unwrap_err();
        assert!(matches!(err, CoreError::RecordNotFound { entity: "worker", .. }));
        assert!(store
            .workers
            .update(GlobalId::from_value(99), |_| {})
            .is_err());
    }

    #[test]
    fn replica_upsert_rejects_stale_and_equal_timestamps() {
        let center = Store::center();
        let edge = Store::edge(BoxId::new(2).unwrap());

        let w = edge.workers.insert(worker()).unwrap();
        assert_eq!(center.workers.upsert_replica(w.clone()).unwrap(), Applied::Inserted);

        // Replaying the identical record is an idempotent reject.
        let err = center.workers.upsert_replica(w.clone()).unwrap_err();
        assert!(matches!(err, CoreError::StaleUpdate { .. }));

        // A newer version applies; the superseded one is rejected afterwards.
        let newer = edge.workers.update(w.id, |r| r.balance = 9.0).unwrap();
        assert_eq!(center.workers.upsert_replica(newer.clone()).unwrap(), Applied::Updated);
        assert!(center.workers.upsert_replica(w).is_err());
        assert_eq!(center.workers.get(newer.id).unwrap().balance, 9.0);
    }

    #[test]
    fn stale_reject_is_stable_under_retries() {
        let center = Store::center();
        let edge = Store::edge(BoxId::new(2).unwrap());
        let w = edge.workers.insert(worker()).unwrap();
        center.workers.upsert_replica(w.clone()).unwrap();

        for _ in 0..3 {
            assert!(center.workers.upsert_replica(w.clone()).is_err());
        }
        assert_eq!(center.workers.len(), 1);
    }

    #[test]
    fn updated_within_is_half_open_on_the_left() {
        let store = Store::center();
        let w = store.workers.insert(worker()).unwrap();
        let t0 = w.last_updated_at;

        // (t0, t0] is empty; (t0.prev, t0] contains the record.
        assert!(store.workers.updated_within(t0, t0).is_empty());
        let window = store
            .workers
            .updated_within(Timestamp::from_micros(t0.as_micros() - 1), t0);
        assert_eq!(window.len(), 1);
    }
}
