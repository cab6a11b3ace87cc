//! Sync protocol messages.
//!
//! Replication moves whole records, not operations: each changed record
//! travels in a tagged [`SyncRecord`] envelope and is applied by
//! upsert-by-id on the other side. Timestamp watermarks bound each batch.

use microwork_core::{
    Applied, BoxId, CoreError, CoreResult, GlobalId, MicrotaskAssignmentRecord,
    MicrotaskGroupAssignmentRecord, MicrotaskGroupRecord, MicrotaskRecord, PaymentsAccountRecord,
    PaymentsTransactionRecord, Record, Store, TaskRecord, Timestamp, WorkerRecord,
};
use serde::{Deserialize, Serialize};

/// A replicated record in transit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "entity", content = "record", rename_all = "snake_case")]
pub enum SyncRecord {
    /// A worker record.
    Worker(WorkerRecord),
    /// A task record.
    Task(TaskRecord),
    /// A microtask group record.
    Group(MicrotaskGroupRecord),
    /// A microtask record.
    Microtask(MicrotaskRecord),
    /// A microtask assignment record.
    Assignment(MicrotaskAssignmentRecord),
    /// A group assignment record.
    GroupAssignment(MicrotaskGroupAssignmentRecord),
    /// A payout account record.
    Account(PaymentsAccountRecord),
    /// A settlement transaction record.
    Transaction(PaymentsTransactionRecord),
}

macro_rules! for_each_variant {
    ($self:expr, $r:ident => $body:expr) => {
        match $self {
            SyncRecord::Worker($r) => $body,
            SyncRecord::Task($r) => $body,
            SyncRecord::Group($r) => $body,
            SyncRecord::Microtask($r) => $body,
            SyncRecord::Assignment($r) => $body,
            SyncRecord::GroupAssignment($r) => $body,
            SyncRecord::Account($r) => $body,
            SyncRecord::Transaction($r) => $body,
        }
    };
}

impl SyncRecord {
    /// Global ID of the wrapped record.
    pub fn id(&self) -> GlobalId {
        for_each_variant!(self, r => r.id())
    }

    /// Last update time of the wrapped record.
    pub fn last_updated_at(&self) -> Timestamp {
        for_each_variant!(self, r => r.last_updated_at())
    }

    /// Entity name of the wrapped record.
    pub fn entity(&self) -> &'static str {
        match self {
            SyncRecord::Worker(_) => WorkerRecord::ENTITY,
            SyncRecord::Task(_) => TaskRecord::ENTITY,
            SyncRecord::Group(_) => MicrotaskGroupRecord::ENTITY,
            SyncRecord::Microtask(_) => MicrotaskRecord::ENTITY,
            SyncRecord::Assignment(_) => MicrotaskAssignmentRecord::ENTITY,
            SyncRecord::GroupAssignment(_) => MicrotaskGroupAssignmentRecord::ENTITY,
            SyncRecord::Account(_) => PaymentsAccountRecord::ENTITY,
            SyncRecord::Transaction(_) => PaymentsTransactionRecord::ENTITY,
        }
    }

    /// Applies this record to a store by stale-rejecting upsert.
    pub fn upsert_into(&self, store: &Store) -> CoreResult<Applied> {
        match self {
            SyncRecord::Worker(r) => store.workers.upsert_replica(r.clone()),
            SyncRecord::Task(r) => store.tasks.upsert_replica(r.clone()),
            SyncRecord::Group(r) => store.groups.upsert_replica(r.clone()),
            SyncRecord::Microtask(r) => store.microtasks.upsert_replica(r.clone()),
            SyncRecord::Assignment(r) => store.assignments.upsert_replica(r.clone()),
            SyncRecord::GroupAssignment(r) => store.group_assignments.upsert_replica(r.clone()),
            SyncRecord::Account(r) => store.accounts.upsert_replica(r.clone()),
            SyncRecord::Transaction(r) => store.transactions.upsert_replica(r.clone()),
        }
    }
}

/// A record the receiver refused because its version was not newer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaleRejection {
    /// Entity name.
    pub entity: String,
    /// Record ID.
    pub id: GlobalId,
    /// Timestamp carried by the rejected record.
    pub incoming: Timestamp,
    /// Timestamp already stored at the receiver.
    pub stored: Timestamp,
}

impl StaleRejection {
    /// Builds a rejection from a [`CoreError::StaleUpdate`], if it is one.
    pub fn from_error(err: &CoreError) -> Option<Self> {
        match err {
            CoreError::StaleUpdate {
                entity,
                id,
                incoming,
                stored,
            } => Some(Self {
                entity: (*entity).to_string(),
                id: *id,
                incoming: *incoming,
                stored: *stored,
            }),
            _ => None,
        }
    }
}

/// Edge liveness probe, opening a sync cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckinRequest {
    /// The edge checking in.
    pub box_id: BoxId,
}

/// Checkin acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckinResponse {
    /// Server wall-clock time at checkin.
    pub server_time: Timestamp,
}

/// Edge-to-center batch of changed records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequest {
    /// The pushing edge.
    pub box_id: BoxId,
    /// Upper bound of the window the batch covers.
    pub sent_at: Timestamp,
    /// Records changed in `(last_sent_at, sent_at]`.
    pub records: Vec<SyncRecord>,
}

/// Center acknowledgement of a push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushResponse {
    /// Records applied.
    pub applied: u64,
    /// Records refused as stale (already applied or superseded).
    pub rejected: Vec<StaleRejection>,
}

/// Edge request for center records changed since its receive watermark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    /// The pulling edge; scopes the response to its affiliated records.
    pub box_id: BoxId,
    /// The edge's receive watermark.
    pub since: Timestamp,
}

/// Center records for one edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullResponse {
    /// Records changed in `(since, server_time]`.
    pub records: Vec<SyncRecord>,
    /// Upper bound of the window; becomes the edge's new watermark.
    pub server_time: Timestamp,
}

/// Records an edge pushes: everything edge-authored or edge-updated.
///
/// Tasks, groups, and microtasks are center-authored and flow the other way.
pub fn edge_changes(store: &Store, from: Timestamp, to: Timestamp) -> Vec<SyncRecord> {
    let mut records = Vec::new();
    records.extend(store.workers.updated_within(from, to).into_iter().map(SyncRecord::Worker));
    records.extend(
        store
            .assignments
            .updated_within(from, to)
            .into_iter()
            .map(SyncRecord::Assignment),
    );
    records.extend(
        store
            .group_assignments
            .updated_within(from, to)
            .into_iter()
            .map(SyncRecord::GroupAssignment),
    );
    records.extend(store.accounts.updated_within(from, to).into_iter().map(SyncRecord::Account));
    records.extend(
        store
            .transactions
            .updated_within(from, to)
            .into_iter()
            .map(SyncRecord::Transaction),
    );
    records
}
