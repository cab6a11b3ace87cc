//! Replicated record types and their status machines.
//!
//! Field sets are trimmed to what the distribution and settlement core needs;
//! everything here replicates between edges and the center, so every record
//! carries a [`GlobalId`] and the pair of bookkeeping timestamps enforced by
//! the store.

use crate::error::{CoreError, CoreResult};
use crate::id::{BoxId, GlobalId};
use crate::payload::{Payload, ScenarioKind};
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Credits are fractional monetary units.
pub type Credits = f64;

/// A record that participates in replication.
pub trait Record: Clone + Send + Sync + 'static {
    /// Entity name used in errors and logs.
    const ENTITY: &'static str;

    /// Global record ID.
    fn id(&self) -> GlobalId;
    /// Sets the global record ID (store-internal, on insert).
    fn set_id(&mut self, id: GlobalId);
    /// Creation time.
    fn created_at(&self) -> Timestamp;
    /// Sets the creation time (store-internal, on insert).
    fn set_created_at(&mut self, ts: Timestamp);
    /// Last update time; monotonically non-decreasing.
    fn last_updated_at(&self) -> Timestamp;
    /// Sets the last update time (store-internal).
    fn set_last_updated_at(&mut self, ts: Timestamp);
}

macro_rules! impl_record {
    ($ty:ty, $entity:literal) => {
        impl Record for $ty {
            const ENTITY: &'static str = $entity;

            fn id(&self) -> GlobalId {
                self.id
            }
            fn set_id(&mut self, id: GlobalId) {
                self.id = id;
            }
            fn created_at(&self) -> Timestamp {
                self.created_at
            }
            fn set_created_at(&mut self, ts: Timestamp) {
                self.created_at = ts;
            }
            fn last_updated_at(&self) -> Timestamp {
                self.last_updated_at
            }
            fn set_last_updated_at(&mut self, ts: Timestamp) {
                self.last_updated_at = ts;
            }
        }
    };
}

/// Task lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Created by an operator, not yet handed to any edge.
    Created,
    /// Assigned to at least one edge.
    Assigned,
    /// All work on the task is done.
    Completed,
}

/// Whether a task hands out whole groups or individual microtasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentGranularity {
    /// Individual microtasks.
    Microtask,
    /// Whole microtask groups.
    Group,
}

impl AssignmentGranularity {
    /// Parses a granularity name, failing fast on unknown values.
    pub fn from_name(name: &str) -> CoreResult<Self> {
        match name {
            "MICROTASK" => Ok(Self::Microtask),
            "GROUP" => Ok(Self::Group),
            other => Err(CoreError::InvalidConfiguration(format!(
                "unknown assignment granularity: {other}"
            ))),
        }
    }
}

/// Order in which assignable units are offered to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentOrder {
    /// Ascending by global ID.
    Sequential,
    /// Uniform random shuffle.
    Random,
}

impl AssignmentOrder {
    /// Parses an order name, failing fast on unknown values.
    pub fn from_name(name: &str) -> CoreResult<Self> {
        match name {
            "SEQUENTIAL" => Ok(Self::Sequential),
            "RANDOM" => Ok(Self::Random),
            other => Err(CoreError::InvalidConfiguration(format!(
                "unknown assignment order: {other}"
            ))),
        }
    }
}

/// The closed set of verification policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyKind {
    /// Complete after `n` assignments, regardless of content agreement.
    NTotal,
    /// Complete after `n` distinct responses.
    NUnique,
    /// Complete after `n` assignments share the same response.
    NMatching,
}

impl PolicyKind {
    /// Parses a policy name, failing fast on unknown values.
    pub fn from_name(name: &str) -> CoreResult<Self> {
        match name {
            "N_TOTAL" => Ok(Self::NTotal),
            "N_UNIQUE" => Ok(Self::NUnique),
            "N_MATCHING" => Ok(Self::NMatching),
            other => Err(CoreError::InvalidConfiguration(format!(
                "unknown policy name: {other}"
            ))),
        }
    }

    /// Canonical policy name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NTotal => "N_TOTAL",
            Self::NUnique => "N_UNIQUE",
            Self::NMatching => "N_MATCHING",
        }
    }
}

/// Validated policy parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyParams {
    /// The policy threshold.
    pub n: u32,
    /// Optional cap on microtasks assigned to one worker for the task.
    pub max_per_worker: Option<u32>,
    /// Extra eligibility tags required of workers.
    pub tags: Vec<String>,
}

impl PolicyParams {
    /// Creates parameters with only the threshold set.
    pub fn with_n(n: u32) -> Self {
        Self {
            n,
            max_per_worker: None,
            tags: Vec::new(),
        }
    }

    /// Parses raw JSON parameters, validating at the boundary.
    pub fn parse(raw: &Value) -> CoreResult<Self> {
        let obj = raw
            .as_object()
            .ok_or_else(|| CoreError::InvalidConfiguration("policy params must be an object".into()))?;
        let n = obj
            .get("n")
            .and_then(Value::as_u64)
            .ok_or_else(|| CoreError::InvalidConfiguration("policy params missing integer n".into()))?;
        if n == 0 || n > u32::MAX as u64 {
            return Err(CoreError::InvalidConfiguration(format!(
                "policy threshold n out of range: {n}"
            )));
        }
        let max_per_worker = match obj.get("maxPerWorker") {
            None | Some(Value::Null) => None,
            Some(v) => Some(v.as_u64().and_then(|m| u32::try_from(m).ok()).ok_or_else(
                || CoreError::InvalidConfiguration("maxPerWorker must be a small integer".into()),
            )?),
        };
        let tags = match obj.get("tags") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|t| {
                    t.as_str().map(String::from).ok_or_else(|| {
                        CoreError::InvalidConfiguration("policy tags must be strings".into())
                    })
                })
                .collect::<CoreResult<Vec<_>>>()?,
            Some(_) => {
                return Err(CoreError::InvalidConfiguration(
                    "policy tags must be an array".into(),
                ))
            }
        };
        Ok(Self {
            n: n as u32,
            max_per_worker,
            tags,
        })
    }
}

/// A unit of operator-created work, distributed to edges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Global ID.
    pub id: GlobalId,
    /// Display name.
    pub name: String,
    /// Scenario the task belongs to.
    pub scenario: ScenarioKind,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Whether microtasks are handed out singly or by group.
    pub assignment_granularity: AssignmentGranularity,
    /// Order in which groups are offered.
    pub group_assignment_order: AssignmentOrder,
    /// Order in which microtasks are offered.
    pub microtask_assignment_order: AssignmentOrder,
    /// Verification policy.
    pub policy: PolicyKind,
    /// Validated policy parameters.
    pub policy_params: PolicyParams,
    /// Tags a worker must carry to be eligible.
    pub input_tags: Vec<String>,
    /// Optional worker-group restriction.
    pub worker_group: Option<String>,
    /// Edges the task is assigned to.
    pub assigned_boxes: Vec<BoxId>,
    /// Upper bound on units fetched per allocation call.
    pub assignment_batch_size: u32,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last update time.
    pub last_updated_at: Timestamp,
}

impl_record!(TaskRecord, "task");

/// Group completion status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupStatus {
    /// At least one member microtask is incomplete.
    Incomplete,
    /// Every member microtask is complete.
    Completed,
}

/// A bundle of microtasks assigned together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicrotaskGroupRecord {
    /// Global ID.
    pub id: GlobalId,
    /// Owning task.
    pub task_id: GlobalId,
    /// Completion status.
    pub status: GroupStatus,
    /// Aggregate credit total over member microtasks.
    pub credits: Credits,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last update time.
    pub last_updated_at: Timestamp,
}

impl_record!(MicrotaskGroupRecord, "microtask_group");

/// Microtask completion status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MicrotaskStatus {
    /// Not yet completed by the policy engine.
    Incomplete,
    /// Declared complete by the policy engine.
    Completed,
}

/// The smallest unit of assignable work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicrotaskRecord {
    /// Global ID.
    pub id: GlobalId,
    /// Owning task.
    pub task_id: GlobalId,
    /// Owning group, if the task is group-granular.
    pub group_id: Option<GlobalId>,
    /// Completion status.
    pub status: MicrotaskStatus,
    /// Maximum credits payable for one assignment of this microtask.
    pub credits: Credits,
    /// Optional completion deadline.
    pub deadline: Option<Timestamp>,
    /// Scenario input.
    pub input: Payload,
    /// Aggregated output, set on completion.
    pub output: Option<Payload>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last update time.
    pub last_updated_at: Timestamp,
}

impl_record!(MicrotaskRecord, "microtask");

/// Lifecycle of one microtask handed to one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentStatus {
    /// Handed out, awaiting submission.
    Assigned,
    /// Worker submitted output.
    Completed,
    /// Policy engine accepted the submission.
    Verified,
    /// Deadline passed without submission.
    Expired,
    /// Worker declined the microtask.
    Skipped,
}

/// Binding of one microtask to one worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicrotaskAssignmentRecord {
    /// Global ID.
    pub id: GlobalId,
    /// Edge the assignment was created on.
    pub box_id: Option<BoxId>,
    /// Owning task (denormalized for policy lookups).
    pub task_id: GlobalId,
    /// The microtask being worked.
    pub microtask_id: GlobalId,
    /// The worker it is bound to.
    pub worker_id: GlobalId,
    /// Lifecycle status.
    pub status: AssignmentStatus,
    /// Credits awarded on verification; never exceeds `max_credits`.
    pub credits: Credits,
    /// Budget cap, copied from the microtask at allocation time.
    pub max_credits: Credits,
    /// Worker-submitted output.
    pub output: Option<Payload>,
    /// Verification metadata.
    pub report: Option<Value>,
    /// Submission time.
    pub completed_at: Option<Timestamp>,
    /// Verification time.
    pub verified_at: Option<Timestamp>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last update time.
    pub last_updated_at: Timestamp,
}

impl_record!(MicrotaskAssignmentRecord, "microtask_assignment");

/// Binding of one microtask group to one worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicrotaskGroupAssignmentRecord {
    /// Global ID.
    pub id: GlobalId,
    /// Edge the assignment was created on.
    pub box_id: Option<BoxId>,
    /// The group being worked.
    pub group_id: GlobalId,
    /// The worker it is bound to.
    pub worker_id: GlobalId,
    /// Lifecycle status.
    pub status: AssignmentStatus,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last update time.
    pub last_updated_at: Timestamp,
}

impl_record!(MicrotaskGroupAssignmentRecord, "microtask_group_assignment");

/// A registered worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    /// Global ID.
    pub id: GlobalId,
    /// Edge the worker is affiliated with.
    pub box_id: Option<BoxId>,
    /// Contact number used for payment-provider contacts.
    pub phone_number: Option<String>,
    /// Eligibility tags.
    pub tags: Vec<String>,
    /// Optional worker-group membership.
    pub worker_group: Option<String>,
    /// Running verified-credit balance.
    pub balance: Credits,
    /// Currently selected payout account.
    pub selected_account: Option<GlobalId>,
    /// Provider-side metadata (cached contact ID and the like).
    pub payments_meta: Value,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last update time.
    pub last_updated_at: Timestamp,
}

impl_record!(WorkerRecord, "worker");

/// An edge server, with its sync watermarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoxRecord {
    /// Global ID.
    pub id: GlobalId,
    /// The edge identity used in ID allocation.
    pub box_id: BoxId,
    /// Display name.
    pub name: String,
    /// Watermark: everything updated at or before this has been pushed.
    pub last_sent_at: Timestamp,
    /// Watermark: everything updated at or before this has been pulled.
    pub last_received_at: Timestamp,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last update time.
    pub last_updated_at: Timestamp,
}

impl_record!(BoxRecord, "box");

/// Payout destination kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayoutMode {
    /// Bank account transfer.
    BankTransfer,
    /// UPI virtual payment address.
    Upi,
}

/// Payments-account lifecycle.
///
/// `Failed` and `Rejected` are terminal and reachable from any other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    /// Registered locally, nothing sent to the provider yet.
    Initialised,
    /// Provider-side registration in progress.
    Verification,
    /// Verification transaction enqueued.
    TransactionQueue,
    /// Provider accepted the verification payout.
    TransactionCreated,
    /// Worker reported the amount they received.
    ConfirmationReceived,
    /// Verification amount confirmed; account is active.
    Verified,
    /// A step failed; see `failure_reason` in metadata.
    Failed,
    /// Worker confirmed a wrong amount.
    Rejected,
}

impl AccountStatus {
    /// Returns true for states no further transition may leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Verified | Self::Failed | Self::Rejected)
    }
}

/// Masked payout-destination details.
///
/// Immutable once the account is active; only the masked form is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountDetails {
    /// Account-holder name.
    pub name: String,
    /// Masked account number or UPI address.
    pub masked_id: String,
}

/// A worker's payout destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentsAccountRecord {
    /// Global ID.
    pub id: GlobalId,
    /// Edge the account was registered on.
    pub box_id: Option<BoxId>,
    /// Owning worker.
    pub worker_id: GlobalId,
    /// Destination kind.
    pub mode: PayoutMode,
    /// Masked destination details.
    pub details: AccountDetails,
    /// Stable content hash of the destination, used for idempotency keys.
    pub hash: String,
    /// Provider-side fund-account handle.
    pub fund_id: Option<String>,
    /// Lifecycle status.
    pub status: AccountStatus,
    /// Provider metadata and failure reasons.
    pub meta: Value,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last update time.
    pub last_updated_at: Timestamp,
}

impl_record!(PaymentsAccountRecord, "payments_account");

/// Why a payout was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionPurpose {
    /// Small payout used to verify a new account.
    Verification,
    /// Settlement of earned credits.
    Payment,
}

/// Settlement-transaction lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    /// Recorded, not yet queued.
    Created,
    /// Waiting in the settlement queue.
    Queued,
    /// Provider accepted the payout.
    Processed,
    /// Terminal failure.
    Failed,
    /// Provider reversed the payout.
    Reversed,
}

/// A queued settlement request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentsTransactionRecord {
    /// Global ID.
    pub id: GlobalId,
    /// Edge the transaction originated on.
    pub box_id: Option<BoxId>,
    /// Paying worker.
    pub worker_id: GlobalId,
    /// Destination account.
    pub account_id: GlobalId,
    /// Amount in credits.
    pub amount: Credits,
    /// ISO currency code.
    pub currency: String,
    /// Why the payout was issued.
    pub purpose: TransactionPurpose,
    /// Destination kind.
    pub mode: PayoutMode,
    /// Caller-supplied token making provider retries a no-op.
    pub idempotency_key: String,
    /// Provider-side payout handle, set once accepted.
    pub payout_id: Option<String>,
    /// Lifecycle status.
    pub status: TransactionStatus,
    /// Provider metadata.
    pub meta: Value,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last update time.
    pub last_updated_at: Timestamp,
}

impl_record!(PaymentsTransactionRecord, "payments_transaction");
