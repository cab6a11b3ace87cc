//! # Microwork Core
//!
//! Data model and record store for the Microwork platform: crowd-sourced
//! microtasks served to workers by edge servers ("boxes") that periodically
//! synchronize with a central authority.
//!
//! This crate provides:
//! - Global ID allocation (`(box_id << 48) + local_id`, offline-safe)
//! - The replicated record types and their status machines
//! - A typed record store with monotonic `last_updated_at` enforcement and
//!   stale-rejecting replica upserts
//! - Versioned payload envelopes for scenario inputs and outputs
//!
//! ## Key Invariants
//!
//! - Two instances never mint the same global ID without coordinating
//! - `last_updated_at` never moves backward; stale replica writes are
//!   rejected, never silently merged
//! - An assignment's awarded credits never exceed its microtask's cap

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod id;
mod payload;
mod records;
mod store;
mod time;

pub use error::{CoreError, CoreResult};
pub use id::{BoxId, GlobalId, LOCAL_ID_BITS, MAX_LOCAL_ID};
pub use payload::{Payload, ScenarioKind};
pub use records::{
    AccountDetails, AccountStatus, AssignmentGranularity, AssignmentOrder, AssignmentStatus,
    BoxRecord, Credits, GroupStatus, MicrotaskAssignmentRecord, MicrotaskGroupAssignmentRecord,
    MicrotaskGroupRecord, MicrotaskRecord, MicrotaskStatus, PaymentsAccountRecord,
    PaymentsTransactionRecord, PayoutMode, PolicyKind, PolicyParams, Record, TaskRecord,
    TaskStatus, TransactionPurpose, TransactionStatus, WorkerRecord,
};
pub use store::{Applied, Store, Table};
pub use time::Timestamp;
