//! # Microwork Policy
//!
//! Pluggable verification policies deciding when crowd-sourced work is done.
//!
//! This crate provides:
//! - The closed policy registry (N_TOTAL, N_UNIQUE, N_MATCHING)
//! - Center-side batch verification and completion orchestration
//! - Edge-side assignability queries and submission hooks
//!
//! ## Key Invariants
//!
//! - A microtask transitions to `Completed` only through a policy decision
//! - Verified assignments are credited from their budget cap, never above it
//! - A quorum, once reached, is frozen: later disagreeing submissions never
//!   flip a completed microtask

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod completion;
mod local;
mod verify;

pub use completion::{
    BackwardLinkScheduler, CollectResponses, CompletionHandler, CompletionSummary,
    NoBackwardLinks, OutputAggregator,
};
pub use local::{assignable_groups, assignable_microtasks, handle_assignment_completion};
pub use verify::{policy_for, VerificationPolicy, VerifyOutcome};
