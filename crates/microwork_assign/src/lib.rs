//! # Microwork Assign
//!
//! The assignment service: hands microtasks and microtask groups to workers
//! within a credit ceiling.
//!
//! This crate provides:
//! - Budgeted greedy allocation (strict prefix-that-fits)
//! - Sequential and uniformly random assignment ordering
//! - A per-worker in-flight guard against double allocation
//! - Submission handling that dispatches the task policy's completion hook
//!
//! ## Key Invariants
//!
//! - The credits committed to a worker in one call never exceed the ceiling
//! - `Sequential` ordering is deterministic; `Random` is a true shuffle,
//!   not a randomized sort

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod order;
mod service;

pub use order::{reorder, reorder_with_rng};
pub use service::{AllocationSummary, AssignmentService};
