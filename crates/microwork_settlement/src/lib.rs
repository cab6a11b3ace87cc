//! # Microwork Settlement
//!
//! Payout-account verification and credit settlement.
//!
//! This crate provides:
//! - The payout-account lifecycle (`Initialised` through `Verified`) with
//!   compare-and-swap transitions
//! - [`PaymentProvider`]: the gateway abstraction, with an idempotent
//!   [`MockProvider`] for tests
//! - [`JobQueue`]: the in-process settlement queue with retry backoff
//! - [`RegistrationProcessor`] and [`TransactionProcessor`]: the two
//!   pipeline stages
//!
//! Key invariants:
//! - Every provider payout is created under an idempotency key, so replayed
//!   jobs and retried requests move money at most once
//! - Account status changes are compare-and-swap; racing processors cannot
//!   both win a transition
//! - A failed step records its reason on the account instead of losing it

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod account;
mod error;
mod provider;
mod queue;
mod registration;
mod transaction;

pub use account::{fail_account, transition_account, transition_allowed};
pub use error::{SettlementError, SettlementResult};
pub use provider::{MockProvider, PaymentProvider, PayoutReceipt};
pub use queue::{JobHandler, JobQueue, RetryPolicy};
pub use registration::{confirm_account, RegistrationProcessor, VERIFICATION_AMOUNT};
pub use transaction::{
    payment_idempotency_key, request_payment, verification_idempotency_key, TransactionJob,
    TransactionProcessor, CURRENCY,
};
