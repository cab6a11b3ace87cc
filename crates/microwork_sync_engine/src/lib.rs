//! # Microwork Sync Engine
//!
//! Replication between edge boxes and the center.
//!
//! This crate provides:
//! - [`SyncEngine`]: the edge-side state machine driving checkin, push,
//!   and pull phases with watermark bookkeeping and retry backoff
//! - [`CenterHandler`]: the center-side counterpart that applies pushes,
//!   runs verification policies over new submissions, and scopes pulls
//! - [`SyncTransport`]: the pluggable wire between the two
//!
//! Key invariants:
//! - Watermarks advance only after a batch is fully acknowledged or fully
//!   applied, so interrupted cycles replay their window
//! - Replayed records are absorbed by stale rejection on either side
//! - An engine runs at most one cycle at a time

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod center;
mod config;
mod engine;
mod error;
mod transport;

pub use center::{CenterHandler, LoopbackTransport};
pub use config::{RetryConfig, SyncConfig};
pub use engine::{SyncCycleResult, SyncEngine, SyncState, SyncStats};
pub use error::{SyncError, SyncResult};
pub use transport::{MockTransport, SyncTransport};
