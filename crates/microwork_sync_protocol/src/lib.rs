//! # Microwork Sync Protocol
//!
//! Message types for incremental, monotonic replication between an edge
//! ("box") and the center.
//!
//! The protocol is record-shipping over timestamp windows:
//! - Each batch carries whole records in a tagged envelope
//! - Receivers apply by upsert-by-id and reject stale versions
//! - Watermarks advance only after a batch is fully acknowledged, so
//!   delivery is at-least-once and replay converges

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod messages;

pub use messages::{
    edge_changes, CheckinRequest, CheckinResponse, PullRequest, PullResponse, PushRequest,
    PushResponse, StaleRejection, SyncRecord,
};
