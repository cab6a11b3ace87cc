//! Error types for the Microwork core.

use crate::id::GlobalId;
use crate::time::Timestamp;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core data-model operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An update carried a timestamp at or before the stored one.
    ///
    /// Replication rejects stale writes instead of last-writer-wins; callers
    /// resolve by re-reading and reapplying on top of the newer record.
    #[error("stale update for {entity} {id}: incoming {incoming} <= stored {stored}")]
    StaleUpdate {
        /// Entity name.
        entity: &'static str,
        /// Record ID.
        id: GlobalId,
        /// Timestamp carried by the rejected write.
        incoming: Timestamp,
        /// Timestamp already stored.
        stored: Timestamp,
    },

    /// A referenced record does not exist.
    #[error("{entity} record not found: {id}")]
    RecordNotFound {
        /// Entity name.
        entity: &'static str,
        /// Record ID that was looked up.
        id: GlobalId,
    },

    /// The local ID sequence left the 48-bit range reserved for it.
    #[error("local id {local_id} exceeds the 48-bit sequence range")]
    IdOverflow {
        /// The out-of-range sequence value.
        local_id: u64,
    },

    /// A box ID outside the valid edge range (zero is reserved for the center).
    #[error("box id {raw} is out of range")]
    BoxIdOutOfRange {
        /// The rejected raw value.
        raw: u16,
    },

    /// Unknown policy, ordering, granularity, or malformed parameters.
    ///
    /// Fatal configuration error; must not occur past boundary validation.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A payload envelope failed boundary validation.
    #[error("invalid payload: {0}")]
    Payload(String),
}
