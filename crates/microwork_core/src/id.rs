//! Global ID allocation.
//!
//! Every replicated record carries a globally unique 64-bit ID derived from
//! the identity of the instance that created it and a locally incrementing
//! sequence number: `id = (box_id << 48) + local_id`. Centrally-created
//! records use the reserved `box_id = 0` namespace, so `id = local_id`.
//!
//! Edges can therefore mint IDs while offline without ever colliding with
//! each other or with the center.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of low bits reserved for the local sequence.
pub const LOCAL_ID_BITS: u32 = 48;

/// Largest local sequence value that fits below the box prefix.
pub const MAX_LOCAL_ID: u64 = (1u64 << LOCAL_ID_BITS) - 1;

/// Identifier of an edge server ("box").
///
/// Zero is reserved for the center and is not a valid `BoxId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoxId(u16);

impl BoxId {
    /// Creates a box ID, rejecting the reserved center value.
    pub fn new(raw: u16) -> CoreResult<Self> {
        if raw == 0 {
            return Err(CoreError::BoxIdOutOfRange { raw });
        }
        Ok(Self(raw))
    }

    /// Returns the raw numeric value.
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for BoxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique record identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlobalId(u64);

impl GlobalId {
    /// Composes a global ID from an origin and a local sequence number.
    ///
    /// `origin = None` is the center's reserved namespace. A `local_id` that
    /// does not fit in the 48-bit sequence range is a hard error, never a
    /// silent wrap.
    pub fn compose(origin: Option<BoxId>, local_id: u64) -> CoreResult<Self> {
        if local_id > MAX_LOCAL_ID {
            return Err(CoreError::IdOverflow { local_id });
        }
        let prefix = origin.map(|b| b.value() as u64).unwrap_or(0);
        Ok(Self((prefix << LOCAL_ID_BITS) + local_id))
    }

    /// Returns the box that minted this ID, or `None` for center-authored IDs.
    pub fn box_part(&self) -> Option<BoxId> {
        let raw = (self.0 >> LOCAL_ID_BITS) as u16;
        BoxId::new(raw).ok()
    }

    /// Returns the local sequence portion of this ID.
    pub fn local_part(&self) -> u64 {
        self.0 & MAX_LOCAL_ID
    }

    /// Returns the raw 64-bit value.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Reconstructs a global ID from its raw value.
    pub fn from_value(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
