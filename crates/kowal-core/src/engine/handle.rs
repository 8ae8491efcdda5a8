//! Event handles
//!
//! A handle packs an event's location into 32 bits:
//!
//! ```text
//!  31   30            16 15             0
//! ┌────┬────────────────┬────────────────┐
//! │ ff │ instance index │ table index    │
//! └────┴────────────────┴────────────────┘
//! ```
//!
//! `ff` is set for freeform events, whose table index is their freeform
//! slot and whose instance index is always 0. Data-driven events use the
//! definition index and the instance index within that definition. The
//! layout caps a definition at 32767 instances and the tables at 65535
//! entries; indices beyond that are rejected, never wrapped.

use crate::error::{KwlError, KwlResult};

/// Largest number of instances per event definition
pub const MAX_INSTANCES_PER_DEFINITION: usize = 0x7fff;

/// Largest number of event definitions, and of freeform slots
pub const MAX_TABLE_ENTRIES: usize = 0xffff;

const FREEFORM_BIT: u32 = 0x8000_0000;

/// Handle to a data-driven or freeform event instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle(u32);

impl EventHandle {
    /// Never returned by the engine
    pub const INVALID: EventHandle = EventHandle(0xffff_ffff);

    /// Handle to instance `instance` of definition `definition`
    pub fn data(definition: usize, instance: usize) -> KwlResult<Self> {
        if definition >= MAX_TABLE_ENTRIES {
            return Err(KwlError::InvalidEventDefinitionHandle(definition));
        }
        if instance >= MAX_INSTANCES_PER_DEFINITION {
            return Err(KwlError::NoFreeEventInstances);
        }
        Ok(Self(((instance as u32) << 16) | definition as u32))
    }

    /// Handle to freeform slot `slot`
    pub fn freeform(slot: usize) -> KwlResult<Self> {
        if slot >= MAX_TABLE_ENTRIES {
            return Err(KwlError::NoFreeEventInstances);
        }
        Ok(Self(FREEFORM_BIT | slot as u32))
    }

    #[inline]
    pub fn is_freeform(self) -> bool {
        self.0 & FREEFORM_BIT != 0
    }

    /// Definition index for data-driven handles, slot for freeform handles
    #[inline]
    pub fn table_index(self) -> usize {
        (self.0 & 0xffff) as usize
    }

    #[inline]
    pub fn instance_index(self) -> usize {
        ((self.0 >> 16) & 0x7fff) as usize
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for EventHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_freeform() {
            write!(f, "freeform:{}", self.table_index())
        } else {
            write!(f, "event:{}/{}", self.table_index(), self.instance_index())
        }
    }
}

/// Index of an event definition in the loaded engine data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventDefinitionHandle(pub usize);

/// Index of a mix bus in the loaded engine data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MixBusHandle(pub usize);

/// Index of a mix preset in the loaded engine data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MixPresetHandle(pub usize);

/// Index of a wave bank in the loaded engine data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaveBankHandle(pub usize);
