//! Attached-target records and the device registry.

use crate::type_alias::*;

/// Kind of attached target. Selects the task-start and task-abort opcode
/// family for all traffic to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// SAS end device (SSP traffic).
    SasEnd,
    /// SATA device behind STP (SATA traffic).
    Sata,
    /// Edge or fanout expander (SMP traffic).
    Expander,
}

impl DeviceKind {
    pub(crate) fn wire_value(self) -> u8 {
        match self {
            Self::SasEnd => 0x1,
            Self::Sata => 0x2,
            Self::Expander => 0x3,
        }
    }
}

/// Read-only snapshot of a device record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub kind: DeviceKind,
    pub sas_addr: [u8; 8],
    pub attached_phy: PhyId,
    pub handle: Option<DeviceHandle>,
    pub running: u32,
    pub open_rejects: u32,
    pub dying: bool,
}

/// One attached target.
#[derive(Debug)]
pub(crate) struct DeviceRecord {
    pub kind: DeviceKind,
    pub sas_addr: [u8; 8],
    pub attached_phy: PhyId,

    /// Firmware-assigned handle; `None` until registration completes.
    pub handle: Option<DeviceHandle>,

    /// Requests currently outstanding against this device. Must reach
    /// zero before the device may be deregistered.
    pub running: u32,

    /// Consecutive open-reject completions with no intervening success.
    pub open_rejects: u32,

    /// Marked for nexus-loss eviction. While set, completions for this
    /// device short-circuit to the undelivered-retry outcome.
    pub dying: bool,
}

/// Registry of attached targets, indexed by engine-local [`DeviceId`].
pub(crate) struct DeviceRegistry {
    slots: Vec<Option<DeviceRecord>>,
}

impl DeviceRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
        }
    }

    pub fn insert(&mut self, kind: DeviceKind, sas_addr: [u8; 8], phy: PhyId) -> Option<DeviceId> {
        let idx = self.slots.iter().position(|s| s.is_none())?;
        self.slots[idx] = Some(DeviceRecord {
            kind,
            sas_addr,
            attached_phy: phy,
            handle: None,
            running: 0,
            open_rejects: 0,
            dying: false,
        });
        Some(idx as DeviceId)
    }

    pub fn get(&self, id: DeviceId) -> Option<&DeviceRecord> {
        self.slots.get(id as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, id: DeviceId) -> Option<&mut DeviceRecord> {
        self.slots.get_mut(id as usize)?.as_mut()
    }

    /// Drop the record. The caller has already verified the running
    /// counter is zero.
    pub fn remove(&mut self, id: DeviceId) -> Option<DeviceRecord> {
        self.slots.get_mut(id as usize)?.take()
    }
}
