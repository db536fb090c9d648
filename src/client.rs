//! The collaborator seam: callbacks into the transport layer above the
//! engine, and the control-plane response model.

use crate::event::PhyChange;
use crate::status::TaskOutcome;
use crate::type_alias::*;

/// Whether a task is still known to its device, as answered by the
/// transport layer's task-management machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPresence {
    /// The device still holds the task.
    Present,
    /// The device no longer knows the task.
    Absent,
    /// The device did not answer; treat it as unresponsive.
    Unknown,
}

/// Why a device registration was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterFailure {
    OutOfResources,
    AlreadyRegistered,
    InvalidPhy,
    PhyAlreadyRegistered,
    PortIdOutOfRange,
    PortNotValid,
    DeviceTypeNotValid,
    Unknown(u32),
}

impl RegisterFailure {
    pub(crate) fn from_raw(raw: u32) -> Self {
        match raw {
            0x1 => Self::OutOfResources,
            0x2 => Self::AlreadyRegistered,
            0x3 => Self::InvalidPhy,
            0x4 => Self::PhyAlreadyRegistered,
            0x5 => Self::PortIdOutOfRange,
            0x6 => Self::PortNotValid,
            0x7 => Self::DeviceTypeNotValid,
            other => Self::Unknown(other),
        }
    }
}

/// Progress of a firmware flash update transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashUpdateStatus {
    CompletePendingReboot,
    InProgress,
    HeaderError,
    OffsetError,
    CrcError,
    LengthError,
    HwError,
    NotSupported,
    Disabled,
    Unknown(u32),
}

impl FlashUpdateStatus {
    pub(crate) fn from_raw(raw: u32) -> Self {
        match raw {
            0x00 => Self::CompletePendingReboot,
            0x01 => Self::InProgress,
            0x02 => Self::HeaderError,
            0x03 => Self::OffsetError,
            0x04 => Self::CrcError,
            0x05 => Self::LengthError,
            0x06 => Self::HwError,
            0x10 => Self::NotSupported,
            0x11 => Self::Disabled,
            other => Self::Unknown(other),
        }
    }
}

/// Control-plane request conclusions delivered to the collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlResponse {
    DeviceRegistered {
        device: DeviceId,
        handle: DeviceHandle,
    },
    DeviceRegistrationFailed {
        device: DeviceId,
        reason: RegisterFailure,
    },
    DeviceDeregistered {
        device: DeviceId,
        success: bool,
    },
    LocalPhyControl {
        phy: PhyId,
        success: bool,
    },
    NvmData {
        success: bool,
    },
    FlashUpdate(FlashUpdateStatus),
    DeviceStateSet {
        device: DeviceId,
        success: bool,
    },
    Reinitialized {
        success: bool,
    },
}

/// Callbacks out of the engine.
///
/// Invoked with the engine's lock released, so an implementation may
/// re-enter the submission path. All callbacks run either in the
/// interrupt-time drain or in the deferred recovery context; they must
/// not block.
pub trait TransportClient: Send + Sync {
    /// A submitted task reached a terminal outcome. Called exactly once
    /// per successfully submitted task; the tag is already released.
    fn task_done(&self, tag: Tag, outcome: TaskOutcome);

    /// A phy-level event was observed.
    fn phy_event(&self, phy: PhyId, change: PhyChange);

    /// The last phy of a port was lost; the port is gone.
    fn port_detached(&self, port: PortId);

    /// The device is unreachable on its current path. Perform a
    /// link-level reset, then call
    /// [`Adapter::nexus_recovered`](crate::Adapter::nexus_recovered).
    /// Reported at most once per dying transition.
    fn nexus_lost(&self, device: DeviceId);

    /// Ask the device whether it still holds a task. Used by the
    /// deferred recovery supervisor.
    fn query_task(&self, tag: Tag) -> TaskPresence;

    /// A control-plane request concluded. The tag is already released.
    fn control_done(&self, tag: Tag, response: ControlResponse);
}
