//! Phy and port records. Mutated only by the event protocol.

/// Negotiated physical link rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRate {
    Gbps1_5,
    Gbps3_0,
    Gbps6_0,
}

impl LinkRate {
    /// Decode the rate nibble from a phy-up event word.
    pub(crate) fn from_wire(raw: u8) -> Option<Self> {
        match raw {
            0x1 => Some(Self::Gbps1_5),
            0x2 => Some(Self::Gbps3_0),
            0x4 => Some(Self::Gbps6_0),
            _ => None,
        }
    }
}

/// Port state reported in phy events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    NotEstablished,
    Valid,
    LostCommunication,
    InReset,
    Invalid,
    Unknown(u8),
}

impl PortState {
    pub(crate) fn from_wire(raw: u8) -> Self {
        match raw {
            0x0 => Self::NotEstablished,
            0x1 => Self::Valid,
            0x2 => Self::LostCommunication,
            0x4 => Self::InReset,
            0x8 => Self::Invalid,
            other => Self::Unknown(other),
        }
    }
}

/// Protocol personality a phy negotiated at the last phy-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachedProtocol {
    Sas,
    Sata,
}

/// Read-only snapshot of a phy record, for discovery and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhyInfo {
    pub enabled: bool,
    pub attached: bool,
    pub protocol: Option<AttachedProtocol>,
    pub link_rate: Option<LinkRate>,
    /// Identify frame (SAS) or signature FIS (SATA) captured at the last
    /// phy-up.
    pub frame: Vec<u8>,
    pub attached_addr: [u8; 8],
}

/// Read-only snapshot of a port record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortInfo {
    pub attached: bool,
    pub state: PortState,
}

/// One physical link.
#[derive(Debug)]
pub(crate) struct PhyRecord {
    /// Started via phy-start and not stopped since.
    pub enabled: bool,

    /// A device is attached (between phy-up and phy-down).
    pub attached: bool,

    pub protocol: Option<AttachedProtocol>,
    pub link_rate: Option<LinkRate>,

    /// Identify frame (SAS) or initial device-to-host FIS (SATA)
    /// captured from the phy-up event.
    pub frame: Vec<u8>,

    /// Protocol address derived from the captured frame.
    pub attached_addr: [u8; 8],
}

impl PhyRecord {
    pub fn new() -> Self {
        Self {
            enabled: false,
            attached: false,
            protocol: None,
            link_rate: None,
            frame: Vec::new(),
            attached_addr: [0; 8],
        }
    }

    /// Phy-down wipes everything learned at phy-up.
    pub fn clear_attachment(&mut self) {
        self.attached = false;
        self.protocol = None;
        self.link_rate = None;
        self.frame.clear();
        self.attached_addr = [0; 8];
    }
}

/// One logical port.
#[derive(Debug)]
pub(crate) struct PortRecord {
    pub attached: bool,
    pub state: PortState,
}

impl PortRecord {
    pub fn new() -> Self {
        Self {
            attached: false,
            state: PortState::NotEstablished,
        }
    }
}
