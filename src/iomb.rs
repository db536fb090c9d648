//! IOMB (I/O message buffer) header codec and the opcode space.
//!
//! Every queue slot is [`SLOT_SIZE`] bytes: a 4-byte bit-packed header
//! immediately followed by the payload. The header is the only part of a
//! slot the queue layer interprets; payload layouts live in [`crate::payload`].

use std::{fmt, mem};

use bitvec::{field::BitField, order::Lsb0, prelude as bv};
use paste::paste;

macro_rules! impl_accessor {
    ($field:ident, $field_ty:ty, $integral_ty:ty, $lsb:expr, $msb:expr, $setter:tt, $getter:tt) => {
        #[inline(always)]
        pub fn $setter(&mut self, val: $field_ty) {
            self.bits[$lsb..=$msb].store_le::<$integral_ty>(val as $integral_ty);
        }

        #[inline(always)]
        pub fn $getter(&self) -> $field_ty {
            self.bits[$lsb..=$msb].load_le::<$integral_ty>().into()
        }
    };

    ($field:ident, $field_ty:ty, $integral_ty:ty, $lsb:expr, $msb:expr) => {
        paste! {
            impl_accessor!(
                $field,
                $field_ty,
                $integral_ty,
                $lsb,
                $msb,
                [< set_ $field >],
                $field
            );
        }
    };

    ($field:ident, $field_ty:ty, $lsb:expr, $msb:expr) => {
        paste! {
            impl_accessor!(
                $field,
                $field_ty,
                $field_ty,
                $lsb,
                $msb,
                [< set_ $field >],
                $field
            );
        }
    };
}

/// Fixed size of one queue slot.
pub(crate) const SLOT_SIZE: usize = 64;

/// Payload bytes available in a slot after the header.
pub(crate) const PAYLOAD_SIZE: usize = SLOT_SIZE - mem::size_of::<MsgHeader>();

/// Header category for initiator SAS/SATA traffic. The firmware ignores
/// other values on this opcode range but logs them, so always send this.
pub(crate) const CATEGORY_SAS: u8 = 0x2;

/// IOMB header, 4 bytes.
///
/// # Layout
///
/// | Lsb | Msb |     Name     |
/// | --: | --: | ------------ |
/// |   0 |  11 | opcode       |
/// |  12 |  15 | category     |
/// |  16 |  23 | resp_queue   |
/// |  24 |  29 | element_cnt  |
/// |  30 |  30 | priority     |
/// |  31 |  31 | valid        |
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub(crate) struct MsgHeader {
    bits: bv::BitArr!(for 32, in u8),
}

impl MsgHeader {
    impl_accessor!(opcode, u16, 0, 11);
    impl_accessor!(category, u8, 12, 15);
    impl_accessor!(resp_queue, u8, 16, 23);
    impl_accessor!(element_cnt, u8, 24, 29);
    impl_accessor!(priority, u8, u8, 30, 30);
    impl_accessor!(valid, u8, u8, 31, 31);

    pub fn new(opcode: u16, resp_queue: u8, element_cnt: u8) -> Self {
        let mut this = Self::default();
        this.set_opcode(opcode);
        this.set_category(CATEGORY_SAS);
        this.set_resp_queue(resp_queue);
        this.set_element_cnt(element_cnt);
        this.set_valid(1);
        this
    }

    /// Whether the producer has marked this slot ready for consumption.
    #[inline(always)]
    pub fn is_valid(&self) -> bool {
        self.valid() != 0
    }

    /// Read a header out of the first 4 bytes of a slot.
    #[inline]
    pub fn from_bytes(raw: [u8; 4]) -> Self {
        let mut this = Self::default();
        this.bits.as_raw_mut_slice().copy_from_slice(&raw);
        this
    }

    /// The little-endian on-wire form.
    #[inline]
    pub fn to_bytes(self) -> [u8; 4] {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.bits.as_raw_slice());
        raw
    }
}

impl Default for MsgHeader {
    fn default() -> Self {
        Self {
            bits: bv::bitarr![u8, Lsb0; 0; 32],
        }
    }
}

impl fmt::Debug for MsgHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MsgHeader")
            .field("opcode", &self.opcode())
            .field("category", &self.category())
            .field("resp_queue", &self.resp_queue())
            .field("element_cnt", &self.element_cnt())
            .field("priority", &self.priority())
            .field("valid", &self.valid())
            .finish()
    }
}

/// Request opcodes the host may place on an inbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum InboundOpcode {
    PhyStart = 0x004,
    PhyStop = 0x005,
    SspStart = 0x009,
    SspTaskManagement = 0x00A,
    SspAbort = 0x00F,
    DeviceDeregister = 0x011,
    SmpStart = 0x012,
    SmpAbort = 0x014,
    DeviceRegister = 0x016,
    SataStart = 0x017,
    SataAbort = 0x018,
    LocalPhyControl = 0x019,
    FlashUpdate = 0x020,
    HwEventAck = 0x025,
    GetNvmData = 0x028,
    SetNvmData = 0x029,
    SetDeviceState = 0x02A,
    SasReinitialize = 0x02D,
}

impl InboundOpcode {
    pub fn from_raw(raw: u16) -> Option<Self> {
        Some(match raw {
            0x004 => Self::PhyStart,
            0x005 => Self::PhyStop,
            0x009 => Self::SspStart,
            0x00A => Self::SspTaskManagement,
            0x00F => Self::SspAbort,
            0x011 => Self::DeviceDeregister,
            0x012 => Self::SmpStart,
            0x014 => Self::SmpAbort,
            0x016 => Self::DeviceRegister,
            0x017 => Self::SataStart,
            0x018 => Self::SataAbort,
            0x019 => Self::LocalPhyControl,
            0x020 => Self::FlashUpdate,
            0x025 => Self::HwEventAck,
            0x028 => Self::GetNvmData,
            0x029 => Self::SetNvmData,
            0x02A => Self::SetDeviceState,
            0x02D => Self::SasReinitialize,
            _ => return None,
        })
    }

    #[inline(always)]
    pub fn raw(self) -> u16 {
        self as u16
    }
}

/// Completion and event opcodes the firmware places on an outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum OutboundOpcode {
    Echo = 0x001,
    HwEvent = 0x004,
    SspCompletion = 0x005,
    SmpCompletion = 0x006,
    LocalPhyControl = 0x007,
    DeviceRegister = 0x008,
    DeviceDeregister = 0x009,
    SataCompletion = 0x00B,
    SataEvent = 0x00C,
    SspEvent = 0x00D,
    FlashUpdate = 0x011,
    GeneralEvent = 0x014,
    SspAbort = 0x015,
    SataAbort = 0x016,
    HwEventAck = 0x01A,
    SkipEntry = 0x01C,
    SmpAbort = 0x01D,
    GetNvmData = 0x01E,
    SetNvmData = 0x01F,
    SetDeviceState = 0x021,
    SasReinitialize = 0x024,
}

impl OutboundOpcode {
    pub fn from_raw(raw: u16) -> Option<Self> {
        Some(match raw {
            0x001 => Self::Echo,
            0x004 => Self::HwEvent,
            0x005 => Self::SspCompletion,
            0x006 => Self::SmpCompletion,
            0x007 => Self::LocalPhyControl,
            0x008 => Self::DeviceRegister,
            0x009 => Self::DeviceDeregister,
            0x00B => Self::SataCompletion,
            0x00C => Self::SataEvent,
            0x00D => Self::SspEvent,
            0x011 => Self::FlashUpdate,
            0x014 => Self::GeneralEvent,
            0x015 => Self::SspAbort,
            0x016 => Self::SataAbort,
            0x01A => Self::HwEventAck,
            0x01C => Self::SkipEntry,
            0x01D => Self::SmpAbort,
            0x01E => Self::GetNvmData,
            0x01F => Self::SetNvmData,
            0x021 => Self::SetDeviceState,
            0x024 => Self::SasReinitialize,
            _ => return None,
        })
    }

    #[inline(always)]
    pub fn raw(self) -> u16 {
        self as u16
    }
}
