//! Wire payload layouts.
//!
//! Each inbound request and outbound response owns a fixed little-endian
//! word layout inside the 60-byte slot payload. Encoders fill a payload
//! buffer; decoders read one. Both sides tolerate short buffers by
//! treating missing trailing words as zero, matching firmware behavior
//! for reserved fields.

use crate::type_alias::*;

#[inline]
pub(crate) fn put(buf: &mut [u8], word: usize, val: u32) {
    buf[word * 4..word * 4 + 4].copy_from_slice(&val.to_le_bytes());
}

#[inline]
pub(crate) fn get(buf: &[u8], word: usize) -> u32 {
    let at = word * 4;
    if at + 4 > buf.len() {
        return 0;
    }
    u32::from_le_bytes(buf[at..at + 4].try_into().unwrap())
}

/// Data direction of a task, as encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DataDir {
    None = 0x0,
    In = 0x1,
    Out = 0x2,
    Unspecified = 0x4,
}

/// SSP initiator I/O start.
#[derive(Debug, Clone, Copy)]
pub struct SspStartReq {
    pub tag: Tag,
    pub device_handle: DeviceHandle,
    pub data_len: u32,
    pub dir: DataDir,
    pub lun: [u8; 8],
    pub cdb: [u8; 16],
}

impl SspStartReq {
    pub fn encode(&self, out: &mut [u8]) {
        put(out, 0, self.tag);
        put(out, 1, self.device_handle);
        put(out, 2, self.data_len);
        put(out, 3, u32::from(self.dir as u8) << 8);
        out[16..24].copy_from_slice(&self.lun);
        out[24..40].copy_from_slice(&self.cdb);
    }

    pub fn decode(buf: &[u8]) -> Self {
        let mut lun = [0u8; 8];
        lun.copy_from_slice(&buf[16..24]);
        let mut cdb = [0u8; 16];
        cdb.copy_from_slice(&buf[24..40]);
        Self {
            tag: get(buf, 0),
            device_handle: get(buf, 1),
            data_len: get(buf, 2),
            dir: decode_dir(get(buf, 3) >> 8),
            lun,
            cdb,
        }
    }
}

fn decode_dir(raw: u32) -> DataDir {
    match raw & 0x7 {
        0x1 => DataDir::In,
        0x2 => DataDir::Out,
        0x4 => DataDir::Unspecified,
        _ => DataDir::None,
    }
}

/// SATA host operation start. The protocol mode nibble mirrors the
/// firmware encoding: 4 no-data, 5 PIO, 6 DMA, 7 FPDMA (NCQ).
#[derive(Debug, Clone, Copy)]
pub struct SataStartReq {
    pub tag: Tag,
    pub device_handle: DeviceHandle,
    pub data_len: u32,
    pub ncq_tag: u8,
    pub protocol_mode: u8,
    pub dir: DataDir,
    pub fis: [u8; 20],
}

impl SataStartReq {
    pub fn encode(&self, out: &mut [u8]) {
        put(out, 0, self.tag);
        put(out, 1, self.device_handle);
        put(out, 2, self.data_len);
        put(
            out,
            3,
            (u32::from(self.ncq_tag) << 16)
                | (u32::from(self.protocol_mode & 0x3F) << 10)
                | (u32::from(self.dir as u8) << 8),
        );
        out[16..36].copy_from_slice(&self.fis);
    }

    pub fn decode(buf: &[u8]) -> Self {
        let w3 = get(buf, 3);
        let mut fis = [0u8; 20];
        fis.copy_from_slice(&buf[16..36]);
        Self {
            tag: get(buf, 0),
            device_handle: get(buf, 1),
            data_len: get(buf, 2),
            ncq_tag: ((w3 >> 16) & 0xFF) as u8,
            protocol_mode: ((w3 >> 10) & 0x3F) as u8,
            dir: decode_dir(w3 >> 8),
            fis,
        }
    }
}

/// SMP request start. Request and response frames are described by their
/// lengths; the frame bytes travel in caller-owned buffers.
#[derive(Debug, Clone, Copy)]
pub struct SmpStartReq {
    pub tag: Tag,
    pub device_handle: DeviceHandle,
    pub req_len: u32,
    pub resp_len: u32,
}

impl SmpStartReq {
    pub fn encode(&self, out: &mut [u8]) {
        put(out, 0, self.tag);
        put(out, 1, self.device_handle);
        put(out, 2, self.req_len);
        put(out, 3, self.resp_len);
    }

    pub fn decode(buf: &[u8]) -> Self {
        Self {
            tag: get(buf, 0),
            device_handle: get(buf, 1),
            req_len: get(buf, 2),
            resp_len: get(buf, 3),
        }
    }
}

/// SSP task management (query task, abort task set, ...).
#[derive(Debug, Clone, Copy)]
pub struct SspTmReq {
    pub tag: Tag,
    pub device_handle: DeviceHandle,
    pub related_tag: Tag,
    pub tmf_op: u32,
    pub lun: [u8; 8],
}

impl SspTmReq {
    pub fn encode(&self, out: &mut [u8]) {
        put(out, 0, self.tag);
        put(out, 1, self.device_handle);
        put(out, 2, self.related_tag);
        put(out, 3, self.tmf_op);
        out[16..24].copy_from_slice(&self.lun);
    }

    pub fn decode(buf: &[u8]) -> Self {
        let mut lun = [0u8; 8];
        lun.copy_from_slice(&buf[16..24]);
        Self {
            tag: get(buf, 0),
            device_handle: get(buf, 1),
            related_tag: get(buf, 2),
            tmf_op: get(buf, 3),
            lun,
        }
    }
}

/// Per-protocol task abort: one tag, or every task of a device.
#[derive(Debug, Clone, Copy)]
pub struct TaskAbortReq {
    pub tag: Tag,
    pub device_handle: DeviceHandle,
    pub abort_all: bool,
    pub tag_to_abort: Tag,
}

impl TaskAbortReq {
    pub fn encode(&self, out: &mut [u8]) {
        put(out, 0, self.tag);
        put(out, 1, self.device_handle);
        put(out, 2, u32::from(self.abort_all));
        put(out, 3, self.tag_to_abort);
    }

    pub fn decode(buf: &[u8]) -> Self {
        Self {
            tag: get(buf, 0),
            device_handle: get(buf, 1),
            abort_all: get(buf, 2) != 0,
            tag_to_abort: get(buf, 3),
        }
    }
}

/// Device registration: binds a protocol address to a firmware handle.
#[derive(Debug, Clone, Copy)]
pub struct DeviceRegisterReq {
    pub tag: Tag,
    pub phy_id: PhyId,
    pub device_kind: u8,
    pub link_rate: u8,
    pub sas_addr: [u8; 8],
}

impl DeviceRegisterReq {
    pub fn encode(&self, out: &mut [u8]) {
        put(out, 0, self.tag);
        put(
            out,
            1,
            (u32::from(self.device_kind) << 16)
                | (u32::from(self.link_rate) << 8)
                | u32::from(self.phy_id),
        );
        out[8..16].copy_from_slice(&self.sas_addr);
    }

    pub fn decode(buf: &[u8]) -> Self {
        let w1 = get(buf, 1);
        let mut sas_addr = [0u8; 8];
        sas_addr.copy_from_slice(&buf[8..16]);
        Self {
            tag: get(buf, 0),
            phy_id: (w1 & 0xFF) as u8,
            device_kind: ((w1 >> 16) & 0xFF) as u8,
            link_rate: ((w1 >> 8) & 0xFF) as u8,
            sas_addr,
        }
    }
}

/// Single-word-argument requests share one layout: tag + argument.
/// Used for deregistration (handle), phy start/stop (phy id), SAS
/// re-initialize (zero).
#[derive(Debug, Clone, Copy)]
pub struct SimpleReq {
    pub tag: Tag,
    pub arg: u32,
}

impl SimpleReq {
    pub fn encode(&self, out: &mut [u8]) {
        put(out, 0, self.tag);
        put(out, 1, self.arg);
    }

    pub fn decode(buf: &[u8]) -> Self {
        Self {
            tag: get(buf, 0),
            arg: get(buf, 1),
        }
    }
}

/// Local phy control (link reset, hard reset, spinup notify).
#[derive(Debug, Clone, Copy)]
pub struct LocalPhyControlReq {
    pub tag: Tag,
    pub phy_id: PhyId,
    pub op: u32,
}

impl LocalPhyControlReq {
    pub fn encode(&self, out: &mut [u8]) {
        put(out, 0, self.tag);
        put(out, 1, (self.op << 8) | u32::from(self.phy_id));
    }

    pub fn decode(buf: &[u8]) -> Self {
        let w1 = get(buf, 1);
        Self {
            tag: get(buf, 0),
            phy_id: (w1 & 0xFF) as u8,
            op: w1 >> 8,
        }
    }
}

/// Hardware event acknowledgment, carrying the original event class and
/// the port/phy pair it was reported on.
#[derive(Debug, Clone, Copy)]
pub struct HwEventAckReq {
    pub tag: Tag,
    pub event_class: u16,
    pub port_id: PortId,
    pub phy_id: PhyId,
    pub param0: u32,
    pub param1: u32,
}

impl HwEventAckReq {
    pub fn encode(&self, out: &mut [u8]) {
        put(out, 0, self.tag);
        put(
            out,
            1,
            (u32::from(self.event_class) << 8)
                | (u32::from(self.phy_id & 0x0F) << 4)
                | u32::from(self.port_id & 0x0F),
        );
        put(out, 2, self.param0);
        put(out, 3, self.param1);
    }

    pub fn decode(buf: &[u8]) -> Self {
        let w1 = get(buf, 1);
        Self {
            tag: get(buf, 0),
            event_class: ((w1 >> 8) & 0xFFFF) as u16,
            phy_id: ((w1 >> 4) & 0x0F) as u8,
            port_id: (w1 & 0x0F) as u8,
            param0: get(buf, 2),
            param1: get(buf, 3),
        }
    }
}

/// NVM data read/write. `kind` selects the backing store (VPD, SEEPROM,
/// flash, expansion ROM).
#[derive(Debug, Clone, Copy)]
pub struct NvmDataReq {
    pub tag: Tag,
    pub kind: u8,
    pub offset: u32,
    pub len: u32,
}

impl NvmDataReq {
    pub fn encode(&self, out: &mut [u8]) {
        put(out, 0, self.tag);
        put(out, 1, u32::from(self.kind));
        put(out, 2, self.offset);
        put(out, 3, self.len);
    }

    pub fn decode(buf: &[u8]) -> Self {
        Self {
            tag: get(buf, 0),
            kind: (get(buf, 1) & 0xFF) as u8,
            offset: get(buf, 2),
            len: get(buf, 3),
        }
    }
}

/// One chunk of a firmware flash update transfer.
#[derive(Debug, Clone, Copy)]
pub struct FlashUpdateReq {
    pub tag: Tag,
    pub cur_offset: u32,
    pub cur_len: u32,
    pub total_len: u32,
}

impl FlashUpdateReq {
    pub fn encode(&self, out: &mut [u8]) {
        put(out, 0, self.tag);
        put(out, 1, self.cur_offset);
        put(out, 2, self.cur_len);
        put(out, 3, self.total_len);
    }

    pub fn decode(buf: &[u8]) -> Self {
        Self {
            tag: get(buf, 0),
            cur_offset: get(buf, 1),
            cur_len: get(buf, 2),
            total_len: get(buf, 3),
        }
    }
}

/// Set-device-state: drive a registered device into a firmware state
/// (operational, in-recovery, ...).
#[derive(Debug, Clone, Copy)]
pub struct SetDeviceStateReq {
    pub tag: Tag,
    pub device_handle: DeviceHandle,
    pub state: u32,
}

impl SetDeviceStateReq {
    pub fn encode(&self, out: &mut [u8]) {
        put(out, 0, self.tag);
        put(out, 1, self.device_handle);
        put(out, 2, self.state);
    }

    pub fn decode(buf: &[u8]) -> Self {
        Self {
            tag: get(buf, 0),
            device_handle: get(buf, 1),
            state: get(buf, 2),
        }
    }
}

/// SSP/SATA/SMP completion: tag, status word, protocol parameter.
/// For SSP/SATA the parameter is the residual; for SMP the returned
/// response length.
#[derive(Debug, Clone, Copy)]
pub struct TaskCompletionResp {
    pub tag: Tag,
    pub status: u32,
    pub param: u32,
}

impl TaskCompletionResp {
    pub fn encode(&self, out: &mut [u8]) {
        put(out, 0, self.tag);
        put(out, 1, self.status);
        put(out, 2, self.param);
    }

    pub fn decode(buf: &[u8]) -> Self {
        Self {
            tag: get(buf, 0),
            status: get(buf, 1),
            param: get(buf, 2),
        }
    }
}

/// Unsolicited SSP/SATA transfer-error event for an in-flight tag.
#[derive(Debug, Clone, Copy)]
pub struct TaskEventResp {
    pub tag: Tag,
    pub status: u32,
}

impl TaskEventResp {
    pub fn encode(&self, out: &mut [u8]) {
        put(out, 0, self.tag);
        put(out, 1, self.status);
    }

    pub fn decode(buf: &[u8]) -> Self {
        Self {
            tag: get(buf, 0),
            status: get(buf, 1),
        }
    }
}

/// Response to a device registration/deregistration or set-device-state
/// request.
#[derive(Debug, Clone, Copy)]
pub struct DeviceResp {
    pub tag: Tag,
    pub status: u32,
    pub device_handle: DeviceHandle,
}

impl DeviceResp {
    pub fn encode(&self, out: &mut [u8]) {
        put(out, 0, self.tag);
        put(out, 1, self.status);
        put(out, 2, self.device_handle);
    }

    pub fn decode(buf: &[u8]) -> Self {
        Self {
            tag: get(buf, 0),
            status: get(buf, 1),
            device_handle: get(buf, 2),
        }
    }
}

/// Response to a local phy control request.
#[derive(Debug, Clone, Copy)]
pub struct LocalPhyControlResp {
    pub tag: Tag,
    pub phy_id: PhyId,
    pub op: u32,
    pub status: u32,
}

impl LocalPhyControlResp {
    pub fn encode(&self, out: &mut [u8]) {
        put(out, 0, self.tag);
        put(out, 1, (self.op << 8) | u32::from(self.phy_id));
        put(out, 2, self.status);
    }

    pub fn decode(buf: &[u8]) -> Self {
        let w1 = get(buf, 1);
        Self {
            tag: get(buf, 0),
            phy_id: (w1 & 0xFF) as u8,
            op: w1 >> 8,
            status: get(buf, 2),
        }
    }
}

/// Generic tag + status response (ack, NVM, flash, SAS re-initialize,
/// task abort).
#[derive(Debug, Clone, Copy)]
pub struct SimpleResp {
    pub tag: Tag,
    pub status: u32,
}

impl SimpleResp {
    pub fn encode(&self, out: &mut [u8]) {
        put(out, 0, self.tag);
        put(out, 1, self.status);
    }

    pub fn decode(buf: &[u8]) -> Self {
        Self {
            tag: get(buf, 0),
            status: get(buf, 1),
        }
    }
}
