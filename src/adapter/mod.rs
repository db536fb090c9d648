//! The adapter: one explicit context object per controller.
//!
//! Owns the queues, the CCB table, the device registry and the phy/port
//! records, all behind a single host-wide lock. Work enters either from
//! interrupt context ([`Adapter::process_outbound`]) or from a deferred
//! worker ([`Adapter::run_recovery`]); collaborator callbacks are always
//! invoked with the lock released so they may re-enter the submission
//! path.

mod recovery;

use std::sync::{Arc, Mutex};

use crossbeam::queue::SegQueue;
use thiserror::Error;

use self::recovery::RecoveryEvent;
use crate::client::{ControlResponse, FlashUpdateStatus, RegisterFailure, TransportClient};
use crate::config::AttachConfig;
use crate::device::{DeviceInfo, DeviceKind, DeviceRegistry};
use crate::event::{BroadcastKind, HwEventClass, HwEventMsg, LinkErrorKind, PhyChange};
use crate::iomb::{InboundOpcode, OutboundOpcode};
use crate::payload::{
    DataDir, DeviceRegisterReq, DeviceResp, FlashUpdateReq, HwEventAckReq, LocalPhyControlReq,
    LocalPhyControlResp, NvmDataReq, SetDeviceStateReq, SimpleReq, SimpleResp, SmpStartReq,
    SspStartReq, SspTmReq, SataStartReq, TaskAbortReq, TaskCompletionResp, TaskEventResp, get,
};
use crate::phy::{AttachedProtocol, LinkRate, PhyInfo, PhyRecord, PortInfo, PortRecord, PortState};
use crate::queue::{
    inbound_pair, outbound_pair, InboundQueue, OutboundQueue, OutboundSlot, PeerInbound,
    PeerOutbound, QueueError,
};
use crate::status::{
    abort_disposition, sata_disposition, sata_event_disposition, smp_disposition, ssp_disposition,
    ssp_event_disposition, Disposition, EventDisposition, Status, TaskOutcome,
};
use crate::tag::{CcbKind, CcbTable};
use crate::type_alias::*;
use crate::util::likely::unlikely;

/// Submission failures. Propagated synchronously from the call that
/// detected them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("inbound queue full")]
    QueueFull,

    #[error("out of tags")]
    OutOfTags,

    #[error("payload of {0} bytes does not fit a message slot")]
    MessageTooLarge(usize),

    #[error("no such queue")]
    UnknownQueue,

    #[error("no such phy")]
    UnknownPhy,

    #[error("no such device")]
    UnknownDevice,

    #[error("device registry full")]
    RegistryFull,

    #[error("device is not registered with the firmware")]
    NotRegistered,

    #[error("device still has running requests")]
    DeviceBusy,

    #[error("device is being evicted")]
    DeviceGone,
}

impl From<QueueError> for SubmitError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Busy => Self::QueueFull,
            QueueError::MessageTooLarge(n) => Self::MessageTooLarge(n),
        }
    }
}

/// SATA command protocol mode, as encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SataMode {
    NoData = 0x4,
    Pio = 0x5,
    Dma = 0x6,
    Fpdma = 0x7,
}

/// Local phy control operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PhyControlOp {
    LinkReset = 0x01,
    HardReset = 0x02,
    NotifySpinup = 0x10,
}

/// NVM backing stores addressable through get/set NVM data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NvmStore {
    TwiDevice = 0x0,
    Seeprom = 0x1,
    VpdFlash = 0x4,
    ExpansionRom = 0x7,
}

/// SSP task management functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TmFunction {
    AbortTask = 0x01,
    AbortTaskSet = 0x02,
    ClearTaskSet = 0x04,
    LogicalUnitReset = 0x08,
    ClearAca = 0x40,
    QueryTask = 0x80,
}

/// One task submission.
#[derive(Debug, Clone)]
pub enum TaskRequest {
    Ssp {
        dir: DataDir,
        data_len: u32,
        lun: [u8; 8],
        cdb: [u8; 16],
    },
    Sata {
        mode: SataMode,
        dir: DataDir,
        data_len: u32,
        ncq_tag: u8,
        fis: [u8; 20],
    },
    Smp {
        req_len: u32,
        resp_len: u32,
    },
}

/// Firmware-side endpoints of every queue, handed out at attach time for
/// the peer (a simulation in tests, the controller on hardware).
pub struct FirmwareEndpoints {
    pub inbound: Vec<PeerInbound>,
    pub outbound: Vec<PeerOutbound>,
}

/// Interior state guarded by the host-wide lock.
struct Interior {
    inbound: Vec<InboundQueue>,
    outbound: Vec<OutboundQueue>,
    ccbs: CcbTable,
    devices: DeviceRegistry,
    phys: Vec<PhyRecord>,
    ports: Vec<PortRecord>,

    /// Per-outbound-queue drain guard: a re-entrant drain of the same
    /// queue becomes a no-op.
    draining: Vec<bool>,
}

/// Callback to make after the lock is released.
#[derive(Debug)]
enum Notice {
    Task(Tag, TaskOutcome),
    Control(Tag, ControlResponse),
    Phy(PhyId, PhyChange),
    PortDetached(PortId),
}

/// Host-side protocol engine for one controller.
pub struct Adapter {
    state: Mutex<Interior>,
    client: Arc<dyn TransportClient>,

    /// Hand-off from interrupt context to the deferred supervisor.
    recovery: SegQueue<RecoveryEvent>,

    open_reject_threshold: u32,
    outbound_count: usize,
}

impl Adapter {
    /// Build the queue tables and control structures for one controller
    /// and return the firmware-side endpoints alongside.
    pub fn attach(config: &AttachConfig, client: Arc<dyn TransportClient>) -> (Self, FirmwareEndpoints) {
        let mut inbound = Vec::with_capacity(config.inbound_queues);
        let mut peer_inbound = Vec::with_capacity(config.inbound_queues);
        for _ in 0..config.inbound_queues {
            let (host, peer) = inbound_pair(config.queue_depth);
            inbound.push(host);
            peer_inbound.push(peer);
        }
        let mut outbound = Vec::with_capacity(config.outbound_queues);
        let mut peer_outbound = Vec::with_capacity(config.outbound_queues);
        for _ in 0..config.outbound_queues {
            let (host, peer) = outbound_pair(config.queue_depth);
            outbound.push(host);
            peer_outbound.push(peer);
        }

        let adapter = Self {
            state: Mutex::new(Interior {
                inbound,
                outbound,
                ccbs: CcbTable::new(config.max_ccbs),
                devices: DeviceRegistry::new(config.max_devices),
                phys: (0..config.phys).map(|_| PhyRecord::new()).collect(),
                ports: (0..config.phys).map(|_| PortRecord::new()).collect(),
                draining: vec![false; config.outbound_queues],
            }),
            client,
            recovery: SegQueue::new(),
            open_reject_threshold: config.open_reject_threshold,
            outbound_count: config.outbound_queues,
        };
        let endpoints = FirmwareEndpoints {
            inbound: peer_inbound,
            outbound: peer_outbound,
        };
        (adapter, endpoints)
    }

    /// Number of outstanding CCBs, control-plane traffic included.
    pub fn in_flight(&self) -> usize {
        self.state.lock().unwrap().ccbs.in_flight()
    }

    /// Whether deferred recovery work is queued. The integration's
    /// deferred worker should call [`run_recovery`](Self::run_recovery)
    /// when this turns true.
    pub fn recovery_pending(&self) -> bool {
        !self.recovery.is_empty()
    }

    /// The transport layer finished the link-level reset for a device
    /// that was reported via
    /// [`TransportClient::nexus_lost`]. Clears the dying flag and the
    /// eviction counters.
    pub fn nexus_recovered(&self, device: DeviceId) {
        let mut state = self.state.lock().unwrap();
        if let Some(dev) = state.devices.get_mut(device) {
            dev.dying = false;
            dev.open_rejects = 0;
        }
    }

    /// Snapshot of a device record.
    pub fn device_info(&self, device: DeviceId) -> Option<DeviceInfo> {
        let state = self.state.lock().unwrap();
        state.devices.get(device).map(|dev| DeviceInfo {
            kind: dev.kind,
            sas_addr: dev.sas_addr,
            attached_phy: dev.attached_phy,
            handle: dev.handle,
            running: dev.running,
            open_rejects: dev.open_rejects,
            dying: dev.dying,
        })
    }

    /// Snapshot of a phy record. What a discovery layer reads after a
    /// phy-up notification.
    pub fn phy_info(&self, phy: PhyId) -> Option<PhyInfo> {
        let state = self.state.lock().unwrap();
        state.phys.get(usize::from(phy)).map(|p| PhyInfo {
            enabled: p.enabled,
            attached: p.attached,
            protocol: p.protocol,
            link_rate: p.link_rate,
            frame: p.frame.clone(),
            attached_addr: p.attached_addr,
        })
    }

    /// Snapshot of a port record.
    pub fn port_info(&self, port: PortId) -> Option<PortInfo> {
        let state = self.state.lock().unwrap();
        state.ports.get(usize::from(port)).map(|p| PortInfo {
            attached: p.attached,
            state: p.state,
        })
    }
}

/// Submission paths.
impl Adapter {
    /// Register a newly discovered target with the firmware. The handle
    /// arrives via [`ControlResponse::DeviceRegistered`].
    pub fn device_found(
        &self,
        queue: QueueId,
        kind: DeviceKind,
        sas_addr: [u8; 8],
        phy: PhyId,
    ) -> Result<DeviceId, SubmitError> {
        let mut state = self.state.lock().unwrap();
        let device = state
            .devices
            .insert(kind, sas_addr, phy)
            .ok_or(SubmitError::RegistryFull)?;

        let Some(tag) = state.ccbs.allocate(CcbKind::Control, Some(device)) else {
            state.devices.remove(device);
            return Err(SubmitError::OutOfTags);
        };
        let mut payload = [0u8; crate::iomb::PAYLOAD_SIZE];
        DeviceRegisterReq {
            tag,
            phy_id: phy,
            device_kind: kind.wire_value(),
            link_rate: 0,
            sas_addr,
        }
        .encode(&mut payload);

        if let Err(err) = push_inbound(&mut state, queue, InboundOpcode::DeviceRegister, &payload) {
            state.ccbs.free(tag);
            state.devices.remove(device);
            return Err(err);
        }
        if let Some(dev) = state.devices.get_mut(device) {
            dev.running += 1;
        }
        Ok(device)
    }

    /// Deregister a device whose running-request counter has reached
    /// zero. The record is dropped when the firmware confirms.
    pub fn device_gone(&self, queue: QueueId, device: DeviceId) -> Result<Tag, SubmitError> {
        let mut state = self.state.lock().unwrap();
        let dev = state.devices.get(device).ok_or(SubmitError::UnknownDevice)?;
        if dev.running != 0 {
            return Err(SubmitError::DeviceBusy);
        }
        let handle = dev.handle.ok_or(SubmitError::NotRegistered)?;

        let tag = state
            .ccbs
            .allocate(CcbKind::Control, Some(device))
            .ok_or(SubmitError::OutOfTags)?;
        let mut payload = [0u8; crate::iomb::PAYLOAD_SIZE];
        SimpleReq { tag, arg: handle }.encode(&mut payload);
        if let Err(err) = push_inbound(&mut state, queue, InboundOpcode::DeviceDeregister, &payload)
        {
            state.ccbs.free(tag);
            return Err(err);
        }
        Ok(tag)
    }

    /// Submit an SSP, SATA or SMP task to a registered device.
    pub fn submit_task(
        &self,
        queue: QueueId,
        device: DeviceId,
        request: TaskRequest,
    ) -> Result<Tag, SubmitError> {
        let mut state = self.state.lock().unwrap();
        let dev = state.devices.get(device).ok_or(SubmitError::UnknownDevice)?;
        if unlikely(dev.dying) {
            return Err(SubmitError::DeviceGone);
        }
        let handle = dev.handle.ok_or(SubmitError::NotRegistered)?;

        let tag = state
            .ccbs
            .allocate(CcbKind::Task, Some(device))
            .ok_or(SubmitError::OutOfTags)?;

        let mut payload = [0u8; crate::iomb::PAYLOAD_SIZE];
        let opcode = match &request {
            TaskRequest::Ssp {
                dir,
                data_len,
                lun,
                cdb,
            } => {
                SspStartReq {
                    tag,
                    device_handle: handle,
                    data_len: *data_len,
                    dir: *dir,
                    lun: *lun,
                    cdb: *cdb,
                }
                .encode(&mut payload);
                InboundOpcode::SspStart
            }
            TaskRequest::Sata {
                mode,
                dir,
                data_len,
                ncq_tag,
                fis,
            } => {
                SataStartReq {
                    tag,
                    device_handle: handle,
                    data_len: *data_len,
                    ncq_tag: *ncq_tag,
                    protocol_mode: *mode as u8,
                    dir: *dir,
                    fis: *fis,
                }
                .encode(&mut payload);
                InboundOpcode::SataStart
            }
            TaskRequest::Smp { req_len, resp_len } => {
                SmpStartReq {
                    tag,
                    device_handle: handle,
                    req_len: *req_len,
                    resp_len: *resp_len,
                }
                .encode(&mut payload);
                InboundOpcode::SmpStart
            }
        };
        if let TaskRequest::Smp { resp_len, .. } = &request {
            if let Some(ccb) = state.ccbs.resolve(tag) {
                ccb.smp_resp_len = *resp_len;
            }
        }

        if let Err(err) = push_inbound(&mut state, queue, opcode, &payload) {
            state.ccbs.free(tag);
            return Err(err);
        }
        if let Some(dev) = state.devices.get_mut(device) {
            dev.running += 1;
        }
        Ok(tag)
    }

    /// Submit an SSP task-management function. Its conclusion arrives
    /// through the SSP completion path under the returned tag.
    pub fn submit_ssp_tm(
        &self,
        queue: QueueId,
        device: DeviceId,
        related_tag: Tag,
        function: TmFunction,
        lun: [u8; 8],
    ) -> Result<Tag, SubmitError> {
        let mut state = self.state.lock().unwrap();
        let dev = state.devices.get(device).ok_or(SubmitError::UnknownDevice)?;
        let handle = dev.handle.ok_or(SubmitError::NotRegistered)?;

        let tag = state
            .ccbs
            .allocate(CcbKind::Task, Some(device))
            .ok_or(SubmitError::OutOfTags)?;
        let mut payload = [0u8; crate::iomb::PAYLOAD_SIZE];
        SspTmReq {
            tag,
            device_handle: handle,
            related_tag,
            tmf_op: function as u32,
            lun,
        }
        .encode(&mut payload);
        if let Err(err) = push_inbound(&mut state, queue, InboundOpcode::SspTaskManagement, &payload)
        {
            state.ccbs.free(tag);
            return Err(err);
        }
        if let Some(dev) = state.devices.get_mut(device) {
            dev.running += 1;
        }
        Ok(tag)
    }

    /// Abort one task (`Some(tag)`) or every task of a device (`None`).
    /// The abort request gets its own CCB and completes independently of
    /// the task it aborts.
    pub fn abort_task(
        &self,
        queue: QueueId,
        device: DeviceId,
        target: Option<Tag>,
    ) -> Result<Tag, SubmitError> {
        self.submit_abort(queue, device, target, false)
    }

    fn submit_abort(
        &self,
        queue: QueueId,
        device: DeviceId,
        target: Option<Tag>,
        internal: bool,
    ) -> Result<Tag, SubmitError> {
        let mut state = self.state.lock().unwrap();
        let dev = state.devices.get(device).ok_or(SubmitError::UnknownDevice)?;
        let handle = dev.handle.ok_or(SubmitError::NotRegistered)?;
        let opcode = match dev.kind {
            DeviceKind::SasEnd => InboundOpcode::SspAbort,
            DeviceKind::Sata => InboundOpcode::SataAbort,
            DeviceKind::Expander => InboundOpcode::SmpAbort,
        };

        if let Some(target_tag) = target {
            if let Some(target_ccb) = state.ccbs.resolve(target_tag) {
                target_ccb.aborting = true;
            }
        }

        let Some(tag) = state.ccbs.allocate(CcbKind::Abort, Some(device)) else {
            return Err(SubmitError::OutOfTags);
        };
        if internal {
            if let Some(ccb) = state.ccbs.resolve(tag) {
                ccb.internal = true;
            }
        }

        let mut payload = [0u8; crate::iomb::PAYLOAD_SIZE];
        TaskAbortReq {
            tag,
            device_handle: handle,
            abort_all: target.is_none(),
            tag_to_abort: target.unwrap_or(0),
        }
        .encode(&mut payload);
        if let Err(err) = push_inbound(&mut state, queue, opcode, &payload) {
            state.ccbs.free(tag);
            return Err(err);
        }
        if let Some(dev) = state.devices.get_mut(device) {
            dev.running += 1;
        }
        Ok(tag)
    }

    /// Start a phy. Concludes via [`PhyChange::Started`] once the
    /// firmware reports the phy-start status event.
    pub fn start_phy(&self, queue: QueueId, phy: PhyId) -> Result<Tag, SubmitError> {
        self.phy_request(queue, phy, InboundOpcode::PhyStart)
    }

    /// Stop a phy. Concludes via [`PhyChange::Stopped`].
    pub fn stop_phy(&self, queue: QueueId, phy: PhyId) -> Result<Tag, SubmitError> {
        self.phy_request(queue, phy, InboundOpcode::PhyStop)
    }

    fn phy_request(
        &self,
        queue: QueueId,
        phy: PhyId,
        opcode: InboundOpcode,
    ) -> Result<Tag, SubmitError> {
        let mut state = self.state.lock().unwrap();
        if usize::from(phy) >= state.phys.len() {
            return Err(SubmitError::UnknownPhy);
        }
        let tag = state
            .ccbs
            .allocate(CcbKind::Control, None)
            .ok_or(SubmitError::OutOfTags)?;
        let mut payload = [0u8; crate::iomb::PAYLOAD_SIZE];
        SimpleReq {
            tag,
            arg: u32::from(phy),
        }
        .encode(&mut payload);
        if let Err(err) = push_inbound(&mut state, queue, opcode, &payload) {
            state.ccbs.free(tag);
            return Err(err);
        }
        Ok(tag)
    }

    /// Execute a local phy operation (link reset, hard reset, spinup
    /// notification).
    pub fn local_phy_control(
        &self,
        queue: QueueId,
        phy: PhyId,
        op: PhyControlOp,
    ) -> Result<Tag, SubmitError> {
        let mut state = self.state.lock().unwrap();
        if usize::from(phy) >= state.phys.len() {
            return Err(SubmitError::UnknownPhy);
        }
        let tag = state
            .ccbs
            .allocate(CcbKind::Control, None)
            .ok_or(SubmitError::OutOfTags)?;
        let mut payload = [0u8; crate::iomb::PAYLOAD_SIZE];
        LocalPhyControlReq {
            tag,
            phy_id: phy,
            op: op as u32,
        }
        .encode(&mut payload);
        if let Err(err) = push_inbound(&mut state, queue, InboundOpcode::LocalPhyControl, &payload)
        {
            state.ccbs.free(tag);
            return Err(err);
        }
        Ok(tag)
    }

    /// Read from an NVM backing store.
    pub fn get_nvm_data(
        &self,
        queue: QueueId,
        store: NvmStore,
        offset: u32,
        len: u32,
    ) -> Result<Tag, SubmitError> {
        self.nvm_request(queue, InboundOpcode::GetNvmData, store, offset, len)
    }

    /// Write to an NVM backing store.
    pub fn set_nvm_data(
        &self,
        queue: QueueId,
        store: NvmStore,
        offset: u32,
        len: u32,
    ) -> Result<Tag, SubmitError> {
        self.nvm_request(queue, InboundOpcode::SetNvmData, store, offset, len)
    }

    fn nvm_request(
        &self,
        queue: QueueId,
        opcode: InboundOpcode,
        store: NvmStore,
        offset: u32,
        len: u32,
    ) -> Result<Tag, SubmitError> {
        let mut state = self.state.lock().unwrap();
        let tag = state
            .ccbs
            .allocate(CcbKind::Control, None)
            .ok_or(SubmitError::OutOfTags)?;
        let mut payload = [0u8; crate::iomb::PAYLOAD_SIZE];
        NvmDataReq {
            tag,
            kind: store as u8,
            offset,
            len,
        }
        .encode(&mut payload);
        if let Err(err) = push_inbound(&mut state, queue, opcode, &payload) {
            state.ccbs.free(tag);
            return Err(err);
        }
        Ok(tag)
    }

    /// Transfer one chunk of a firmware image to flash.
    pub fn flash_update(
        &self,
        queue: QueueId,
        cur_offset: u32,
        cur_len: u32,
        total_len: u32,
    ) -> Result<Tag, SubmitError> {
        let mut state = self.state.lock().unwrap();
        let tag = state
            .ccbs
            .allocate(CcbKind::Control, None)
            .ok_or(SubmitError::OutOfTags)?;
        let mut payload = [0u8; crate::iomb::PAYLOAD_SIZE];
        FlashUpdateReq {
            tag,
            cur_offset,
            cur_len,
            total_len,
        }
        .encode(&mut payload);
        if let Err(err) = push_inbound(&mut state, queue, InboundOpcode::FlashUpdate, &payload) {
            state.ccbs.free(tag);
            return Err(err);
        }
        Ok(tag)
    }

    /// Drive a registered device into a firmware state.
    pub fn set_device_state(
        &self,
        queue: QueueId,
        device: DeviceId,
        device_state: u32,
    ) -> Result<Tag, SubmitError> {
        let mut state = self.state.lock().unwrap();
        let dev = state.devices.get(device).ok_or(SubmitError::UnknownDevice)?;
        let handle = dev.handle.ok_or(SubmitError::NotRegistered)?;
        let tag = state
            .ccbs
            .allocate(CcbKind::Control, Some(device))
            .ok_or(SubmitError::OutOfTags)?;
        let mut payload = [0u8; crate::iomb::PAYLOAD_SIZE];
        SetDeviceStateReq {
            tag,
            device_handle: handle,
            state: device_state,
        }
        .encode(&mut payload);
        if let Err(err) = push_inbound(&mut state, queue, InboundOpcode::SetDeviceState, &payload) {
            state.ccbs.free(tag);
            return Err(err);
        }
        if let Some(dev) = state.devices.get_mut(device) {
            dev.running += 1;
        }
        Ok(tag)
    }

    /// Ask the firmware to re-run SAS initialization.
    pub fn sas_reinitialize(&self, queue: QueueId) -> Result<Tag, SubmitError> {
        let mut state = self.state.lock().unwrap();
        let tag = state
            .ccbs
            .allocate(CcbKind::Control, None)
            .ok_or(SubmitError::OutOfTags)?;
        let mut payload = [0u8; crate::iomb::PAYLOAD_SIZE];
        SimpleReq { tag, arg: 0 }.encode(&mut payload);
        if let Err(err) = push_inbound(&mut state, queue, InboundOpcode::SasReinitialize, &payload)
        {
            state.ccbs.free(tag);
            return Err(err);
        }
        Ok(tag)
    }
}

/// Outbound consumption.
impl Adapter {
    /// Drain every outbound queue. The interrupt-time entry point.
    pub fn interrupt(&self) -> usize {
        (0..self.outbound_count)
            .map(|q| self.process_outbound(q))
            .sum()
    }

    /// Drain one outbound queue, dispatching each valid message and
    /// releasing its slots. Returns the number of messages dispatched.
    ///
    /// Re-entrant calls for the same queue while a drain is in progress
    /// are no-ops, so a collaborator callback that pokes the engine again
    /// cannot double-consume.
    pub fn process_outbound(&self, queue: QueueId) -> usize {
        {
            let mut state = self.state.lock().unwrap();
            match state.draining.get(queue).copied() {
                Some(false) => state.draining[queue] = true,
                _ => return 0,
            }
        }

        let mut dispatched = 0;
        loop {
            let mut state = self.state.lock().unwrap();
            let notices = match state.outbound[queue].peek() {
                None => {
                    state.draining[queue] = false;
                    return dispatched;
                }
                Some(OutboundSlot::Skip { elements }) => {
                    state.outbound[queue].release(elements);
                    continue;
                }
                Some(OutboundSlot::Message {
                    header,
                    payload,
                    elements,
                }) => {
                    let notices = self.dispatch_message(&mut state, header.opcode(), &payload);
                    state.outbound[queue].release(elements);
                    dispatched += 1;
                    notices
                }
            };
            // Unlock before calling out; the callback may submit new work.
            drop(state);
            for notice in notices {
                self.deliver(notice);
            }
        }
    }

    fn deliver(&self, notice: Notice) {
        match notice {
            Notice::Task(tag, outcome) => self.client.task_done(tag, outcome),
            Notice::Control(tag, response) => self.client.control_done(tag, response),
            Notice::Phy(phy, change) => self.client.phy_event(phy, change),
            Notice::PortDetached(port) => self.client.port_detached(port),
        }
    }

    fn dispatch_message(&self, state: &mut Interior, opcode: u16, payload: &[u8]) -> Vec<Notice> {
        let Some(opcode) = OutboundOpcode::from_raw(opcode) else {
            log::warn!("unknown outbound opcode {:#x}, releasing slot", opcode);
            return Vec::new();
        };
        log::trace!("outbound message {:?}", opcode);
        match opcode {
            OutboundOpcode::Echo => Vec::new(),
            OutboundOpcode::SspCompletion => self.on_ssp_completion(state, payload),
            OutboundOpcode::SataCompletion => self.on_sata_completion(state, payload),
            OutboundOpcode::SmpCompletion => self.on_smp_completion(state, payload),
            OutboundOpcode::SspEvent => self.on_task_event(state, payload, true),
            OutboundOpcode::SataEvent => self.on_task_event(state, payload, false),
            OutboundOpcode::SspAbort
            | OutboundOpcode::SataAbort
            | OutboundOpcode::SmpAbort => self.on_abort_response(state, payload),
            OutboundOpcode::HwEvent => self.on_hw_event(state, payload),
            OutboundOpcode::DeviceRegister => self.on_register_response(state, payload),
            OutboundOpcode::DeviceDeregister => self.on_deregister_response(state, payload),
            OutboundOpcode::LocalPhyControl => self.on_local_phy_control_response(state, payload),
            OutboundOpcode::HwEventAck => self.on_event_ack_response(state, payload),
            OutboundOpcode::GeneralEvent => {
                log::warn!(
                    "firmware general event, status {:#x} for inbound header {:#010x}",
                    get(payload, 0),
                    get(payload, 1)
                );
                Vec::new()
            }
            OutboundOpcode::GetNvmData | OutboundOpcode::SetNvmData => {
                self.on_nvm_response(state, payload)
            }
            OutboundOpcode::FlashUpdate => self.on_flash_response(state, payload),
            OutboundOpcode::SetDeviceState => self.on_set_device_state_response(state, payload),
            OutboundOpcode::SasReinitialize => self.on_reinitialize_response(state, payload),
            OutboundOpcode::SkipEntry => Vec::new(),
        }
    }
}

/// Completion state machines.
impl Adapter {
    /// Common tail of every task completion: decrement the device's
    /// running counter, apply the dying short-circuit and the eviction
    /// accounting, release the CCB, and emit the outcome.
    fn finish_task(&self, state: &mut Interior, tag: Tag, disposition: Disposition) -> Vec<Notice> {
        let Some(ccb) = state.ccbs.resolve(tag) else {
            return Vec::new();
        };
        let device = ccb.device;
        let internal = ccb.internal;
        state.ccbs.free(tag);

        let mut outcome = disposition.outcome;
        if let Some(id) = device {
            if let Some(dev) = state.devices.get_mut(id) {
                dev.running = dev.running.saturating_sub(1);
                if dev.dying {
                    // Eviction in progress: uniform answer until the
                    // transport layer finishes the nexus reset.
                    outcome = TaskOutcome::Undelivered;
                } else if disposition.nexus_event {
                    dev.dying = true;
                    dev.open_rejects = 0;
                    self.recovery.push(RecoveryEvent::NexusLoss { device: id });
                } else if outcome.is_open_reject() {
                    dev.open_rejects += 1;
                    if dev.open_rejects >= self.open_reject_threshold {
                        dev.open_rejects = 0;
                        dev.dying = true;
                        self.recovery.push(RecoveryEvent::NexusLoss { device: id });
                    }
                } else if matches!(outcome, TaskOutcome::Success | TaskOutcome::Response { .. }) {
                    dev.open_rejects = 0;
                }
            }
        }

        if internal {
            log::debug!("internal request {:#x} finished: {:?}", tag, outcome);
            Vec::new()
        } else {
            vec![Notice::Task(tag, outcome)]
        }
    }

    fn on_ssp_completion(&self, state: &mut Interior, payload: &[u8]) -> Vec<Notice> {
        let msg = TaskCompletionResp::decode(payload);
        let status = Status::from_raw(msg.status);
        let Some(ccb) = state.ccbs.resolve(msg.tag) else {
            log::debug!("ssp completion for stale tag {:#x}, dropping", msg.tag);
            return Vec::new();
        };
        if status == Status::Aborted && ccb.open_retry {
            // The recovery supervisor owns this task and will deliver
            // its outcome; consume the provoked abort silently.
            ccb.open_retry = false;
            return Vec::new();
        }
        if unlikely(!matches!(status, Status::Success | Status::Underflow)) {
            log::debug!("ssp completion tag {:#x}: {:?}", msg.tag, status);
        }
        let disposition = ssp_disposition(status, msg.param);
        self.finish_task(state, msg.tag, disposition)
    }

    fn on_sata_completion(&self, state: &mut Interior, payload: &[u8]) -> Vec<Notice> {
        let msg = TaskCompletionResp::decode(payload);
        let status = Status::from_raw(msg.status);
        let Some(ccb) = state.ccbs.resolve(msg.tag) else {
            log::debug!("sata completion for stale tag {:#x}, dropping", msg.tag);
            return Vec::new();
        };
        if status == Status::Aborted && ccb.open_retry {
            ccb.open_retry = false;
            return Vec::new();
        }
        let aborting = ccb.aborting;
        if unlikely(status != Status::Success) {
            log::debug!("sata completion tag {:#x}: {:?}", msg.tag, status);
        }
        let disposition = sata_disposition(status, msg.param, aborting);
        self.finish_task(state, msg.tag, disposition)
    }

    fn on_smp_completion(&self, state: &mut Interior, payload: &[u8]) -> Vec<Notice> {
        let msg = TaskCompletionResp::decode(payload);
        let status = Status::from_raw(msg.status);
        let Some(ccb) = state.ccbs.resolve(msg.tag) else {
            log::debug!("smp completion for stale tag {:#x}, dropping", msg.tag);
            return Vec::new();
        };
        if status == Status::Aborted && ccb.open_retry {
            ccb.open_retry = false;
            return Vec::new();
        }
        let aborting = ccb.aborting;
        let resp_len = ccb.smp_resp_len;
        if unlikely(status != Status::Success) {
            log::debug!("smp completion tag {:#x}: {:?}", msg.tag, status);
        }
        let disposition = smp_disposition(status, msg.param, resp_len, aborting);
        self.finish_task(state, msg.tag, disposition)
    }

    /// Unsolicited SSP/SATA transfer-error event for an in-flight task.
    fn on_task_event(&self, state: &mut Interior, payload: &[u8], ssp: bool) -> Vec<Notice> {
        let msg = TaskEventResp::decode(payload);
        let status = Status::from_raw(msg.status);
        if state.ccbs.resolve(msg.tag).is_none() {
            log::debug!("task event for stale tag {:#x}, dropping", msg.tag);
            return Vec::new();
        }
        let disposition = if ssp {
            ssp_event_disposition(status)
        } else {
            sata_event_disposition(status)
        };
        match disposition {
            EventDisposition::Ignore => Vec::new(),
            EventDisposition::Defer(kind) => {
                log::debug!(
                    "task {:#x} deferred to recovery for {:?}",
                    msg.tag,
                    kind
                );
                self.recovery.push(RecoveryEvent::TransientError {
                    tag: msg.tag,
                    kind,
                });
                Vec::new()
            }
            EventDisposition::Complete(disposition) => {
                self.finish_task(state, msg.tag, disposition)
            }
        }
    }

    fn on_abort_response(&self, state: &mut Interior, payload: &[u8]) -> Vec<Notice> {
        let msg = SimpleResp::decode(payload);
        let status = Status::from_raw(msg.status);
        if state.ccbs.resolve(msg.tag).is_none() {
            log::debug!("abort response for stale tag {:#x}, dropping", msg.tag);
            return Vec::new();
        }
        if status != Status::Success {
            log::warn!("task abort {:#x} failed: {:?}", msg.tag, status);
        }
        let outcome = abort_disposition(status);
        self.finish_task(state, msg.tag, Disposition::of(outcome))
    }
}

/// Control-plane response handlers.
impl Adapter {
    /// Resolve and release a control CCB, returning whether it existed
    /// and whether it was internal.
    fn take_control_ccb(&self, state: &mut Interior, tag: Tag) -> Option<(Option<DeviceId>, bool)> {
        let ccb = state.ccbs.resolve(tag)?;
        let device = ccb.device;
        let internal = ccb.internal;
        state.ccbs.free(tag);
        Some((device, internal))
    }

    fn on_register_response(&self, state: &mut Interior, payload: &[u8]) -> Vec<Notice> {
        let msg = DeviceResp::decode(payload);
        let Some((Some(device), _)) = self.take_control_ccb(state, msg.tag) else {
            log::debug!("register response for stale tag {:#x}, dropping", msg.tag);
            return Vec::new();
        };
        let response = {
            let Some(dev) = state.devices.get_mut(device) else {
                return Vec::new();
            };
            dev.running = dev.running.saturating_sub(1);
            if msg.status == 0 {
                dev.handle = Some(msg.device_handle);
                ControlResponse::DeviceRegistered {
                    device,
                    handle: msg.device_handle,
                }
            } else {
                log::warn!(
                    "device {} registration failed, status {:#x}",
                    device,
                    msg.status
                );
                ControlResponse::DeviceRegistrationFailed {
                    device,
                    reason: RegisterFailure::from_raw(msg.status),
                }
            }
        };
        vec![Notice::Control(msg.tag, response)]
    }

    fn on_deregister_response(&self, state: &mut Interior, payload: &[u8]) -> Vec<Notice> {
        let msg = DeviceResp::decode(payload);
        let Some((Some(device), _)) = self.take_control_ccb(state, msg.tag) else {
            log::debug!("deregister response for stale tag {:#x}, dropping", msg.tag);
            return Vec::new();
        };
        let success = msg.status == 0;
        if success {
            state.devices.remove(device);
        } else {
            log::warn!(
                "device {} deregistration failed, status {:#x}",
                device,
                msg.status
            );
        }
        vec![Notice::Control(
            msg.tag,
            ControlResponse::DeviceDeregistered { device, success },
        )]
    }

    fn on_local_phy_control_response(&self, state: &mut Interior, payload: &[u8]) -> Vec<Notice> {
        let msg = LocalPhyControlResp::decode(payload);
        if self.take_control_ccb(state, msg.tag).is_none() {
            log::debug!("phy control response for stale tag {:#x}, dropping", msg.tag);
            return Vec::new();
        }
        vec![Notice::Control(
            msg.tag,
            ControlResponse::LocalPhyControl {
                phy: msg.phy_id,
                success: msg.status == 0,
            },
        )]
    }

    fn on_event_ack_response(&self, state: &mut Interior, payload: &[u8]) -> Vec<Notice> {
        let msg = SimpleResp::decode(payload);
        if self.take_control_ccb(state, msg.tag).is_none() {
            log::debug!("event ack response for stale tag {:#x}, dropping", msg.tag);
            return Vec::new();
        }
        if msg.status != 0 {
            log::warn!("hardware event ack failed, status {:#x}", msg.status);
        }
        Vec::new()
    }

    fn on_nvm_response(&self, state: &mut Interior, payload: &[u8]) -> Vec<Notice> {
        let msg = SimpleResp::decode(payload);
        if self.take_control_ccb(state, msg.tag).is_none() {
            log::debug!("NVM response for stale tag {:#x}, dropping", msg.tag);
            return Vec::new();
        }
        let success = msg.status & 0xFFFF == 0;
        if !success {
            log::warn!("NVM data request failed, status {:#x}", msg.status);
        }
        vec![Notice::Control(msg.tag, ControlResponse::NvmData { success })]
    }

    fn on_flash_response(&self, state: &mut Interior, payload: &[u8]) -> Vec<Notice> {
        let msg = SimpleResp::decode(payload);
        if self.take_control_ccb(state, msg.tag).is_none() {
            log::debug!("flash response for stale tag {:#x}, dropping", msg.tag);
            return Vec::new();
        }
        vec![Notice::Control(
            msg.tag,
            ControlResponse::FlashUpdate(FlashUpdateStatus::from_raw(msg.status)),
        )]
    }

    fn on_set_device_state_response(&self, state: &mut Interior, payload: &[u8]) -> Vec<Notice> {
        let msg = DeviceResp::decode(payload);
        let Some((Some(device), _)) = self.take_control_ccb(state, msg.tag) else {
            log::debug!(
                "set-device-state response for stale tag {:#x}, dropping",
                msg.tag
            );
            return Vec::new();
        };
        if let Some(dev) = state.devices.get_mut(device) {
            dev.running = dev.running.saturating_sub(1);
        }
        vec![Notice::Control(
            msg.tag,
            ControlResponse::DeviceStateSet {
                device,
                success: msg.status == 0,
            },
        )]
    }

    fn on_reinitialize_response(&self, state: &mut Interior, payload: &[u8]) -> Vec<Notice> {
        let msg = SimpleResp::decode(payload);
        if self.take_control_ccb(state, msg.tag).is_none() {
            log::debug!("reinit response for stale tag {:#x}, dropping", msg.tag);
            return Vec::new();
        }
        vec![Notice::Control(
            msg.tag,
            ControlResponse::Reinitialized {
                success: msg.status == 0,
            },
        )]
    }
}

/// Hardware event handling and the acknowledgment protocol.
impl Adapter {
    fn on_hw_event(&self, state: &mut Interior, payload: &[u8]) -> Vec<Notice> {
        let msg = HwEventMsg::decode(payload);
        let Some(class) = msg.class else {
            log::warn!("unknown hardware event class {:#x}, ignoring", msg.class_raw);
            return Vec::new();
        };
        let phy_idx = usize::from(msg.phy_id);
        if phy_idx >= state.phys.len() {
            log::warn!("hardware event {:?} for bad phy {}, ignoring", class, msg.phy_id);
            return Vec::new();
        }
        log::debug!(
            "hw event {:?} phy {} port {} state {:?}",
            class,
            msg.phy_id,
            msg.port_id,
            msg.port_state
        );

        match class {
            HwEventClass::PhyStartStatus => {
                let success = msg.status == 0;
                let tag = msg.param;
                if self.take_control_ccb(state, tag).is_none() {
                    log::debug!("phy-start status for stale tag {:#x}, dropping", tag);
                    return Vec::new();
                }
                if success {
                    state.phys[phy_idx].enabled = true;
                }
                vec![Notice::Phy(msg.phy_id, PhyChange::Started { success })]
            }
            HwEventClass::PhyStopStatus => {
                let success = msg.status == 0;
                let tag = msg.param;
                if self.take_control_ccb(state, tag).is_none() {
                    log::debug!("phy-stop status for stale tag {:#x}, dropping", tag);
                    return Vec::new();
                }
                if success {
                    state.phys[phy_idx].enabled = false;
                }
                vec![Notice::Phy(msg.phy_id, PhyChange::Stopped { success })]
            }
            HwEventClass::SasPhyUp => {
                let link_rate = LinkRate::from_wire(msg.link_rate);
                let phy = &mut state.phys[phy_idx];
                phy.attached = true;
                phy.protocol = Some(AttachedProtocol::Sas);
                phy.link_rate = link_rate;
                phy.frame = msg.frame.clone();
                let mut attached_addr = [0u8; 8];
                if msg.frame.len() >= 20 {
                    attached_addr.copy_from_slice(&msg.frame[12..20]);
                }
                phy.attached_addr = attached_addr;
                if let Some(port) = state.ports.get_mut(usize::from(msg.port_id)) {
                    port.attached = true;
                    port.state = msg.port_state;
                }
                vec![Notice::Phy(
                    msg.phy_id,
                    PhyChange::SasUp {
                        port: msg.port_id,
                        link_rate,
                        attached_addr,
                    },
                )]
            }
            HwEventClass::SataPhyUp => {
                let link_rate = LinkRate::from_wire(msg.link_rate);
                let phy = &mut state.phys[phy_idx];
                phy.attached = true;
                phy.protocol = Some(AttachedProtocol::Sata);
                phy.link_rate = link_rate;
                phy.frame = msg.frame.clone();
                phy.attached_addr = [0u8; 8];
                if let Some(port) = state.ports.get_mut(usize::from(msg.port_id)) {
                    port.attached = true;
                    port.state = msg.port_state;
                }
                vec![Notice::Phy(
                    msg.phy_id,
                    PhyChange::SataUp {
                        port: msg.port_id,
                        link_rate,
                    },
                )]
            }
            HwEventClass::PhyDown => {
                state.phys[phy_idx].clear_attachment();
                let (detach, ack) = match msg.port_state {
                    PortState::Valid | PortState::InReset => (false, false),
                    PortState::Invalid => (true, true),
                    PortState::LostCommunication => (true, true),
                    PortState::NotEstablished => (true, false),
                    PortState::Unknown(raw) => {
                        log::warn!("phy down with unrecognized port state {:#x}", raw);
                        (true, false)
                    }
                };
                if let Some(port) = state.ports.get_mut(usize::from(msg.port_id)) {
                    port.state = msg.port_state;
                    if detach {
                        port.attached = false;
                    }
                }
                if ack {
                    self.send_event_ack(state, class, msg.port_id, msg.phy_id, 0, 0);
                }
                let mut notices = vec![Notice::Phy(
                    msg.phy_id,
                    PhyChange::Down {
                        port: msg.port_id,
                        state: msg.port_state,
                        port_detached: detach,
                    },
                )];
                if detach {
                    notices.push(Notice::PortDetached(msg.port_id));
                }
                notices
            }
            HwEventClass::PortInvalid => {
                state.phys[phy_idx].clear_attachment();
                if let Some(port) = state.ports.get_mut(usize::from(msg.port_id)) {
                    port.attached = false;
                    port.state = PortState::Invalid;
                }
                vec![Notice::Phy(msg.phy_id, PhyChange::PortInvalid)]
            }
            HwEventClass::BroadcastChange => {
                self.send_event_ack(state, class, msg.port_id, msg.phy_id, 1, 0);
                vec![Notice::Phy(
                    msg.phy_id,
                    PhyChange::Broadcast(BroadcastKind::Change),
                )]
            }
            HwEventClass::BroadcastExp => vec![Notice::Phy(
                msg.phy_id,
                PhyChange::Broadcast(BroadcastKind::Expander),
            )],
            HwEventClass::BroadcastSes => vec![Notice::Phy(
                msg.phy_id,
                PhyChange::Broadcast(BroadcastKind::Ses),
            )],
            HwEventClass::PhyError => {
                state.phys[phy_idx].clear_attachment();
                vec![Notice::Phy(msg.phy_id, PhyChange::PhyError)]
            }
            HwEventClass::LinkErrInvalidDword
            | HwEventClass::LinkErrDisparity
            | HwEventClass::LinkErrCodeViolation
            | HwEventClass::LinkErrLossOfDwordSync
            | HwEventClass::LinkErrPhyResetFailed => {
                let kind = match class {
                    HwEventClass::LinkErrInvalidDword => LinkErrorKind::InvalidDword,
                    HwEventClass::LinkErrDisparity => LinkErrorKind::DisparityError,
                    HwEventClass::LinkErrCodeViolation => LinkErrorKind::CodeViolation,
                    HwEventClass::LinkErrLossOfDwordSync => LinkErrorKind::LossOfDwordSync,
                    _ => LinkErrorKind::PhyResetFailed,
                };
                self.send_event_ack(state, class, msg.port_id, msg.phy_id, 0, 0);
                state.phys[phy_idx].clear_attachment();
                vec![Notice::Phy(msg.phy_id, PhyChange::LinkError(kind))]
            }
            HwEventClass::InboundCrcError => {
                self.send_event_ack(state, class, msg.port_id, msg.phy_id, 0, 0);
                vec![Notice::Phy(msg.phy_id, PhyChange::InboundCrcError)]
            }
            HwEventClass::SataSpinupHold => {
                vec![Notice::Phy(msg.phy_id, PhyChange::SpinupHold)]
            }
            HwEventClass::HardResetReceived => {
                vec![Notice::Phy(msg.phy_id, PhyChange::HardResetReceived)]
            }
            HwEventClass::IdFrameTimeout => {
                state.phys[phy_idx].clear_attachment();
                vec![Notice::Phy(msg.phy_id, PhyChange::IdFrameTimeout)]
            }
            HwEventClass::PortResetTimeout => {
                state.phys[phy_idx].clear_attachment();
                vec![Notice::Phy(msg.phy_id, PhyChange::PortResetTimeout)]
            }
            HwEventClass::PortRecoveryTimeout => {
                state.phys[phy_idx].clear_attachment();
                vec![Notice::Phy(msg.phy_id, PhyChange::PortRecoveryTimeout)]
            }
            HwEventClass::PortRecover => {
                vec![Notice::Phy(msg.phy_id, PhyChange::PortRecovered)]
            }
            HwEventClass::PortResetComplete => {
                vec![Notice::Phy(msg.phy_id, PhyChange::PortResetComplete)]
            }
            HwEventClass::Malfunction => {
                log::error!("controller malfunction reported on phy {}", msg.phy_id);
                Vec::new()
            }
        }
    }

    /// Send a hardware event acknowledgment back through the inbound
    /// path. Failure to ack is logged; the firmware simply stops
    /// reporting that event class on the phy until a later ack.
    fn send_event_ack(
        &self,
        state: &mut Interior,
        class: HwEventClass,
        port: PortId,
        phy: PhyId,
        param0: u32,
        param1: u32,
    ) {
        let Some(tag) = state.ccbs.allocate(CcbKind::Control, None) else {
            log::warn!("no tag free for hardware event ack ({:?})", class);
            return;
        };
        if let Some(ccb) = state.ccbs.resolve(tag) {
            ccb.internal = true;
        }
        let mut payload = [0u8; crate::iomb::PAYLOAD_SIZE];
        HwEventAckReq {
            tag,
            event_class: class.raw(),
            port_id: port,
            phy_id: phy,
            param0,
            param1,
        }
        .encode(&mut payload);
        if let Err(err) = push_inbound(state, 0, InboundOpcode::HwEventAck, &payload) {
            log::warn!("failed to enqueue hardware event ack: {}", err);
            state.ccbs.free(tag);
        }
    }
}

/// Encode a request into the inbound queue and ring its doorbell.
fn push_inbound(
    state: &mut Interior,
    queue: QueueId,
    opcode: InboundOpcode,
    payload: &[u8],
) -> Result<(), SubmitError> {
    let q = state
        .inbound
        .get_mut(queue)
        .ok_or(SubmitError::UnknownQueue)?;
    let slot = q.acquire_slot(payload.len())?;
    q.write_message(slot, opcode.raw(), 0, payload);
    q.commit();
    Ok(())
}
