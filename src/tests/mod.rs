//! Engine tests against a simulated firmware peer.
//!
//! The harness drives the real shared ring memory from both sides: the
//! adapter as the host, and the [`FirmwareEndpoints`] handles as the
//! controller firmware.

#![allow(unused_imports)]

mod control;
mod events;

use std::sync::{Arc, Mutex};

use simple_logger::SimpleLogger;

use crate::adapter::FirmwareEndpoints;
use crate::client::{ControlResponse, TaskPresence, TransportClient};
use crate::config::AttachConfig;
use crate::device::DeviceKind;
use crate::event::{HwEventClass, HwEventMsg, PhyChange};
use crate::iomb::{InboundOpcode, OutboundOpcode, PAYLOAD_SIZE};
use crate::payload::*;
use crate::phy::PortState;
use crate::status::{Status, TaskOutcome};
use crate::type_alias::*;
use crate::{Adapter, SubmitError, TaskRequest};

/// Collaborator that records every callback.
pub(crate) struct RecordingClient {
    pub tasks: Mutex<Vec<(Tag, TaskOutcome)>>,
    pub controls: Mutex<Vec<(Tag, ControlResponse)>>,
    pub phy_events: Mutex<Vec<(PhyId, PhyChange)>>,
    pub detached_ports: Mutex<Vec<PortId>>,
    pub lost_devices: Mutex<Vec<DeviceId>>,

    /// Canned answer for `query_task`.
    pub presence: Mutex<TaskPresence>,
}

impl RecordingClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tasks: Mutex::new(Vec::new()),
            controls: Mutex::new(Vec::new()),
            phy_events: Mutex::new(Vec::new()),
            detached_ports: Mutex::new(Vec::new()),
            lost_devices: Mutex::new(Vec::new()),
            presence: Mutex::new(TaskPresence::Absent),
        })
    }

    pub fn task_outcomes(&self) -> Vec<(Tag, TaskOutcome)> {
        self.tasks.lock().unwrap().clone()
    }
}

impl TransportClient for RecordingClient {
    fn task_done(&self, tag: Tag, outcome: TaskOutcome) {
        self.tasks.lock().unwrap().push((tag, outcome));
    }

    fn phy_event(&self, phy: PhyId, change: PhyChange) {
        self.phy_events.lock().unwrap().push((phy, change));
    }

    fn port_detached(&self, port: PortId) {
        self.detached_ports.lock().unwrap().push(port);
    }

    fn nexus_lost(&self, device: DeviceId) {
        self.lost_devices.lock().unwrap().push(device);
    }

    fn query_task(&self, _tag: Tag) -> TaskPresence {
        *self.presence.lock().unwrap()
    }

    fn control_done(&self, tag: Tag, response: ControlResponse) {
        self.controls.lock().unwrap().push((tag, response));
    }
}

/// An adapter wired to a recording client and the firmware-side queue
/// endpoints.
pub(crate) struct Harness {
    pub adapter: Adapter,
    pub client: Arc<RecordingClient>,
    pub fw: Mutex<FirmwareEndpoints>,
}

impl Harness {
    pub fn with_config(config: AttachConfig) -> Self {
        let client = RecordingClient::new();
        let (adapter, fw) = Adapter::attach(&config, client.clone());
        Self {
            adapter,
            client,
            fw: Mutex::new(fw),
        }
    }

    pub fn new() -> Self {
        Self::with_config(AttachConfig::small())
    }

    /// Pop the next host request the firmware sees on inbound queue 0.
    pub fn pop_request(&self) -> Option<(u16, Vec<u8>)> {
        self.fw.lock().unwrap().inbound[0].pop()
    }

    /// Produce one outbound message and drain it through the adapter.
    pub fn respond(&self, opcode: OutboundOpcode, payload: &[u8]) {
        assert!(self.fw.lock().unwrap().outbound[0].push(opcode.raw(), payload));
        self.adapter.interrupt();
    }

    /// Produce a completion message for `tag`.
    pub fn complete(&self, opcode: OutboundOpcode, tag: Tag, status: Status, param: u32) {
        let mut payload = [0u8; PAYLOAD_SIZE];
        TaskCompletionResp {
            tag,
            status: status.raw(),
            param,
        }
        .encode(&mut payload);
        self.respond(opcode, &payload);
    }

    /// Produce an SSP/SATA transfer-error event for `tag`.
    pub fn task_event(&self, opcode: OutboundOpcode, tag: Tag, status: Status) {
        let mut payload = [0u8; PAYLOAD_SIZE];
        TaskEventResp {
            tag,
            status: status.raw(),
        }
        .encode(&mut payload);
        self.respond(opcode, &payload);
    }

    /// Produce a hardware event.
    pub fn hw_event(&self, msg: &HwEventMsg) {
        let mut payload = [0u8; PAYLOAD_SIZE];
        msg.encode(&mut payload);
        self.respond(OutboundOpcode::HwEvent, &payload);
    }

    /// Register a device and run the registration handshake to
    /// completion. The firmware assigns handle `0x100 + id`.
    pub fn device(&self, kind: DeviceKind) -> DeviceId {
        let id = self
            .adapter
            .device_found(0, kind, [0xA; 8], 0)
            .expect("device registration submit");
        let (opc, payload) = self.pop_request().expect("register request on the wire");
        assert_eq!(opc, InboundOpcode::DeviceRegister.raw());
        let req = DeviceRegisterReq::decode(&payload);

        let mut resp = [0u8; PAYLOAD_SIZE];
        DeviceResp {
            tag: req.tag,
            status: 0,
            device_handle: 0x100 + id,
        }
        .encode(&mut resp);
        self.respond(OutboundOpcode::DeviceRegister, &resp);
        id
    }

    /// Submit an SSP read task to `device` and return its tag, consuming
    /// the request from the inbound queue.
    pub fn ssp_task(&self, device: DeviceId) -> Tag {
        let tag = self
            .adapter
            .submit_task(
                0,
                device,
                TaskRequest::Ssp {
                    dir: DataDir::In,
                    data_len: 512,
                    lun: [0; 8],
                    cdb: [0x28; 16],
                },
            )
            .expect("ssp submit");
        let (opc, _) = self.pop_request().expect("ssp request on the wire");
        assert_eq!(opc, InboundOpcode::SspStart.raw());
        tag
    }

    /// Submit a SATA DMA task to `device` and return its tag.
    pub fn sata_task(&self, device: DeviceId) -> Tag {
        let tag = self
            .adapter
            .submit_task(
                0,
                device,
                TaskRequest::Sata {
                    mode: crate::SataMode::Dma,
                    dir: DataDir::Out,
                    data_len: 4096,
                    ncq_tag: 0,
                    fis: [0; 20],
                },
            )
            .expect("sata submit");
        let (opc, _) = self.pop_request().expect("sata request on the wire");
        assert_eq!(opc, InboundOpcode::SataStart.raw());
        tag
    }

    /// Submit an SMP request to `device` and return its tag.
    pub fn smp_task(&self, device: DeviceId, resp_len: u32) -> Tag {
        let tag = self
            .adapter
            .submit_task(
                0,
                device,
                TaskRequest::Smp {
                    req_len: 40,
                    resp_len,
                },
            )
            .expect("smp submit");
        let (opc, _) = self.pop_request().expect("smp request on the wire");
        assert_eq!(opc, InboundOpcode::SmpStart.raw());
        tag
    }
}
