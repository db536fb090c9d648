//! Control-plane traffic: registration, NVM, flash, device state, phy
//! control, re-initialization.

use super::*;
use crate::client::{FlashUpdateStatus, RegisterFailure};
use crate::{NvmStore, PhyControlOp, TmFunction};

/// Registration assigns the firmware handle; traffic before the handle
/// arrives is refused.
#[test]
fn registration_handshake() {
    let h = Harness::new();
    let dev = h
        .adapter
        .device_found(0, DeviceKind::SasEnd, [0x5A; 8], 2)
        .unwrap();

    // Not registered yet: submission refused, one request in flight.
    assert_eq!(
        h.adapter
            .submit_task(
                0,
                dev,
                TaskRequest::Ssp {
                    dir: DataDir::None,
                    data_len: 0,
                    lun: [0; 8],
                    cdb: [0; 16],
                },
            )
            .unwrap_err(),
        SubmitError::NotRegistered
    );

    let (opc, payload) = h.pop_request().unwrap();
    assert_eq!(opc, InboundOpcode::DeviceRegister.raw());
    let req = DeviceRegisterReq::decode(&payload);
    assert_eq!(req.phy_id, 2);
    assert_eq!(req.sas_addr, [0x5A; 8]);

    let mut resp = [0u8; PAYLOAD_SIZE];
    DeviceResp {
        tag: req.tag,
        status: 0,
        device_handle: 0x2A0,
    }
    .encode(&mut resp);
    h.respond(OutboundOpcode::DeviceRegister, &resp);

    let info = h.adapter.device_info(dev).unwrap();
    assert_eq!(info.handle, Some(0x2A0));
    assert_eq!(info.running, 0);
    assert_eq!(
        h.client.controls.lock().unwrap().as_slice(),
        &[(
            req.tag,
            ControlResponse::DeviceRegistered {
                device: dev,
                handle: 0x2A0
            }
        )]
    );
}

/// A refused registration surfaces the firmware's reason and leaves the
/// device unregistered.
#[test]
fn registration_failure() {
    let h = Harness::new();
    let dev = h
        .adapter
        .device_found(0, DeviceKind::Sata, [0x11; 8], 0)
        .unwrap();
    let (_, payload) = h.pop_request().unwrap();
    let req = DeviceRegisterReq::decode(&payload);

    let mut resp = [0u8; PAYLOAD_SIZE];
    DeviceResp {
        tag: req.tag,
        status: 0x1,
        device_handle: 0,
    }
    .encode(&mut resp);
    h.respond(OutboundOpcode::DeviceRegister, &resp);

    assert_eq!(h.adapter.device_info(dev).unwrap().handle, None);
    assert_eq!(
        h.client.controls.lock().unwrap().as_slice(),
        &[(
            req.tag,
            ControlResponse::DeviceRegistrationFailed {
                device: dev,
                reason: RegisterFailure::OutOfResources
            }
        )]
    );
}

/// Deregistration requires a drained device and drops the record on
/// firmware confirmation.
#[test]
fn deregistration() {
    let h = Harness::new();
    let dev = h.device(DeviceKind::SasEnd);
    let task = h.ssp_task(dev);

    assert_eq!(
        h.adapter.device_gone(0, dev).unwrap_err(),
        SubmitError::DeviceBusy
    );
    h.complete(OutboundOpcode::SspCompletion, task, Status::Success, 0);

    let tag = h.adapter.device_gone(0, dev).unwrap();
    let (opc, payload) = h.pop_request().unwrap();
    assert_eq!(opc, InboundOpcode::DeviceDeregister.raw());
    assert_eq!(SimpleReq::decode(&payload).arg, 0x100 + dev);

    let mut resp = [0u8; PAYLOAD_SIZE];
    DeviceResp {
        tag,
        status: 0,
        device_handle: 0x100 + dev,
    }
    .encode(&mut resp);
    h.respond(OutboundOpcode::DeviceDeregister, &resp);

    assert!(h.adapter.device_info(dev).is_none());
    assert_eq!(
        h.client.controls.lock().unwrap().last().unwrap().1,
        ControlResponse::DeviceDeregistered {
            device: dev,
            success: true
        }
    );
}

/// SSP task management rides the submission path and completes through
/// the SSP completion machine.
#[test]
fn ssp_task_management() {
    let h = Harness::new();
    let dev = h.device(DeviceKind::SasEnd);
    let task = h.ssp_task(dev);

    let tm = h
        .adapter
        .submit_ssp_tm(0, dev, task, TmFunction::QueryTask, [0; 8])
        .unwrap();
    let (opc, payload) = h.pop_request().unwrap();
    assert_eq!(opc, InboundOpcode::SspTaskManagement.raw());
    let req = SspTmReq::decode(&payload);
    assert_eq!(req.related_tag, task);
    assert_eq!(req.tmf_op, TmFunction::QueryTask as u32);

    h.complete(OutboundOpcode::SspCompletion, tm, Status::Success, 0);
    assert_eq!(
        h.client.task_outcomes(),
        vec![(tm, TaskOutcome::Success)]
    );
    assert_eq!(h.adapter.device_info(dev).unwrap().running, 1);

    h.complete(OutboundOpcode::SspCompletion, task, Status::Success, 0);
    assert_eq!(h.adapter.device_info(dev).unwrap().running, 0);
}

/// Abort-all carries the device-wide flag.
#[test]
fn abort_all_tasks() {
    let h = Harness::new();
    let dev = h.device(DeviceKind::Sata);
    let _t1 = h.sata_task(dev);

    let abort = h.adapter.abort_task(0, dev, None).unwrap();
    let (opc, payload) = h.pop_request().unwrap();
    assert_eq!(opc, InboundOpcode::SataAbort.raw());
    let req = TaskAbortReq::decode(&payload);
    assert!(req.abort_all);
    assert_eq!(req.tag, abort);
}

/// NVM reads and writes conclude through the control callback.
#[test]
fn nvm_roundtrip() {
    let h = Harness::new();
    let tag = h
        .adapter
        .get_nvm_data(0, NvmStore::VpdFlash, 0x200, 64)
        .unwrap();
    let (opc, payload) = h.pop_request().unwrap();
    assert_eq!(opc, InboundOpcode::GetNvmData.raw());
    let req = NvmDataReq::decode(&payload);
    assert_eq!(req.kind, NvmStore::VpdFlash as u8);
    assert_eq!(req.offset, 0x200);

    let mut resp = [0u8; PAYLOAD_SIZE];
    SimpleResp { tag, status: 0 }.encode(&mut resp);
    h.respond(OutboundOpcode::GetNvmData, &resp);
    assert_eq!(
        h.client.controls.lock().unwrap().as_slice(),
        &[(tag, ControlResponse::NvmData { success: true })]
    );

    let tag = h
        .adapter
        .set_nvm_data(0, NvmStore::Seeprom, 0, 32)
        .unwrap();
    h.pop_request().unwrap();
    let mut resp = [0u8; PAYLOAD_SIZE];
    SimpleResp { tag, status: 0x2 }.encode(&mut resp);
    h.respond(OutboundOpcode::SetNvmData, &resp);
    assert_eq!(
        h.client.controls.lock().unwrap()[1],
        (tag, ControlResponse::NvmData { success: false })
    );
}

/// Flash update statuses map through, including the in-progress chunks.
#[test]
fn flash_update_transfer() {
    let h = Harness::new();

    let tag = h.adapter.flash_update(0, 0, 4096, 8192).unwrap();
    let (opc, payload) = h.pop_request().unwrap();
    assert_eq!(opc, InboundOpcode::FlashUpdate.raw());
    assert_eq!(FlashUpdateReq::decode(&payload).total_len, 8192);

    let mut resp = [0u8; PAYLOAD_SIZE];
    SimpleResp { tag, status: 0x01 }.encode(&mut resp);
    h.respond(OutboundOpcode::FlashUpdate, &resp);

    let tag2 = h.adapter.flash_update(0, 4096, 4096, 8192).unwrap();
    h.pop_request().unwrap();
    let mut resp = [0u8; PAYLOAD_SIZE];
    SimpleResp {
        tag: tag2,
        status: 0x00,
    }
    .encode(&mut resp);
    h.respond(OutboundOpcode::FlashUpdate, &resp);

    assert_eq!(
        h.client.controls.lock().unwrap().as_slice(),
        &[
            (tag, ControlResponse::FlashUpdate(FlashUpdateStatus::InProgress)),
            (
                tag2,
                ControlResponse::FlashUpdate(FlashUpdateStatus::CompletePendingReboot)
            ),
        ]
    );
}

/// Set-device-state concludes and rebalances the running counter.
#[test]
fn set_device_state() {
    let h = Harness::new();
    let dev = h.device(DeviceKind::Sata);

    let tag = h.adapter.set_device_state(0, dev, 0x4).unwrap();
    let (opc, payload) = h.pop_request().unwrap();
    assert_eq!(opc, InboundOpcode::SetDeviceState.raw());
    assert_eq!(SetDeviceStateReq::decode(&payload).state, 0x4);
    assert_eq!(h.adapter.device_info(dev).unwrap().running, 1);

    let mut resp = [0u8; PAYLOAD_SIZE];
    DeviceResp {
        tag,
        status: 0,
        device_handle: 0x100 + dev,
    }
    .encode(&mut resp);
    h.respond(OutboundOpcode::SetDeviceState, &resp);

    assert_eq!(h.adapter.device_info(dev).unwrap().running, 0);
    assert_eq!(
        h.client.controls.lock().unwrap().last().unwrap().1,
        ControlResponse::DeviceStateSet {
            device: dev,
            success: true
        }
    );
}

/// Local phy control and SAS re-initialize conclude through the control
/// callback.
#[test]
fn phy_control_and_reinit() {
    let h = Harness::new();

    let tag = h
        .adapter
        .local_phy_control(0, 2, PhyControlOp::LinkReset)
        .unwrap();
    let (opc, payload) = h.pop_request().unwrap();
    assert_eq!(opc, InboundOpcode::LocalPhyControl.raw());
    let req = LocalPhyControlReq::decode(&payload);
    assert_eq!(req.phy_id, 2);
    assert_eq!(req.op, PhyControlOp::LinkReset as u32);

    let mut resp = [0u8; PAYLOAD_SIZE];
    LocalPhyControlResp {
        tag,
        phy_id: 2,
        op: PhyControlOp::LinkReset as u32,
        status: 0,
    }
    .encode(&mut resp);
    h.respond(OutboundOpcode::LocalPhyControl, &resp);
    assert_eq!(
        h.client.controls.lock().unwrap().as_slice(),
        &[(
            tag,
            ControlResponse::LocalPhyControl {
                phy: 2,
                success: true
            }
        )]
    );

    let tag = h.adapter.sas_reinitialize(0).unwrap();
    h.pop_request().unwrap();
    let mut resp = [0u8; PAYLOAD_SIZE];
    SimpleResp { tag, status: 0 }.encode(&mut resp);
    h.respond(OutboundOpcode::SasReinitialize, &resp);
    assert_eq!(
        h.client.controls.lock().unwrap()[1],
        (tag, ControlResponse::Reinitialized { success: true })
    );
}

/// Unknown devices and phys are rejected synchronously.
#[test]
fn bad_references_rejected() {
    let h = Harness::new();
    assert_eq!(
        h.adapter
            .submit_task(
                0,
                99,
                TaskRequest::Smp {
                    req_len: 8,
                    resp_len: 8
                }
            )
            .unwrap_err(),
        SubmitError::UnknownDevice
    );
    assert_eq!(
        h.adapter.start_phy(0, 99).unwrap_err(),
        SubmitError::UnknownPhy
    );
    assert_eq!(
        h.adapter.sas_reinitialize(7).unwrap_err(),
        SubmitError::UnknownQueue
    );
}
