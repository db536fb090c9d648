//! Hardware event protocol: phy up/down, broadcasts, link errors, and
//! the acknowledgment traffic they generate.

use super::*;
use crate::event::{BroadcastKind, LinkErrorKind};
use crate::phy::{AttachedProtocol, LinkRate};

fn event(class: HwEventClass, phy: PhyId, port: PortId, state: PortState) -> HwEventMsg {
    HwEventMsg {
        class_raw: class.raw(),
        class: Some(class),
        link_rate: 0,
        status: 0,
        phy_id: phy,
        port_id: port,
        port_state: state,
        param: 0,
        frame: Vec::new(),
    }
}

/// Pop the next request and assert it is an event ack for `class`,
/// returning its decoded payload.
fn expect_ack(h: &Harness, class: HwEventClass) -> HwEventAckReq {
    let (opc, payload) = h.pop_request().expect("expected an event ack");
    assert_eq!(opc, InboundOpcode::HwEventAck.raw());
    let req = HwEventAckReq::decode(&payload);
    assert_eq!(req.event_class, class.raw());
    req
}

/// Phy start concludes through the phy-start status event, freeing the
/// request CCB and flipping the enabled bit.
#[test]
fn phy_start_status() {
    let h = Harness::new();
    let tag = h.adapter.start_phy(0, 1).unwrap();
    let (opc, payload) = h.pop_request().unwrap();
    assert_eq!(opc, InboundOpcode::PhyStart.raw());
    assert_eq!(SimpleReq::decode(&payload).arg, 1);

    let mut msg = event(HwEventClass::PhyStartStatus, 1, 0, PortState::NotEstablished);
    msg.param = tag;
    h.hw_event(&msg);

    assert_eq!(h.adapter.in_flight(), 0);
    assert!(h.adapter.phy_info(1).unwrap().enabled);
    assert_eq!(
        h.client.phy_events.lock().unwrap().as_slice(),
        &[(1, PhyChange::Started { success: true })]
    );
}

/// SAS phy-up captures the identify frame and the attached address.
#[test]
fn sas_phy_up_capture() {
    let h = Harness::new();
    let mut frame = vec![0u8; 28];
    frame[12..20].copy_from_slice(&[0x50, 0x06, 0x05, 0xB0, 0, 0, 0x44, 0x55]);

    let mut msg = event(HwEventClass::SasPhyUp, 2, 1, PortState::Valid);
    msg.link_rate = 0x4;
    msg.frame = frame.clone();
    h.hw_event(&msg);

    let info = h.adapter.phy_info(2).unwrap();
    assert!(info.attached);
    assert_eq!(info.protocol, Some(AttachedProtocol::Sas));
    assert_eq!(info.link_rate, Some(LinkRate::Gbps6_0));
    assert_eq!(info.frame, frame);
    assert_eq!(&info.attached_addr[..4], &[0x50, 0x06, 0x05, 0xB0]);

    let port = h.adapter.port_info(1).unwrap();
    assert!(port.attached);
    assert_eq!(port.state, PortState::Valid);

    match &h.client.phy_events.lock().unwrap()[0] {
        (2, PhyChange::SasUp { port, link_rate, attached_addr }) => {
            assert_eq!(*port, 1);
            assert_eq!(*link_rate, Some(LinkRate::Gbps6_0));
            assert_eq!(attached_addr[0], 0x50);
        }
        other => panic!("unexpected notice {:?}", other),
    }
    // No ack for phy-up.
    assert!(h.pop_request().is_none());
}

/// SATA phy-up captures the signature FIS instead of an identify frame.
#[test]
fn sata_phy_up_capture() {
    let h = Harness::new();
    let mut msg = event(HwEventClass::SataPhyUp, 0, 0, PortState::Valid);
    msg.link_rate = 0x2;
    msg.frame = vec![0x34; 20];
    h.hw_event(&msg);

    let info = h.adapter.phy_info(0).unwrap();
    assert_eq!(info.protocol, Some(AttachedProtocol::Sata));
    assert_eq!(info.link_rate, Some(LinkRate::Gbps3_0));
    assert_eq!(info.frame.len(), 20);
}

/// The phy-down port-state table: which states detach the port and
/// which require an acknowledgment.
#[test]
fn phy_down_state_table() {
    let cases = [
        (PortState::Valid, false, false),
        (PortState::InReset, false, false),
        (PortState::Invalid, true, true),
        (PortState::LostCommunication, true, true),
        (PortState::NotEstablished, true, false),
        (PortState::Unknown(0x7), true, false),
    ];

    for (state, detach, ack) in cases {
        let h = Harness::new();
        // Attach phy 1 / port 1 first.
        let mut up = event(HwEventClass::SasPhyUp, 1, 1, PortState::Valid);
        up.link_rate = 0x1;
        h.hw_event(&up);

        h.hw_event(&event(HwEventClass::PhyDown, 1, 1, state));

        assert!(!h.adapter.phy_info(1).unwrap().attached, "{:?}", state);
        assert_eq!(
            h.adapter.port_info(1).unwrap().attached,
            !detach,
            "{:?}",
            state
        );
        assert_eq!(
            h.client.detached_ports.lock().unwrap().len(),
            usize::from(detach),
            "{:?}",
            state
        );
        if ack {
            let req = expect_ack(&h, HwEventClass::PhyDown);
            assert_eq!(req.phy_id, 1);
            assert_eq!(req.port_id, 1);
        } else {
            assert!(h.pop_request().is_none(), "{:?}", state);
        }
    }
}

/// Broadcast-change is acknowledged with param0 = 1; the other broadcast
/// classes are not acknowledged.
#[test]
fn broadcast_acks() {
    let h = Harness::new();

    h.hw_event(&event(HwEventClass::BroadcastChange, 0, 0, PortState::Valid));
    let req = expect_ack(&h, HwEventClass::BroadcastChange);
    assert_eq!(req.param0, 1);

    h.hw_event(&event(HwEventClass::BroadcastExp, 0, 0, PortState::Valid));
    h.hw_event(&event(HwEventClass::BroadcastSes, 0, 0, PortState::Valid));
    assert!(h.pop_request().is_none());

    let events = h.client.phy_events.lock().unwrap();
    assert_eq!(events[0].1, PhyChange::Broadcast(BroadcastKind::Change));
    assert_eq!(events[1].1, PhyChange::Broadcast(BroadcastKind::Expander));
    assert_eq!(events[2].1, PhyChange::Broadcast(BroadcastKind::Ses));
}

/// Every link error class is acknowledged and detaches the phy.
#[test]
fn link_error_acks() {
    let cases = [
        (HwEventClass::LinkErrInvalidDword, LinkErrorKind::InvalidDword),
        (HwEventClass::LinkErrDisparity, LinkErrorKind::DisparityError),
        (
            HwEventClass::LinkErrCodeViolation,
            LinkErrorKind::CodeViolation,
        ),
        (
            HwEventClass::LinkErrLossOfDwordSync,
            LinkErrorKind::LossOfDwordSync,
        ),
        (
            HwEventClass::LinkErrPhyResetFailed,
            LinkErrorKind::PhyResetFailed,
        ),
    ];
    for (class, kind) in cases {
        let h = Harness::new();
        h.hw_event(&event(class, 3, 2, PortState::Valid));
        expect_ack(&h, class);
        assert_eq!(
            h.client.phy_events.lock().unwrap().as_slice(),
            &[(3, PhyChange::LinkError(kind))]
        );
    }
}

/// Inbound CRC errors are acknowledged without detaching anything.
#[test]
fn crc_error_ack() {
    let h = Harness::new();
    h.hw_event(&event(HwEventClass::InboundCrcError, 0, 0, PortState::Valid));
    expect_ack(&h, HwEventClass::InboundCrcError);
    assert_eq!(
        h.client.phy_events.lock().unwrap().as_slice(),
        &[(0, PhyChange::InboundCrcError)]
    );
}

/// An event naming a phy the controller does not have is dropped.
#[test]
fn event_for_bad_phy_ignored() {
    let h = Harness::new();
    h.hw_event(&event(HwEventClass::SasPhyUp, 0xF, 0, PortState::Valid));
    assert!(h.client.phy_events.lock().unwrap().is_empty());
    assert!(h.pop_request().is_none());
}

/// An unrecognized event class is dropped without stalling the queue.
#[test]
fn unknown_event_class_ignored() {
    let h = Harness::new();
    let mut msg = event(HwEventClass::PhyError, 0, 0, PortState::Valid);
    msg.class_raw = 0xEE;
    msg.class = None;
    h.hw_event(&msg);
    assert!(h.client.phy_events.lock().unwrap().is_empty());

    // The queue still flows.
    h.hw_event(&event(HwEventClass::SataSpinupHold, 0, 0, PortState::Valid));
    assert_eq!(
        h.client.phy_events.lock().unwrap().as_slice(),
        &[(0, PhyChange::SpinupHold)]
    );
}

/// The event-ack response releases its internal CCB quietly.
#[test]
fn event_ack_response_is_internal() {
    let h = Harness::new();
    h.hw_event(&event(HwEventClass::BroadcastChange, 0, 0, PortState::Valid));
    let req = expect_ack(&h, HwEventClass::BroadcastChange);

    let mut payload = [0u8; PAYLOAD_SIZE];
    SimpleResp {
        tag: req.tag,
        status: 0,
    }
    .encode(&mut payload);
    h.respond(OutboundOpcode::HwEventAck, &payload);

    assert_eq!(h.adapter.in_flight(), 0);
    assert!(h.client.controls.lock().unwrap().is_empty());
}
