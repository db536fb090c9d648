//! Shared-memory circular message queues.
//!
//! Each queue is a fixed array of [`SLOT_SIZE`]-byte slots plus a producer
//! index and a consumer index. The side that owns an index is its only
//! writer; the other side reads a possibly-stale mirror of it and must
//! re-poll before concluding "empty" or "full". Inbound queues are produced
//! by the host and consumed by the firmware; outbound queues the reverse.
//!
//! Constructors return the host half together with a peer half
//! ([`PeerInbound`] / [`PeerOutbound`]). The peer half is what a firmware
//! simulation drives; on real hardware it corresponds to the memory cells
//! the controller serves.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::iomb::{MsgHeader, PAYLOAD_SIZE, SLOT_SIZE};
use crate::util::likely::*;

/// Ring-level submission failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub(crate) enum QueueError {
    /// The queue is full against the last observed peer index. The check is
    /// a safe under-approximation: it may fire when the peer has already
    /// consumed more, but it never reports room when there is none.
    #[error("inbound queue full")]
    Busy,

    /// The payload cannot fit in a slot. A programming error, not a
    /// run-time retry case.
    #[error("payload of {0} bytes exceeds the slot payload area")]
    MessageTooLarge(usize),
}

/// The slot memory both sides reference.
struct SlotArray {
    slots: Mutex<Box<[[u8; SLOT_SIZE]]>>,
}

impl SlotArray {
    fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            slots: Mutex::new(vec![[0u8; SLOT_SIZE]; capacity].into_boxed_slice()),
        })
    }

    fn read(&self, idx: u32) -> (MsgHeader, [u8; PAYLOAD_SIZE]) {
        let slots = self.slots.lock().unwrap();
        let slot = &slots[idx as usize];
        let mut hdr = [0u8; 4];
        hdr.copy_from_slice(&slot[..4]);
        let mut payload = [0u8; PAYLOAD_SIZE];
        payload.copy_from_slice(&slot[4..]);
        (MsgHeader::from_bytes(hdr), payload)
    }

    fn write(&self, idx: u32, hdr: MsgHeader, payload: &[u8]) {
        let mut slots = self.slots.lock().unwrap();
        let slot = &mut slots[idx as usize];
        slot[..4].copy_from_slice(&hdr.to_bytes());
        slot[4..4 + payload.len()].copy_from_slice(payload);
        slot[4 + payload.len()..].fill(0);
    }

    /// Zero the header word so a second consumption pass cannot re-process
    /// the slot.
    fn clear_header(&self, idx: u32) {
        let mut slots = self.slots.lock().unwrap();
        slots[idx as usize][..4].fill(0);
    }
}

/// Host side of an inbound (host-to-firmware) queue.
pub(crate) struct InboundQueue {
    mem: Arc<SlotArray>,
    capacity: u32,

    /// Host-owned producer index. Published to the firmware only through
    /// the doorbell write in [`commit`](Self::commit).
    producer_idx: u32,

    /// Mirror of the firmware's consumer index.
    consumer_mirror: Arc<AtomicU32>,

    /// Doorbell register for this queue, discovered at attach time.
    doorbell: Arc<AtomicU32>,
}

impl InboundQueue {
    /// Reserve the next slot and advance the local producer index.
    ///
    /// The consumer mirror is re-read on every call, so a previous `Busy`
    /// does not stick once the firmware catches up.
    pub fn acquire_slot(&mut self, payload_len: usize) -> Result<u32, QueueError> {
        if unlikely(payload_len > PAYLOAD_SIZE) {
            return Err(QueueError::MessageTooLarge(payload_len));
        }
        let consumer = self.consumer_mirror.load(Ordering::Acquire);
        if unlikely((self.producer_idx + 1) % self.capacity == consumer) {
            return Err(QueueError::Busy);
        }
        let slot = self.producer_idx;
        self.producer_idx = (self.producer_idx + 1) % self.capacity;
        Ok(slot)
    }

    /// Encode a message into a previously acquired slot.
    pub fn write_message(&self, slot: u32, opcode: u16, resp_queue: u8, payload: &[u8]) {
        let hdr = MsgHeader::new(opcode, resp_queue, 1);
        self.mem.write(slot, hdr, payload);
    }

    /// Ring the doorbell: the firmware becomes eligible to consume
    /// everything up to the current producer index.
    pub fn commit(&self) {
        self.doorbell.store(self.producer_idx, Ordering::Release);
    }
}

/// What one outbound consumption step found.
pub(crate) enum OutboundSlot {
    /// A valid message: dispatch it, then release `elements`.
    Message {
        header: MsgHeader,
        payload: [u8; PAYLOAD_SIZE],
        elements: u8,
    },
    /// A skip placeholder or a slot with a clear validity bit: release
    /// `elements` without dispatch.
    Skip { elements: u8 },
}

/// Host side of an outbound (firmware-to-host) queue.
pub(crate) struct OutboundQueue {
    mem: Arc<SlotArray>,
    capacity: u32,

    /// Host-owned consumer index. Published through the doorbell in
    /// [`release`](Self::release).
    consumer_idx: u32,

    /// Mirror of the firmware's producer index.
    producer_mirror: Arc<AtomicU32>,

    /// Last value read from the mirror. Refreshed whenever the cached view
    /// looks empty, so one stale read is never trusted as "permanently
    /// empty".
    cached_producer: u32,

    /// Consumer-index write-back register.
    doorbell: Arc<AtomicU32>,
}

impl OutboundQueue {
    /// Look at the next not-yet-consumed slot, if any.
    pub fn peek(&mut self) -> Option<OutboundSlot> {
        if self.cached_producer == self.consumer_idx {
            self.cached_producer = self.producer_mirror.load(Ordering::Acquire);
            if self.cached_producer == self.consumer_idx {
                return None;
            }
        }

        let (header, payload) = self.mem.read(self.consumer_idx);
        let elements = header.element_cnt().max(1);
        if likely(header.is_valid()) {
            Some(OutboundSlot::Message {
                header,
                payload,
                elements,
            })
        } else {
            Some(OutboundSlot::Skip { elements })
        }
    }

    /// Consume `elements` slots: clear the leading header, advance the
    /// consumer index and write it back for the firmware.
    ///
    /// The advance is clamped to the distance to the producer index; the
    /// element count came from the peer and is not trusted to keep the
    /// consumer behind the producer on its own.
    pub fn release(&mut self, elements: u8) {
        let available =
            (self.cached_producer + self.capacity - self.consumer_idx) % self.capacity;
        if unlikely(available == 0) {
            return;
        }
        let step = u32::from(elements.max(1));
        if unlikely(step > available) {
            log::warn!(
                "outbound release of {} elements exceeds the {} produced; clamping",
                step,
                available
            );
        }
        let step = step.min(available);

        self.mem.clear_header(self.consumer_idx);
        self.consumer_idx = (self.consumer_idx + step) % self.capacity;
        self.doorbell.store(self.consumer_idx, Ordering::Release);
    }
}

/// Firmware-side endpoint of an inbound queue.
///
/// Pops host requests in FIFO order and publishes the consumer index back,
/// exactly as controller firmware would. Used by the test harness and by
/// integrations that emulate the peer.
pub struct PeerInbound {
    mem: Arc<SlotArray>,
    capacity: u32,
    consumer_idx: u32,
    consumer_mirror: Arc<AtomicU32>,
    doorbell: Arc<AtomicU32>,
}

impl PeerInbound {
    /// Consume the next host request, returning its raw opcode and payload.
    pub fn pop(&mut self) -> Option<(u16, Vec<u8>)> {
        let producer = self.doorbell.load(Ordering::Acquire);
        if self.consumer_idx == producer {
            return None;
        }
        let (hdr, payload) = self.mem.read(self.consumer_idx);
        self.mem.clear_header(self.consumer_idx);
        self.consumer_idx =
            (self.consumer_idx + u32::from(hdr.element_cnt().max(1))) % self.capacity;
        self.consumer_mirror
            .store(self.consumer_idx, Ordering::Release);
        Some((hdr.opcode(), payload.to_vec()))
    }

    /// Number of requests the host has published but this peer has not
    /// consumed yet.
    pub fn backlog(&self) -> u32 {
        let producer = self.doorbell.load(Ordering::Acquire);
        (producer + self.capacity - self.consumer_idx) % self.capacity
    }
}

/// Firmware-side endpoint of an outbound queue.
///
/// Produces completion and event messages the way controller firmware
/// would: write the slot, then publish the producer index.
pub struct PeerOutbound {
    mem: Arc<SlotArray>,
    capacity: u32,
    producer_idx: u32,
    producer_mirror: Arc<AtomicU32>,
    doorbell: Arc<AtomicU32>,
}

impl PeerOutbound {
    /// Produce one message. Returns `false` when the ring is full against
    /// the host's written-back consumer index.
    pub fn push(&mut self, opcode: u16, payload: &[u8]) -> bool {
        self.push_raw(MsgHeader::new(opcode, 0, 1), payload)
    }

    /// Produce a skip entry: validity bit set, skip opcode, one element.
    pub fn push_skip(&mut self) -> bool {
        let hdr = MsgHeader::new(crate::iomb::OutboundOpcode::SkipEntry.raw(), 0, 1);
        self.push_raw(hdr, &[])
    }

    /// Produce a slot whose validity bit is clear. The host must release
    /// it without dispatching.
    pub fn push_invalid(&mut self) -> bool {
        let mut hdr = MsgHeader::new(0, 0, 1);
        hdr.set_valid(0);
        self.push_raw(hdr, &[])
    }

    fn push_raw(&mut self, hdr: MsgHeader, payload: &[u8]) -> bool {
        assert!(payload.len() <= PAYLOAD_SIZE, "peer payload too large");
        let consumer = self.doorbell.load(Ordering::Acquire);
        if (self.producer_idx + 1) % self.capacity == consumer {
            return false;
        }
        self.mem.write(self.producer_idx, hdr, payload);
        self.producer_idx = (self.producer_idx + 1) % self.capacity;
        self.producer_mirror
            .store(self.producer_idx, Ordering::Release);
        true
    }
}

/// Create an inbound queue and its firmware-side endpoint over shared slot
/// memory. `capacity` is the number of slots that may be outstanding at
/// once; one extra slot is reserved internally to distinguish full from
/// empty.
pub(crate) fn inbound_pair(capacity: usize) -> (InboundQueue, PeerInbound) {
    assert!(capacity >= 1, "a ring needs at least one usable slot");
    let capacity = capacity + 1;
    let mem = SlotArray::new(capacity);
    let consumer_mirror = Arc::new(AtomicU32::new(0));
    let doorbell = Arc::new(AtomicU32::new(0));
    (
        InboundQueue {
            mem: mem.clone(),
            capacity: capacity as u32,
            producer_idx: 0,
            consumer_mirror: consumer_mirror.clone(),
            doorbell: doorbell.clone(),
        },
        PeerInbound {
            mem,
            capacity: capacity as u32,
            consumer_idx: 0,
            consumer_mirror,
            doorbell,
        },
    )
}

/// Create an outbound queue and its firmware-side endpoint over shared slot
/// memory. `capacity` counts usable slots, as for [`inbound_pair`].
pub(crate) fn outbound_pair(capacity: usize) -> (OutboundQueue, PeerOutbound) {
    assert!(capacity >= 1, "a ring needs at least one usable slot");
    let capacity = capacity + 1;
    let mem = SlotArray::new(capacity);
    let producer_mirror = Arc::new(AtomicU32::new(0));
    let doorbell = Arc::new(AtomicU32::new(0));
    (
        OutboundQueue {
            mem: mem.clone(),
            capacity: capacity as u32,
            consumer_idx: 0,
            producer_mirror: producer_mirror.clone(),
            cached_producer: 0,
            doorbell: doorbell.clone(),
        },
        PeerOutbound {
            mem,
            capacity: capacity as u32,
            producer_idx: 0,
            producer_mirror,
            doorbell,
        },
    )
}
