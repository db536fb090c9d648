//! Tag allocator and the CCB (command control block) arena.
//!
//! A tag is `(generation << 16) | slot_index` with a nonzero generation
//! that increments every time the slot is reused. Resolving a tag checks
//! the full value stored in the slot, so a completion that references a
//! stale or duplicate tag is detected structurally instead of corrupting
//! another request's bookkeeping.

use crate::type_alias::*;
use crate::util::likely::*;

/// What a CCB is tracking. Selects completion bookkeeping and, for the
/// recovery supervisor, which requests may be snubbed or aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CcbKind {
    /// SSP/SATA/SMP task on behalf of the caller.
    Task,
    /// Task-abort request issued by the recovery supervisor or caller.
    Abort,
    /// Control-plane request (registration, phy, NVM, ack, ...).
    Control,
}

/// One outstanding request.
#[derive(Debug)]
pub(crate) struct Ccb {
    /// Full tag bound to this slot; `None` while the slot is free.
    tag: Option<Tag>,

    /// Bumped on every allocation of this slot.
    generation: u16,

    pub kind: CcbKind,

    /// Target device, when the request addresses one.
    pub device: Option<DeviceId>,

    /// An abort for this request is in flight; an `Aborted` completion is
    /// then a device-unreachable outcome, not a plain abort.
    pub aborting: bool,

    /// The recovery supervisor owns this task: an `Aborted` completion is
    /// consumed silently instead of being delivered to the caller.
    pub open_retry: bool,

    /// Engine-originated request (supervisor abort, event ack): its
    /// conclusion is logged, not delivered to the collaborator.
    pub internal: bool,

    /// Expected SMP response length, for the residual computation.
    pub smp_resp_len: u32,
}

/// Bounded arena of CCBs with an O(1) free-list allocator.
pub(crate) struct CcbTable {
    slots: Vec<Ccb>,
    free: Vec<u16>,
}

impl CcbTable {
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity > 0 && capacity <= usize::from(u16::MAX),
            "CCB pool must fit a 16-bit slot index"
        );
        let slots = (0..capacity)
            .map(|_| Ccb {
                tag: None,
                generation: 0,
                kind: CcbKind::Control,
                device: None,
                aborting: false,
                open_retry: false,
                internal: false,
                smp_resp_len: 0,
            })
            .collect();
        // Popping from the tail hands out low indices first.
        let free = (0..capacity as u16).rev().collect();
        Self { slots, free }
    }

    /// Allocate a CCB. Returns `None` when the pool is exhausted.
    pub fn allocate(&mut self, kind: CcbKind, device: Option<DeviceId>) -> Option<Tag> {
        let idx = self.free.pop()?;
        let slot = &mut self.slots[usize::from(idx)];
        slot.generation = slot.generation.wrapping_add(1);
        if slot.generation == 0 {
            slot.generation = 1;
        }
        let tag = (u32::from(slot.generation) << 16) | u32::from(idx);
        slot.tag = Some(tag);
        slot.kind = kind;
        slot.device = device;
        slot.aborting = false;
        slot.open_retry = false;
        slot.internal = false;
        slot.smp_resp_len = 0;
        Some(tag)
    }

    /// Resolve a tag to its live CCB. A free slot or a generation mismatch
    /// yields `None`; the caller logs and drops the message.
    pub fn resolve(&mut self, tag: Tag) -> Option<&mut Ccb> {
        let idx = usize::from(tag as u16);
        let slot = self.slots.get_mut(idx)?;
        if unlikely(slot.tag != Some(tag)) {
            return None;
        }
        Some(slot)
    }

    /// Release a tag. The slot's mapping is cleared in the same step, so a
    /// second free of the same tag (or of a stale one) is a no-op that
    /// returns `false`.
    pub fn free(&mut self, tag: Tag) -> bool {
        let idx = usize::from(tag as u16);
        let Some(slot) = self.slots.get_mut(idx) else {
            return false;
        };
        if slot.tag != Some(tag) {
            return false;
        }
        slot.tag = None;
        slot.device = None;
        self.free.push(idx as u16);
        true
    }

    /// Number of live CCBs.
    pub fn in_flight(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}
