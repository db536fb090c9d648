//! Deferred retry/abort supervision.
//!
//! Interrupt-time dispatch never blocks on task-management traffic.
//! Instead it pushes a [`RecoveryEvent`] onto a lock-free queue, and the
//! deferred worker calls [`Adapter::run_recovery`] to act on it: query
//! the device for task liveness, abort what is still stuck, and escalate
//! to nexus loss when the device itself stops answering.

use super::{Adapter, Notice};
use crate::client::TaskPresence;
use crate::status::{OpenRejectReason, TaskOutcome, TransientKind};
use crate::type_alias::*;

/// Work handed from interrupt context to the deferred supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecoveryEvent {
    /// An in-flight task hit a transient transport error.
    TransientError { tag: Tag, kind: TransientKind },

    /// A device crossed into the dying state; the transport layer must
    /// perform a link-level nexus reset.
    NexusLoss { device: DeviceId },
}

impl Adapter {
    /// Drain pending recovery work. Deferred (non-interrupt) context
    /// only: this may call back into the collaborator and re-enter the
    /// submission path.
    pub fn run_recovery(&self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.recovery.pop() {
            log::debug!("recovery: handling {:?}", event);
            match event {
                RecoveryEvent::TransientError { tag, kind } => self.recover_task(tag, kind),
                RecoveryEvent::NexusLoss { device } => self.client.nexus_lost(device),
            }
            handled += 1;
        }
        handled
    }

    /// Recovery of one task after a transient transport error.
    fn recover_task(&self, tag: Tag, kind: TransientKind) {
        // The liveness query goes through the transport layer's own
        // task-management machinery, so ask before taking our lock.
        let presence = self.client.query_task(tag);

        let device = {
            let mut state = self.state.lock().unwrap();
            let Some(ccb) = state.ccbs.resolve(tag) else {
                // Completed by another path while we were queued.
                return;
            };
            if ccb.kind != crate::tag::CcbKind::Task {
                log::warn!("recovery: tag {:#x} is not a task, dropping", tag);
                return;
            }
            let Some(device) = ccb.device else {
                log::warn!("recovery: task {:#x} has no device, dropping", tag);
                return;
            };

            match (kind, presence) {
                // A link break does not get an abort: if the device still
                // holds the task it will run to completion on its own.
                (TransientKind::LinkBreak, TaskPresence::Present) => return,
                (_, TaskPresence::Present) => {
                    // Snub the Aborted completion the abort will provoke;
                    // we deliver the task outcome ourselves below.
                    ccb.open_retry = true;
                    ccb.aborting = true;
                }
                _ => {}
            }
            device
        };

        let outcome = match presence {
            TaskPresence::Present if kind != TransientKind::LinkBreak => {
                if self.submit_abort(0, device, Some(tag), true).is_err() {
                    // Cannot even enqueue the abort: treat the device as
                    // misbehaving and hand it to eviction.
                    self.evict_now(device);
                    TaskOutcome::Undelivered
                } else {
                    TaskOutcome::OpenRejected(OpenRejectReason::RetryLater)
                }
            }
            TaskPresence::Present | TaskPresence::Absent => match kind {
                TransientKind::LinkBreak => TaskOutcome::Undelivered,
                _ => TaskOutcome::OpenRejected(OpenRejectReason::RetryLater),
            },
            TaskPresence::Unknown => {
                // The device did not answer the query at all.
                self.evict_now(device);
                TaskOutcome::Undelivered
            }
        };

        // Fold the result into the task outcome and close the task. If a
        // racing completion beat us here, the tag no longer resolves and
        // the task was already delivered exactly once.
        let notice = {
            let mut state = self.state.lock().unwrap();
            if state.ccbs.resolve(tag).is_some() {
                state.ccbs.free(tag);
                if let Some(dev) = state.devices.get_mut(device) {
                    dev.running = dev.running.saturating_sub(1);
                }
                Some(Notice::Task(tag, outcome))
            } else {
                None
            }
        };
        if let Some(notice) = notice {
            self.deliver(notice);
        }
    }

    /// Mark the device dying (if not already) and report nexus loss.
    /// Runs in deferred context, so the collaborator is called directly
    /// instead of through the recovery queue.
    fn evict_now(&self, device: DeviceId) {
        let newly_dying = {
            let mut state = self.state.lock().unwrap();
            match state.devices.get_mut(device) {
                Some(dev) if !dev.dying => {
                    dev.dying = true;
                    dev.open_rejects = 0;
                    true
                }
                _ => false,
            }
        };
        if newly_dying {
            self.client.nexus_lost(device);
        }
    }
}
