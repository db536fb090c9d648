//! Attach-time configuration.
//!
//! On hardware these values come out of the controller's configuration
//! table during attach (queue offsets, doorbell locations, I/O limits).
//! The engine never resizes anything after attach.

/// Fixed sizing and policy knobs for one adapter.
#[derive(Debug, Clone)]
pub struct AttachConfig {
    /// Number of inbound (host-to-firmware) queues.
    pub inbound_queues: usize,

    /// Number of outbound (firmware-to-host) queues.
    pub outbound_queues: usize,

    /// Slots per queue.
    pub queue_depth: usize,

    /// CCB pool size: the maximum number of concurrently outstanding
    /// requests, control-plane traffic included.
    pub max_ccbs: usize,

    /// Device registry capacity.
    pub max_devices: usize,

    /// Number of phys on the controller.
    pub phys: usize,

    /// Consecutive open-reject completions that evict a device. A
    /// firmware tuning value; the default matches the vendor driver.
    pub open_reject_threshold: u32,
}

impl Default for AttachConfig {
    fn default() -> Self {
        Self {
            inbound_queues: 1,
            outbound_queues: 1,
            queue_depth: 1024,
            max_ccbs: 512,
            max_devices: 1024,
            phys: 8,
            open_reject_threshold: 16,
        }
    }
}

impl AttachConfig {
    /// Small sizing for tests and simulations.
    pub fn small() -> Self {
        Self {
            inbound_queues: 1,
            outbound_queues: 1,
            queue_depth: 32,
            max_ccbs: 16,
            max_devices: 8,
            phys: 4,
            open_reject_threshold: 16,
        }
    }
}
