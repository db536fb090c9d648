//! Type aliases used in this library.

/// [`u32`]: Correlation tag of an outstanding request.
/// The low 16 bits index the CCB arena; the high 16 bits carry a nonzero
/// generation so a completion for a reused slot is detected structurally.
pub type Tag = u32;

/// [`u32`]: Engine-local device identifier (index into the device registry).
/// Note that this is not the firmware-assigned handle; see [`DeviceHandle`].
pub type DeviceId = u32;

/// [`u32`]: Firmware-assigned device handle, valid only after registration
/// completes. All wire traffic for a device carries this handle.
pub type DeviceHandle = u32;

/// [`u8`]: Physical link identifier.
pub type PhyId = u8;

/// [`u8`]: Logical port identifier.
pub type PortId = u8;

/// [`usize`]: Index of an inbound or outbound queue on the adapter.
pub type QueueId = usize;
