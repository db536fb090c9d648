//! Host-side MPI protocol engine for SAS/SATA storage controllers.
//!
//! The firmware on an intelligent controller exposes fixed-size circular
//! message queues in shared memory. This crate implements the host half of
//! that protocol: request submission into the inbound queues, consumption
//! and dispatch of completion/event messages from the outbound queues, the
//! tag-indexed table of outstanding requests, and the recovery policy that
//! turns firmware error statuses into retries, aborts and device eviction.

mod adapter;
mod device;
mod event;
mod phy;
mod queue;
mod status;
mod tag;
mod util;

pub mod client;
pub mod config;
pub mod iomb;
pub mod payload;
pub mod type_alias;

#[cfg(test)]
mod tests;

pub use self::adapter::{
    Adapter, FirmwareEndpoints, NvmStore, PhyControlOp, SataMode, SubmitError, TaskRequest,
    TmFunction,
};
pub use self::client::{
    ControlResponse, FlashUpdateStatus, RegisterFailure, TaskPresence, TransportClient,
};
pub use self::config::AttachConfig;
pub use self::device::{DeviceInfo, DeviceKind};
pub use self::event::{BroadcastKind, LinkErrorKind, PhyChange};
pub use self::iomb::{InboundOpcode, OutboundOpcode};
pub use self::payload::DataDir;
pub use self::phy::{AttachedProtocol, LinkRate, PhyInfo, PortInfo, PortState};
pub use self::queue::{PeerInbound, PeerOutbound};
pub use self::status::{OpenRejectReason, Status, TaskOutcome};
