//! Firmware I/O status codes and the pure status-to-outcome mapping.
//!
//! The mapping functions here are side-effect free: they return a
//! [`Disposition`] describing the outcome to deliver and the bookkeeping
//! the adapter must apply (eviction scheduling, open-reject accounting).
//! Keeping the table pure makes it testable without queues or devices.

/// Status code carried by every completion and event message.
///
/// Codes the firmware may grow in later revisions decode to
/// [`Status::Unknown`] instead of failing, and map to a conservative
/// failure outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Aborted,
    Overflow,
    Underflow,
    Failed,
    AbortReset,
    NotValid,
    NoDevice,
    IllegalParameter,
    LinkFailure,
    ProgError,
    HwTimeout,
    XferBreak,
    XferPhyNotReady,
    OpenProtocolNotSupported,
    OpenZoneViolation,
    OpenBreak,
    OpenItNexusLoss,
    OpenBadDestination,
    OpenRateNotSupported,
    OpenStpResourcesBusy,
    OpenWrongDestination,
    OpenUnknownError,
    XferNakReceived,
    XferAckNakTimeout,
    XferPeerAborted,
    XferRxFrame,
    XferDma,
    XferCreditTimeout,
    XferSataLinkTimeout,
    XferRejectedNcqMode,
    OpenRetryTimeout,
    SmpRespConnectionError,
    XferUnexpectedPhase,
    XferRdyOverrun,
    XferRdyNotExpected,
    XferCmdIssueAckNakTimeout,
    XferOffsetMismatch,
    XferZeroDataLen,
    XferCmdFrameIssued,
    InternalSmpResource,
    PortInReset,
    DsNonOperational,
    DsInRecovery,
    TmTagNotFound,
    PioSetupError,
    SspExtIuZeroLen,
    DsInError,
    OpenHwResourceBusy,
    AbortInProgress,
    AbortDelayed,
    InvalidLength,
    Unknown(u32),
}

impl Status {
    /// Decode a raw status word. Total: unrecognized values are preserved
    /// in [`Status::Unknown`].
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0x00 => Self::Success,
            0x01 => Self::Aborted,
            0x02 => Self::Overflow,
            0x03 => Self::Underflow,
            0x04 => Self::Failed,
            0x05 => Self::AbortReset,
            0x06 => Self::NotValid,
            0x07 => Self::NoDevice,
            0x08 => Self::IllegalParameter,
            0x09 => Self::LinkFailure,
            0x0A => Self::ProgError,
            0x0D => Self::HwTimeout,
            0x0E => Self::XferBreak,
            0x0F => Self::XferPhyNotReady,
            0x10 => Self::OpenProtocolNotSupported,
            0x11 => Self::OpenZoneViolation,
            0x12 => Self::OpenBreak,
            0x13 => Self::OpenItNexusLoss,
            0x14 => Self::OpenBadDestination,
            0x15 => Self::OpenRateNotSupported,
            0x16 => Self::OpenStpResourcesBusy,
            0x17 => Self::OpenWrongDestination,
            0x18 => Self::OpenUnknownError,
            0x19 => Self::XferNakReceived,
            0x1A => Self::XferAckNakTimeout,
            0x1B => Self::XferPeerAborted,
            0x1C => Self::XferRxFrame,
            0x1D => Self::XferDma,
            0x1E => Self::XferCreditTimeout,
            0x1F => Self::XferSataLinkTimeout,
            0x21 => Self::XferRejectedNcqMode,
            0x24 => Self::OpenRetryTimeout,
            0x25 => Self::SmpRespConnectionError,
            0x26 => Self::XferUnexpectedPhase,
            0x27 => Self::XferRdyOverrun,
            0x28 => Self::XferRdyNotExpected,
            0x30 => Self::XferCmdIssueAckNakTimeout,
            0x34 => Self::XferOffsetMismatch,
            0x35 => Self::XferZeroDataLen,
            0x36 => Self::XferCmdFrameIssued,
            0x37 => Self::InternalSmpResource,
            0x38 => Self::PortInReset,
            0x39 => Self::DsNonOperational,
            0x3A => Self::DsInRecovery,
            0x3B => Self::TmTagNotFound,
            0x3C => Self::PioSetupError,
            0x3D => Self::SspExtIuZeroLen,
            0x3E => Self::DsInError,
            0x3F => Self::OpenHwResourceBusy,
            0x40 => Self::AbortInProgress,
            0x41 => Self::AbortDelayed,
            0x42 => Self::InvalidLength,
            other => Self::Unknown(other),
        }
    }

    /// The on-wire value.
    pub fn raw(self) -> u32 {
        match self {
            Self::Success => 0x00,
            Self::Aborted => 0x01,
            Self::Overflow => 0x02,
            Self::Underflow => 0x03,
            Self::Failed => 0x04,
            Self::AbortReset => 0x05,
            Self::NotValid => 0x06,
            Self::NoDevice => 0x07,
            Self::IllegalParameter => 0x08,
            Self::LinkFailure => 0x09,
            Self::ProgError => 0x0A,
            Self::HwTimeout => 0x0D,
            Self::XferBreak => 0x0E,
            Self::XferPhyNotReady => 0x0F,
            Self::OpenProtocolNotSupported => 0x10,
            Self::OpenZoneViolation => 0x11,
            Self::OpenBreak => 0x12,
            Self::OpenItNexusLoss => 0x13,
            Self::OpenBadDestination => 0x14,
            Self::OpenRateNotSupported => 0x15,
            Self::OpenStpResourcesBusy => 0x16,
            Self::OpenWrongDestination => 0x17,
            Self::OpenUnknownError => 0x18,
            Self::XferNakReceived => 0x19,
            Self::XferAckNakTimeout => 0x1A,
            Self::XferPeerAborted => 0x1B,
            Self::XferRxFrame => 0x1C,
            Self::XferDma => 0x1D,
            Self::XferCreditTimeout => 0x1E,
            Self::XferSataLinkTimeout => 0x1F,
            Self::XferRejectedNcqMode => 0x21,
            Self::OpenRetryTimeout => 0x24,
            Self::SmpRespConnectionError => 0x25,
            Self::XferUnexpectedPhase => 0x26,
            Self::XferRdyOverrun => 0x27,
            Self::XferRdyNotExpected => 0x28,
            Self::XferCmdIssueAckNakTimeout => 0x30,
            Self::XferOffsetMismatch => 0x34,
            Self::XferZeroDataLen => 0x35,
            Self::XferCmdFrameIssued => 0x36,
            Self::InternalSmpResource => 0x37,
            Self::PortInReset => 0x38,
            Self::DsNonOperational => 0x39,
            Self::DsInRecovery => 0x3A,
            Self::TmTagNotFound => 0x3B,
            Self::PioSetupError => 0x3C,
            Self::SspExtIuZeroLen => 0x3D,
            Self::DsInError => 0x3E,
            Self::OpenHwResourceBusy => 0x3F,
            Self::AbortInProgress => 0x40,
            Self::AbortDelayed => 0x41,
            Self::InvalidLength => 0x42,
            Self::Unknown(raw) => raw,
        }
    }
}

/// Why a connection open was rejected at the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenRejectReason {
    /// Transient; the caller should retry the open later.
    RetryLater,
    ProtocolNotSupported,
    BadDestination,
    WrongDestination,
    RateNotSupported,
    Unknown,
}

/// Uniform task-outcome model delivered to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Completed, full transfer, no response data.
    Success,
    /// Completed with a protocol response (SSP response IU or SATA ending
    /// FIS captured in the completion message).
    Response { residual: u32 },
    Underrun { residual: u32 },
    Overrun,
    Aborted,
    /// The device cannot currently be reached through its path.
    DeviceUnreachable,
    OpenRejected(OpenRejectReason),
    /// Link- or protocol-level failure with no more specific class.
    ProtocolError,
    /// The firmware ran out of internal resources for this request.
    ResourceExhausted,
    /// Never delivered to the target; safe to retry once the device
    /// recovers.
    Undelivered,
}

impl TaskOutcome {
    /// Whether this outcome participates in the consecutive-open-reject
    /// eviction count.
    #[inline]
    pub(crate) fn is_open_reject(self) -> bool {
        matches!(self, Self::OpenRejected(_))
    }
}

/// Transient transport error classes handed to the recovery supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    LinkBreak,
    OpenRetryTimeout,
    NakReceived,
    AckNakTimeout,
}

/// Pure description of how the adapter must act on a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Disposition {
    pub outcome: TaskOutcome,
    /// Mark the device dying and schedule nexus recovery (at most once
    /// per dying transition; the adapter enforces the "once").
    pub nexus_event: bool,
}

impl Disposition {
    pub(crate) const fn of(outcome: TaskOutcome) -> Self {
        Self {
            outcome,
            nexus_event: false,
        }
    }

    const fn evicting(outcome: TaskOutcome) -> Self {
        Self {
            outcome,
            nexus_event: true,
        }
    }
}

/// How to act on an unsolicited SSP/SATA transfer-error event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EventDisposition {
    /// Hand the task to the deferred supervisor; no outcome yet.
    Defer(TransientKind),
    /// Terminal for the task: act like a completion.
    Complete(Disposition),
    /// Informational, nothing to do.
    Ignore,
}

use OpenRejectReason as Orej;
use TaskOutcome as Out;

/// Outcome mapping for SSP task completions.
pub(crate) fn ssp_disposition(status: Status, param: u32) -> Disposition {
    match status {
        Status::Success if param == 0 => Disposition::of(Out::Success),
        Status::Success => Disposition::of(Out::Response { residual: param }),
        Status::Aborted => Disposition::of(Out::Aborted),
        Status::Underflow => Disposition::of(Out::Underrun { residual: param }),
        Status::Overflow
        | Status::XferUnexpectedPhase
        | Status::XferRdyOverrun
        | Status::XferRdyNotExpected
        | Status::XferCmdIssueAckNakTimeout
        | Status::XferZeroDataLen => Disposition::of(Out::Overrun),
        Status::NoDevice => Disposition::of(Out::DeviceUnreachable),
        Status::XferBreak
        | Status::XferPhyNotReady
        | Status::OpenBreak
        | Status::XferNakReceived
        | Status::OpenRetryTimeout
        | Status::OpenHwResourceBusy => Disposition::of(Out::OpenRejected(Orej::RetryLater)),
        Status::OpenProtocolNotSupported => {
            Disposition::of(Out::OpenRejected(Orej::ProtocolNotSupported))
        }
        Status::OpenZoneViolation | Status::OpenUnknownError | Status::XferDma
        | Status::XferOffsetMismatch => Disposition::of(Out::OpenRejected(Orej::Unknown)),
        Status::OpenItNexusLoss => Disposition::evicting(Out::OpenRejected(Orej::Unknown)),
        Status::OpenBadDestination => Disposition::of(Out::OpenRejected(Orej::BadDestination)),
        Status::OpenRateNotSupported => {
            Disposition::of(Out::OpenRejected(Orej::RateNotSupported))
        }
        Status::OpenWrongDestination => {
            Disposition::of(Out::OpenRejected(Orej::WrongDestination))
        }
        Status::XferAckNakTimeout
        | Status::TmTagNotFound
        | Status::SspExtIuZeroLen => Disposition::of(Out::ProtocolError),
        Status::PortInReset => Disposition::of(Out::OpenRejected(Orej::Unknown)),
        Status::DsNonOperational => Disposition::evicting(Out::DeviceUnreachable),
        Status::DsInRecovery => Disposition::of(Out::Undelivered),
        _ => Disposition::of(Out::ProtocolError),
    }
}

/// Outcome mapping for SATA task completions. `aborting` is the CCB's
/// abort-in-progress flag: an abort racing the command turns `Aborted`
/// into a device-unreachable outcome.
pub(crate) fn sata_disposition(status: Status, param: u32, aborting: bool) -> Disposition {
    match status {
        Status::Success if param == 0 => Disposition::of(Out::Success),
        Status::Success => Disposition::of(Out::Response { residual: param }),
        Status::Aborted if aborting => Disposition::of(Out::DeviceUnreachable),
        Status::Aborted => Disposition::of(Out::Aborted),
        Status::Underflow | Status::XferRejectedNcqMode => {
            Disposition::of(Out::Underrun { residual: param })
        }
        Status::NoDevice => Disposition::of(Out::DeviceUnreachable),
        Status::XferBreak
        | Status::XferPhyNotReady
        | Status::OpenBreak
        | Status::OpenRetryTimeout
        | Status::OpenHwResourceBusy => Disposition::of(Out::OpenRejected(Orej::RetryLater)),
        Status::OpenProtocolNotSupported => {
            Disposition::of(Out::OpenRejected(Orej::ProtocolNotSupported))
        }
        Status::OpenZoneViolation => Disposition::of(Out::OpenRejected(Orej::Unknown)),
        Status::OpenItNexusLoss | Status::OpenStpResourcesBusy | Status::DsNonOperational
        | Status::DsInError => Disposition::evicting(Out::Undelivered),
        Status::OpenBadDestination => Disposition::of(Out::OpenRejected(Orej::BadDestination)),
        Status::OpenRateNotSupported => {
            Disposition::of(Out::OpenRejected(Orej::RateNotSupported))
        }
        Status::OpenWrongDestination => {
            Disposition::of(Out::OpenRejected(Orej::WrongDestination))
        }
        Status::XferNakReceived | Status::XferAckNakTimeout => {
            Disposition::of(Out::ProtocolError)
        }
        Status::XferDma => Disposition::of(Out::Aborted),
        Status::XferSataLinkTimeout | Status::PortInReset => {
            Disposition::of(Out::DeviceUnreachable)
        }
        Status::DsInRecovery => Disposition::of(Out::Undelivered),
        _ => Disposition::of(Out::ProtocolError),
    }
}

/// Outcome mapping for SMP request completions. `resp_len` is the
/// caller-provided response buffer length; `param` reports the bytes the
/// firmware actually returned.
pub(crate) fn smp_disposition(status: Status, param: u32, resp_len: u32, aborting: bool) -> Disposition {
    match status {
        Status::Success => {
            // The CRC dword does not count toward the payload.
            let residual = if resp_len.saturating_sub(4) <= param {
                0
            } else {
                resp_len - param
            };
            if residual == 0 {
                Disposition::of(Out::Success)
            } else {
                Disposition::of(Out::Underrun { residual })
            }
        }
        Status::Aborted if aborting => Disposition::of(Out::DeviceUnreachable),
        Status::Aborted => Disposition::of(Out::Aborted),
        Status::Overflow => Disposition::of(Out::Overrun),
        Status::NoDevice => Disposition::of(Out::DeviceUnreachable),
        Status::HwTimeout | Status::XferBreak | Status::XferPhyNotReady => {
            Disposition::of(Out::OpenRejected(Orej::RetryLater))
        }
        Status::OpenProtocolNotSupported => {
            Disposition::of(Out::OpenRejected(Orej::ProtocolNotSupported))
        }
        Status::OpenZoneViolation => Disposition::of(Out::OpenRejected(Orej::Unknown)),
        Status::OpenBreak => Disposition::of(Out::OpenRejected(Orej::RetryLater)),
        Status::OpenItNexusLoss => Disposition::evicting(Out::OpenRejected(Orej::Unknown)),
        Status::OpenBadDestination => Disposition::of(Out::OpenRejected(Orej::BadDestination)),
        Status::OpenRateNotSupported => {
            Disposition::of(Out::OpenRejected(Orej::RateNotSupported))
        }
        Status::OpenWrongDestination => {
            Disposition::of(Out::OpenRejected(Orej::WrongDestination))
        }
        Status::XferRxFrame => Disposition::of(Out::DeviceUnreachable),
        Status::OpenRetryTimeout
        | Status::PortInReset
        | Status::DsInRecovery
        | Status::OpenHwResourceBusy => Disposition::of(Out::OpenRejected(Orej::RetryLater)),
        Status::InternalSmpResource => Disposition::of(Out::ResourceExhausted),
        Status::DsNonOperational => Disposition::evicting(Out::DeviceUnreachable),
        _ => Disposition::of(Out::ProtocolError),
    }
}

/// Mapping for unsolicited SSP transfer-error events.
pub(crate) fn ssp_event_disposition(status: Status) -> EventDisposition {
    match status {
        Status::XferBreak => EventDisposition::Defer(TransientKind::LinkBreak),
        Status::OpenRetryTimeout => EventDisposition::Defer(TransientKind::OpenRetryTimeout),
        Status::XferNakReceived => EventDisposition::Defer(TransientKind::NakReceived),
        Status::XferAckNakTimeout => EventDisposition::Defer(TransientKind::AckNakTimeout),
        Status::XferCmdFrameIssued => EventDisposition::Ignore,
        _ => EventDisposition::Complete(ssp_disposition(status, 0)),
    }
}

/// Mapping for unsolicited SATA transfer-error events.
pub(crate) fn sata_event_disposition(status: Status) -> EventDisposition {
    match status {
        Status::XferBreak => EventDisposition::Defer(TransientKind::LinkBreak),
        Status::OpenRetryTimeout => EventDisposition::Defer(TransientKind::OpenRetryTimeout),
        Status::XferNakReceived => EventDisposition::Defer(TransientKind::NakReceived),
        Status::XferAckNakTimeout => EventDisposition::Defer(TransientKind::AckNakTimeout),
        Status::XferCmdFrameIssued => EventDisposition::Ignore,
        _ => EventDisposition::Complete(sata_disposition(status, 0, false)),
    }
}

/// Mapping for task-abort responses: the outcome of the abort request
/// itself, not of the task being aborted.
pub(crate) fn abort_disposition(status: Status) -> TaskOutcome {
    match status {
        Status::Success => Out::Success,
        Status::NotValid | Status::TmTagNotFound => Out::ProtocolError,
        Status::AbortInProgress | Status::AbortDelayed => Out::Undelivered,
        _ => Out::ProtocolError,
    }
}
