// Copyright (c) 2023-2024 The SE-Link Developers

use se_link_proto::{FrameError, Status};

use crate::transport::TransportError;

/// Driver error type.
///
/// Transport and frame errors are retried locally up to a small fixed
/// bound before surfacing here. Cryptographic failures are surfaced
/// immediately and must never be retried by the caller without
/// re-establishing the session: a CheckMac failure may indicate an active
/// attack, not transient noise.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bus-level failure after retries
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    /// Framing / checksum failure after retries
    #[error("framing: {0}")]
    Frame(FrameError),

    /// Chip reported a documented error status
    #[error("chip status: {0}")]
    Chip(Status),

    /// Chip returned a status byte outside the documented set
    #[error("undocumented status byte {0:#04x}")]
    UnknownStatus(u8),

    /// CheckMac / Verify rejected our digest
    #[error("authentication failed")]
    AuthFailed,

    /// Watchdog fired; all volatile chip state is gone. The handle is
    /// poisoned until [`reset_chip`](crate::SeHandle::reset_chip).
    #[error("chip watchdog expired, reset required")]
    WatchdogExpired,

    /// Local TempKey mirror is not in the state this operation needs;
    /// nothing was sent to the bus.
    #[error("session not ready: {0}")]
    SessionNotReady(&'static str),

    /// Caller-supplied length is not one the chip supports; nothing was
    /// sent to the bus.
    #[error("invalid length {0}")]
    InvalidLength(usize),

    /// Slot or counter index out of range; nothing was sent to the bus.
    #[error("invalid slot {0}")]
    InvalidSlot(u8),

    /// Plain write attempted on a slot known to be locked.
    #[error("slot {0} is locked")]
    SlotLocked(u8),

    /// Response payload had an unexpected length
    #[error("unexpected response length {0}")]
    UnexpectedResponse(usize),

    /// Device probe failed
    #[error("probe failed: {0}")]
    Probe(&'static str),
}

impl From<FrameError> for Error {
    fn from(e: FrameError) -> Self {
        Error::Frame(e)
    }
}

impl Error {
    /// True for failures that force the TempKey mirror to `Unknown`.
    pub fn invalidates_session(&self) -> bool {
        !matches!(
            self,
            Error::SessionNotReady(_)
                | Error::InvalidLength(_)
                | Error::InvalidSlot(_)
                | Error::SlotLocked(_)
        )
    }
}
