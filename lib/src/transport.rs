// Copyright (c) 2023-2024 The SE-Link Developers

//! Bus transport abstraction.
//!
//! The driver is generic over [`Transport`] to support different
//! underlying buses (single-wire UART, I2C, or an in-process simulator for
//! tests). Implementations own wake-pulse generation and byte-level
//! timing; the driver owns framing, delays and retries.

use core::time::Duration;

/// Bus-level errors. Retryable by the driver up to a fixed bound.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Device did not respond within the bus timeout
    #[error("bus timeout")]
    Timeout,

    /// Device responded with fewer bytes than requested
    #[error("short read ({0} bytes)")]
    ShortRead(usize),

    /// Bus fault (collision, NAK storm, electrical)
    #[error("bus fault: {0}")]
    Fault(&'static str),
}

/// Byte-level transport to the secure element.
///
/// All methods are blocking; the driver serializes access by holding the
/// transport exclusively.
pub trait Transport {
    /// Send a fully framed command to the device.
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Receive up to `max_len` raw bytes of response.
    ///
    /// A device mid-computation will NAK or return garbage for a bounded
    /// number of polls; the driver retries, implementations should not.
    fn recv(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError>;

    /// Block for at least `d`.
    fn sleep(&mut self, d: Duration);

    /// Issue a wake pulse and re-arm the bus after a chip power state
    /// change. Clears all volatile chip state.
    fn reset(&mut self) -> Result<(), TransportError>;
}

impl<T: Transport> Transport for &mut T {
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        T::send(self, data)
    }

    fn recv(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        T::recv(self, max_len)
    }

    fn sleep(&mut self, d: Duration) {
        T::sleep(self, d)
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        T::reset(self)
    }
}
