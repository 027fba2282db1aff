// Copyright (c) 2023-2024 The SE-Link Developers

//! Wire protocol definitions for ATECC508A-class secure elements.
//!
//! This crate specifies the byte-level contract between a host and the
//! coprocessor: opcodes, status codes, command/response framing with the
//! chip's CRC-16, the Info word bit layout and per-opcode worst-case
//! execution times. It is `no_std` so the same definitions serve both the
//! host driver and the chip simulator.
//!
//! Encodings are bit-exact reproductions of the chip datasheet; the status
//! byte mapping in particular must never be altered since authentication
//! logic downstream branches on it.

#![no_std]

use core::time::Duration;

use num_enum::TryFromPrimitive;
use strum::{Display, EnumIter};

pub use encdec::{Decode, Encode};

pub mod frame;
pub mod info;

pub use frame::{CommandFrame, FrameError, Response};
pub use info::InfoWord;

/// Command opcodes, table 9-4 of the datasheet.
#[derive(Copy, Clone, Debug, PartialEq, Eq, TryFromPrimitive, Display, EnumIter)]
#[repr(u8)]
pub enum Opcode {
    Pause = 0x01,
    Read = 0x02,
    Mac = 0x08,
    Hmac = 0x11,
    Write = 0x12,
    GenDig = 0x15,
    Nonce = 0x16,
    Lock = 0x17,
    Random = 0x1B,
    DeriveKey = 0x1C,
    UpdateExtra = 0x20,
    Counter = 0x24,
    CheckMac = 0x28,
    Info = 0x30,
    GenKey = 0x40,
    Sign = 0x41,
    Ecdh = 0x43,
    Verify = 0x45,
    PrivWrite = 0x46,
    Sha = 0x47,
}

impl Opcode {
    /// Worst-case execution time for this command.
    ///
    /// The host must sleep this long after sending before polling for a
    /// response; polling earlier yields NAKs or garbage, not an early
    /// answer.
    pub const fn exec_time(&self) -> Duration {
        let ms = match self {
            Opcode::Pause => 3,
            Opcode::Read => 5,
            Opcode::Mac => 14,
            Opcode::Hmac => 23,
            Opcode::Write => 42,
            Opcode::GenDig => 11,
            Opcode::Nonce => 29,
            Opcode::Lock => 32,
            Opcode::Random => 23,
            Opcode::DeriveKey => 50,
            Opcode::UpdateExtra => 10,
            Opcode::Counter => 20,
            Opcode::CheckMac => 38,
            Opcode::Info => 2,
            Opcode::GenKey => 115,
            Opcode::Sign => 60,
            Opcode::Ecdh => 58,
            Opcode::Verify => 72,
            Opcode::PrivWrite => 48,
            Opcode::Sha => 9,
        };
        Duration::from_millis(ms)
    }
}

/// Single-byte status codes, table 9-3 of the datasheet.
///
/// A one-byte response payload is always one of these, never data.
#[derive(Copy, Clone, Debug, PartialEq, Eq, TryFromPrimitive, Display)]
#[repr(u8)]
pub enum Status {
    /// Command executed successfully
    Ok = 0x00,
    /// CheckMac or Verify comparison failed
    CheckMacFail = 0x01,
    /// Command could not be parsed by the chip
    ParseError = 0x03,
    /// ECC processing fault
    EccFault = 0x05,
    /// Command received but could not be executed
    ExecError = 0x0F,
    /// First command after wake; the chip did not execute it
    AfterWake = 0x11,
    /// Watchdog is about to expire, all volatile state lost
    WatchdogExpired = 0xEE,
    /// CRC or communication error
    CommError = 0xFF,
}

/// Zone selector for Read / Write / Lock / GenDig param1.
pub const ZONE_CONFIG: u8 = 0x00;
pub const ZONE_OTP: u8 = 0x01;
pub const ZONE_DATA: u8 = 0x02;
/// GenDig over a monotonic counter rather than a key slot.
pub const ZONE_COUNTER: u8 = 0x04;
/// OR'd into the zone byte to select 32-byte block access.
pub const ZONE_BLOCK: u8 = 0x80;

/// Config zone length in bytes.
pub const CONFIG_LEN: usize = 128;

/// Key / data slots available on the chip.
pub const NUM_SLOTS: u8 = 16;

/// Monotonic counters available on the chip.
pub const NUM_COUNTERS: u8 = 2;

/// Serial number framing: nine bytes, first two always `0x01 0x23`,
/// last always `0xEE`. Six bytes in between are device-unique.
pub const SERIAL_LEN: usize = 9;
pub const SERIAL_PREFIX: [u8; 2] = [0x01, 0x23];
pub const SERIAL_TAIL: u8 = 0xEE;

/// Nonce command mode: generate a new random nonce, update seed.
pub const NONCE_MODE_RANDOM: u8 = 0x00;
/// Nonce command mode: pass the 32-byte input through to TempKey.
pub const NONCE_MODE_PASSTHROUGH: u8 = 0x03;

/// Info command param1 selectors.
pub mod info_mode {
    pub const REVISION: u8 = 0x00;
    pub const KEY_VALID: u8 = 0x01;
    pub const STATE: u8 = 0x02;
    pub const GPIO: u8 = 0x03;
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn opcode_bytes_match_datasheet() {
        assert_eq!(Opcode::CheckMac as u8, 0x28);
        assert_eq!(Opcode::DeriveKey as u8, 0x1C);
        assert_eq!(Opcode::GenDig as u8, 0x15);
        assert_eq!(Opcode::Nonce as u8, 0x16);
        assert_eq!(Opcode::Read as u8, 0x02);
        assert_eq!(Opcode::Write as u8, 0x12);
    }

    #[test]
    fn every_opcode_has_a_delay() {
        for op in Opcode::iter() {
            assert!(op.exec_time() > Duration::ZERO, "{op} has no delay");
        }
    }

    #[test]
    fn status_bytes_are_bit_exact() {
        assert_eq!(Status::try_from(0x00).unwrap(), Status::Ok);
        assert_eq!(Status::try_from(0x01).unwrap(), Status::CheckMacFail);
        assert_eq!(Status::try_from(0x03).unwrap(), Status::ParseError);
        assert_eq!(Status::try_from(0x05).unwrap(), Status::EccFault);
        assert_eq!(Status::try_from(0x0F).unwrap(), Status::ExecError);
        assert_eq!(Status::try_from(0x11).unwrap(), Status::AfterWake);
        assert_eq!(Status::try_from(0xEE).unwrap(), Status::WatchdogExpired);
        assert_eq!(Status::try_from(0xFF).unwrap(), Status::CommError);
        assert!(Status::try_from(0x42).is_err());
    }
}
