// Copyright (c) 2023-2024 The SE-Link Developers

//! Host driver for ATECC508A-class secure elements.
//!
//! This library drives a discrete cryptographic coprocessor from a
//! constrained host acting as a hardware root of trust: proving possession
//! of a shared pairing secret, reading and writing protected key slots
//! under cryptographic authorization, deriving and verifying MACs without
//! the long-term secret leaving the chip, and using the part as a hardware
//! RNG and tamper-evident counter.
//!
//! The core is [`SeHandle`], which owns a [`Transport`] plus a host-side
//! mirror of the chip's ephemeral TempKey register. Every authenticated
//! operation is a multi-step dance over that register; the mirror lets the
//! driver reject doomed calls before spending a real chip command, and
//! lets it reconstruct session keys locally for encrypted slot access.
//!
//! One handle owns the device: the chip has a single TempKey register and
//! a single in-flight operation slot, so every call takes `&mut self` and
//! blocks for the opcode's fixed worst-case execution time.

pub mod digest;
mod error;
mod session;
mod transport;

mod auth;
mod handle;
mod setup;
mod slots;

pub use error::Error;
pub use handle::SeHandle;
pub use session::{NonceSource, Session};
pub use setup::Personalization;
pub use slots::SlotHandle;
pub use transport::{Transport, TransportError};

pub use se_link_proto as proto;

/// Well-known key slot assignments shared with the provisioning tooling.
pub mod keynum {
    /// Slot holding the host/chip pairing secret.
    pub const PAIRING: u8 = 1;
    /// Slot authorizing firmware-controlled GPIO.
    pub const FIRMWARE: u8 = 14;
}
