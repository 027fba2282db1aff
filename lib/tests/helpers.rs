// Copyright (c) 2023-2024 The SE-Link Developers

//! Shared fixtures for driver integration tests: a [`Transport`] adapter
//! over the chip simulator and a fully personalized handle.

#![allow(dead_code)]

use core::time::Duration;

use log::LevelFilter;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

use se_link::{Personalization, SeHandle, Transport, TransportError};
use se_link_sim::SimChip;

/// Pairing secret shared by the handle and the simulated chip.
pub const PAIRING_SECRET: [u8; 32] = [0x42; 32];

/// Device-unique serial bytes of the simulated chip.
pub const SERIAL: [u8; 6] = [0xD0, 0xD1, 0xD2, 0xD3, 0xD4, 0xD5];

/// Slot holding a key the host knows; protects the encrypted slot.
pub const PROTECT_KEY_SLOT: u8 = 7;
pub const PROTECT_KEY: [u8; 32] = [0x77; 32];

/// Slot readable and writable only through the encrypted dance.
pub const ENCRYPTED_SLOT: u8 = 8;

/// Scratch slot with no access restrictions.
pub const PLAIN_SLOT: u8 = 9;

pub fn init_logging() {
    let _ = TermLogger::init(
        LevelFilter::Debug,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    );
}

/// In-process transport backed by the simulator. Each send produces at
/// most one buffered response; timing calls are no-ops.
pub struct SimTransport {
    chip: SimChip,
    pending: Option<Vec<u8>>,
}

impl SimTransport {
    pub fn new(chip: SimChip) -> Self {
        Self {
            chip,
            pending: None,
        }
    }

    pub fn chip_mut(&mut self) -> &mut SimChip {
        &mut self.chip
    }
}

impl Transport for SimTransport {
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.pending = Some(self.chip.command(data));
        Ok(())
    }

    fn recv(&mut self, _max_len: usize) -> Result<Vec<u8>, TransportError> {
        self.pending.take().ok_or(TransportError::Timeout)
    }

    fn sleep(&mut self, _duration: Duration) {}

    fn reset(&mut self) -> Result<(), TransportError> {
        self.chip.wake();
        self.pending = None;
        Ok(())
    }
}

/// A bus with nothing on the other end.
pub struct DeadTransport;

impl Transport for DeadTransport {
    fn send(&mut self, _data: &[u8]) -> Result<(), TransportError> {
        Err(TransportError::Fault("bus dead"))
    }

    fn recv(&mut self, _max_len: usize) -> Result<Vec<u8>, TransportError> {
        Err(TransportError::Fault("bus dead"))
    }

    fn sleep(&mut self, _duration: Duration) {}

    fn reset(&mut self) -> Result<(), TransportError> {
        Err(TransportError::Fault("bus dead"))
    }
}

/// A provisioned chip behind a paired handle: personalization has run,
/// both zones are locked and the test key slots are populated.
pub fn setup() -> SeHandle<SimTransport> {
    setup_with_secret(PAIRING_SECRET)
}

/// As [`setup`] but the handle holds `host_secret`, which may disagree
/// with the secret burned into the chip.
pub fn setup_with_secret(host_secret: [u8; 32]) -> SeHandle<SimTransport> {
    init_logging();

    let mut chip = SimChip::with_seed(SERIAL, 0x5EED);
    chip.load_slot(PROTECT_KEY_SLOT, PROTECT_KEY);
    chip.set_read_key(ENCRYPTED_SLOT, PROTECT_KEY_SLOT);
    chip.set_write_key(ENCRYPTED_SLOT, PROTECT_KEY_SLOT);

    let mut handle = SeHandle::new(SimTransport::new(chip), host_secret);
    handle
        .setup_config(&Personalization::new(PAIRING_SECRET))
        .expect("personalization failed");
    handle
}
