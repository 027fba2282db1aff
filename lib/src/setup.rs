// Copyright (c) 2023-2024 The SE-Link Developers

//! One-time chip personalization.
//!
//! This is the destructive, irreversible step that fixes the slot policy
//! and burns in the pairing secret. It must never sit on a default code
//! path: constructing a [`Personalization`] is the explicit opt-in, and
//! the whole sequence is a no-op on a part whose zones are already
//! locked.
//!
//! CONCERN: if an attacker swapped in a blank chip, a caller reaching
//! this path would write the existing pairing secret to it in the clear.
//! Keep the invocation confined to factory tooling that just picked a
//! fresh secret.

use log::{info, warn};
use zeroize::ZeroizeOnDrop;

use se_link_proto::{frame::crc16, Opcode, CONFIG_LEN, ZONE_CONFIG};

use crate::{keynum, Error, SeHandle, SlotHandle, Transport};

/// Config bytes [16..84): I2C/OTP mode and the per-slot SlotConfig
/// policy. Pairing and firmware slots are secret, never plain-readable;
/// data slots allow encrypted access bound to the pairing key.
const CONFIG_SLOT_POLICY: [u8; 68] = [
    0xe1, 0x00, 0x61, 0x00, 0x00, 0x00, 0x8f, 0x80, 0x8f, 0x80, 0x8f, 0x43, 0xaf, 0x80, 0x00, 0x43,
    0x00, 0x43, 0x8f, 0x80, 0x00, 0x00, 0xc3, 0x43, 0x00, 0x43, 0xce, 0x4e, 0x00, 0x00, 0x00, 0x00,
    0x8f, 0x4e, 0x00, 0x00, 0xff, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff, 0xff,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xf0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00,
];

/// Config bytes [92..128): X.509 format words and the per-slot KeyConfig
/// policy.
const CONFIG_KEY_POLICY: [u8; 36] = [
    0x00, 0x00, 0x00, 0x00, 0x3c, 0x00, 0x5c, 0x00, 0xbc, 0x01, 0xfc, 0x01, 0xbc, 0x01, 0x9c, 0x01,
    0x9c, 0x01, 0xbc, 0x01, 0x3c, 0x00, 0xdc, 0x03, 0x9c, 0x01, 0xdc, 0x01, 0x3c, 0x00, 0x3c, 0x00,
    0xdc, 0x01, 0x3c, 0x00,
];

/// Config lock byte offsets: 0x55 means still unlocked.
const LOCK_VALUE_OFFSET: usize = 86;
const LOCK_CONFIG_OFFSET: usize = 87;
const ZONE_UNLOCKED: u8 = 0x55;

/// Lock param1: zone selector plus "skip CRC" bit.
const LOCK_ZONE_CONFIG: u8 = 0x00;
const LOCK_ZONE_DATA: u8 = 0x01;
const LOCK_NO_CRC: u8 = 0x80;

/// Secrets burned in at the factory. Constructing one of these is the
/// explicit acknowledgement that the chip will be irreversibly changed.
#[derive(ZeroizeOnDrop)]
pub struct Personalization {
    pairing_secret: [u8; 32],
}

impl Personalization {
    pub fn new(pairing_secret: [u8; 32]) -> Self {
        Self { pairing_secret }
    }
}

impl<T: Transport> SeHandle<T> {
    /// One-time config and lockdown of the chip.
    ///
    /// Steps, each skipped if the corresponding zone is already locked:
    /// write the config policy and lock the config zone against its CRC,
    /// then write the pairing secret, zero the firmware slot, and lock
    /// the data zone. Never call unless you just picked the original
    /// pairing secret.
    pub fn setup_config(&mut self, p: &Personalization) -> Result<(), Error> {
        let config = self.read_config()?;

        if config[LOCK_CONFIG_OFFSET] == ZONE_UNLOCKED {
            warn!("personalizing: writing and locking config zone");

            self.write_config_region(16, &CONFIG_SLOT_POLICY)?;
            self.write_config_region(92, &CONFIG_KEY_POLICY)?;

            // lock against the CRC of the image the chip actually holds
            let image = self.read_config()?;
            self.execute(Opcode::Lock, LOCK_ZONE_CONFIG, crc16(&image), &[])?;
        } else {
            info!("config zone already locked, leaving it");
        }

        if config[LOCK_VALUE_OFFSET] == ZONE_UNLOCKED {
            warn!("personalizing: writing secrets and locking data zone");

            let pairing = SlotHandle::new(keynum::PAIRING, 32, false)?;
            self.write_slot(&pairing, &p.pairing_secret)?;

            let firmware = SlotHandle::new(keynum::FIRMWARE, 32, false)?;
            self.write_slot(&firmware, &[0u8; 32])?;

            self.execute(Opcode::Lock, LOCK_ZONE_DATA | LOCK_NO_CRC, 0, &[])?;
        } else {
            info!("data zone already locked, leaving it");
        }

        Ok(())
    }

    fn read_config(&mut self) -> Result<[u8; CONFIG_LEN], Error> {
        let mut config = [0u8; CONFIG_LEN];
        for block in 0..4u8 {
            let b = self.read_config_block(block)?;
            config[usize::from(block) * 32..][..32].copy_from_slice(&b);
        }
        Ok(config)
    }

    /// Write a 4-byte-aligned config region word by word.
    fn write_config_region(&mut self, offset: usize, data: &[u8]) -> Result<(), Error> {
        debug_assert!(offset % 4 == 0 && data.len() % 4 == 0);

        for (i, word) in data.chunks_exact(4).enumerate() {
            let byte_offset = offset + i * 4;
            let addr = (((byte_offset / 32) as u16) << 3) | (((byte_offset % 32) / 4) as u16);
            self.execute(Opcode::Write, ZONE_CONFIG, addr, word)?;
        }
        Ok(())
    }
}
