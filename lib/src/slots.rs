// Copyright (c) 2023-2024 The SE-Link Developers

//! Plain and encrypted key-slot access.
//!
//! Encrypted access never puts the slot contents or the read/write key on
//! the bus: the chip XORs the data with its GenDig-derived TempKey, and
//! the host reconstructs the same session key locally. A derivation
//! mismatch does not error; it yields garbage plaintext on read or a
//! chip-side MAC rejection on write. Callers of encrypted reads must
//! validate the decrypted data by its own structure or MAC.

use log::debug;
use zeroize::Zeroizing;

use se_link_proto::{Opcode, NUM_SLOTS, ZONE_BLOCK, ZONE_DATA};

use crate::{digest, handle::arr32, Error, SeHandle, Transport};

/// The two read sizes the chip supports for data slots.
const SLOT_SIZES: [usize; 2] = [4, 32];

/// Lock command param1 for a single data slot.
fn lock_slot_mode(slot: u8) -> u8 {
    // bit7: skip CRC check, bits 2..6: slot, low bits: slot-lock selector
    0x80 | (slot << 2) | 0x02
}

/// Data zone address of a slot's first block.
fn slot_addr(slot: u8) -> u16 {
    (slot as u16) << 3
}

/// Host-side model of one key/data slot.
///
/// `locked` is monotonic for this process's model of the chip: once set it
/// is never cleared locally. The chip's actual lock bits, read via
/// [`SeHandle::probe_slot_locked`], win if they ever disagree.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SlotHandle {
    slot: u8,
    size: usize,
    encrypted: bool,
    locked: bool,
}

impl SlotHandle {
    /// Build a handle, rejecting unsupported slot numbers and sizes
    /// before any bus activity can occur.
    pub fn new(slot: u8, size: usize, encrypted: bool) -> Result<Self, Error> {
        if slot >= NUM_SLOTS {
            return Err(Error::InvalidSlot(slot));
        }
        if !SLOT_SIZES.contains(&size) {
            return Err(Error::InvalidLength(size));
        }
        Ok(Self {
            slot,
            size,
            encrypted,
            locked: false,
        })
    }

    pub fn slot(&self) -> u8 {
        self.slot
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn encrypted(&self) -> bool {
        self.encrypted
    }

    pub fn locked(&self) -> bool {
        self.locked
    }
}

impl<T: Transport> SeHandle<T> {
    /// Read the first 4 or 32 bytes of a plain slot.
    pub fn read_slot(&mut self, handle: &SlotHandle) -> Result<Vec<u8>, Error> {
        if handle.encrypted {
            return Err(Error::SessionNotReady("slot requires encrypted read"));
        }

        let zone = if handle.size == 32 {
            ZONE_DATA | ZONE_BLOCK
        } else {
            ZONE_DATA
        };
        let out = self.execute(Opcode::Read, zone, slot_addr(handle.slot), &[])?;
        if out.len() != handle.size {
            return Err(Error::UnexpectedResponse(out.len()));
        }
        Ok(out)
    }

    /// Write a slot. Always 32 bytes on the wire regardless of the slot's
    /// configured size; short data is zero-padded per chip convention.
    pub fn write_slot(&mut self, handle: &SlotHandle, data: &[u8]) -> Result<(), Error> {
        if handle.locked {
            return Err(Error::SlotLocked(handle.slot));
        }
        if data.is_empty() || data.len() > 32 {
            return Err(Error::InvalidLength(data.len()));
        }

        let mut padded = [0u8; 32];
        padded[..data.len()].copy_from_slice(data);

        self.execute(
            Opcode::Write,
            ZONE_DATA | ZONE_BLOCK,
            slot_addr(handle.slot),
            &padded,
        )?;
        Ok(())
    }

    /// Write a slot and optionally lock it immediately after.
    ///
    /// Locking is one-way: the handle's flag flips permanently and all
    /// further plain writes through it fail locally.
    pub fn write_and_lock(
        &mut self,
        handle: &mut SlotHandle,
        data: &[u8],
        lock: bool,
    ) -> Result<(), Error> {
        self.write_slot(handle, data)?;

        if lock {
            debug!("locking slot {}", handle.slot);
            self.execute(Opcode::Lock, lock_slot_mode(handle.slot), 0, &[])?;
            handle.locked = true;
        }
        Ok(())
    }

    /// Ask the chip whether a slot is individually locked. Trust this
    /// over any cached handle flag when they disagree.
    pub fn probe_slot_locked(&mut self, slot: u8) -> Result<bool, Error> {
        if slot >= NUM_SLOTS {
            return Err(Error::InvalidSlot(slot));
        }
        // SlotLocked bitfield, config bytes 88..90: bit set = still unlocked
        let word = self.read_config_word(88)?;
        let bits = u16::from_le_bytes([word[0], word[1]]);
        Ok(bits & (1 << slot) == 0)
    }

    /// Read 32 bytes from an encrypted slot.
    ///
    /// Runs the full dance: fresh host nonce, GenDig over the read key,
    /// then a Read the chip answers with ciphertext XORed against
    /// TempKey. The session key never outlives this call.
    pub fn encrypted_read(
        &mut self,
        handle: &SlotHandle,
        read_kn: u8,
        read_key: &[u8; 32],
    ) -> Result<Vec<u8>, Error> {
        if handle.size != 32 {
            return Err(Error::InvalidLength(handle.size));
        }

        self.pick_nonce()?;
        self.gen_dig(read_kn, read_key)?;
        let session_key = self.session().session_key(read_kn)?;

        let resp = self.execute(
            Opcode::Read,
            ZONE_DATA | ZONE_BLOCK,
            slot_addr(handle.slot),
            &[],
        )?;
        // the chip consumed TempKey to encrypt the output
        self.session_mut().invalidate();

        let cipher = arr32(resp)?;
        let mut plain = vec![0u8; 32];
        for (i, b) in plain.iter_mut().enumerate() {
            *b = cipher[i] ^ session_key[i];
        }
        Ok(plain)
    }

    /// Write 32 bytes to an encrypted slot, authorizing the write with an
    /// input MAC over the session key.
    pub fn encrypted_write(
        &mut self,
        handle: &SlotHandle,
        write_kn: u8,
        write_key: &[u8; 32],
        data: &[u8; 32],
    ) -> Result<(), Error> {
        if handle.locked {
            return Err(Error::SlotLocked(handle.slot));
        }

        self.pick_nonce()?;
        self.gen_dig(write_kn, write_key)?;
        let session_key: Zeroizing<[u8; 32]> = self.session().session_key(write_kn)?;

        let zone = ZONE_DATA | ZONE_BLOCK;
        let addr = slot_addr(handle.slot);
        let mac = digest::write_mac(&session_key, zone, addr, data);

        let mut body = [0u8; 64];
        for i in 0..32 {
            body[i] = data[i] ^ session_key[i];
        }
        body[32..].copy_from_slice(&mac);

        self.execute(Opcode::Write, zone, addr, &body)?;
        // the chip consumed TempKey to decrypt the input
        self.session_mut().invalidate();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_rejects_bad_inputs() {
        assert!(matches!(
            SlotHandle::new(16, 32, false),
            Err(Error::InvalidSlot(16))
        ));
        assert!(matches!(
            SlotHandle::new(0, 16, false),
            Err(Error::InvalidLength(16))
        ));
        assert!(SlotHandle::new(15, 4, false).is_ok());
    }

    #[test]
    fn slot_addressing() {
        assert_eq!(slot_addr(0), 0);
        assert_eq!(slot_addr(9), 9 << 3);
    }

    #[test]
    fn lock_mode_encodes_slot() {
        assert_eq!(lock_slot_mode(0), 0x82);
        assert_eq!(lock_slot_mode(15), 0x80 | (15 << 2) | 0x02);
    }
}
