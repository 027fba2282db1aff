// Copyright (c) 2023-2024 The SE-Link Developers

//! Bit layout of the Info(p1=2) state word.
//!
//! These positions are a wire contract; the session mirror cross-checks
//! itself against them when debugging chip-state disagreements.

/// 16-bit state word returned by Info(p1=2).
///
/// High byte describes TempKey, low byte the general device status.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct InfoWord(pub u16);

impl InfoWord {
    /// Key id TempKey was last loaded from (bits 8-11).
    pub fn tempkey_key_id(&self) -> u8 {
        ((self.0 >> 8) & 0x0F) as u8
    }

    /// TempKey source flag (bit 12): false = random, true = input.
    pub fn tempkey_source_input(&self) -> bool {
        (self.0 >> 12) & 1 != 0
    }

    /// TempKey was produced by GenDig (bit 13).
    pub fn tempkey_gen_dig(&self) -> bool {
        (self.0 >> 13) & 1 != 0
    }

    /// TempKey was produced by GenKey (bit 14).
    pub fn tempkey_gen_key(&self) -> bool {
        (self.0 >> 14) & 1 != 0
    }

    /// NoMac flag (bit 15).
    pub fn tempkey_no_mac(&self) -> bool {
        (self.0 >> 15) & 1 != 0
    }

    /// EEPROM RNG health (bit 0).
    pub fn eeprom_rng(&self) -> bool {
        self.0 & 1 != 0
    }

    /// SRAM RNG health (bit 1).
    pub fn sram_rng(&self) -> bool {
        (self.0 >> 1) & 1 != 0
    }

    /// An authorization is currently valid (bit 2).
    pub fn auth_valid(&self) -> bool {
        (self.0 >> 2) & 1 != 0
    }

    /// Key id of the valid authorization (bits 3-6).
    pub fn auth_key(&self) -> u8 {
        ((self.0 >> 3) & 0x0F) as u8
    }

    /// TempKey register holds a valid value (bit 7).
    pub fn tempkey_valid(&self) -> bool {
        (self.0 >> 7) & 1 != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tempkey_bits() {
        // key id 0xA, source input, GenDig applied
        let w = InfoWord((0xA << 8) | (1 << 12) | (1 << 13));
        assert_eq!(w.tempkey_key_id(), 0x0A);
        assert!(w.tempkey_source_input());
        assert!(w.tempkey_gen_dig());
        assert!(!w.tempkey_gen_key());
        assert!(!w.tempkey_no_mac());
    }

    #[test]
    fn status_bits() {
        let w = InfoWord((1 << 7) | (1 << 2) | (0x5 << 3) | 0b11);
        assert!(w.tempkey_valid());
        assert!(w.auth_valid());
        assert_eq!(w.auth_key(), 0x05);
        assert!(w.eeprom_rng());
        assert!(w.sram_rng());
    }
}
