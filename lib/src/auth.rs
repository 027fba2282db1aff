// Copyright (c) 2023-2024 The SE-Link Developers

//! Authentication dances over the TempKey register.
//!
//! Every operation here is a fixed sequence of chip-side state
//! transitions; a misordering does not crash, it silently produces wrong
//! digests. The TempKey mirror in [`Session`](crate::Session) is updated
//! on every successful step and torn down on every failure so the next
//! caller cannot build on state the host cannot account for.

use constant_time_eq::constant_time_eq_32;
use log::debug;
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use se_link_proto::{
    Opcode, Status, NONCE_MODE_PASSTHROUGH, NONCE_MODE_RANDOM, NUM_COUNTERS, NUM_SLOTS,
    ZONE_COUNTER, ZONE_DATA,
};

use crate::{
    digest,
    handle::arr32,
    keynum,
    session::NonceSource,
    Error, SeHandle, Transport,
};

/// CheckMac mode: second 32 bytes of the compared message come from
/// TempKey, key from the addressed slot.
const CHECKMAC_MODE: u8 = 0x01;

/// MAC mode: full serial included, TempKey as second message half,
/// TempKey sourced from a random nonce.
const MAC_MODE_RANDOM: u8 = 0x41;

/// MAC mode as above but TempKey was loaded pass-through.
const MAC_MODE_INPUT: u8 = 0x45;

/// HMAC mode: full serial included, TempKey loaded pass-through.
const HMAC_MODE: u8 = 0x44;

/// DeriveKey mode: target key rolled from TempKey (random source).
const DERIVE_MODE: u8 = 0x00;

/// CheckMac challenge bytes. Content is ignored in TempKey mode but must
/// be present; nice and visible on a bus trace.
const CHECKMAC_CHALLENGE: &[u8; 32] = b"SE-LINK PAIRING CHALLENGE BYTES!";

impl<T: Transport> SeHandle<T> {
    /// Load TempKey with a nonce value that both sides know, and both
    /// sides know is random: the chip contributes its RNG output, the
    /// host contributes 20 fresh bytes, and each derives the same SHA-256
    /// locally.
    pub fn pick_nonce(&mut self) -> Result<(), Error> {
        let mut num_in = [0u8; 20];
        OsRng.fill_bytes(&mut num_in);

        let resp = self.execute(Opcode::Nonce, NONCE_MODE_RANDOM, 0, &num_in)?;
        let rand_out = arr32(resp)?;

        let tempkey = Zeroizing::new(digest::nonce_tempkey(&rand_out, &num_in, NONCE_MODE_RANDOM));
        self.session_mut().load_nonce(tempkey, NonceSource::Random);
        Ok(())
    }

    /// Load TempKey with exactly `value` (pass-through mode).
    pub fn load_nonce(&mut self, value: &[u8; 32]) -> Result<(), Error> {
        self.execute(Opcode::Nonce, NONCE_MODE_PASSTHROUGH, 0, value)?;
        self.session_mut()
            .load_nonce(Zeroizing::new(*value), NonceSource::Input);
        Ok(())
    }

    /// GenDig over a data slot: TempKey becomes a digest binding the slot
    /// contents, which the host mirrors from its own knowledge of `key`.
    ///
    /// Requires a fresh nonce; fails fast with `SessionNotReady` before
    /// spending a chip command otherwise.
    pub fn gen_dig(&mut self, key_id: u8, key: &[u8; 32]) -> Result<(), Error> {
        if key_id >= NUM_SLOTS {
            return Err(Error::InvalidSlot(key_id));
        }
        let tk = self.session().nonce_value()?;
        let derived = Zeroizing::new(digest::gendig_slot(key, ZONE_DATA, key_id, &tk));

        self.execute(Opcode::GenDig, ZONE_DATA, key_id as u16, &[])?;
        self.session_mut().apply_gen_dig(key_id, derived);
        Ok(())
    }

    /// One CheckMac round against a key slot: prove knowledge of `secret`
    /// without putting it on the bus.
    ///
    /// Consumes TempKey on both sides, success or failure. Never retried:
    /// a rejection may be an active attack, not noise.
    pub fn check_mac(&mut self, keynum: u8, secret: &[u8; 32]) -> Result<(), Error> {
        if keynum >= NUM_SLOTS {
            return Err(Error::InvalidSlot(keynum));
        }

        self.pick_nonce()?;
        let tk = self.session_mut().consume()?;

        let mut od = [0u8; 13];
        OsRng.fill_bytes(&mut od);
        let response = digest::checkmac_response(secret, &tk, &od);

        let mut body = [0u8; 77];
        body[..32].copy_from_slice(CHECKMAC_CHALLENGE);
        body[32..64].copy_from_slice(&response);
        body[64..].copy_from_slice(&od);

        match self.execute(Opcode::CheckMac, CHECKMAC_MODE, keynum as u16, &body) {
            Ok(_) => Ok(()),
            Err(Error::Chip(Status::CheckMacFail)) => Err(Error::AuthFailed),
            Err(e) => Err(e),
        }
    }

    /// Use the pairing secret to validate ourselves to the chip. The host
    /// is considered paired for this power cycle only on chip-confirmed
    /// success.
    pub fn pair_unlock(&mut self) -> Result<(), Error> {
        let secret = self.pairing_secret();
        debug!("pair unlock");
        self.check_mac(keynum::PAIRING, &secret)
    }

    /// The unlock dance for IP-protected keys: nonce, GenDig over the key
    /// slot, then CheckMac over the derived digest. Returns whether the
    /// dance produced a usable authorization, not merely whether bytes
    /// were exchanged.
    pub fn unlock_ip(&mut self, keynum: u8, secret: &[u8; 32]) -> Result<bool, Error> {
        if keynum >= NUM_SLOTS {
            return Err(Error::InvalidSlot(keynum));
        }

        self.pick_nonce()?;
        self.gen_dig(keynum, secret)?;
        let tk = self.session_mut().consume()?;

        let mut od = [0u8; 13];
        OsRng.fill_bytes(&mut od);
        let response = digest::checkmac_response(secret, &tk, &od);

        let mut body = [0u8; 77];
        body[..32].copy_from_slice(CHECKMAC_CHALLENGE);
        body[32..64].copy_from_slice(&response);
        body[64..].copy_from_slice(&od);

        match self.execute(Opcode::CheckMac, CHECKMAC_MODE, keynum as u16, &body) {
            Ok(_) => Ok(true),
            Err(Error::Chip(Status::CheckMacFail)) => {
                debug!("unlock_ip: chip rejected digest for key {keynum}");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Check the chip produces a MAC over TempKey and the pairing secret
    /// the same way we would: both sides know the secret and agree on the
    /// chip state. Consumes TempKey.
    pub(crate) fn verify_tempkey(&mut self) -> Result<bool, Error> {
        let serial = self.serial_full()?;
        let tk = self.session_mut().consume()?;

        let resp = self.execute(Opcode::Mac, MAC_MODE_RANDOM, keynum::PAIRING as u16, &[])?;
        let mac = arr32(resp)?;

        let secret = self.pairing_secret();
        let expected = digest::mac_response(&secret, &tk, MAC_MODE_RANDOM, keynum::PAIRING, &serial);

        Ok(constant_time_eq_32(&mac, &expected))
    }

    /// Generate a MAC for the indicated key over a caller challenge.
    /// Serial-number dependent. Consumes TempKey.
    pub fn make_mac(&mut self, keynum: u8, challenge: &[u8; 32]) -> Result<[u8; 32], Error> {
        if keynum >= NUM_SLOTS {
            return Err(Error::InvalidSlot(keynum));
        }

        self.load_nonce(challenge)?;
        self.session_mut().consume()?;

        let resp = self.execute(Opcode::Mac, MAC_MODE_INPUT, keynum as u16, &[])?;
        arr32(resp)
    }

    /// HMAC on the chip over a 32-byte message, keyed by a slot the host
    /// may not know. Consumes TempKey.
    pub fn hmac32(&mut self, keynum: u8, msg: &[u8; 32]) -> Result<[u8; 32], Error> {
        if keynum >= NUM_SLOTS {
            return Err(Error::InvalidSlot(keynum));
        }

        self.load_nonce(msg)?;
        self.session_mut().consume()?;

        let resp = self.execute(Opcode::Hmac, HMAC_MODE, keynum as u16, &[])?;
        arr32(resp)
    }

    /// HMAC on the chip over an arbitrary-length message, pre-hashed
    /// host-side to the 32 bytes the nonce register holds.
    pub fn hmac(&mut self, keynum: u8, msg: &[u8]) -> Result<[u8; 32], Error> {
        let prehash: [u8; 32] = Sha256::digest(msg).into();
        self.hmac32(keynum, &prehash)
    }

    /// Roll (derive) a key slot using a random number we immediately
    /// forget. One way: the old value is unrecoverable afterwards.
    ///
    /// Never retried automatically beyond the after-wake case, where the
    /// chip provably did not execute the command; a genuine re-issue
    /// would derive a different key.
    pub fn destroy_key(&mut self, keynum: u8) -> Result<(), Error> {
        if keynum >= NUM_SLOTS {
            return Err(Error::InvalidSlot(keynum));
        }

        self.pick_nonce()?;
        self.session_mut().consume()?;

        debug!("destroy key {keynum}");
        self.execute(Opcode::DeriveKey, DERIVE_MODE, keynum as u16, &[])?;
        Ok(())
    }

    /// Read a one-way counter and authenticate the value against an
    /// active man-in-the-middle: GenDig over the counter, then check the
    /// chip MACs the same TempKey we derived from the value we saw.
    pub fn read_counter_verified(&mut self, counter: u8) -> Result<u32, Error> {
        if counter >= NUM_COUNTERS {
            return Err(Error::InvalidSlot(counter));
        }

        let value = self.get_counter(counter, false)?;

        self.pick_nonce()?;
        let tk = self.session().nonce_value()?;
        let derived = Zeroizing::new(digest::gendig_counter(counter, value, &tk));

        self.execute(Opcode::GenDig, ZONE_COUNTER, counter as u16, &[])?;
        self.session_mut().apply_gen_dig(counter, derived);

        if self.verify_tempkey()? {
            Ok(value)
        } else {
            Err(Error::AuthFailed)
        }
    }

    /// Add to a one-way counter in single-unit steps, then return the
    /// authenticated final value.
    pub fn add_counter(&mut self, counter: u8, incr: u32) -> Result<u32, Error> {
        for _ in 0..incr {
            self.get_counter(counter, true)?;
        }
        self.read_counter_verified(counter)
    }

    /// Set the GPIO after proving knowledge of a digest authorized for
    /// the firmware key slot.
    pub fn set_gpio_secure(&mut self, digest: &[u8; 32]) -> Result<(), Error> {
        self.check_mac(keynum::FIRMWARE, digest)?;
        self.set_gpio(true)
    }
}
