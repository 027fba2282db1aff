// Copyright (c) 2023-2024 The SE-Link Developers

//! Host-side mirrors of the chip's internal SHA-256 message
//! constructions.
//!
//! The chip never reveals TempKey or its derived digests; instead the
//! host reproduces the exact message the chip hashes and re-derives the
//! same value locally. Field order and the fixed framing bytes below are
//! lifted from the datasheet message tables and must match bit-for-bit.
//! A mismatch does not fail loudly, it silently produces wrong session
//! keys.

use sha2::{Digest, Sha256};

use se_link_proto::{Opcode, SERIAL_PREFIX, SERIAL_TAIL};

fn finish(h: Sha256) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(h.finalize().as_slice());
    out
}

/// TempKey value after a Nonce command.
///
/// `SHA-256(rand_out || num_in || opcode || mode || 0x00)`
pub fn nonce_tempkey(rand_out: &[u8; 32], num_in: &[u8; 20], mode: u8) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(rand_out);
    h.update(num_in);
    h.update([Opcode::Nonce as u8, mode, 0x00]);
    finish(h)
}

/// TempKey value after GenDig over a data slot.
///
/// `SHA-256(key || opcode || zone || key_id || SN[8] || SN[0..2] || zeros[25] || tempkey)`
pub fn gendig_slot(key: &[u8; 32], zone: u8, key_id: u8, tempkey: &[u8; 32]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(key);
    h.update([
        Opcode::GenDig as u8,
        zone,
        key_id,
        0x00,
        SERIAL_TAIL,
        SERIAL_PREFIX[0],
        SERIAL_PREFIX[1],
    ]);
    h.update([0u8; 25]);
    h.update(tempkey);
    finish(h)
}

/// TempKey value after GenDig over a monotonic counter.
///
/// The "key" for the counter zone is fixed all-zeros; the counter value
/// itself is mixed in little-endian. Tracking the expected value lets the
/// host authenticate counter reads against an active MITM.
pub fn gendig_counter(counter: u8, value: u32, tempkey: &[u8; 32]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update([0u8; 32]);
    h.update([
        Opcode::GenDig as u8,
        se_link_proto::ZONE_COUNTER,
        counter,
        0x00,
        SERIAL_TAIL,
        SERIAL_PREFIX[0],
        SERIAL_PREFIX[1],
        0x00,
    ]);
    h.update(value.to_le_bytes());
    h.update([0u8; 20]);
    h.update(tempkey);
    finish(h)
}

/// Client response for a CheckMac command.
///
/// `SHA-256(secret || tempkey || od[0..4] || zeros[8] || od[4..7] || SN[8]
///  || od[7..11] || SN[0..2] || od[11..13])`
pub fn checkmac_response(secret: &[u8; 32], tempkey: &[u8; 32], od: &[u8; 13]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(secret);
    h.update(tempkey);
    h.update(&od[0..4]);
    h.update([0u8; 8]);
    h.update(&od[4..7]);
    h.update([SERIAL_TAIL]);
    h.update(&od[7..11]);
    h.update(SERIAL_PREFIX);
    h.update(&od[11..13]);
    finish(h)
}

/// Expected output of a MAC command with the full serial number included
/// (mode bit 6 set) and TempKey as the second message half (mode bit 0).
pub fn mac_response(
    key: &[u8; 32],
    tempkey: &[u8; 32],
    mode: u8,
    key_id: u8,
    serial: &[u8; 9],
) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(key);
    h.update(tempkey);
    h.update([Opcode::Mac as u8, mode, key_id, 0x00]);
    h.update([0u8; 8]); // OTP[0..8], not included
    h.update([0u8; 3]); // OTP[8..11], not included
    h.update([serial[8]]);
    h.update(&serial[4..8]);
    h.update(&serial[0..4]);
    finish(h)
}

/// Input MAC authorizing an encrypted Write.
///
/// `SHA-256(session_key || opcode || zone || address || SN[8] || SN[0..2]
///  || zeros[25] || plaintext)`
pub fn write_mac(session_key: &[u8; 32], zone: u8, address: u16, plaintext: &[u8; 32]) -> [u8; 32] {
    let addr = address.to_le_bytes();
    let mut h = Sha256::new();
    h.update(session_key);
    h.update([
        Opcode::Write as u8,
        zone,
        addr[0],
        addr[1],
        SERIAL_TAIL,
        SERIAL_PREFIX[0],
        SERIAL_PREFIX[1],
    ]);
    h.update([0u8; 25]);
    h.update(plaintext);
    finish(h)
}
