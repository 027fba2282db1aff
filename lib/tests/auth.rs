// Copyright (c) 2023-2024 The SE-Link Developers

//! Authentication dances end to end: pairing, IP unlock, MAC / HMAC
//! generation, key destruction and authenticated counters.

use anyhow::Result;
use sha2::{Digest, Sha256};

use se_link::{digest, proto::{SERIAL_PREFIX, SERIAL_TAIL}, Error};

mod helpers;
use helpers::{setup, setup_with_secret, PROTECT_KEY, PROTECT_KEY_SLOT, SERIAL};

fn full_serial() -> [u8; 9] {
    let mut sn = [0u8; 9];
    sn[..2].copy_from_slice(&SERIAL_PREFIX);
    sn[2..8].copy_from_slice(&SERIAL);
    sn[8] = SERIAL_TAIL;
    sn
}

#[test]
fn pair_unlock_with_correct_secret() -> Result<()> {
    let mut se = setup();
    se.pair_unlock()?;
    Ok(())
}

#[test]
fn pair_unlock_with_wrong_secret_is_auth_failure() {
    let mut se = setup_with_secret([0xBA; 32]);
    assert!(matches!(se.pair_unlock(), Err(Error::AuthFailed)));
}

#[test]
fn unlock_ip_reports_match_and_mismatch() -> Result<()> {
    let mut se = setup();

    assert!(se.unlock_ip(PROTECT_KEY_SLOT, &PROTECT_KEY)?);
    assert!(!se.unlock_ip(PROTECT_KEY_SLOT, &[0x00; 32])?);
    Ok(())
}

#[test]
fn make_mac_matches_local_construction() -> Result<()> {
    let mut se = setup();
    let challenge = [0xC4; 32];

    let mac = se.make_mac(PROTECT_KEY_SLOT, &challenge)?;

    // mode 0x45: input nonce, TempKey second half, full serial included
    let expected = digest::mac_response(
        &PROTECT_KEY,
        &challenge,
        0x45,
        PROTECT_KEY_SLOT,
        &full_serial(),
    );
    assert_eq!(mac, expected);
    Ok(())
}

#[test]
fn hmac_is_deterministic_and_message_bound() -> Result<()> {
    let mut se = setup();

    let a = se.hmac32(PROTECT_KEY_SLOT, &[0x01; 32])?;
    let b = se.hmac32(PROTECT_KEY_SLOT, &[0x01; 32])?;
    let c = se.hmac32(PROTECT_KEY_SLOT, &[0x02; 32])?;
    assert_eq!(a, b);
    assert_ne!(a, c);
    Ok(())
}

#[test]
fn hmac_prehashes_long_messages() -> Result<()> {
    let mut se = setup();
    let msg = b"a message well past the 32 byte nonce register".as_slice();

    let long = se.hmac(PROTECT_KEY_SLOT, msg)?;
    let prehash: [u8; 32] = Sha256::digest(msg).into();
    let short = se.hmac32(PROTECT_KEY_SLOT, &prehash)?;
    assert_eq!(long, short);
    Ok(())
}

#[test]
fn destroy_key_changes_the_slot_irreversibly() -> Result<()> {
    let mut se = setup();

    let before = se.hmac32(PROTECT_KEY_SLOT, &[0x55; 32])?;
    se.destroy_key(PROTECT_KEY_SLOT)?;
    let after = se.hmac32(PROTECT_KEY_SLOT, &[0x55; 32])?;
    assert_ne!(before, after);

    // destroying again moves it somewhere else again
    se.destroy_key(PROTECT_KEY_SLOT)?;
    let again = se.hmac32(PROTECT_KEY_SLOT, &[0x55; 32])?;
    assert_ne!(after, again);
    Ok(())
}

#[test]
fn counter_increments_are_strictly_increasing() -> Result<()> {
    let mut se = setup();

    let mut prev = se.get_counter(0, false)?;
    for _ in 0..4 {
        let v = se.get_counter(0, true)?;
        assert!(v > prev);
        prev = v;
    }
    // plain read does not advance
    assert_eq!(se.get_counter(0, false)?, prev);
    Ok(())
}

#[test]
fn verified_counter_read_agrees_with_plain_read() -> Result<()> {
    let mut se = setup();

    se.get_counter(1, true)?;
    se.get_counter(1, true)?;

    let plain = se.get_counter(1, false)?;
    let verified = se.read_counter_verified(1)?;
    assert_eq!(plain, verified);
    Ok(())
}

#[test]
fn add_counter_lands_on_the_expected_value() -> Result<()> {
    let mut se = setup();

    let start = se.get_counter(0, false)?;
    let end = se.add_counter(0, 3)?;
    assert_eq!(end, start + 3);
    Ok(())
}

#[test]
fn firmware_gpio_unlock() -> Result<()> {
    let mut se = setup();

    // personalization zeroed the firmware slot
    se.set_gpio_secure(&[0u8; 32])?;
    assert!(se.get_gpio()?);

    assert!(matches!(
        se.set_gpio_secure(&[0xAB; 32]),
        Err(Error::AuthFailed)
    ));
    Ok(())
}
