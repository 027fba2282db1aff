// Copyright (c) 2023-2024 The SE-Link Developers

//! Slot access: plain reads and writes, per-slot locking and the
//! encrypted read / write dances.

use anyhow::Result;
use rand::Rng;

use se_link::{Error, SlotHandle};

mod helpers;
use helpers::{setup, ENCRYPTED_SLOT, PLAIN_SLOT, PROTECT_KEY, PROTECT_KEY_SLOT};

#[test]
fn plain_write_then_read() -> Result<()> {
    let mut se = setup();
    let slot = SlotHandle::new(PLAIN_SLOT, 32, false)?;

    let data = [0xD7; 32];
    se.write_slot(&slot, &data)?;
    assert_eq!(se.read_slot(&slot)?, data);
    Ok(())
}

#[test]
fn short_writes_are_zero_padded() -> Result<()> {
    let mut se = setup();
    let slot = SlotHandle::new(PLAIN_SLOT, 32, false)?;

    se.write_slot(&slot, &[0xAA, 0xBB])?;
    let back = se.read_slot(&slot)?;
    assert_eq!(&back[..2], &[0xAA, 0xBB]);
    assert!(back[2..].iter().all(|b| *b == 0));
    Ok(())
}

#[test]
fn four_byte_reads_see_the_slot_head() -> Result<()> {
    let mut se = setup();
    let full = SlotHandle::new(PLAIN_SLOT, 32, false)?;
    let head = SlotHandle::new(PLAIN_SLOT, 4, false)?;

    let mut data = [0u8; 32];
    for (i, b) in data.iter_mut().enumerate() {
        *b = i as u8;
    }
    se.write_slot(&full, &data)?;
    assert_eq!(se.read_slot(&head)?, &data[..4]);
    Ok(())
}

#[test]
fn handle_validation_needs_no_bus() {
    assert!(matches!(
        SlotHandle::new(16, 32, false),
        Err(Error::InvalidSlot(16))
    ));
    assert!(matches!(
        SlotHandle::new(0, 7, false),
        Err(Error::InvalidLength(7))
    ));
}

#[test]
fn locking_a_slot_is_enforced_on_both_sides() -> Result<()> {
    let mut se = setup();
    let mut slot = SlotHandle::new(PLAIN_SLOT, 32, false)?;

    se.write_and_lock(&mut slot, &[0x99; 32], true)?;
    assert!(slot.locked());
    assert!(se.probe_slot_locked(PLAIN_SLOT)?);

    // local model refuses straight away
    assert!(matches!(
        se.write_slot(&slot, &[0x11; 32]),
        Err(Error::SlotLocked(_))
    ));

    // a fresh handle that never saw the lock is refused by the chip
    let fresh = SlotHandle::new(PLAIN_SLOT, 32, false)?;
    assert!(matches!(
        se.write_slot(&fresh, &[0x11; 32]),
        Err(Error::Chip(_))
    ));
    assert_eq!(se.read_slot(&fresh)?, [0x99; 32]);
    Ok(())
}

#[test]
fn unlocked_slots_probe_unlocked() -> Result<()> {
    let mut se = setup();
    assert!(!se.probe_slot_locked(PLAIN_SLOT)?);
    Ok(())
}

#[test]
fn encrypted_round_trip() -> Result<()> {
    let mut se = setup();
    let slot = SlotHandle::new(ENCRYPTED_SLOT, 32, true)?;

    let random: [u8; 32] = rand::thread_rng().gen();
    for data in [[0u8; 32], [0xFF; 32], random] {
        se.encrypted_write(&slot, PROTECT_KEY_SLOT, &PROTECT_KEY, &data)?;
        let back = se.encrypted_read(&slot, PROTECT_KEY_SLOT, &PROTECT_KEY)?;
        assert_eq!(back, data);
    }
    Ok(())
}

#[test]
fn encrypted_write_with_wrong_key_is_rejected_by_the_chip() -> Result<()> {
    let mut se = setup();
    let slot = SlotHandle::new(ENCRYPTED_SLOT, 32, true)?;

    se.encrypted_write(&slot, PROTECT_KEY_SLOT, &PROTECT_KEY, &[0x2A; 32])?;

    assert!(matches!(
        se.encrypted_write(&slot, PROTECT_KEY_SLOT, &[0xEE; 32], &[0x2B; 32]),
        Err(Error::Chip(_))
    ));
    // contents untouched
    let back = se.encrypted_read(&slot, PROTECT_KEY_SLOT, &PROTECT_KEY)?;
    assert_eq!(back, [0x2A; 32]);
    Ok(())
}

#[test]
fn encrypted_read_with_wrong_key_yields_garbage() -> Result<()> {
    let mut se = setup();
    let slot = SlotHandle::new(ENCRYPTED_SLOT, 32, true)?;

    let data = [0x6C; 32];
    se.encrypted_write(&slot, PROTECT_KEY_SLOT, &PROTECT_KEY, &data)?;

    // the dance completes, but the derived session key disagrees
    let back = se.encrypted_read(&slot, PROTECT_KEY_SLOT, &[0xEE; 32])?;
    assert_ne!(back, data);
    Ok(())
}

#[test]
fn plain_writes_to_protected_slots_are_refused() -> Result<()> {
    let mut se = setup();
    let slot = SlotHandle::new(ENCRYPTED_SLOT, 32, false)?;

    assert!(matches!(
        se.write_slot(&slot, &[0x31; 32]),
        Err(Error::Chip(_))
    ));
    Ok(())
}

#[test]
fn encrypted_handles_refuse_plain_reads() -> Result<()> {
    let mut se = setup();
    let slot = SlotHandle::new(ENCRYPTED_SLOT, 32, true)?;

    assert!(matches!(
        se.read_slot(&slot),
        Err(Error::SessionNotReady(_))
    ));
    Ok(())
}

#[test]
fn session_mirror_is_cleared_after_encrypted_access() -> Result<()> {
    let mut se = setup();
    let slot = SlotHandle::new(ENCRYPTED_SLOT, 32, true)?;

    se.encrypted_write(&slot, PROTECT_KEY_SLOT, &PROTECT_KEY, &[0x44; 32])?;
    assert!(!se.session().is_valid());

    se.encrypted_read(&slot, PROTECT_KEY_SLOT, &PROTECT_KEY)?;
    assert!(!se.session().is_valid());
    Ok(())
}
