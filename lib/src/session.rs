// Copyright (c) 2023-2024 The SE-Link Developers

//! Host-side mirror of the chip's TempKey register.
//!
//! TempKey is global mutable hardware state shared by every authenticated
//! operation. The mirror is a read-side cache of a fact the chip also
//! holds: it re-derives the actual 32-byte value so session keys can be
//! reconstructed locally, and it must never claim TempKey is valid for a
//! value the host cannot account for.
//!
//! The mirror is advisory. It never stops the chip from disagreeing; any
//! operation the chip itself rejects forces the mirror back to unknown
//! regardless of the local prediction.

use strum::Display;
use zeroize::Zeroizing;

use crate::Error;

/// How the current TempKey value was loaded.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum NonceSource {
    /// Nonce command in random mode; chip RNG contributed.
    Random,
    /// Nonce command in pass-through mode; host supplied the value.
    Input,
}

#[derive(Clone)]
struct Loaded {
    value: Zeroizing<[u8; 32]>,
    source: NonceSource,
    key_id: Option<u8>,
    gen_dig: bool,
    gen_key: bool,
    no_mac: bool,
}

/// TempKey state machine. `None` is the `Unknown` state: initial, and
/// forced by every error, reset, watchdog event or consuming operation.
#[derive(Clone, Default)]
pub struct Session {
    tempkey: Option<Loaded>,
}

impl Session {
    pub const fn new() -> Self {
        Self { tempkey: None }
    }

    /// TempKey holds a value the host can account for.
    pub fn is_valid(&self) -> bool {
        self.tempkey.is_some()
    }

    pub fn source(&self) -> Option<NonceSource> {
        self.tempkey.as_ref().map(|t| t.source)
    }

    pub fn key_id(&self) -> Option<u8> {
        self.tempkey.as_ref().and_then(|t| t.key_id)
    }

    pub fn gen_dig_applied(&self) -> bool {
        self.tempkey.as_ref().map(|t| t.gen_dig).unwrap_or(false)
    }

    pub fn gen_key_applied(&self) -> bool {
        self.tempkey.as_ref().map(|t| t.gen_key).unwrap_or(false)
    }

    pub fn no_mac_flag(&self) -> bool {
        self.tempkey.as_ref().map(|t| t.no_mac).unwrap_or(false)
    }

    /// Force the `Unknown` state, zeroizing any held value.
    pub fn invalidate(&mut self) {
        // Zeroizing wipes the value on drop
        self.tempkey = None;
    }

    /// A Nonce command completed; TempKey now holds `value`.
    pub(crate) fn load_nonce(&mut self, value: Zeroizing<[u8; 32]>, source: NonceSource) {
        self.tempkey = Some(Loaded {
            value,
            source,
            key_id: None,
            gen_dig: false,
            gen_key: false,
            no_mac: false,
        });
    }

    /// A GenDig over `key_id` completed; TempKey was replaced by the
    /// digest.
    pub(crate) fn apply_gen_dig(&mut self, key_id: u8, value: Zeroizing<[u8; 32]>) {
        if let Some(t) = self.tempkey.as_mut() {
            t.value = value;
            t.key_id = Some(key_id);
            t.gen_dig = true;
        }
    }

    /// Current value, required to be a fresh nonce (no digest applied yet).
    pub(crate) fn nonce_value(&self) -> Result<Zeroizing<[u8; 32]>, Error> {
        match &self.tempkey {
            Some(t) if !t.gen_dig && !t.gen_key => Ok(t.value.clone()),
            Some(_) => Err(Error::SessionNotReady("TempKey already consumed by GenDig")),
            None => Err(Error::SessionNotReady("no nonce loaded")),
        }
    }

    /// Session key for encrypted slot access: requires a GenDig-derived
    /// TempKey from a host-generated random nonce over the expected key.
    pub(crate) fn session_key(&self, key_id: u8) -> Result<Zeroizing<[u8; 32]>, Error> {
        match &self.tempkey {
            Some(t) if t.gen_dig && t.key_id == Some(key_id) => {
                if t.source != NonceSource::Random {
                    return Err(Error::SessionNotReady("nonce was not host-random"));
                }
                Ok(t.value.clone())
            }
            Some(t) if t.gen_dig => Err(Error::SessionNotReady("GenDig key id mismatch")),
            Some(_) => Err(Error::SessionNotReady("GenDig not applied")),
            None => Err(Error::SessionNotReady("no nonce loaded")),
        }
    }

    /// Take the value for a TempKey-consuming operation (CheckMac, MAC,
    /// DeriveKey); the mirror transitions to `Unknown`.
    pub(crate) fn consume(&mut self) -> Result<Zeroizing<[u8; 32]>, Error> {
        match self.tempkey.take() {
            Some(t) => Ok(t.value),
            None => Err(Error::SessionNotReady("no nonce loaded")),
        }
    }
}
