// Copyright (c) 2023-2024 The SE-Link Developers

//! Behavioral simulator for ATECC508A-class secure elements.
//!
//! [`SimChip`] accepts raw command frames and produces raw response
//! frames, modelling the chip state the host driver cares about: the
//! config zone with its lock bytes, sixteen data slots, two one-way
//! counters, the TempKey register and the wake / watchdog lifecycle.
//!
//! The SHA-256 message constructions here are written from the datasheet
//! tables independently of the host driver, so a disagreement between the
//! two shows up as a test failure rather than two copies of the same bug
//! agreeing with each other.
//!
//! Timing is not modelled; commands complete synchronously.

use rand::{rngs::StdRng, RngCore, SeedableRng};
use sha2::{Digest, Sha256};

use se_link_proto::{
    frame::{crc16, RESP_MAX},
    Opcode, Response, Status, CONFIG_LEN, NONCE_MODE_PASSTHROUGH, NONCE_MODE_RANDOM, NUM_COUNTERS,
    NUM_SLOTS, SERIAL_PREFIX, SERIAL_TAIL, ZONE_BLOCK, ZONE_CONFIG, ZONE_COUNTER, ZONE_DATA,
};

const SLOTS: usize = NUM_SLOTS as usize;
const COUNTERS: usize = NUM_COUNTERS as usize;

/// Config offsets holding the zone lock bytes.
const LOCK_VALUE: usize = 86;
const LOCK_CONFIG: usize = 87;
const SLOT_LOCKED: usize = 88;
const UNLOCKED: u8 = 0x55;
const LOCKED: u8 = 0x00;

/// TempKey register plus the flags the chip tracks alongside it.
#[derive(Clone)]
struct TempKey {
    value: [u8; 32],
    source_random: bool,
    gen_dig: bool,
    key_id: u8,
}

/// In-memory model of one chip.
pub struct SimChip {
    config: [u8; CONFIG_LEN],
    slots: [[u8; 32]; SLOTS],
    counters: [u32; COUNTERS],
    read_key: [Option<u8>; SLOTS],
    write_key: [Option<u8>; SLOTS],
    tempkey: Option<TempKey>,
    sha: Option<Sha256>,
    gpio: bool,
    after_wake: bool,
    watchdog_expired: bool,
    rng: StdRng,
}

impl SimChip {
    /// Fresh unlocked part with the given device-unique serial bytes.
    /// Starts asleep: the first command is answered with the wake status.
    pub fn new(serial: [u8; 6]) -> Self {
        Self::with_seed(serial, rand::random())
    }

    /// As [`new`](Self::new) but with a deterministic RNG.
    pub fn with_seed(serial: [u8; 6], seed: u64) -> Self {
        let mut config = [0u8; CONFIG_LEN];
        // serial number framing as laid out in config block 0
        config[0] = SERIAL_PREFIX[0];
        config[1] = SERIAL_PREFIX[1];
        config[2] = serial[0];
        config[3] = serial[1];
        config[8..12].copy_from_slice(&serial[2..6]);
        config[12] = SERIAL_TAIL;
        config[LOCK_VALUE] = UNLOCKED;
        config[LOCK_CONFIG] = UNLOCKED;
        config[SLOT_LOCKED] = 0xFF;
        config[SLOT_LOCKED + 1] = 0xFF;

        Self {
            config,
            slots: [[0u8; 32]; SLOTS],
            counters: [0; COUNTERS],
            read_key: [None; SLOTS],
            write_key: [None; SLOTS],
            tempkey: None,
            sha: None,
            gpio: false,
            after_wake: true,
            watchdog_expired: false,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    // Provisioning hooks, stand-ins for what the config policy encodes on
    // real silicon.

    /// Place key material directly in a slot.
    pub fn load_slot(&mut self, slot: u8, data: [u8; 32]) {
        self.slots[slot as usize] = data;
    }

    pub fn slot_contents(&self, slot: u8) -> [u8; 32] {
        self.slots[slot as usize]
    }

    /// Reads of `slot` must run the GenDig dance over `key` and come back
    /// XOR-encrypted.
    pub fn set_read_key(&mut self, slot: u8, key: u8) {
        self.read_key[slot as usize] = Some(key);
    }

    /// Writes to `slot` must run the GenDig dance over `key` and carry an
    /// authorizing MAC.
    pub fn set_write_key(&mut self, slot: u8, key: u8) {
        self.write_key[slot as usize] = Some(key);
    }

    pub fn config_locked(&self) -> bool {
        self.config[LOCK_CONFIG] != UNLOCKED
    }

    pub fn data_locked(&self) -> bool {
        self.config[LOCK_VALUE] != UNLOCKED
    }

    /// Wake the part: volatile state is lost and the next command is
    /// answered with [`Status::AfterWake`].
    pub fn wake(&mut self) {
        self.tempkey = None;
        self.sha = None;
        self.after_wake = true;
        self.watchdog_expired = false;
    }

    /// Fire the watchdog: volatile state is lost and every command fails
    /// with [`Status::WatchdogExpired`] until the next wake.
    pub fn expire_watchdog(&mut self) {
        self.tempkey = None;
        self.sha = None;
        self.watchdog_expired = true;
    }

    /// Execute one raw command frame, returning the raw response frame.
    pub fn command(&mut self, raw: &[u8]) -> Vec<u8> {
        if self.watchdog_expired {
            return status(Status::WatchdogExpired);
        }

        let (op, p1, p2, body) = match parse_command(raw) {
            Some(c) => c,
            None => return status(Status::CommError),
        };

        if self.after_wake {
            self.after_wake = false;
            return status(Status::AfterWake);
        }

        log::trace!("sim: {op} p1={p1:#04x} p2={p2:#06x} body={}B", body.len());

        match op {
            Opcode::Pause => status(Status::Ok),
            Opcode::Info => self.cmd_info(p1, p2),
            Opcode::Random => self.cmd_random(),
            Opcode::Nonce => self.cmd_nonce(p1, body),
            Opcode::GenDig => self.cmd_gen_dig(p1, p2),
            Opcode::CheckMac => self.cmd_check_mac(p2, body),
            Opcode::Mac => self.cmd_mac(p1, p2),
            Opcode::Hmac => self.cmd_hmac(p1, p2),
            Opcode::DeriveKey => self.cmd_derive_key(p1, p2),
            Opcode::Read => self.cmd_read(p1, p2),
            Opcode::Write => self.cmd_write(p1, p2, body),
            Opcode::Lock => self.cmd_lock(p1, p2),
            Opcode::Counter => self.cmd_counter(p1, p2),
            Opcode::Sha => self.cmd_sha(p1, body),
            _ => status(Status::ExecError),
        }
    }

    fn serial(&self) -> [u8; 9] {
        let mut sn = [0u8; 9];
        sn[..4].copy_from_slice(&self.config[..4]);
        sn[4..].copy_from_slice(&self.config[8..13]);
        sn
    }

    fn cmd_info(&mut self, p1: u8, p2: u16) -> Vec<u8> {
        match p1 {
            // state word, assembled from the TempKey flags
            0x02 => {
                let mut word = 0u16;
                if let Some(tk) = &self.tempkey {
                    word |= 1 << 7;
                    word |= u16::from(tk.key_id & 0x0F) << 8;
                    if !tk.source_random {
                        word |= 1 << 12;
                    }
                    if tk.gen_dig {
                        word |= 1 << 13;
                    }
                }
                let be = word.to_be_bytes();
                data(&[be[0], be[1], 0x00, 0x00])
            }
            0x03 => {
                if p2 & 0x0002 != 0 {
                    self.gpio = p2 & 1 != 0;
                }
                data(&[self.gpio as u8, 0x00, 0x00, 0x00])
            }
            _ => status(Status::ExecError),
        }
    }

    fn cmd_random(&mut self) -> Vec<u8> {
        // fixed output until the config zone is locked
        if !self.config_locked() {
            return data(&[0xFF; 32]);
        }
        let mut out = [0u8; 32];
        self.rng.fill_bytes(&mut out);
        data(&out)
    }

    fn cmd_nonce(&mut self, mode: u8, body: &[u8]) -> Vec<u8> {
        match mode {
            NONCE_MODE_RANDOM => {
                if body.len() != 20 {
                    return status(Status::ParseError);
                }
                let mut rand_out = [0u8; 32];
                self.rng.fill_bytes(&mut rand_out);

                let value = sha(&[&rand_out, body, &[Opcode::Nonce as u8, mode, 0x00]]);
                self.tempkey = Some(TempKey {
                    value,
                    source_random: true,
                    gen_dig: false,
                    key_id: 0,
                });
                data(&rand_out)
            }
            NONCE_MODE_PASSTHROUGH => {
                let value: [u8; 32] = match body.try_into() {
                    Ok(v) => v,
                    Err(_) => return status(Status::ParseError),
                };
                self.tempkey = Some(TempKey {
                    value,
                    source_random: false,
                    gen_dig: false,
                    key_id: 0,
                });
                status(Status::Ok)
            }
            _ => status(Status::ParseError),
        }
    }

    fn cmd_gen_dig(&mut self, zone: u8, p2: u16) -> Vec<u8> {
        let tk = match self.tempkey.take() {
            Some(tk) => tk,
            None => return status(Status::ExecError),
        };
        let id = (p2 & 0x0F) as u8;

        let value = match zone {
            ZONE_DATA => sha(&[
                &self.slots[id as usize],
                &[
                    Opcode::GenDig as u8,
                    zone,
                    id,
                    0x00,
                    SERIAL_TAIL,
                    SERIAL_PREFIX[0],
                    SERIAL_PREFIX[1],
                ],
                &[0u8; 25],
                &tk.value,
            ]),
            ZONE_COUNTER => {
                if id >= NUM_COUNTERS {
                    return status(Status::ExecError);
                }
                sha(&[
                    &[0u8; 32],
                    &[
                        Opcode::GenDig as u8,
                        zone,
                        id,
                        0x00,
                        SERIAL_TAIL,
                        SERIAL_PREFIX[0],
                        SERIAL_PREFIX[1],
                        0x00,
                    ],
                    &self.counters[id as usize].to_le_bytes(),
                    &[0u8; 20],
                    &tk.value,
                ])
            }
            _ => return status(Status::ExecError),
        };

        self.tempkey = Some(TempKey {
            value,
            source_random: tk.source_random,
            gen_dig: true,
            key_id: id,
        });
        status(Status::Ok)
    }

    fn cmd_check_mac(&mut self, p2: u16, body: &[u8]) -> Vec<u8> {
        // TempKey is consumed whether or not the comparison succeeds
        let tk = match self.tempkey.take() {
            Some(tk) => tk,
            None => return status(Status::ExecError),
        };
        if body.len() != 77 {
            return status(Status::ParseError);
        }

        let kn = (p2 & 0x0F) as usize;
        let response = &body[32..64];
        let od = &body[64..77];

        let expected = sha(&[
            &self.slots[kn],
            &tk.value,
            &od[0..4],
            &[0u8; 8],
            &od[4..7],
            &[SERIAL_TAIL],
            &od[7..11],
            &SERIAL_PREFIX,
            &od[11..13],
        ]);

        if response == expected {
            status(Status::Ok)
        } else {
            status(Status::CheckMacFail)
        }
    }

    fn cmd_mac(&mut self, mode: u8, p2: u16) -> Vec<u8> {
        let tk = match self.tempkey.take() {
            Some(tk) => tk,
            None => return status(Status::ExecError),
        };
        let kn = (p2 & 0x0F) as usize;
        let sn = self.serial();

        let out = sha(&[
            &self.slots[kn],
            &tk.value,
            &[Opcode::Mac as u8, mode, kn as u8, 0x00],
            &[0u8; 8],
            &[0u8; 3],
            &[sn[8]],
            &sn[4..8],
            &sn[0..4],
        ]);
        data(&out)
    }

    fn cmd_hmac(&mut self, mode: u8, p2: u16) -> Vec<u8> {
        let tk = match self.tempkey.take() {
            Some(tk) => tk,
            None => return status(Status::ExecError),
        };
        let kn = (p2 & 0x0F) as usize;
        let sn = self.serial();

        let out = sha(&[
            &self.slots[kn],
            &tk.value,
            &[Opcode::Hmac as u8, mode, kn as u8, 0x00],
            &[0u8; 8],
            &[0u8; 3],
            &[sn[8]],
            &sn[4..8],
            &sn[0..4],
        ]);
        data(&out)
    }

    fn cmd_derive_key(&mut self, p1: u8, p2: u16) -> Vec<u8> {
        let tk = match self.tempkey.take() {
            Some(tk) => tk,
            None => return status(Status::ExecError),
        };
        let kn = (p2 & 0x0F) as usize;

        // roll mode: new key mixes the slot's own current contents
        self.slots[kn] = sha(&[
            &self.slots[kn],
            &[Opcode::DeriveKey as u8, p1, kn as u8, 0x00],
            &[SERIAL_TAIL],
            &SERIAL_PREFIX,
            &[0u8; 25],
            &tk.value,
        ]);
        status(Status::Ok)
    }

    fn cmd_read(&mut self, zone: u8, addr: u16) -> Vec<u8> {
        let block = zone & ZONE_BLOCK != 0;

        match zone & 0x03 {
            ZONE_CONFIG => {
                let offset = ((addr >> 3) as usize) * 32 + ((addr & 7) as usize) * 4;
                let len = if block { 32 } else { 4 };
                if offset + len > CONFIG_LEN {
                    return status(Status::ExecError);
                }
                data(&self.config[offset..offset + len])
            }
            ZONE_DATA => {
                let slot = ((addr >> 3) & 0x0F) as usize;

                if let Some(rk) = self.read_key[slot] {
                    // encrypted read: output XORed against a GenDig TempKey
                    let tk = match self.tempkey.take() {
                        Some(tk) if tk.gen_dig && tk.key_id == rk => tk,
                        _ => return status(Status::ExecError),
                    };
                    if !block {
                        return status(Status::ExecError);
                    }
                    let mut out = self.slots[slot];
                    for (o, k) in out.iter_mut().zip(tk.value.iter()) {
                        *o ^= k;
                    }
                    return data(&out);
                }

                if block {
                    data(&self.slots[slot])
                } else {
                    data(&self.slots[slot][..4])
                }
            }
            _ => status(Status::ExecError),
        }
    }

    fn cmd_write(&mut self, zone: u8, addr: u16, body: &[u8]) -> Vec<u8> {
        match zone & 0x03 {
            ZONE_CONFIG => {
                if self.config_locked() || body.len() != 4 {
                    return status(Status::ExecError);
                }
                let offset = ((addr >> 3) as usize) * 32 + ((addr & 7) as usize) * 4;
                // UserExtra / lock bytes are never writable
                if (84..92).contains(&offset) || offset + 4 > CONFIG_LEN {
                    return status(Status::ExecError);
                }
                self.config[offset..offset + 4].copy_from_slice(body);
                status(Status::Ok)
            }
            ZONE_DATA => {
                let slot = ((addr >> 3) & 0x0F) as usize;
                if self.slot_locked(slot) {
                    return status(Status::ExecError);
                }

                if let Some(wk) = self.write_key[slot] {
                    if self.data_locked() {
                        return self.encrypted_write(slot, wk, zone, addr, body);
                    }
                }

                let plain: [u8; 32] = match body.try_into() {
                    Ok(p) => p,
                    Err(_) => return status(Status::ParseError),
                };
                self.slots[slot] = plain;
                status(Status::Ok)
            }
            _ => status(Status::ExecError),
        }
    }

    fn encrypted_write(&mut self, slot: usize, wk: u8, zone: u8, addr: u16, body: &[u8]) -> Vec<u8> {
        let tk = match self.tempkey.take() {
            Some(tk) if tk.gen_dig && tk.key_id == wk => tk,
            _ => return status(Status::ExecError),
        };
        if body.len() != 64 {
            return status(Status::ParseError);
        }

        let mut plain = [0u8; 32];
        for (i, p) in plain.iter_mut().enumerate() {
            *p = body[i] ^ tk.value[i];
        }

        let a = addr.to_le_bytes();
        let expected = sha(&[
            &tk.value,
            &[
                Opcode::Write as u8,
                zone,
                a[0],
                a[1],
                SERIAL_TAIL,
                SERIAL_PREFIX[0],
                SERIAL_PREFIX[1],
            ],
            &[0u8; 25],
            &plain,
        ]);

        if body[32..] != expected {
            return status(Status::ExecError);
        }
        self.slots[slot] = plain;
        status(Status::Ok)
    }

    fn cmd_lock(&mut self, p1: u8, p2: u16) -> Vec<u8> {
        let skip_crc = p1 & 0x80 != 0;
        match p1 & 0x03 {
            0x00 => {
                if !skip_crc && crc16(&self.config) != p2 {
                    return status(Status::ExecError);
                }
                self.config[LOCK_CONFIG] = LOCKED;
                status(Status::Ok)
            }
            0x01 => {
                self.config[LOCK_VALUE] = LOCKED;
                status(Status::Ok)
            }
            0x02 => {
                let slot = ((p1 >> 2) & 0x0F) as usize;
                let bits = u16::from_le_bytes([
                    self.config[SLOT_LOCKED],
                    self.config[SLOT_LOCKED + 1],
                ]) & !(1u16 << slot);
                self.config[SLOT_LOCKED..SLOT_LOCKED + 2].copy_from_slice(&bits.to_le_bytes());
                status(Status::Ok)
            }
            _ => status(Status::ParseError),
        }
    }

    fn cmd_counter(&mut self, p1: u8, p2: u16) -> Vec<u8> {
        let id = (p2 & 0xFF) as u8;
        if id >= NUM_COUNTERS {
            return status(Status::ExecError);
        }
        if p1 & 0x01 != 0 {
            self.counters[id as usize] += 1;
        }
        data(&self.counters[id as usize].to_le_bytes())
    }

    fn cmd_sha(&mut self, p1: u8, body: &[u8]) -> Vec<u8> {
        match p1 {
            0x00 => {
                self.sha = Some(Sha256::new());
                status(Status::Ok)
            }
            0x01 => match self.sha.as_mut() {
                Some(h) => {
                    h.update(body);
                    status(Status::Ok)
                }
                None => status(Status::ExecError),
            },
            0x02 => match self.sha.take() {
                Some(mut h) => {
                    h.update(body);
                    let mut out = [0u8; 32];
                    out.copy_from_slice(h.finalize().as_slice());
                    data(&out)
                }
                None => status(Status::ExecError),
            },
            _ => status(Status::ParseError),
        }
    }

    fn slot_locked(&self, slot: usize) -> bool {
        let bits = u16::from_le_bytes([self.config[SLOT_LOCKED], self.config[SLOT_LOCKED + 1]]);
        bits & (1 << slot) == 0
    }
}

/// Validate framing and checksum, splitting out the command fields.
fn parse_command(raw: &[u8]) -> Option<(Opcode, u8, u16, &[u8])> {
    if raw.len() < 7 {
        return None;
    }
    let count = raw[0] as usize;
    if count < 7 || count > raw.len() {
        return None;
    }
    let declared = u16::from_le_bytes([raw[count - 2], raw[count - 1]]);
    if crc16(&raw[..count - 2]) != declared {
        return None;
    }
    let op = Opcode::try_from(raw[1]).ok()?;
    let p2 = u16::from_le_bytes([raw[3], raw[4]]);
    Some((op, raw[2], p2, &raw[5..count - 2]))
}

fn frame(payload: &[u8]) -> Vec<u8> {
    let mut buff = [0u8; RESP_MAX];
    let n = Response::encode_into(payload, &mut buff).expect("payload fits a response frame");
    buff[..n].to_vec()
}

fn status(s: Status) -> Vec<u8> {
    frame(&[s as u8])
}

fn data(payload: &[u8]) -> Vec<u8> {
    frame(payload)
}

fn sha(parts: &[&[u8]]) -> [u8; 32] {
    let mut h = Sha256::new();
    for p in parts {
        h.update(p);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(h.finalize().as_slice());
    out
}
