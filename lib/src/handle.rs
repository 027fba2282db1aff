// Copyright (c) 2023-2024 The SE-Link Developers

//! Handle for a connected secure element.
//!
//! [`SeHandle`] owns the transport and the TempKey mirror, serializing all
//! chip traffic through one owner. Command dispatch lives here: per-opcode
//! worst-case delays, the bounded read-retry policy, status decoding and
//! the single automatic retry after a wake event.

use core::time::Duration;

use log::{debug, warn};
use zeroize::Zeroizing;

use se_link_proto::{
    frame::{CMD_MAX, RESP_MAX},
    info_mode, CommandFrame, Encode, InfoWord, Opcode, Response, Status, CONFIG_LEN, NUM_COUNTERS,
    SERIAL_LEN, SERIAL_PREFIX, SERIAL_TAIL, ZONE_BLOCK, ZONE_CONFIG,
};

use crate::{session::Session, Error, Transport};

/// Attempts to read a response before surfacing a transport/frame error.
/// A device mid-computation NAKs for a bounded number of polls, not
/// indefinitely.
const READ_RETRIES: usize = 3;

/// Gap between response polls.
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// SHA command param1 selectors.
const SHA_START: u8 = 0x00;
const SHA_UPDATE: u8 = 0x01;
const SHA_END: u8 = 0x02;

/// Handle for a connected secure element.
///
/// The chip has one TempKey register and one in-flight operation slot, so
/// every operation takes `&mut self`; a caller needing shared access must
/// wrap the handle in its own mutual-exclusion discipline.
pub struct SeHandle<T: Transport> {
    transport: T,
    session: Session,
    pairing_secret: Zeroizing<[u8; 32]>,
    serial: Option<[u8; SERIAL_LEN]>,
    poisoned: bool,
}

impl<T: Transport> SeHandle<T> {
    /// Create a handle from a transport and the shared pairing secret.
    ///
    /// No bus traffic occurs until [`probe`](Self::probe) or the first
    /// operation.
    pub fn new(transport: T, pairing_secret: [u8; 32]) -> Self {
        Self {
            transport,
            session: Session::new(),
            pairing_secret: Zeroizing::new(pairing_secret),
            serial: None,
            poisoned: false,
        }
    }

    /// Host-side TempKey mirror.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Direct access to the underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub(crate) fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub(crate) fn pairing_secret(&self) -> Zeroizing<[u8; 32]> {
        self.pairing_secret.clone()
    }

    /// Wake the chip and discard all volatile state, host and chip side.
    ///
    /// Call this lots; it is quick and it is the only way out of the
    /// poisoned state after a watchdog expiry.
    pub fn reset_chip(&mut self) -> Result<(), Error> {
        self.transport.reset()?;
        self.session.invalidate();
        self.poisoned = false;
        Ok(())
    }

    /// Opportunistic watchdog refresh between logical operations.
    ///
    /// Uses Pause, which never touches TempKey. Safe to skip; the only
    /// consequence is the watchdog eventually firing and invalidating all
    /// session state.
    pub fn keep_alive(&mut self) {
        if self.poisoned {
            return;
        }
        if let Err(e) = self.execute(Opcode::Pause, 0, 0, &[]) {
            debug!("keep-alive poll failed: {e}");
        }
    }

    /// Confirm the part is present, answers sensibly and carries the
    /// expected serial framing. Run once at boot.
    pub fn probe(&mut self) -> Result<(), Error> {
        self.reset_chip()
            .map_err(|_| Error::Probe("no response to wake"))?;

        let info = self
            .get_info()
            .map_err(|_| Error::Probe("Info command failed"))?;
        debug!("probe: state word {:#06x}", info.0);

        let serial = self
            .serial_full()
            .map_err(|_| Error::Probe("serial read failed"))?;
        debug!("probe: serial {}", hex::encode(serial));

        Ok(())
    }

    /// Info(p1=2) state word.
    pub fn get_info(&mut self) -> Result<InfoWord, Error> {
        let resp = self.execute(Opcode::Info, info_mode::STATE, 0, &[])?;
        if resp.len() < 2 {
            return Err(Error::UnexpectedResponse(resp.len()));
        }
        Ok(InfoWord(u16::from_be_bytes([resp[0], resp[1]])))
    }

    /// Pick a fresh 32-byte random value from the chip RNG.
    pub fn random(&mut self) -> Result<[u8; 32], Error> {
        let resp = self.execute(Opcode::Random, 0, 0, &[])?;
        arr32(resp)
    }

    /// Read (and optionally increment) a one-way counter.
    ///
    /// Increment is opt-in per call; the counter can never move backwards
    /// through this interface.
    pub fn get_counter(&mut self, counter: u8, increment: bool) -> Result<u32, Error> {
        if counter >= NUM_COUNTERS {
            return Err(Error::InvalidSlot(counter));
        }
        let resp = self.execute(Opcode::Counter, increment as u8, counter as u16, &[])?;
        let raw = arr4(resp)?;
        Ok(u32::from_le_bytes(raw))
    }

    /// Current state of the GPIO pin.
    pub fn get_gpio(&mut self) -> Result<bool, Error> {
        let resp = self.execute(Opcode::Info, info_mode::GPIO, 0, &[])?;
        match resp.first() {
            Some(b) => Ok(b & 1 != 0),
            None => Err(Error::UnexpectedResponse(0)),
        }
    }

    /// Drive the GPIO pin. May require authentication first depending on
    /// chip configuration; see
    /// [`set_gpio_secure`](Self::set_gpio_secure).
    pub fn set_gpio(&mut self, state: bool) -> Result<(), Error> {
        let cmd = 0x0002 | state as u16;
        let resp = self.execute(Opcode::Info, info_mode::GPIO, cmd, &[])?;
        match resp.first() {
            Some(b) if b & 1 == state as u8 => Ok(()),
            Some(_) => Err(Error::Chip(Status::ExecError)),
            None => Err(Error::UnexpectedResponse(0)),
        }
    }

    /// Device serial number: the six device-unique bytes, with the fixed
    /// framing bytes elided.
    pub fn serial_number(&mut self) -> Result<[u8; 6], Error> {
        let sn = self.serial_full()?;
        let mut out = [0u8; 6];
        out.copy_from_slice(&sn[2..8]);
        Ok(out)
    }

    /// Full nine-byte serial, cached after first read.
    pub(crate) fn serial_full(&mut self) -> Result<[u8; SERIAL_LEN], Error> {
        if let Some(sn) = self.serial {
            return Ok(sn);
        }

        let block = self.read_config_block(0)?;
        let mut sn = [0u8; SERIAL_LEN];
        sn[..4].copy_from_slice(&block[..4]);
        sn[4..].copy_from_slice(&block[8..13]);

        if sn[..2] != SERIAL_PREFIX || sn[8] != SERIAL_TAIL {
            return Err(Error::Probe("bad serial framing"));
        }

        self.serial = Some(sn);
        Ok(sn)
    }

    /// Read one byte from the config area.
    pub fn read_config_byte(&mut self, offset: usize) -> Result<u8, Error> {
        if offset >= CONFIG_LEN {
            return Err(Error::InvalidLength(offset));
        }
        let word = self.read_config_word(offset & !3)?;
        Ok(word[offset & 3])
    }

    /// Read a 4-byte word from the config area.
    ///
    /// The chip gives no evidence of bounds-checking the address itself,
    /// so offsets are validated host-side: in range and 4-byte aligned.
    pub fn read_config_word(&mut self, offset: usize) -> Result<[u8; 4], Error> {
        if offset % 4 != 0 || offset + 4 > CONFIG_LEN {
            return Err(Error::InvalidLength(offset));
        }
        let addr = config_addr(offset);
        let resp = self.execute(Opcode::Read, ZONE_CONFIG, addr, &[])?;
        arr4(resp)
    }

    /// Read a 32-byte block from the config area.
    pub(crate) fn read_config_block(&mut self, block: u8) -> Result<[u8; 32], Error> {
        if usize::from(block) * 32 >= CONFIG_LEN {
            return Err(Error::InvalidLength(block as usize));
        }
        let resp = self.execute(
            Opcode::Read,
            ZONE_CONFIG | ZONE_BLOCK,
            (block as u16) << 3,
            &[],
        )?;
        arr32(resp)
    }

    /// Use the chip as a SHA-256 accelerator.
    pub fn chip_sha256(&mut self, msg: &[u8]) -> Result<[u8; 32], Error> {
        self.execute(Opcode::Sha, SHA_START, 0, &[])?;

        let mut chunks = msg.chunks_exact(64);
        for chunk in &mut chunks {
            self.execute(Opcode::Sha, SHA_UPDATE, 64, chunk)?;
        }

        let rest = chunks.remainder();
        let resp = self.execute(Opcode::Sha, SHA_END, rest.len() as u16, rest)?;
        arr32(resp)
    }

    /// Send one command and return its checksum-verified payload, with
    /// status decoding and the wake retry applied.
    ///
    /// Exactly one automatic retry exists at this layer: `AfterWake`,
    /// which means the chip was asleep and never executed the command.
    /// Every other non-success status propagates and invalidates the
    /// TempKey mirror.
    pub(crate) fn execute(
        &mut self,
        op: Opcode,
        p1: u8,
        p2: u16,
        body: &[u8],
    ) -> Result<Vec<u8>, Error> {
        if self.poisoned {
            return Err(Error::WatchdogExpired);
        }

        let r = self.execute_inner(op, p1, p2, body);

        if let Err(e) = &r {
            if matches!(e, Error::WatchdogExpired) {
                warn!("{op}: watchdog expired, handle poisoned until reset");
                self.poisoned = true;
            }
            if e.invalidates_session() {
                self.session.invalidate();
            }
        }

        r
    }

    fn execute_inner(
        &mut self,
        op: Opcode,
        p1: u8,
        p2: u16,
        body: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let mut woke = false;

        loop {
            let payload = self.exchange(op, p1, p2, body)?;

            // One-byte payloads are always a status, never data
            if payload.len() == 1 {
                let status =
                    Status::try_from(payload[0]).map_err(|_| Error::UnknownStatus(payload[0]))?;
                match status {
                    Status::Ok => return Ok(Vec::new()),
                    Status::AfterWake if !woke => {
                        debug!("{op}: chip was asleep, retrying once");
                        woke = true;
                        continue;
                    }
                    Status::WatchdogExpired => return Err(Error::WatchdogExpired),
                    s => {
                        debug!("{op}: chip status {s}");
                        return Err(Error::Chip(s));
                    }
                }
            }

            return Ok(payload);
        }
    }

    /// One framed request/response exchange: encode, send, wait out the
    /// opcode's fixed execution time, then poll with the bounded retry.
    fn exchange(&mut self, op: Opcode, p1: u8, p2: u16, body: &[u8]) -> Result<Vec<u8>, Error> {
        let cmd = CommandFrame::new(op, p1, p2, body);
        let mut buff = [0u8; CMD_MAX];
        let n = cmd.encode(&mut buff)?;

        debug!("send {op} p1={p1:#04x} p2={p2:#06x} body={}B", body.len());
        self.transport.send(&buff[..n])?;
        self.transport.sleep(op.exec_time());

        let mut last = Error::Transport(crate::TransportError::Timeout);
        for attempt in 0..READ_RETRIES {
            if attempt > 0 {
                self.transport.sleep(POLL_INTERVAL);
            }
            match self.transport.recv(RESP_MAX) {
                Ok(raw) => match Response::parse(&raw) {
                    Ok(resp) => return Ok(resp.payload.to_vec()),
                    Err(e) => {
                        debug!("{op}: bad frame on attempt {attempt}: {e}");
                        last = Error::Frame(e);
                    }
                },
                Err(e) => {
                    debug!("{op}: transport error on attempt {attempt}: {e}");
                    last = Error::Transport(e);
                }
            }
        }

        Err(last)
    }
}

/// Config zone byte offset to the chip's block/word address form.
fn config_addr(offset: usize) -> u16 {
    let block = (offset / 32) as u16;
    let word = ((offset % 32) / 4) as u16;
    (block << 3) | word
}

pub(crate) fn arr32(v: Vec<u8>) -> Result<[u8; 32], Error> {
    v.try_into().map_err(|v: Vec<u8>| Error::UnexpectedResponse(v.len()))
}

pub(crate) fn arr4(v: Vec<u8>) -> Result<[u8; 4], Error> {
    v.try_into().map_err(|v: Vec<u8>| Error::UnexpectedResponse(v.len()))
}
