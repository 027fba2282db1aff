// Copyright (c) 2023-2024 The SE-Link Developers

//! Command / response framing and the chip CRC-16.
//!
//! Commands go over the bus as `[count][opcode][param1][param2 LE][data..][crc LE]`
//! and responses come back as `[count][payload..][crc LE]`, where `count` covers
//! the entire frame including itself and the CRC.

use byteorder::{ByteOrder, LittleEndian};
use encdec::{Decode, Encode};

use crate::Opcode;

/// Fixed command overhead: count, opcode, param1, param2, crc.
pub const CMD_OVERHEAD: usize = 7;

/// Largest command body (CheckMac: challenge + response + other data).
pub const BODY_MAX: usize = 77;

/// Largest command frame.
pub const CMD_MAX: usize = BODY_MAX + CMD_OVERHEAD;

/// Largest response frame the chip will produce (32-byte payload plus framing).
pub const RESP_MAX: usize = 35;

/// Smallest well-formed frame: count, one payload byte, crc.
const FRAME_MIN: usize = 4;

/// Framing errors; retryable at the transport layer up to a small bound.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes arrived than the count byte declared
    Truncated,
    /// Recomputed CRC does not match the trailing CRC
    ChecksumMismatch,
    /// Body exceeds the largest legal command
    BodyOverflow,
    /// Supplied buffer too small for the encoded frame
    BufferLength,
}

impl From<encdec::Error> for FrameError {
    fn from(e: encdec::Error) -> Self {
        match e {
            encdec::Error::Length => FrameError::BufferLength,
            encdec::Error::Utf8 => FrameError::ChecksumMismatch,
        }
    }
}

impl core::fmt::Display for FrameError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FrameError::Truncated => write!(f, "frame shorter than declared count"),
            FrameError::ChecksumMismatch => write!(f, "frame checksum mismatch"),
            FrameError::BodyOverflow => write!(f, "command body too long"),
            FrameError::BufferLength => write!(f, "encode buffer too small"),
        }
    }
}

/// CRC-16 used on every frame: polynomial 0x8005, input bits LSB first,
/// zero init, no final xor. Appended little-endian.
pub fn crc16(data: &[u8]) -> u16 {
    const POLY: u16 = 0x8005;
    let mut crc = 0u16;
    for b in data {
        for i in 0..8 {
            let data_bit = (b >> i) & 1;
            let crc_bit = (crc >> 15) as u8;
            crc <<= 1;
            if data_bit != crc_bit {
                crc ^= POLY;
            }
        }
    }
    crc
}

/// A single chip command, constructed per call and consumed immediately.
#[derive(Clone, PartialEq, Debug)]
pub struct CommandFrame<'a> {
    pub opcode: Opcode,
    pub p1: u8,
    pub p2: u16,
    pub body: &'a [u8],
}

impl<'a> CommandFrame<'a> {
    pub const fn new(opcode: Opcode, p1: u8, p2: u16, body: &'a [u8]) -> Self {
        Self {
            opcode,
            p1,
            p2,
            body,
        }
    }
}

impl<'a> Encode for CommandFrame<'a> {
    type Error = FrameError;

    fn encode_len(&self) -> Result<usize, FrameError> {
        Ok(CMD_OVERHEAD + self.body.len())
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, FrameError> {
        if self.body.len() > BODY_MAX {
            return Err(FrameError::BodyOverflow);
        }
        let n = CMD_OVERHEAD + self.body.len();
        if buff.len() < n {
            return Err(FrameError::BufferLength);
        }

        buff[0] = n as u8;
        buff[1] = self.opcode as u8;
        buff[2] = self.p1;
        LittleEndian::write_u16(&mut buff[3..5], self.p2);
        buff[5..5 + self.body.len()].copy_from_slice(self.body);

        let crc = crc16(&buff[..n - 2]);
        LittleEndian::write_u16(&mut buff[n - 2..n], crc);

        Ok(n)
    }
}

/// A checksum-verified response payload borrowed from the receive buffer.
#[derive(Clone, PartialEq, Debug)]
pub struct Response<'a> {
    pub payload: &'a [u8],
}

impl<'a> Response<'a> {
    /// Validate framing and checksum, returning the payload.
    ///
    /// A one-byte payload is a status code, not data; the caller decides.
    pub fn parse(raw: &'a [u8]) -> Result<Self, FrameError> {
        if raw.len() < FRAME_MIN {
            return Err(FrameError::Truncated);
        }

        let count = raw[0] as usize;
        if count < FRAME_MIN || count > raw.len() {
            return Err(FrameError::Truncated);
        }

        let declared = LittleEndian::read_u16(&raw[count - 2..count]);
        if crc16(&raw[..count - 2]) != declared {
            return Err(FrameError::ChecksumMismatch);
        }

        Ok(Self {
            payload: &raw[1..count - 2],
        })
    }

    /// Frame a payload for the wire; used by chip-side implementations.
    pub fn encode_into(payload: &[u8], buff: &mut [u8]) -> Result<usize, FrameError> {
        let n = payload.len() + 3;
        if buff.len() < n {
            return Err(FrameError::BufferLength);
        }
        buff[0] = n as u8;
        buff[1..1 + payload.len()].copy_from_slice(payload);
        let crc = crc16(&buff[..n - 2]);
        LittleEndian::write_u16(&mut buff[n - 2..n], crc);
        Ok(n)
    }
}

impl<'a> Decode<'a> for Response<'a> {
    type Output = Response<'a>;
    type Error = FrameError;

    fn decode(buff: &'a [u8]) -> Result<(Self::Output, usize), FrameError> {
        let r = Response::parse(buff)?;
        let n = r.payload.len() + 3;
        Ok((r, n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(cmd: &CommandFrame) -> ([u8; CMD_MAX], usize) {
        let mut buff = [0u8; CMD_MAX];
        let n = cmd.encode(&mut buff).expect("encode failed");
        assert_eq!(n, cmd.encode_len().unwrap());
        (buff, n)
    }

    #[test]
    fn command_layout() {
        let body = [0xAA, 0xBB];
        let cmd = CommandFrame::new(Opcode::Read, 0x80, 0x0008, &body);
        let (buff, n) = encode(&cmd);

        assert_eq!(n, 9);
        assert_eq!(buff[0], 9); // count covers whole frame
        assert_eq!(buff[1], 0x02); // opcode
        assert_eq!(buff[2], 0x80);
        assert_eq!(&buff[3..5], &[0x08, 0x00]); // p2 little-endian
        assert_eq!(&buff[5..7], &body);
        assert_eq!(
            crc16(&buff[..7]),
            u16::from_le_bytes([buff[7], buff[8]])
        );
    }

    #[test]
    fn response_round_trip() {
        let mut payload = [0u8; 32];
        for (i, b) in payload.iter_mut().enumerate() {
            *b = i as u8;
        }
        let mut buff = [0u8; RESP_MAX];
        let n = Response::encode_into(&payload, &mut buff).unwrap();

        let resp = Response::parse(&buff[..n]).unwrap();
        assert_eq!(resp.payload, &payload[..]);
    }

    #[test]
    fn any_single_bit_flip_is_detected() {
        let payload = [0x5A; 8];
        let mut buff = [0u8; RESP_MAX];
        let n = Response::encode_into(&payload, &mut buff).unwrap();

        for byte in 0..n {
            for bit in 0..8 {
                let mut corrupt = buff;
                corrupt[byte] ^= 1 << bit;
                let r = Response::parse(&corrupt[..n]);
                assert!(
                    r.is_err() || r.unwrap().payload != payload,
                    "flip of byte {byte} bit {bit} accepted silently"
                );
            }
        }
    }

    #[test]
    fn truncated_frame_rejected() {
        let payload = [1u8, 2, 3, 4];
        let mut buff = [0u8; RESP_MAX];
        let n = Response::encode_into(&payload, &mut buff).unwrap();

        for cut in 1..n {
            assert_eq!(
                Response::parse(&buff[..cut]).unwrap_err(),
                FrameError::Truncated,
                "short read of {cut} bytes not flagged"
            );
        }
    }

    #[test]
    fn status_frame_is_single_byte_payload() {
        let mut buff = [0u8; RESP_MAX];
        let n = Response::encode_into(&[0x00], &mut buff).unwrap();
        assert_eq!(n, 4);
        let resp = Response::parse(&buff[..n]).unwrap();
        assert_eq!(resp.payload, &[0x00]);
    }

    #[test]
    fn oversized_body_rejected_before_send() {
        let body = [0u8; BODY_MAX + 1];
        let cmd = CommandFrame::new(Opcode::CheckMac, 0, 0, &body);
        let mut buff = [0u8; CMD_MAX + 8];
        assert_eq!(cmd.encode(&mut buff), Err(FrameError::BodyOverflow));
    }
}
