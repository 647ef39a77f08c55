//! Minimal Feetech SCS/STS packet codec (protocol 0).
//!
//! Instruction packet: `FF FF id len instr params… checksum`
//! Status packet:      `FF FF id len error params… checksum`
//!
//! `len` counts everything after itself, checksum is the bitwise NOT of the
//! byte sum from `id` to the last parameter.

use crate::error::{BusError, BusResult};
use std::io::{self, Read, Write};

pub const HEADER: [u8; 2] = [0xFF, 0xFF];
pub const INSTR_PING: u8 = 0x01;
pub const INSTR_READ: u8 = 0x02;
pub const INSTR_WRITE: u8 = 0x03;

pub fn checksum(data: &[u8]) -> u8 {
    let mut s: u8 = 0;
    for &b in data {
        s = s.wrapping_add(b);
    }
    !s
}

/// Build an instruction packet.
pub fn encode(id: u8, instr: u8, params: &[u8]) -> Vec<u8> {
    let length = (params.len() + 2) as u8;
    let mut pkt = Vec::with_capacity(6 + params.len());
    pkt.extend_from_slice(&HEADER);
    pkt.push(id);
    pkt.push(length);
    pkt.push(instr);
    pkt.extend_from_slice(params);
    pkt.push(checksum(&pkt[2..]));
    pkt
}

pub fn send_packet<P: Write>(port: &mut P, id: u8, instr: u8, params: &[u8]) -> BusResult<()> {
    port.write_all(&encode(id, instr, params))?;
    port.flush()?;
    Ok(())
}

/// Decoded status packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub id: u8,
    pub error: u8,
    pub params: Vec<u8>,
}

fn map_read_error(id: u8, e: io::Error) -> BusError {
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::UnexpectedEof => {
            BusError::CommunicationTimeout { id }
        }
        _ => BusError::Io(e),
    }
}

/// Read one status packet sent by `expected_id`.
///
/// Packets from other ids, late answers to earlier requests, are dropped
/// until the expected one arrives or the read times out. A read timeout
/// surfaces as [`BusError::CommunicationTimeout`], never as a zero reading.
/// Non-zero error flags surface as [`BusError::Status`].
pub fn read_status<P: Read>(port: &mut P, expected_id: u8) -> BusResult<Status> {
    loop {
        let mut hdr = [0u8; 4];
        port.read_exact(&mut hdr)
            .map_err(|e| map_read_error(expected_id, e))?;
        if hdr[..2] != HEADER {
            return Err(BusError::Protocol {
                id: expected_id,
                reason: "bad header",
            });
        }
        let (id, len) = (hdr[2], hdr[3] as usize);
        if len < 2 {
            return Err(BusError::Protocol {
                id: expected_id,
                reason: "short length",
            });
        }
        let mut rest = vec![0u8; len];
        port.read_exact(&mut rest)
            .map_err(|e| map_read_error(expected_id, e))?;
        if id != expected_id {
            log::debug!("motor {expected_id}: dropped a packet from id {id}");
            continue;
        }

        let mut summed = Vec::with_capacity(len + 1);
        summed.extend_from_slice(&hdr[2..]);
        summed.extend_from_slice(&rest[..len - 1]);
        if checksum(&summed) != rest[len - 1] {
            return Err(BusError::Protocol {
                id,
                reason: "checksum mismatch",
            });
        }

        let status = Status {
            id,
            error: rest[0],
            params: rest[1..len - 1].to_vec(),
        };
        if status.error != 0 {
            return Err(BusError::Status {
                id,
                flags: status.error,
            });
        }
        return Ok(status);
    }
}

/// Encode a status packet. Used by the simulated bus and in tests.
pub fn encode_status(id: u8, error: u8, params: &[u8]) -> Vec<u8> {
    encode(id, error, params)
}
