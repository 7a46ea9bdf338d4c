use std::io::{self, Read};
use std::time::{Duration, Instant};

use crate::error::TransportError;

pub const FC_READ_HOLDING: u8 = 0x03;
pub const FC_WRITE_SINGLE: u8 = 0x06;

const EXCEPTION_FLAG: u8 = 0x80;

/// Largest block a single FC03 request may ask for.
pub const MAX_READ_QUANTITY: u16 = 125;

pub fn crc16_modbus(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for byte in data {
        crc ^= u16::from(*byte);
        for _ in 0..8 {
            if crc & 1 == 1 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

pub fn append_crc(frame: &[u8]) -> Vec<u8> {
    let crc = crc16_modbus(frame);
    let mut out = Vec::with_capacity(frame.len() + 2);
    out.extend_from_slice(frame);
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

pub fn validate_crc(frame: &[u8]) -> Result<(), TransportError> {
    if frame.len() < 4 {
        return Err(TransportError::Framing(format!(
            "rtu frame too short: {} bytes",
            frame.len()
        )));
    }
    let body_len = frame.len() - 2;
    let expected = crc16_modbus(&frame[..body_len]);
    let seen = u16::from_le_bytes([frame[body_len], frame[body_len + 1]]);
    if expected != seen {
        return Err(TransportError::Framing(format!(
            "invalid frame crc: expected 0x{expected:04X}, got 0x{seen:04X}"
        )));
    }
    Ok(())
}

/// The two request shapes the inverter is driven with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    ReadHoldingRegisters { quantity: u16 },
    WriteSingleRegister { value: u16 },
}

impl Function {
    pub const fn code(self) -> u8 {
        match self {
            Self::ReadHoldingRegisters { .. } => FC_READ_HOLDING,
            Self::WriteSingleRegister { .. } => FC_WRITE_SINGLE,
        }
    }
}

pub fn build_request(slave: u8, function: Function, address: u16) -> Result<Vec<u8>, TransportError> {
    let word = match function {
        Function::ReadHoldingRegisters { quantity } => {
            if quantity == 0 || quantity > MAX_READ_QUANTITY {
                return Err(TransportError::Framing(format!(
                    "read quantity {quantity} outside 1..={MAX_READ_QUANTITY}"
                )));
            }
            quantity
        }
        Function::WriteSingleRegister { value } => value,
    };
    let [addr_hi, addr_lo] = address.to_be_bytes();
    let [word_hi, word_lo] = word.to_be_bytes();
    Ok(append_crc(&[
        slave,
        function.code(),
        addr_hi,
        addr_lo,
        word_hi,
        word_lo,
    ]))
}

/// Number of bytes still to read once the two-byte header (address,
/// function) and, for reads, the byte-count octet are known.
pub fn remaining_len(function_byte: u8, byte_count: Option<u8>) -> usize {
    if function_byte & EXCEPTION_FLAG != 0 {
        // exception code + crc
        return 3;
    }
    match function_byte {
        FC_READ_HOLDING => usize::from(byte_count.unwrap_or(0)) + 2,
        // echoed address + value + crc
        _ => 6,
    }
}

/// Validates a complete response frame against the request it answers and
/// returns the register values it carries. A write answers with the echoed
/// value.
pub fn parse_response(
    frame: &[u8],
    slave: u8,
    function: Function,
    address: u16,
) -> Result<Vec<u16>, TransportError> {
    validate_crc(frame)?;
    if frame[0] != slave {
        return Err(TransportError::Framing(format!(
            "unexpected response address: expected 0x{slave:02X}, got 0x{:02X}",
            frame[0]
        )));
    }

    let code = function.code();
    if frame[1] == (code | EXCEPTION_FLAG) {
        return Err(TransportError::Exception(describe_exception(code, frame[2])));
    }
    if frame[1] != code {
        return Err(TransportError::Framing(format!(
            "unexpected response function: expected 0x{code:02X}, got 0x{:02X}",
            frame[1]
        )));
    }

    match function {
        Function::ReadHoldingRegisters { quantity } => {
            let count = usize::from(frame[2]);
            if count != usize::from(quantity) * 2 || frame.len() != count + 5 {
                return Err(TransportError::Framing(format!(
                    "read response length mismatch: count={count}, frame_len={}, quantity={quantity}",
                    frame.len()
                )));
            }
            Ok(frame[3..3 + count]
                .chunks_exact(2)
                .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
                .collect())
        }
        Function::WriteSingleRegister { value } => {
            if frame.len() != 8 {
                return Err(TransportError::Framing(format!(
                    "write response length mismatch: got {}",
                    frame.len()
                )));
            }
            let echoed_address = u16::from_be_bytes([frame[2], frame[3]]);
            let echoed_value = u16::from_be_bytes([frame[4], frame[5]]);
            if echoed_address != address || echoed_value != value {
                return Err(TransportError::Framing(format!(
                    "write response echo mismatch: 0x{echoed_address:04X}={echoed_value} expected 0x{address:04X}={value}"
                )));
            }
            Ok(vec![echoed_value])
        }
    }
}

fn describe_exception(function: u8, exception: u8) -> String {
    let meaning = match exception {
        0x01 => "illegal function",
        0x02 => "illegal data address",
        0x03 => "illegal data value",
        0x04 => "slave device failure",
        0x06 => "slave device busy",
        _ => "unknown",
    };
    format!("function 0x{function:02X} code 0x{exception:02X} ({meaning})")
}

/// Reads exactly `len` bytes, giving up once `deadline` has passed.
///
/// Serial ports report an elapsed read timeout as `TimedOut` or
/// `WouldBlock`; both are retried until the deadline.
pub fn read_exact_with_deadline<R: Read + ?Sized>(
    link: &mut R,
    len: usize,
    deadline: Instant,
    timeout: Duration,
) -> Result<Vec<u8>, TransportError> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        if Instant::now() >= deadline {
            return Err(TransportError::Timeout(timeout));
        }
        match link.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(TransportError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "serial link closed",
                )));
            }
            Ok(n) => filled += n,
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) => {}
            Err(err) => return Err(TransportError::Io(err)),
        }
    }
    Ok(buf)
}
