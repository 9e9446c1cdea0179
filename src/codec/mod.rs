//! MQTT Packet Codec
//!
//! Byte-level encoding and decoding of MQTT v3.1.1 control packets. The
//! endpoint state machine never touches bytes; the per-connection task runs
//! this codec between the socket and the endpoint.
//!
//! CONNECT is accepted at protocol level 4 ("MQTT") and, for older clients,
//! level 3 ("MQIsdp"). Any other level fails with
//! `DecodeError::UnsupportedProtocolVersion`, which the endpoint answers with
//! CONNACK 1.

mod decode;
mod encode;

#[cfg(test)]
mod tests;

pub use decode::Decoder;
pub use encode::Encoder;

use bytes::{BufMut, BytesMut};

use crate::protocol::{DecodeError, EncodeError};

/// Largest value the four-byte remaining length field can carry
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Packet size limit used when none is configured (1 MiB)
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1024 * 1024;

/// Decode the remaining length field at the start of `buf`.
///
/// Returns the value and the number of bytes it occupied (1 to 4).
pub(crate) fn read_remaining_length(buf: &[u8]) -> Result<(u32, usize), DecodeError> {
    let mut value = 0u32;
    for (i, &byte) in buf.iter().take(4).enumerate() {
        value |= u32::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    if buf.len() >= 4 {
        // Continuation bit still set on the fourth byte
        Err(DecodeError::InvalidRemainingLength)
    } else {
        Err(DecodeError::InsufficientData)
    }
}

/// Append `value` as a remaining length field, returning its width
pub(crate) fn write_remaining_length(buf: &mut BytesMut, value: u32) -> Result<usize, EncodeError> {
    if value as usize > MAX_REMAINING_LENGTH {
        return Err(EncodeError::PacketTooLarge);
    }
    let mut rest = value;
    let mut width = 0;
    loop {
        let digit = (rest & 0x7F) as u8;
        rest >>= 7;
        width += 1;
        if rest == 0 {
            buf.put_u8(digit);
            return Ok(width);
        }
        buf.put_u8(digit | 0x80);
    }
}

pub(crate) fn read_u16(buf: &[u8]) -> Result<u16, DecodeError> {
    match buf {
        [hi, lo, ..] => Ok(u16::from_be_bytes([*hi, *lo])),
        _ => Err(DecodeError::InsufficientData),
    }
}

/// Length-prefixed bytes; returns the data and the total bytes consumed
pub(crate) fn read_prefixed(buf: &[u8]) -> Result<(&[u8], usize), DecodeError> {
    let len = usize::from(read_u16(buf)?);
    let data = buf.get(2..2 + len).ok_or(DecodeError::InsufficientData)?;
    Ok((data, 2 + len))
}

/// Length-prefixed UTF-8 string without NUL characters [MQTT-1.5.3-2]
pub(crate) fn read_string(buf: &[u8]) -> Result<(&str, usize), DecodeError> {
    let (data, consumed) = read_prefixed(buf)?;
    let s = std::str::from_utf8(data).map_err(|_| DecodeError::InvalidUtf8)?;
    if s.contains('\0') {
        return Err(DecodeError::MalformedPacket(
            "string contains null character",
        ));
    }
    Ok((s, consumed))
}

pub(crate) fn write_prefixed(buf: &mut BytesMut, data: &[u8]) -> Result<(), EncodeError> {
    let len = u16::try_from(data.len()).map_err(|_| EncodeError::StringTooLong)?;
    buf.put_u16(len);
    buf.put_slice(data);
    Ok(())
}

pub(crate) fn write_string(buf: &mut BytesMut, s: &str) -> Result<(), EncodeError> {
    write_prefixed(buf, s.as_bytes())
}
