//! # MQTT Serialization Utilities
//!
//! Helpers for reading and writing MQTT 3.1.1 primitive types from and to byte
//! buffers: variable-byte integers, two-byte integers and length-prefixed
//! strings. All writers advance a cursor and fail with `BufferTooSmall` rather
//! than panicking when the buffer runs out.

use crate::error::{CodecError, MqttError, ProtocolError};

/// Largest value representable by a four byte variable-byte integer.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Reads a variable-byte integer from the buffer, advancing the cursor.
///
/// This is the encoding MQTT uses for the remaining length of a packet: seven
/// value bits per byte, least significant group first, high bit set on every
/// byte but the last. More than four bytes is malformed.
pub fn read_variable_byte_integer(cursor: &mut usize, buf: &[u8]) -> Result<usize, CodecError> {
    let tail = buf.get(*cursor..).unwrap_or_default();
    let mut value = 0usize;
    for (i, &byte) in tail.iter().take(4).enumerate() {
        value |= usize::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            *cursor += i + 1;
            return Ok(value);
        }
    }
    // Either the buffer ended mid-integer or a fifth byte was announced.
    Err(MqttError::Protocol(ProtocolError::MalformedPacket))
}

/// Writes a variable-byte integer at the start of `buf` and returns the byte count.
pub fn write_variable_byte_integer_len(buf: &mut [u8], val: usize) -> Result<usize, CodecError> {
    if val > MAX_REMAINING_LENGTH {
        return Err(MqttError::Protocol(ProtocolError::PayloadTooLarge));
    }
    let len = variable_byte_integer_len(val);
    let out = buf.get_mut(..len).ok_or(MqttError::BufferTooSmall)?;
    let mut rest = val;
    for (i, slot) in out.iter_mut().enumerate() {
        let continuation = if i + 1 < len { 0x80 } else { 0 };
        *slot = (rest & 0x7F) as u8 | continuation;
        rest >>= 7;
    }
    Ok(len)
}

/// Number of bytes `val` occupies as a variable-byte integer.
pub fn variable_byte_integer_len(val: usize) -> usize {
    match val {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}

/// Reads a big-endian two-byte integer, advancing the cursor.
pub fn read_u16(cursor: &mut usize, buf: &[u8]) -> Result<u16, CodecError> {
    let bytes = buf
        .get(*cursor..*cursor + 2)
        .ok_or(MqttError::Protocol(ProtocolError::MalformedPacket))?;
    *cursor += 2;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Writes a single byte, advancing the cursor.
pub fn write_u8(cursor: &mut usize, buf: &mut [u8], val: u8) -> Result<(), CodecError> {
    *buf.get_mut(*cursor).ok_or(MqttError::BufferTooSmall)? = val;
    *cursor += 1;
    Ok(())
}

/// Writes a big-endian two-byte integer, advancing the cursor.
pub fn write_u16(cursor: &mut usize, buf: &mut [u8], val: u16) -> Result<(), CodecError> {
    write_bytes(cursor, buf, &val.to_be_bytes())
}

/// Copies raw bytes into the buffer, advancing the cursor.
pub fn write_bytes(cursor: &mut usize, buf: &mut [u8], bytes: &[u8]) -> Result<(), CodecError> {
    buf.get_mut(*cursor..*cursor + bytes.len())
        .ok_or(MqttError::BufferTooSmall)?
        .copy_from_slice(bytes);
    *cursor += bytes.len();
    Ok(())
}

/// Writes binary data prefixed with its two-byte length.
pub fn write_binary_data(cursor: &mut usize, buf: &mut [u8], data: &[u8]) -> Result<(), CodecError> {
    let len =
        u16::try_from(data.len()).map_err(|_| MqttError::Protocol(ProtocolError::PayloadTooLarge))?;
    write_u16(cursor, buf, len)?;
    write_bytes(cursor, buf, data)
}

/// Writes a UTF-8 encoded string prefixed with its two-byte length.
pub fn write_utf8_string(cursor: &mut usize, buf: &mut [u8], s: &str) -> Result<(), CodecError> {
    write_binary_data(cursor, buf, s.as_bytes())
}

/// Reads a UTF-8 encoded string prefixed with its two-byte length.
pub fn read_utf8_string<'a>(cursor: &mut usize, buf: &'a [u8]) -> Result<&'a str, CodecError> {
    let len = read_u16(cursor, buf)? as usize;
    let bytes = buf
        .get(*cursor..*cursor + len)
        .ok_or(MqttError::Protocol(ProtocolError::MalformedPacket))?;
    let s = core::str::from_utf8(bytes)
        .map_err(|_| MqttError::Protocol(ProtocolError::InvalidUtf8String))?;
    *cursor += len;
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variable_byte_integer_boundaries() {
        let cases: [(usize, &[u8]); 6] = [
            (0, &[0x00]),
            (127, &[0x7F]),
            (128, &[0x80, 0x01]),
            (16_383, &[0xFF, 0x7F]),
            (16_384, &[0x80, 0x80, 0x01]),
            (MAX_REMAINING_LENGTH, &[0xFF, 0xFF, 0xFF, 0x7F]),
        ];
        for (value, encoded) in cases {
            let mut buf = [0u8; 4];
            let len = write_variable_byte_integer_len(&mut buf, value).unwrap();
            assert_eq!(&buf[..len], encoded);
            assert_eq!(variable_byte_integer_len(value), len);

            let mut cursor = 0;
            assert_eq!(read_variable_byte_integer(&mut cursor, encoded).unwrap(), value);
            assert_eq!(cursor, encoded.len());
        }
    }

    #[test]
    fn variable_byte_integer_rejects_fifth_byte() {
        let mut cursor = 0;
        let err = read_variable_byte_integer(&mut cursor, &[0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
        assert!(matches!(err, Err(MqttError::Protocol(ProtocolError::MalformedPacket))));
        assert_eq!(cursor, 0);
    }

    #[test]
    fn variable_byte_integer_rejects_oversized_value() {
        let mut buf = [0u8; 4];
        let err = write_variable_byte_integer_len(&mut buf, MAX_REMAINING_LENGTH + 1);
        assert!(matches!(err, Err(MqttError::Protocol(ProtocolError::PayloadTooLarge))));
    }

    #[test]
    fn truncated_varint_is_malformed() {
        let mut cursor = 0;
        let err = read_variable_byte_integer(&mut cursor, &[0x80]);
        assert!(matches!(err, Err(MqttError::Protocol(ProtocolError::MalformedPacket))));
    }

    #[test]
    fn strings_are_length_prefixed() {
        let mut buf = [0u8; 8];
        let mut cursor = 0;
        write_utf8_string(&mut cursor, &mut buf, "MQTT").unwrap();
        assert_eq!(&buf[..cursor], &[0x00, 0x04, b'M', b'Q', b'T', b'T']);

        let mut read = 0;
        assert_eq!(read_utf8_string(&mut read, &buf).unwrap(), "MQTT");
        assert_eq!(read, 6);
    }

    #[test]
    fn writers_report_short_buffers() {
        let mut buf = [0u8; 3];
        let mut cursor = 0;
        let err = write_utf8_string(&mut cursor, &mut buf, "MQTT");
        assert!(matches!(err, Err(MqttError::BufferTooSmall)));

        let mut cursor = 3;
        assert!(matches!(
            write_u8(&mut cursor, &mut buf, 1),
            Err(MqttError::BufferTooSmall)
        ));
    }

    #[test]
    fn read_u16_is_big_endian() {
        let mut cursor = 1;
        assert_eq!(read_u16(&mut cursor, &[0xFF, 0x12, 0x34]).unwrap(), 0x1234);
        assert_eq!(cursor, 3);
        assert!(read_u16(&mut cursor, &[0xFF, 0x12, 0x34]).is_err());
    }
}
