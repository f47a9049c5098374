use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("VarInt longer than 5 bytes")]
    VarIntTooBig,
    #[error("Not enough data")]
    NotEnoughData,
    #[error("String too long: {0} > {1}")]
    StringTooLong(usize, usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Read a VarInt from the buffer.
pub fn read_varint(buf: &mut BytesMut) -> CodecResult<i32> {
    let mut value: i32 = 0;
    for shift in (0..35).step_by(7) {
        if !buf.has_remaining() {
            return Err(CodecError::NotEnoughData);
        }
        let byte = buf.get_u8();
        value |= ((byte & 0x7F) as i32) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(CodecError::VarIntTooBig)
}

/// Write a VarInt to the buffer.
pub fn write_varint(buf: &mut BytesMut, value: i32) {
    let mut rest = value as u32;
    loop {
        let byte = (rest & 0x7F) as u8;
        rest >>= 7;
        if rest == 0 {
            buf.put_u8(byte);
            return;
        }
        buf.put_u8(byte | 0x80);
    }
}

/// The encoded byte length of a VarInt.
pub fn varint_len(value: i32) -> usize {
    let mut rest = value as u32;
    let mut len = 1;
    while rest >= 0x80 {
        rest >>= 7;
        len += 1;
    }
    len
}

/// Read a wire string (varint-prefixed UTF-8) with a character cap.
pub fn read_string(buf: &mut BytesMut, max_chars: usize) -> CodecResult<String> {
    let len = read_varint(buf)? as usize;
    if len > max_chars * 4 {
        return Err(CodecError::StringTooLong(len, max_chars));
    }
    if buf.remaining() < len {
        return Err(CodecError::NotEnoughData);
    }
    let bytes = buf.split_to(len);
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Write a wire string.
pub fn write_string(buf: &mut BytesMut, s: &str) {
    write_varint(buf, s.len() as i32);
    buf.put_slice(s.as_bytes());
}

/// Read a UUID (128 bits, big endian).
pub fn read_uuid(buf: &mut BytesMut) -> CodecResult<Uuid> {
    if buf.remaining() < 16 {
        return Err(CodecError::NotEnoughData);
    }
    let mut bytes = [0u8; 16];
    buf.copy_to_slice(&mut bytes);
    Ok(Uuid::from_bytes(bytes))
}

/// Write a UUID.
pub fn write_uuid(buf: &mut BytesMut, uuid: &Uuid) {
    buf.put_slice(uuid.as_bytes());
}

/// Read a byte array with varint length prefix.
pub fn read_byte_array(buf: &mut BytesMut) -> CodecResult<Vec<u8>> {
    let len = read_varint(buf)? as usize;
    if buf.remaining() < len {
        return Err(CodecError::NotEnoughData);
    }
    Ok(buf.split_to(len).to_vec())
}

/// Write a byte array with varint length prefix.
pub fn write_byte_array(buf: &mut BytesMut, data: &[u8]) {
    write_varint(buf, data.len() as i32);
    buf.put_slice(data);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_known_encodings() {
        let cases = [
            (0, vec![0x00]),
            (127, vec![0x7F]),
            (128, vec![0x80, 0x01]),
            (25565, vec![0xDD, 0xC7, 0x01]),
            (-1, vec![0xFF, 0xFF, 0xFF, 0xFF, 0x0F]),
        ];
        for (value, bytes) in cases {
            let mut buf = BytesMut::new();
            write_varint(&mut buf, value);
            assert_eq!(buf.to_vec(), bytes, "encoding of {}", value);
            assert_eq!(varint_len(value), bytes.len());

            let mut buf = BytesMut::from(&bytes[..]);
            assert_eq!(read_varint(&mut buf).unwrap(), value);
        }
    }

    #[test]
    fn test_varint_truncated() {
        let mut buf = BytesMut::from(&[0x80u8][..]);
        assert!(matches!(
            read_varint(&mut buf),
            Err(CodecError::NotEnoughData)
        ));
    }

    #[test]
    fn test_varint_overlong() {
        let mut buf = BytesMut::from(&[0xFFu8, 0xFF, 0xFF, 0xFF, 0xFF, 0x01][..]);
        assert!(matches!(
            read_varint(&mut buf),
            Err(CodecError::VarIntTooBig)
        ));
    }

    #[test]
    fn test_string_cap() {
        let mut buf = BytesMut::new();
        write_string(&mut buf, "this is too long");
        assert!(matches!(
            read_string(&mut buf, 2),
            Err(CodecError::StringTooLong(16, 2))
        ));
    }

    #[test]
    fn test_string_roundtrip() {
        let mut buf = BytesMut::new();
        write_string(&mut buf, "spyglass");
        assert_eq!(read_string(&mut buf, 64).unwrap(), "spyglass");
    }
}
