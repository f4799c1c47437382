use std::io::{ErrorKind, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use crate::wire::{Chunk, ChunkType, MAX_CHUNK_SIZE, MAX_PATH_LEN};

#[derive(Error, Debug)]
pub enum WireError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("chunk header truncated")]
    TruncatedHeader,
    #[error("chunk payload shorter than declared length")]
    TruncatedPayload,
    #[error("permitted max payload length exceeded")]
    MaxLength,
    #[error("permitted max path length exceeded")]
    PathLength,
    #[error("chunk path is not valid utf-8")]
    PathEncoding,
    #[error("varint field overflows u64")]
    VarintOverflow,
    #[error("archive writer still has open file sinks")]
    SinksOpen,
    #[error("archive writer lock poisoned")]
    Poisoned,
}

/// Decodes one chunk record. `Ok(None)` marks a clean end of stream, which
/// can only occur on a record boundary; running dry anywhere inside a record
/// is a truncation error.
pub fn decode<R: Read>(reader: &mut R) -> Result<Option<Chunk>, WireError> {
    let typ = match reader.read_u8() {
        Ok(byte) => ChunkType::from_byte(byte),
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let path_len = read_varint(reader)?;
    if path_len > MAX_PATH_LEN as u64 {
        return Err(WireError::PathLength);
    }
    let path = {
        let mut path = vec![0; path_len as usize];
        reader.read_exact(&mut path).map_err(header_eof)?;
        String::from_utf8(path).map_err(|_| WireError::PathEncoding)?
    };

    let offset = reader.read_u64::<BigEndian>().map_err(header_eof)?;
    let payload_len = reader.read_u64::<BigEndian>().map_err(header_eof)?;
    if payload_len > MAX_CHUNK_SIZE as u64 {
        return Err(WireError::MaxLength);
    }
    let checksum = reader.read_u32::<BigEndian>().map_err(header_eof)?;

    let payload = {
        let mut payload = vec![0; payload_len as usize];
        reader.read_exact(&mut payload).map_err(payload_eof)?;
        payload
    };

    Ok(Some(Chunk {
        typ,
        path,
        offset,
        checksum,
        payload,
    }))
}

/// Encodes one chunk record, returning the number of bytes written.
pub fn encode<W: Write>(writer: &mut W, chunk: &Chunk) -> Result<usize, WireError> {
    let path = chunk.path.as_bytes();
    if path.len() > MAX_PATH_LEN {
        return Err(WireError::PathLength);
    }

    let mut len = 1;
    writer.write_u8(chunk.typ.to_byte())?;
    len += write_varint(writer, path.len() as u64)?;
    writer.write_all(path)?;
    writer.write_u64::<BigEndian>(chunk.offset)?;
    writer.write_u64::<BigEndian>(chunk.payload.len() as u64)?;
    writer.write_u32::<BigEndian>(chunk.checksum)?;
    writer.write_all(&chunk.payload)?;
    len += path.len() + 8 + 8 + 4 + chunk.payload.len();

    Ok(len)
}

fn header_eof(err: std::io::Error) -> WireError {
    if err.kind() == ErrorKind::UnexpectedEof {
        WireError::TruncatedHeader
    } else {
        WireError::Io(err)
    }
}

fn payload_eof(err: std::io::Error) -> WireError {
    if err.kind() == ErrorKind::UnexpectedEof {
        WireError::TruncatedPayload
    } else {
        WireError::Io(err)
    }
}

// LEB128, 7 bits per byte, low bits first
fn read_varint<R: Read>(reader: &mut R) -> Result<u64, WireError> {
    let mut value: u64 = 0;
    let mut shift = 0;

    loop {
        let byte = reader.read_u8().map_err(header_eof)?;
        if shift == 63 && byte > 1 {
            return Err(WireError::VarintOverflow);
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift > 63 {
            return Err(WireError::VarintOverflow);
        }
    }
}

fn write_varint<W: Write>(writer: &mut W, mut value: u64) -> Result<usize, WireError> {
    let mut len = 0;
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        len += 1;
        if value == 0 {
            writer.write_u8(byte)?;
            return Ok(len);
        }
        writer.write_u8(byte | 0x80)?;
    }
}

#[cfg(test)]
mod test_varint {
    use super::*;
    use std::io::Cursor;

    fn round_trip(value: u64) -> (u64, usize) {
        let mut data = Vec::new();
        let len = write_varint(&mut data, value).unwrap();
        assert_eq!(data.len(), len);
        (read_varint(&mut Cursor::new(data)).unwrap(), len)
    }

    #[test]
    fn single_byte() {
        assert_eq!(round_trip(0), (0, 1));
        assert_eq!(round_trip(127), (127, 1));
    }

    #[test]
    fn multi_byte() {
        assert_eq!(round_trip(128), (128, 2));
        assert_eq!(round_trip(300), (300, 2));
        assert_eq!(round_trip(16384), (16384, 3));
    }

    #[test]
    fn max_value() {
        assert_eq!(round_trip(u64::MAX), (u64::MAX, 10));
    }

    #[test]
    fn overlong_rejected() {
        // 11 continuation bytes can never fit in a u64
        let data = vec![0x80u8; 10];
        assert!(matches!(
            read_varint(&mut Cursor::new(data)),
            Err(WireError::VarintOverflow)
        ));
    }

    #[test]
    fn truncated_is_header_error() {
        let data = vec![0x80u8];
        assert!(matches!(
            read_varint(&mut Cursor::new(data)),
            Err(WireError::TruncatedHeader)
        ));
    }
}
