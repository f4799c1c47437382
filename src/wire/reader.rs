use std::io::Read;

use crate::wire::codec;
use crate::wire::codec::WireError;
use crate::wire::Chunk;

/// Sequential chunk iterator over an archive stream.
///
/// Yields chunks in stream order without reordering or buffering beyond the
/// record currently being decoded. A clean end of stream terminates the
/// iterator; a malformed record is yielded as an error, and the format has no
/// resynchronization marker so callers must not continue past one.
pub struct ArchiveReader<R: Read> {
    inner: R,
}

impl<R: Read> ArchiveReader<R> {
    pub fn new(reader: R) -> Self {
        ArchiveReader { inner: reader }
    }
}

impl<R: Read> Iterator for ArchiveReader<R> {
    type Item = Result<Chunk, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        match codec::decode(&mut self.inner) {
            Ok(None) => None,
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Err(err) => Some(Err(err)),
        }
    }
}
