use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::wire::codec;
use crate::wire::codec::WireError;
use crate::wire::{Chunk, CHUNK_SIZE};

/// Serializing archive emitter shared by any number of concurrent producers.
///
/// Each logical file gets its own [`FileSink`]; all sinks funnel their
/// records through one mutex around the underlying writer, so a record's
/// header and payload are always contiguous in the output no matter how many
/// sinks are writing at once.
pub struct ArchiveWriter<W: Write> {
    inner: Arc<Mutex<W>>,
    chunk_size: usize,
}

impl<W: Write> ArchiveWriter<W> {
    pub fn new(writer: W) -> Self {
        Self::with_chunk_size(writer, CHUNK_SIZE)
    }

    pub fn with_chunk_size(writer: W, chunk_size: usize) -> Self {
        ArchiveWriter {
            inner: Arc::new(Mutex::new(writer)),
            chunk_size: chunk_size.max(1),
        }
    }

    /// Opens a sink for one logical file path.
    pub fn create(&self, path: &str) -> FileSink<W> {
        FileSink {
            inner: self.inner.clone(),
            path: path.to_string(),
            offset: 0,
            chunk_size: self.chunk_size,
        }
    }

    /// Flushes and returns the underlying writer. All sinks must be closed
    /// or dropped first.
    pub fn finish(self) -> Result<W, WireError> {
        let mutex = Arc::try_unwrap(self.inner).map_err(|_| WireError::SinksOpen)?;
        let mut writer = mutex.into_inner().map_err(|_| WireError::Poisoned)?;
        writer.flush()?;
        Ok(writer)
    }
}

/// Write handle for one logical file within the archive.
pub struct FileSink<W: Write> {
    inner: Arc<Mutex<W>>,
    path: String,
    offset: u64,
    chunk_size: usize,
}

impl<W: Write> FileSink<W> {
    /// Appends bytes to the logical file, fragmenting them into payload
    /// records no larger than the configured chunk size. Each record carries
    /// the cumulative offset of the bytes written for this path so far.
    pub fn write(&mut self, data: &[u8]) -> Result<(), WireError> {
        for fragment in data.chunks(self.chunk_size) {
            let chunk = Chunk::payload(&self.path, self.offset, fragment.to_vec());
            {
                let mut writer = self.inner.lock().map_err(|_| WireError::Poisoned)?;
                codec::encode(&mut *writer, &chunk)?;
            }
            self.offset += fragment.len() as u64;
        }
        Ok(())
    }

    /// Terminates the logical file with its single end-of-file record.
    pub fn close(self) -> Result<(), WireError> {
        let chunk = Chunk::eof(&self.path, self.offset);
        let mut writer = self.inner.lock().map_err(|_| WireError::Poisoned)?;
        codec::encode(&mut *writer, &chunk)?;
        Ok(())
    }
}

#[cfg(test)]
mod test_archive_writer {
    use super::*;
    use crate::wire::reader::ArchiveReader;
    use crate::wire::ChunkType;
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::thread;

    fn replay(data: Vec<u8>) -> Vec<Chunk> {
        ArchiveReader::new(Cursor::new(data))
            .map(|chunk| chunk.unwrap())
            .collect()
    }

    #[test]
    fn single_file_fragmentation() {
        let writer = ArchiveWriter::with_chunk_size(Vec::new(), 4);
        let mut sink = writer.create("f");
        sink.write(b"0123456789").unwrap();
        sink.close().unwrap();

        let chunks = replay(writer.finish().unwrap());
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].payload, b"0123");
        assert_eq!(chunks[0].offset, 0);
        assert_eq!(chunks[1].payload, b"4567");
        assert_eq!(chunks[1].offset, 4);
        assert_eq!(chunks[2].payload, b"89");
        assert_eq!(chunks[2].offset, 8);
        assert_eq!(chunks[3].typ, ChunkType::Eof);
        assert_eq!(chunks[3].offset, 10);
    }

    #[test]
    fn offsets_accumulate_across_writes() {
        let writer = ArchiveWriter::with_chunk_size(Vec::new(), 16);
        let mut sink = writer.create("f");
        sink.write(b"aaa").unwrap();
        sink.write(b"bbb").unwrap();
        sink.close().unwrap();

        let chunks = replay(writer.finish().unwrap());
        assert_eq!(chunks[0].offset, 0);
        assert_eq!(chunks[1].offset, 3);
        assert_eq!(chunks[2].offset, 6);
    }

    #[test]
    fn empty_file_is_eof_only() {
        let writer = ArchiveWriter::new(Vec::new());
        let sink = writer.create("empty");
        sink.close().unwrap();

        let chunks = replay(writer.finish().unwrap());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].typ, ChunkType::Eof);
        assert_eq!(chunks[0].offset, 0);
    }

    #[test]
    fn finish_refuses_open_sinks() {
        let writer = ArchiveWriter::new(Vec::new());
        let sink = writer.create("f");
        assert!(matches!(writer.finish(), Err(WireError::SinksOpen)));
        drop(sink);
    }

    // Serialization invariant: concurrent sinks never interleave a record
    // header with another sink's payload, verified by replaying the output
    // through the reader and reassembling both files.
    #[test]
    fn concurrent_sinks_serialize() {
        let writer = ArchiveWriter::with_chunk_size(Vec::new(), 7);

        thread::scope(|scope| {
            for name in ["a", "b", "c", "d"] {
                let mut sink = writer.create(name);
                scope.spawn(move || {
                    let body = name.repeat(100);
                    for _ in 0..10 {
                        sink.write(body.as_bytes()).unwrap();
                    }
                    sink.close().unwrap();
                });
            }
        });

        let chunks = replay(writer.finish().unwrap());

        let mut contents: HashMap<String, Vec<u8>> = HashMap::new();
        let mut eofs: HashMap<String, usize> = HashMap::new();
        for chunk in &chunks {
            match chunk.typ {
                ChunkType::Payload => {
                    let body = contents.entry(chunk.path.clone()).or_default();
                    assert_eq!(chunk.offset as usize, body.len());
                    body.extend_from_slice(&chunk.payload);
                    assert!(chunk.verify());
                }
                ChunkType::Eof => *eofs.entry(chunk.path.clone()).or_default() += 1,
                ChunkType::Unknown(_) => panic!("unknown chunk in replay"),
            }
        }

        for name in ["a", "b", "c", "d"] {
            assert_eq!(contents[name], name.repeat(1000).into_bytes());
            assert_eq!(eofs[name], 1);
        }
    }
}
