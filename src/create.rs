use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread;

use log::{debug, warn};
use thiserror::Error;

use crate::wire::codec::WireError;
use crate::wire::writer::ArchiveWriter;

#[derive(Error, Debug)]
pub enum CreateError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub struct CreateOptions {
    pub workers: usize,
    pub chunk_size: usize,
}

/// Per-file outcome of one produce run. Unopenable inputs are skipped so the
/// rest of the archive still gets written; read or encode failures are
/// recorded and the run as a whole reports failure.
#[derive(Default)]
pub struct CreateReport {
    pub written: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub failures: Vec<(PathBuf, CreateError)>,
}

enum Outcome {
    Written,
    Skipped,
}

/// Packs the input files into one archive stream on `output`.
///
/// A fixed pool of workers pulls paths off a queue; each worker reads its
/// file in chunk-size blocks into a per-file sink, and the archive writer
/// serializes all sinks into the shared stream. The pool bounds open file
/// handles and in-flight buffers no matter how many inputs are given.
pub fn create<W: Write + Send>(
    output: W,
    inputs: &[PathBuf],
    opts: &CreateOptions,
) -> Result<CreateReport, CreateError> {
    let writer = ArchiveWriter::with_chunk_size(output, opts.chunk_size);
    let report = Mutex::new(CreateReport::default());

    let (queue_tx, queue_rx) = mpsc::channel::<PathBuf>();
    for path in inputs {
        // Receiver outlives the loop, send cannot fail here
        let _ = queue_tx.send(path.clone());
    }
    drop(queue_tx);
    let queue = Mutex::new(queue_rx);

    let workers = opts.workers.clamp(1, inputs.len().max(1));
    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let next = queue.lock().expect("worker queue poisoned").recv();
                let Ok(path) = next else { break };

                let outcome = pack_file(&writer, &path, opts.chunk_size);
                let mut report = report.lock().expect("report lock poisoned");
                match outcome {
                    Ok(Outcome::Written) => report.written.push(path),
                    Ok(Outcome::Skipped) => report.skipped.push(path),
                    Err(err) => {
                        warn!("failed to archive {}: {}", path.display(), err);
                        report.failures.push((path, err));
                    }
                }
            });
        }
    });

    let mut output = writer.finish()?;
    output.flush()?;

    Ok(report.into_inner().expect("report lock poisoned"))
}

fn pack_file<W: Write>(
    writer: &ArchiveWriter<W>,
    path: &Path,
    block_size: usize,
) -> Result<Outcome, CreateError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) => {
            warn!("unable to open file {}: {}", path.display(), err);
            return Ok(Outcome::Skipped);
        }
    };

    let name = path.to_string_lossy();
    let mut sink = writer.create(&name);
    let mut block = vec![0u8; block_size.max(1)];

    loop {
        let n = file.read(&mut block)?;
        if n == 0 {
            break;
        }
        sink.write(&block[..n])?;
    }
    sink.close()?;
    debug!("archived {}", name);

    Ok(Outcome::Written)
}

#[cfg(test)]
mod test_create {
    use super::*;
    use crate::wire::reader::ArchiveReader;
    use crate::wire::{Chunk, ChunkType};
    use std::collections::HashMap;
    use std::io::Cursor;

    fn options(chunk_size: usize) -> CreateOptions {
        CreateOptions {
            workers: 4,
            chunk_size,
        }
    }

    fn write_input(dir: &tempfile::TempDir, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn reassemble(archive: Vec<u8>) -> HashMap<String, (Vec<u8>, usize)> {
        let mut files: HashMap<String, (Vec<u8>, usize)> = HashMap::new();
        for chunk in ArchiveReader::new(Cursor::new(archive)) {
            let chunk: Chunk = chunk.unwrap();
            let entry = files.entry(chunk.path.clone()).or_default();
            match chunk.typ {
                ChunkType::Payload => {
                    assert_eq!(chunk.offset as usize, entry.0.len());
                    assert!(chunk.verify());
                    entry.0.extend_from_slice(&chunk.payload);
                }
                ChunkType::Eof => entry.1 += 1,
                ChunkType::Unknown(_) => panic!("unknown chunk"),
            }
        }
        files
    }

    #[test]
    fn two_files_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_input(&dir, "ten.dat", b"0123456789");
        let b = write_input(&dir, "five.dat", b"abcde");

        let mut sink = Vec::new();
        let report = create(&mut sink, &[a.clone(), b.clone()], &options(4)).unwrap();
        assert!(report.failures.is_empty());
        assert_eq!(report.written.len(), 2);

        let files = reassemble(sink);
        let (content, eofs) = &files[a.to_string_lossy().as_ref()];
        assert_eq!(content, b"0123456789");
        assert_eq!(*eofs, 1);
        let (content, eofs) = &files[b.to_string_lossy().as_ref()];
        assert_eq!(content, b"abcde");
        assert_eq!(*eofs, 1);
    }

    #[test]
    fn archive_content_reconstructs() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_input(&dir, "ten.dat", b"0123456789");
        let b = write_input(&dir, "five.dat", b"abcde");

        let mut sink = Vec::new();
        let writer = ArchiveWriter::with_chunk_size(&mut sink, 4);
        pack_file(&writer, &a, 4).unwrap();
        pack_file(&writer, &b, 4).unwrap();
        writer.finish().unwrap();

        let files = reassemble(sink);
        let (content, eofs) = &files[a.to_string_lossy().as_ref()];
        assert_eq!(content, b"0123456789");
        assert_eq!(*eofs, 1);
        let (content, eofs) = &files[b.to_string_lossy().as_ref()];
        assert_eq!(content, b"abcde");
        assert_eq!(*eofs, 1);
    }

    #[test]
    fn empty_file_archives_as_eof_only() {
        let dir = tempfile::tempdir().unwrap();
        let empty = write_input(&dir, "empty.dat", b"");

        let mut sink = Vec::new();
        let writer = ArchiveWriter::new(&mut sink);
        pack_file(&writer, &empty, 8).unwrap();
        writer.finish().unwrap();

        let files = reassemble(sink);
        let (content, eofs) = &files[empty.to_string_lossy().as_ref()];
        assert!(content.is_empty());
        assert_eq!(*eofs, 1);
    }

    #[test]
    fn missing_file_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let real = write_input(&dir, "real.dat", b"data");
        let ghost = dir.path().join("ghost.dat");

        let report = create(Vec::new(), &[ghost.clone(), real.clone()], &options(8)).unwrap();

        assert_eq!(report.skipped, vec![ghost]);
        assert_eq!(report.written, vec![real]);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn many_files_bounded_pool() {
        let dir = tempfile::tempdir().unwrap();
        let inputs: Vec<PathBuf> = (0..32)
            .map(|i| write_input(&dir, &format!("f{}.dat", i), format!("file {}", i).as_bytes()))
            .collect();

        let opts = CreateOptions {
            workers: 3,
            chunk_size: 4,
        };
        let report = create(Vec::new(), &inputs, &opts).unwrap();

        assert_eq!(report.written.len(), 32);
        assert!(report.failures.is_empty());
    }
}
