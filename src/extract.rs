use std::collections::HashSet;
use std::io::Read;
use std::path::PathBuf;

use log::{trace, warn};
use thiserror::Error;

use crate::remote::{Remote, RemoteError};
use crate::session::{EofPolicy, UploadTracker};
use crate::wire::codec::WireError;
use crate::wire::reader::ArchiveReader;
use crate::wire::ChunkType;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("checksum mismatch for {path} at offset {offset}")]
    ChecksumMismatch { path: String, offset: u64 },
    #[error("unsupported chunk type {typ:#04x} for {path}")]
    UnknownChunk { typ: u8, path: String },
    #[error("stream ended before the end-of-file chunk")]
    MissingEof,
}

pub struct ExtractOptions {
    pub bucket: String,
    pub prefix: PathBuf,
    pub policy: EofPolicy,
    pub verify: bool,
}

pub struct FileFailure {
    pub path: String,
    pub error: ExtractError,
}

/// Per-file outcome of one consume run. A failed file never aborts the
/// stream; it is recorded here and its remaining chunks are skipped.
#[derive(Default)]
pub struct ExtractReport {
    pub completed: Vec<String>,
    pub failures: Vec<FileFailure>,
}

/// Drives the archive reader against the remote, one chunk at a time.
///
/// Processing is single-threaded and in strict stream order; part numbers
/// within a session must be contiguous and increasing, and stream order is
/// what guarantees that. Stream-level errors (malformed records, truncation,
/// checksum mismatch) are fatal; remote errors are contained to the file
/// that hit them.
pub fn extract<R: Read, S: Remote>(
    input: R,
    remote: &S,
    opts: &ExtractOptions,
) -> Result<ExtractReport, ExtractError> {
    let mut tracker = UploadTracker::new(remote, &opts.bucket, &opts.prefix, opts.policy);
    let mut report = ExtractReport::default();
    let mut dead: HashSet<String> = HashSet::new();

    for chunk in ArchiveReader::new(input) {
        let chunk = chunk?;
        trace!(
            "chunk {:?} path={} offset={} len={}",
            chunk.typ,
            chunk.path,
            chunk.offset,
            chunk.payload.len()
        );

        match chunk.typ {
            ChunkType::Unknown(typ) => {
                return Err(ExtractError::UnknownChunk {
                    typ,
                    path: chunk.path,
                });
            }

            // Terminal chunk of a file that already failed; its session is
            // gone, so the path is live again for any later chunks.
            ChunkType::Eof if dead.remove(&chunk.path) => {}

            ChunkType::Payload if dead.contains(&chunk.path) => {}

            ChunkType::Payload => {
                if opts.verify && !chunk.verify() {
                    return Err(ExtractError::ChecksumMismatch {
                        path: chunk.path,
                        offset: chunk.offset,
                    });
                }

                if let Err(err) = tracker.upload_part(&chunk.path, chunk.offset, &chunk.payload) {
                    warn!("upload failed for {}: {}", chunk.path, err);
                    if let Err(abort_err) = tracker.abort(&chunk.path) {
                        warn!("abort failed for {}: {}", chunk.path, abort_err);
                    }
                    dead.insert(chunk.path.clone());
                    report.failures.push(FileFailure {
                        path: chunk.path,
                        error: err.into(),
                    });
                }
            }

            ChunkType::Eof => match tracker.finalize(&chunk.path) {
                Ok(()) => report.completed.push(chunk.path),
                Err(err) => {
                    warn!("finalize failed for {}: {}", chunk.path, err);
                    report.failures.push(FileFailure {
                        path: chunk.path,
                        error: err.into(),
                    });
                }
            },
        }
    }

    // Anything still open never saw its end-of-file chunk
    for path in tracker.open_paths() {
        warn!("stream ended without end-of-file chunk for {}", path);
        if let Err(err) = tracker.abort(&path) {
            warn!("abort failed for {}: {}", path, err);
        }
        report.failures.push(FileFailure {
            path,
            error: ExtractError::MissingEof,
        });
    }

    Ok(report)
}
