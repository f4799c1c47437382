use std::cell::Cell;

use rusqlite as rs;
use rusqlite::Connection;

use crate::hash;
use crate::remote::{Remote, RemoteError, UploadedPart};

/// Sqlite-backed remote, in-memory by default.
///
/// Implements the same multipart contract as the real store, including the
/// rejection of empty completions and of parts for unknown or resolved
/// uploads, so the upload state machine can be exercised without a bucket.
pub struct MemoryRemote {
    conn: Connection,
    next_upload: Cell<u64>,
}

fn unavailable(err: rs::Error) -> RemoteError {
    RemoteError::Unavailable(err.to_string())
}

impl MemoryRemote {
    pub fn new(filename: Option<&str>) -> Result<Self, RemoteError> {
        let conn = match filename {
            None => Connection::open_in_memory(),
            Some(f) => Connection::open(f),
        }
        .map_err(unavailable)?;

        // Setup the db
        conn.execute_batch(
            "BEGIN;
             CREATE TABLE upload (
                uid VARCHAR NOT NULL,
                bucket VARCHAR NOT NULL,
                key VARCHAR NOT NULL,
                state VARCHAR NOT NULL,
                UNIQUE(uid)
             );
             CREATE TABLE part (
                uid VARCHAR NOT NULL,
                part_number INTEGER NOT NULL,
                part_offset INTEGER NOT NULL,
                etag VARCHAR NOT NULL,
                content BLOB NOT NULL,
                UNIQUE(uid, part_number)
             );
             CREATE TABLE object (
                bucket VARCHAR NOT NULL,
                key VARCHAR NOT NULL,
                content BLOB NOT NULL,
                UNIQUE(bucket, key)
             );
             COMMIT;",
        )
        .map_err(unavailable)?;

        Ok(MemoryRemote {
            conn,
            next_upload: Cell::new(1),
        })
    }

    fn open_upload(&self, upload_id: &str) -> Result<(String, String), rs::Error> {
        self.conn
            .prepare_cached(
                "SELECT bucket, key
                 FROM upload
                 WHERE uid = ?
                 AND state = 'open'",
            )?
            .query_row(rs::params![upload_id], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
    }
}

impl Remote for MemoryRemote {
    fn create_upload(&self, bucket: &str, key: &str) -> Result<String, RemoteError> {
        let uid = format!("upload-{}", self.next_upload.get());
        self.next_upload.set(self.next_upload.get() + 1);

        self.conn
            .prepare_cached(
                "INSERT INTO upload
                 (uid, bucket, key, state)
                 VALUES
                 (?, ?, ?, 'open')",
            )
            .and_then(|mut stmt| stmt.execute(rs::params![uid, bucket, key]))
            .map_err(|err| RemoteError::Create {
                key: key.to_string(),
                message: err.to_string(),
            })?;

        Ok(uid)
    }

    fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        offset: u64,
        body: &[u8],
    ) -> Result<UploadedPart, RemoteError> {
        let fail = |message: String| RemoteError::UploadPart {
            key: key.to_string(),
            part_number,
            message,
        };

        let (up_bucket, up_key) = self
            .open_upload(upload_id)
            .map_err(|_| fail(format!("no open upload {}", upload_id)))?;
        if up_bucket != bucket || up_key != key {
            return Err(fail("upload id does not match bucket/key".to_string()));
        }

        let etag = format!("{:08x}", hash::checksum(body));
        self.conn
            .prepare_cached(
                "INSERT INTO part
                 (uid, part_number, part_offset, etag, content)
                 VALUES
                 (?, ?, ?, ?, ?)",
            )
            .and_then(|mut stmt| {
                stmt.execute(rs::params![upload_id, part_number, offset as i64, etag, body])
            })
            .map_err(|err| fail(err.to_string()))?;

        Ok(UploadedPart { part_number, etag })
    }

    fn complete_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<(), RemoteError> {
        let fail = |message: String| RemoteError::Complete {
            key: key.to_string(),
            message,
        };

        if parts.is_empty() {
            return Err(fail("must specify at least one part".to_string()));
        }

        let (up_bucket, up_key) = self
            .open_upload(upload_id)
            .map_err(|_| fail(format!("no open upload {}", upload_id)))?;
        if up_bucket != bucket || up_key != key {
            return Err(fail("upload id does not match bucket/key".to_string()));
        }

        // Assemble in the caller's declared part order, validating tags
        let mut content = Vec::new();
        for part in parts {
            let (etag, data): (String, Vec<u8>) = self
                .conn
                .prepare_cached(
                    "SELECT etag, content
                     FROM part
                     WHERE uid = ?
                     AND part_number = ?",
                )
                .and_then(|mut stmt| {
                    stmt.query_row(rs::params![upload_id, part.part_number], |row| {
                        Ok((row.get(0)?, row.get(1)?))
                    })
                })
                .map_err(|_| fail(format!("part {} was never uploaded", part.part_number)))?;

            if etag != part.etag {
                return Err(fail(format!("etag mismatch on part {}", part.part_number)));
            }
            content.extend_from_slice(&data);
        }

        self.conn
            .execute(
                "INSERT OR REPLACE INTO object
                 (bucket, key, content)
                 VALUES
                 (?, ?, ?)",
                rs::params![bucket, key, content],
            )
            .map_err(|err| fail(err.to_string()))?;

        self.resolve(upload_id, "completed").map_err(|err| fail(err.to_string()))
    }

    fn abort_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<(), RemoteError> {
        let fail = |message: String| RemoteError::Abort {
            key: key.to_string(),
            message,
        };

        let (up_bucket, up_key) = self
            .open_upload(upload_id)
            .map_err(|_| fail(format!("no open upload {}", upload_id)))?;
        if up_bucket != bucket || up_key != key {
            return Err(fail("upload id does not match bucket/key".to_string()));
        }

        self.resolve(upload_id, "aborted").map_err(|err| fail(err.to_string()))
    }
}

impl MemoryRemote {
    fn resolve(&self, upload_id: &str, state: &str) -> Result<(), rs::Error> {
        self.conn.execute(
            "UPDATE upload SET state = ? WHERE uid = ?",
            rs::params![state, upload_id],
        )?;
        self.conn.execute(
            "DELETE FROM part WHERE uid = ?",
            rs::params![upload_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
impl MemoryRemote {
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.conn
            .query_row(
                "SELECT content FROM object WHERE bucket = ? AND key = ?",
                rs::params![bucket, key],
                |row| row.get(0),
            )
            .ok()
    }

    pub fn upload_state(&self, upload_id: &str) -> Option<String> {
        self.conn
            .query_row(
                "SELECT state FROM upload WHERE uid = ?",
                rs::params![upload_id],
                |row| row.get(0),
            )
            .ok()
    }

    /// All uploads ever created for a key, in creation order.
    pub fn uploads_for(&self, bucket: &str, key: &str) -> Vec<(String, String)> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT uid, state FROM upload
                 WHERE bucket = ? AND key = ?
                 ORDER BY rowid ASC",
            )
            .unwrap();
        stmt.query_map(rs::params![bucket, key], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .unwrap()
        .map(|row| row.unwrap())
        .collect()
    }

    /// (part_number, offset, length) triples recorded for an open upload.
    pub fn recorded_parts(&self, upload_id: &str) -> Vec<(i32, u64, usize)> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT part_number, part_offset, content FROM part
                 WHERE uid = ?
                 ORDER BY part_number ASC",
            )
            .unwrap();
        stmt.query_map(rs::params![upload_id], |row| {
            let content: Vec<u8> = row.get(2)?;
            Ok((row.get(0)?, row.get::<_, i64>(1)? as u64, content.len()))
        })
        .unwrap()
        .map(|row| row.unwrap())
        .collect()
    }
}
