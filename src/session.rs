use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::remote::{Remote, RemoteError, UploadedPart};

/// What to do with an upload session when its end-of-file chunk arrives.
/// One policy holds for a whole run; it is never decided per file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EofPolicy {
    Complete,
    Abort,
}

/// Per-path state of one in-progress multipart upload.
pub struct UploadSession {
    key: String,
    upload_id: String,
    next_part_number: i32,
    parts: Vec<UploadedPart>,
}

impl UploadSession {
    fn new(key: String, upload_id: String) -> UploadSession {
        UploadSession {
            key,
            upload_id,
            next_part_number: 1,
            parts: Vec::new(),
        }
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }
}

/// Routes chunks to per-path upload sessions.
///
/// Sessions are created lazily on the first chunk seen for a path and
/// destroyed when that path is finalized or aborted; a chunk arriving for a
/// path after its session resolved starts a brand-new session with part
/// numbering back at 1. The map lives here, owned by whoever owns the
/// tracker, and nowhere else.
pub struct UploadTracker<'a, R: Remote> {
    remote: &'a R,
    bucket: String,
    prefix: PathBuf,
    policy: EofPolicy,
    sessions: HashMap<String, UploadSession>,
}

impl<'a, R: Remote> UploadTracker<'a, R> {
    pub fn new(remote: &'a R, bucket: &str, prefix: &Path, policy: EofPolicy) -> Self {
        UploadTracker {
            remote,
            bucket: bucket.to_string(),
            prefix: prefix.to_path_buf(),
            policy,
            sessions: HashMap::new(),
        }
    }

    fn destination_key(&self, path: &str) -> String {
        self.prefix.join(path).to_string_lossy().into_owned()
    }

    /// Returns the session for `path`, creating one at the remote if none is
    /// active.
    pub fn ensure_session(&mut self, path: &str) -> Result<&mut UploadSession, RemoteError> {
        let key = self.destination_key(path);
        match self.sessions.entry(path.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let upload_id = self.remote.create_upload(&self.bucket, &key)?;
                debug!("session {} opened for {}", upload_id, key);
                Ok(entry.insert(UploadSession::new(key, upload_id)))
            }
        }
    }

    /// Uploads one payload as the session's next part. The part counter
    /// advances only after the remote accepts the part.
    pub fn upload_part(&mut self, path: &str, offset: u64, body: &[u8]) -> Result<(), RemoteError> {
        let key = self.destination_key(path);
        let session = match self.sessions.entry(path.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let upload_id = self.remote.create_upload(&self.bucket, &key)?;
                debug!("session {} opened for {}", upload_id, key);
                entry.insert(UploadSession::new(key, upload_id))
            }
        };

        let part = self.remote.upload_part(
            &self.bucket,
            &session.key,
            &session.upload_id,
            session.next_part_number,
            offset,
            body,
        )?;
        session.next_part_number += 1;
        session.parts.push(part);
        Ok(())
    }

    /// Resolves the session for `path` according to the run's policy and
    /// removes it. An end-of-file chunk for a path with no prior payload
    /// still creates a session, which then resolves with zero parts.
    pub fn finalize(&mut self, path: &str) -> Result<(), RemoteError> {
        self.ensure_session(path)?;
        let mut session = match self.sessions.remove(path) {
            Some(session) => session,
            None => return Ok(()),
        };

        match self.policy {
            EofPolicy::Complete => {
                // The store refuses a completion with no parts, so an empty
                // file becomes a single empty part.
                if session.parts.is_empty() {
                    let part = self.remote.upload_part(
                        &self.bucket,
                        &session.key,
                        &session.upload_id,
                        session.next_part_number,
                        0,
                        &[],
                    )?;
                    session.parts.push(part);
                }
                self.remote.complete_upload(
                    &self.bucket,
                    &session.key,
                    &session.upload_id,
                    &session.parts,
                )?;
                info!("completed {} ({} parts)", session.key, session.parts.len());
            }
            EofPolicy::Abort => {
                self.remote
                    .abort_upload(&self.bucket, &session.key, &session.upload_id)?;
                info!("aborted {}", session.key);
            }
        }
        Ok(())
    }

    /// Drops the session for `path`, aborting it at the remote if present.
    pub fn abort(&mut self, path: &str) -> Result<(), RemoteError> {
        if let Some(session) = self.sessions.remove(path) {
            self.remote
                .abort_upload(&self.bucket, &session.key, &session.upload_id)?;
        }
        Ok(())
    }

    /// Paths with a session still open.
    pub fn open_paths(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }
}
