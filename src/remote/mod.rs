pub mod mem;
pub mod s3;

use thiserror::Error;

/// Receipt for one successfully uploaded part. Completion needs the full
/// list back, in part-number order, with the tags the store returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPart {
    pub part_number: i32,
    pub etag: String,
}

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("remote store unavailable: {0}")]
    Unavailable(String),
    #[error("failed to create upload for {key}: {message}")]
    Create { key: String, message: String },
    #[error("failed to upload part {part_number} of {key}: {message}")]
    UploadPart {
        key: String,
        part_number: i32,
        message: String,
    },
    #[error("failed to complete upload of {key}: {message}")]
    Complete { key: String, message: String },
    #[error("failed to abort upload of {key}: {message}")]
    Abort { key: String, message: String },
}

/// Multipart upload surface of the object store.
///
/// One in-progress multipart upload per key at a time is all the archive
/// consumer needs; sessions are identified by the opaque id the store hands
/// back at creation.
pub trait Remote {
    /// Begins a multipart upload and returns its id.
    fn create_upload(&self, bucket: &str, key: &str) -> Result<String, RemoteError>;

    /// Uploads one part. Part numbers are 1-based and must be unique within
    /// the upload; `offset` is the payload's declared position within the
    /// logical file and is forwarded to the store verbatim.
    fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        offset: u64,
        body: &[u8],
    ) -> Result<UploadedPart, RemoteError>;

    /// Assembles the uploaded parts into the final object. The store
    /// rejects an empty part list.
    fn complete_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<(), RemoteError>;

    /// Discards the upload and everything uploaded under it.
    fn abort_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<(), RemoteError>;
}
