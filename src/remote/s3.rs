use std::time::Duration;

use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::Bytes;
use log::debug;
use tokio::runtime::Runtime;

use crate::cli::RemoteConfig;
use crate::remote::{Remote, RemoteError, UploadedPart};

/// S3 remote driven from synchronous code through a current-thread runtime.
///
/// Credentials and any settings not present in [`RemoteConfig`] come from
/// the environment via `aws-config`; nothing is hard-wired here.
pub struct S3Remote {
    client: Client,

    // Runtime for the tokio reactor
    rt: Runtime,
}

impl S3Remote {
    pub fn connect(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| RemoteError::Unavailable(err.to_string()))?;

        let client = rt.block_on(connect(config));

        Ok(S3Remote { client, rt })
    }
}

impl Remote for S3Remote {
    fn create_upload(&self, bucket: &str, key: &str) -> Result<String, RemoteError> {
        let fail = |message: String| RemoteError::Create {
            key: key.to_string(),
            message,
        };

        let call = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .customize()
            .mutate_request(|req| {
                req.headers_mut().insert("Object-Patch", "true");
            })
            .send();

        let resp = self
            .rt
            .block_on(call)
            .map_err(|err| fail(DisplayErrorContext(&err).to_string()))?;

        let upload_id = resp
            .upload_id()
            .ok_or_else(|| fail("no upload id in response".to_string()))?;
        debug!("created upload {} for {}", upload_id, key);

        Ok(upload_id.to_string())
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
        let stream = ByteStream::from(Bytes::copy_from_slice(body));

        let call = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .content_length(body.len() as i64)
            .body(stream)
            .customize()
            .mutate_request(move |req| {
                req.headers_mut().insert("Object-Offset", offset.to_string());
            })
            .send();

        let resp = self.rt.block_on(call).map_err(|err| RemoteError::UploadPart {
            key: key.to_string(),
            part_number,
            message: DisplayErrorContext(&err).to_string(),
        })?;

        let etag = resp.e_tag().unwrap_or_default().to_string();
        Ok(UploadedPart { part_number, etag })
    }

    fn complete_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<(), RemoteError> {
        let completed = parts
            .iter()
            .map(|part| {
                CompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(&part.etag)
                    .build()
            })
            .collect();
        let upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed))
            .build();

        let call = self
            .client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(upload)
            .send();

        self.rt
            .block_on(call)
            .map(|_| ())
            .map_err(|err| RemoteError::Complete {
                key: key.to_string(),
                message: DisplayErrorContext(&err).to_string(),
            })
    }

    fn abort_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<(), RemoteError> {
        let call = self
            .client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send();

        self.rt
            .block_on(call)
            .map(|_| ())
            .map_err(|err| RemoteError::Abort {
                key: key.to_string(),
                message: DisplayErrorContext(&err).to_string(),
            })
    }
}

async fn connect(config: &RemoteConfig) -> Client {
    let base = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .load()
        .await;

    let mut builder =
        aws_sdk_s3::config::Builder::from(&base).force_path_style(config.force_path_style);
    if let Some(endpoint) = &config.endpoint {
        builder = builder.endpoint_url(endpoint);
    }
    if let Some(region) = &config.region {
        builder = builder.region(Region::new(region.clone()));
    }
    if let Some(secs) = config.timeout_secs {
        builder = builder.timeout_config(
            TimeoutConfig::builder()
                .operation_timeout(Duration::from_secs(secs))
                .build(),
        );
    }

    Client::from_conf(builder.build())
}
