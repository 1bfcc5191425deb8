use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::debug;

use super::RangeReader;
use crate::error::IoError;

/// Volume object in S3 or an S3-compatible store, read by byte range.
///
/// The object size comes from a single HEAD request at construction.
#[derive(Clone)]
pub struct S3RangeReader {
    client: Client,
    bucket: String,
    key: String,
    size: u64,
    identifier: String,
}

impl S3RangeReader {
    /// Open `s3://bucket/key`, failing with `NotFound` if it does not exist.
    pub async fn new(client: Client, bucket: String, key: String) -> Result<Self, IoError> {
        let identifier = format!("s3://{}/{}", bucket, key);
        let head = client
            .head_object()
            .bucket(&bucket)
            .key(&key)
            .send()
            .await
            .map_err(|err| head_error(&identifier, err))?;

        let size = u64::try_from(head.content_length().unwrap_or(0)).unwrap_or(0);
        debug!(object = %identifier, size, "opened S3 volume object");

        Ok(Self {
            client,
            bucket,
            key,
            size,
            identifier,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Map a failed HEAD to `NotFound` when the object is missing.
///
/// HEAD responses carry no body, so the status code is checked as well.
fn head_error(identifier: &str, err: SdkError<HeadObjectError, HttpResponse>) -> IoError {
    let missing = err
        .as_service_error()
        .map(HeadObjectError::is_not_found)
        .unwrap_or(false)
        || err
            .raw_response()
            .map(|r| r.status().as_u16() == 404)
            .unwrap_or(false);
    if missing {
        IoError::NotFound(identifier.to_string())
    } else {
        IoError::S3(err.to_string())
    }
}

/// HTTP `Range` value for `len > 0` bytes at `offset`; both ends inclusive.
fn byte_range(offset: u64, len: usize) -> String {
    format!("bytes={}-{}", offset, offset + len as u64 - 1)
}

#[async_trait]
impl RangeReader for S3RangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        let end = offset.checked_add(len as u64).filter(|&end| end <= self.size);
        if end.is_none() {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size: self.size,
            });
        }
        if len == 0 {
            return Ok(Bytes::new());
        }

        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .range(byte_range(offset, len))
            .send()
            .await
            .map_err(|e| IoError::S3(e.to_string()))?;
        // A body that breaks off mid-transfer is a connection failure.
        let chunk = object
            .body
            .collect()
            .await
            .map_err(|e| IoError::Connection(e.to_string()))?
            .into_bytes();

        if chunk.len() != len {
            return Err(IoError::UnexpectedEof(format!(
                "{}: asked for {} bytes at {}, got {}",
                self.identifier,
                len,
                offset,
                chunk.len()
            )));
        }
        Ok(chunk)
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// Build an S3 client for `region`.
///
/// A custom endpoint (MinIO, localstack) switches to path-style addressing.
pub async fn create_s3_client(endpoint_url: Option<&str>, region: &str) -> Client {
    let loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(region.to_string()));
    let shared = match endpoint_url {
        Some(endpoint) => loader.endpoint_url(endpoint).load().await,
        None => loader.load().await,
    };

    let config = aws_sdk_s3::config::Builder::from(&shared)
        .force_path_style(endpoint_url.is_some())
        .build();
    Client::from_conf(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_range_is_inclusive() {
        assert_eq!(byte_range(0, 1), "bytes=0-0");
        assert_eq!(byte_range(100, 50), "bytes=100-149");
    }
}
