//! Resource name resolution.
//!
//! A viewer loads volumes by logical name. A [`FileResolver`] turns that
//! name into a readable local path, downloading it first when the volume
//! lives in object storage.
//!
//! - [`LocalFileResolver`]: names are filesystem paths, optionally under a root
//! - [`S3FileResolver`]: names are S3 keys or `s3://` URLs, cached locally
//! - [`RetryPolicy`]: bounded retry of transient transfer failures

mod local;
mod retry;
mod s3;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::IoError;

pub use local::LocalFileResolver;
pub use retry::{RetryFailure, RetryPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY};
pub use s3::{
    cache_path, download_to, parse_s3_url, ObjectLocation, S3FileResolver,
    DEFAULT_DOWNLOAD_BLOCK_SIZE,
};

/// Maps a logical resource name to a local readable path.
#[async_trait]
pub trait FileResolver: Send + Sync {
    async fn resolve(&self, name: &str) -> Result<PathBuf, IoError>;
}
