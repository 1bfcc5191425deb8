//! S3-backed resolver.
//!
//! Objects are downloaded in fixed-size range requests into a local cache
//! directory. Each object gets its own subdirectory named after a SHA-256 of
//! `bucket/key`, and keeps its original file name there, so extension-based
//! format detection and the label-name prefix still apply to the local copy.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use aws_sdk_s3::Client;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use super::FileResolver;
use crate::error::IoError;
use crate::io::{RangeReader, S3RangeReader};

/// Default size of each range request: 8MB
pub const DEFAULT_DOWNLOAD_BLOCK_SIZE: usize = 8 * 1024 * 1024;

/// A parsed `bucket` + `key` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

/// Parse an `s3://bucket/key` name.
pub fn parse_s3_url(name: &str) -> Result<ObjectLocation, IoError> {
    let url = Url::parse(name).map_err(|e| IoError::NotFound(format!("{}: {}", name, e)))?;
    if url.scheme() != "s3" {
        return Err(IoError::NotFound(format!("{} is not an s3:// URL", name)));
    }
    let bucket = url
        .host_str()
        .filter(|b| !b.is_empty())
        .ok_or_else(|| IoError::NotFound(format!("{} names no bucket", name)))?
        .to_string();

    // Take the key from the raw text so it is used exactly as written.
    let key = name
        .splitn(4, '/')
        .nth(3)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| IoError::NotFound(format!("{} names no object key", name)))?
        .to_string();

    Ok(ObjectLocation { bucket, key })
}

/// Local cache path for an object.
pub fn cache_path(cache_dir: &Path, location: &ObjectLocation) -> PathBuf {
    let digest = Sha256::digest(format!("{}/{}", location.bucket, location.key).as_bytes());
    let file_name = location
        .key
        .rsplit('/')
        .next()
        .filter(|n| !n.is_empty())
        .unwrap_or("object");
    cache_dir.join(hex::encode(digest)).join(file_name)
}

/// Copy everything `reader` holds into `dest` in `block_size` requests.
///
/// Data lands in a `.part` file that is renamed into place once complete, so
/// an interrupted transfer never leaves a truncated file at `dest`.
pub async fn download_to<R: RangeReader + ?Sized>(
    reader: &R,
    dest: &Path,
    block_size: usize,
) -> Result<u64, IoError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut part = dest.as_os_str().to_owned();
    part.push(".part");
    let part = PathBuf::from(part);

    let size = reader.size();
    let block_size = block_size.max(1) as u64;
    let mut file = tokio::fs::File::create(&part).await?;
    let mut offset = 0u64;

    while offset < size {
        let len = block_size.min(size - offset) as usize;
        let block = match reader.read_exact_at(offset, len).await {
            Ok(block) => block,
            Err(e) => {
                drop(file);
                tokio::fs::remove_file(&part).await.ok();
                return Err(e);
            }
        };
        file.write_all(&block).await?;
        offset += len as u64;
    }

    file.flush().await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&part, dest).await?;

    debug!(source = reader.identifier(), dest = %dest.display(), size, "download complete");
    Ok(size)
}

// =============================================================================
// S3FileResolver
// =============================================================================

/// Fetches volumes from S3 (or an S3-compatible store) into a local cache.
///
/// Names are either full `s3://bucket/key` URLs or keys relative to the
/// configured bucket and prefix. A cached copy whose size matches the object
/// is reused without downloading again.
#[derive(Clone)]
pub struct S3FileResolver {
    client: Client,
    bucket: String,
    prefix: String,
    cache_dir: PathBuf,
    block_size: usize,
}

impl S3FileResolver {
    pub fn new(client: Client, bucket: impl Into<String>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: String::new(),
            cache_dir: cache_dir.into(),
            block_size: DEFAULT_DOWNLOAD_BLOCK_SIZE,
        }
    }

    /// Prepend `prefix` to relative names.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Where `name` lives in the store.
    pub fn locate(&self, name: &str) -> Result<ObjectLocation, IoError> {
        if name.starts_with("s3://") {
            return parse_s3_url(name);
        }
        let prefix = self.prefix.trim_end_matches('/');
        let name = name.trim_start_matches('/');
        let key = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", prefix, name)
        };
        Ok(ObjectLocation {
            bucket: self.bucket.clone(),
            key,
        })
    }

    async fn fetch(&self, location: &ObjectLocation) -> Result<PathBuf, IoError> {
        let dest = cache_path(&self.cache_dir, location);
        let reader = S3RangeReader::new(
            self.client.clone(),
            location.bucket.clone(),
            location.key.clone(),
        )
        .await?;

        if let Ok(metadata) = tokio::fs::metadata(&dest).await {
            if metadata.is_file() && metadata.len() == reader.size() {
                debug!(object = reader.identifier(), "using cached download");
                return Ok(dest);
            }
        }

        info!(object = reader.identifier(), size = reader.size(), "downloading volume");
        download_to(&reader, &dest, self.block_size).await?;
        Ok(dest)
    }
}

#[async_trait]
impl FileResolver for S3FileResolver {
    async fn resolve(&self, name: &str) -> Result<PathBuf, IoError> {
        let location = self.locate(name)?;
        let path = self.fetch(&location).await?;

        // Masks carry their channel samples in a sibling object.
        if location.key.ends_with(".mask") {
            let chan = ObjectLocation {
                bucket: location.bucket.clone(),
                key: format!("{}.chan", location.key.trim_end_matches(".mask")),
            };
            match self.fetch(&chan).await {
                Ok(_) => {}
                Err(IoError::NotFound(_)) => debug!(key = %chan.key, "mask has no channel file"),
                Err(e) => return Err(e),
            }
        }

        Ok(path)
    }
}
