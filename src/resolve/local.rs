use std::path::PathBuf;

use async_trait::async_trait;

use super::FileResolver;
use crate::error::IoError;

/// Resolves names against the local filesystem.
///
/// Relative names are joined onto `root` when one is set. The file must
/// exist.
#[derive(Debug, Clone, Default)]
pub struct LocalFileResolver {
    root: Option<PathBuf>,
}

impl LocalFileResolver {
    pub fn new() -> Self {
        Self { root: None }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    pub fn root(&self) -> Option<&std::path::Path> {
        self.root.as_deref()
    }
}

#[async_trait]
impl FileResolver for LocalFileResolver {
    async fn resolve(&self, name: &str) -> Result<PathBuf, IoError> {
        let path = match &self.root {
            Some(root) => root.join(name),
            None => PathBuf::from(name),
        };

        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| match IoError::from(e) {
                IoError::NotFound(_) => IoError::NotFound(path.display().to_string()),
                other => other,
            })?;
        if !metadata.is_file() {
            return Err(IoError::NotFound(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        Ok(path)
    }
}
