// SPDX-License-Identifier: MIT OR Apache-2.0
//! A local-disk [`ImageStore`] backend for standalone daemon deployments.
//!
//! Object storage is an external collaborator per spec §1; this is the
//! simplest backend that satisfies the `ImageStore` contract without a
//! third-party bucket, addressing each object by a `file://` URL under a
//! configured root directory.

use anyhow::{Context, Result};
use async_trait::async_trait;
use imgpipe_core::Stage;
use imgpipe_runtime::pipeline::ImageStore;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

/// Stores committed stage outputs (and accepts arbitrary input URLs) as
/// files under `root`.
pub struct FsImageStore {
    root: PathBuf,
}

impl FsImageStore {
    /// Root directory new stage outputs are written under; created lazily
    /// on first `put`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for_url(&self, url: &str) -> PathBuf {
        match url.strip_prefix("file://") {
            Some(rest) => PathBuf::from(rest),
            None => self.root.join(url),
        }
    }
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let path = self.path_for_url(url);
        fs::read(&path).await.with_context(|| format!("read image at {}", path.display()))
    }

    async fn put(&self, job_id: Uuid, stage: Stage, bytes: Vec<u8>) -> Result<String> {
        fs::create_dir_all(&self.root).await.with_context(|| format!("create {}", self.root.display()))?;
        let path: &Path = &self.root.join(format!("{job_id}-{}.png", stage.as_str()));
        fs::write(path, &bytes).await.with_context(|| format!("write image to {}", path.display()))?;
        Ok(format!("file://{}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgpipe_core::Stage;

    #[tokio::test]
    async fn round_trips_through_put_and_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsImageStore::new(dir.path());
        let url = store.put(Uuid::new_v4(), Stage::OneA, vec![1, 2, 3]).await.unwrap();
        let bytes = store.fetch(&url).await.unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn fetch_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsImageStore::new(dir.path());
        assert!(store.fetch("file:///does/not/exist").await.is_err());
    }
}
