//! Directory-backed store

use super::{FileStore, RemotePath};
use crate::error::{RateSheetError, RateSheetResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

/// Remote paths resolved under a local root directory
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resolve(&self, remote: &RemotePath) -> PathBuf {
        self.root.join(remote.item_path())
    }
}

async fn copy_file(from: &Path, to: &Path) -> RateSheetResult<()> {
    if let Some(parent) = to.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    fs::copy(from, to).await.map_err(|e| {
        RateSheetError::Transfer(format!(
            "Copy {} → {} failed: {}",
            from.display(),
            to.display(),
            e
        ))
    })?;
    Ok(())
}

#[async_trait]
impl FileStore for LocalStore {
    async fn download(&self, remote: &RemotePath, dest: &Path) -> RateSheetResult<()> {
        let source = self.resolve(remote);
        copy_file(&source, dest).await?;
        info!(remote = %remote, dest = %dest.display(), "fetched from local store");
        Ok(())
    }

    async fn upload(&self, src: &Path, remote: &RemotePath) -> RateSheetResult<()> {
        let target = self.resolve(remote);
        copy_file(src, &target).await?;
        info!(src = %src.display(), remote = %remote, "stored in local store");
        Ok(())
    }
}
