//! File transfer between the local workspace and remote document storage
//!
//! `GraphStore` talks to a SharePoint drive through Microsoft Graph;
//! `LocalStore` serves the same operations from a directory for offline
//! runs.

mod graph;
mod local;

pub use graph::GraphStore;
pub use local::LocalStore;

use crate::backup::rename_with_timestamp;
use crate::error::RateSheetResult;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

/// A file inside a remote drive: folder plus file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePath {
    pub folder: String,
    pub name: String,
}

impl RemotePath {
    pub fn new(folder: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            name: name.into(),
        }
    }

    /// Drive-relative path: `folder/name`, `//` collapsed, no leading `/`
    pub fn item_path(&self) -> String {
        let joined = format!("{}/{}", self.folder.trim(), self.name.trim());
        joined
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.item_path())
    }
}

/// Remote document storage
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Fetch `remote` into the local file `dest` (parent folders created)
    async fn download(&self, remote: &RemotePath, dest: &Path) -> RateSheetResult<()>;

    /// Store the local file `src` at `remote`, replacing any existing file
    async fn upload(&self, src: &Path, remote: &RemotePath) -> RateSheetResult<()>;
}

/// Use the local master if present, otherwise download it
pub async fn ensure_master(
    store: &dyn FileStore,
    master_path: &Path,
    remote: &RemotePath,
) -> RateSheetResult<PathBuf> {
    if master_path.exists() {
        info!(master = %master_path.display(), "using local master");
        return Ok(master_path.to_path_buf());
    }
    info!(remote = %remote, "master not found locally; downloading");
    store.download(remote, master_path).await?;
    Ok(master_path.to_path_buf())
}

/// Move any local copy aside with a timestamp, then download a fresh one
pub async fn refresh_master(
    store: &dyn FileStore,
    dir: &Path,
    remote: &RemotePath,
) -> RateSheetResult<PathBuf> {
    let local = dir.join(&remote.name);
    if local.exists() {
        rename_with_timestamp(&local)?;
    }
    store.download(remote, &local).await?;
    info!(master = %local.display(), "master refreshed");
    Ok(local)
}
