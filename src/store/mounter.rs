//! Loop mounting of the backing image

use async_trait::async_trait;
use std::path::Path;

use super::types::StoreError;
use crate::utils::run_command;

#[async_trait]
pub trait Mounter: Send + Sync {
    /// Loop-mount `image` at `mount_point`
    async fn mount(&self, image: &Path, mount_point: &Path) -> Result<(), StoreError>;

    /// Flush pending writes to the image
    async fn sync(&self, mount_point: &Path) -> Result<(), StoreError>;

    async fn unmount(&self, mount_point: &Path) -> Result<(), StoreError>;

    /// Whether something is mounted at `mount_point`
    async fn is_mounted(&self, mount_point: &Path) -> bool;
}

/// `mount(8)`/`umount(8)` implementation
#[derive(Debug, Default)]
pub struct LoopMounter;

#[async_trait]
impl Mounter for LoopMounter {
    async fn mount(&self, image: &Path, mount_point: &Path) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(mount_point).await.map_err(|e| {
            StoreError::FilesystemError(format!(
                "cannot create mount point {}: {}",
                mount_point.display(),
                e
            ))
        })?;

        let image = image.to_string_lossy();
        let target = mount_point.to_string_lossy();
        run_command("mount", &["-o", "loop", image.as_ref(), target.as_ref()])
            .await
            .map(|_| ())
            .map_err(StoreError::MountFailed)
    }

    async fn sync(&self, _mount_point: &Path) -> Result<(), StoreError> {
        run_command("sync", &[])
            .await
            .map(|_| ())
            .map_err(StoreError::FilesystemError)
    }

    async fn unmount(&self, mount_point: &Path) -> Result<(), StoreError> {
        let target = mount_point.to_string_lossy();
        run_command("umount", &[target.as_ref()])
            .await
            .map(|_| ())
            .map_err(StoreError::MountFailed)
    }

    async fn is_mounted(&self, mount_point: &Path) -> bool {
        match tokio::fs::read_to_string("/proc/mounts").await {
            Ok(mounts) => is_listed(&mounts, mount_point),
            Err(_) => false,
        }
    }
}

/// Whether `/proc/mounts` content lists `mount_point` as a target
fn is_listed(mounts: &str, mount_point: &Path) -> bool {
    // Spaces in paths appear as \040
    let target = mount_point.to_string_lossy().replace(' ', "\\040");
    mounts
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|t| t == target)
}
