//! Backing image creation

use std::fs::{self, OpenOptions};
use std::path::Path;
use tracing::info;

use super::types::StoreError;
use crate::config::{StorageConfig, StoreFilesystem};
use crate::utils::run_command;

/// Create a sparse file of `size_mb` megabytes
pub fn create_sparse(path: &Path, size_mb: u64) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            StoreError::FilesystemError(format!("cannot create {}: {}", parent.display(), e))
        })?;
    }

    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| StoreError::FilesystemError(format!("cannot create image: {}", e)))?;
    file.set_len(size_mb * 1024 * 1024)
        .map_err(|e| StoreError::FilesystemError(format!("cannot size image: {}", e)))
}

/// Arguments for the mkfs tool matching `filesystem`
pub fn mkfs_command(filesystem: StoreFilesystem, label: &str, image: &str) -> (String, Vec<String>) {
    match filesystem {
        StoreFilesystem::Vfat => (
            "mkfs.vfat".to_string(),
            vec!["-n".into(), label.into(), image.into()],
        ),
        StoreFilesystem::Ext4 => (
            "mkfs.ext4".to_string(),
            vec!["-L".into(), label.into(), "-F".into(), image.into()],
        ),
    }
}

/// Create and format the image when missing
///
/// Returns `true` if a new image was created.
pub async fn ensure_image(config: &StorageConfig) -> Result<bool, StoreError> {
    let path = config.image_path();
    if path.exists() {
        return Ok(false);
    }
    if !config.create_if_missing {
        return Err(StoreError::FilesystemError(format!(
            "backing image {} does not exist",
            path.display()
        )));
    }

    info!(
        "Creating {} MB {} backing image at {}",
        config.size_mb,
        config.filesystem.as_str(),
        path.display()
    );

    let p = path.clone();
    let size_mb = config.size_mb;
    tokio::task::spawn_blocking(move || create_sparse(&p, size_mb))
        .await
        .map_err(|e| StoreError::FilesystemError(format!("task join error: {}", e)))??;

    let image = path.to_string_lossy();
    let (program, args) = mkfs_command(config.filesystem, &config.label, image.as_ref());
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    if let Err(e) = run_command(&program, &args).await {
        // An unformatted image would only confuse the host
        let _ = fs::remove_file(&path);
        return Err(StoreError::FilesystemError(e));
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_sparse() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub/usb_storage.img");
        create_sparse(&path, 4).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 4 * 1024 * 1024);

        // Never overwrites
        assert!(create_sparse(&path, 4).is_err());
    }

    #[test]
    fn test_mkfs_command() {
        let (prog, args) = mkfs_command(StoreFilesystem::Vfat, "VIVISECT", "/x.img");
        assert_eq!(prog, "mkfs.vfat");
        assert_eq!(args, vec!["-n", "VIVISECT", "/x.img"]);

        let (prog, args) = mkfs_command(StoreFilesystem::Ext4, "VIVISECT", "/x.img");
        assert_eq!(prog, "mkfs.ext4");
        assert_eq!(args, vec!["-L", "VIVISECT", "-F", "/x.img"]);
    }

    #[tokio::test]
    async fn test_existing_image_is_kept() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("usb_storage.img");
        fs::write(&path, b"data").unwrap();

        let config = StorageConfig {
            image_path: path.to_string_lossy().into_owned(),
            ..Default::default()
        };
        assert!(!ensure_image(&config).await.unwrap());
        assert_eq!(fs::read(&path).unwrap(), b"data");
    }
}
