//! Copies evidence and reports into the backing store
//!
//! Additive only: files are created or replaced by newer source versions,
//! nothing is ever deleted on either side.

use chrono::Utc;
use glob::Pattern;
use std::fs::{self, File};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::types::{CategoryTotals, Manifest, SyncReport};
use crate::config::{SyncConfig, SyncSource};
use crate::events::{EventBus, SystemEvent};
use crate::store::{BackingStoreManager, StoreError};

pub const MANIFEST_NAME: &str = "MANIFEST.json";

/// FAT keeps modification times at 2 s resolution
const MTIME_SLACK: Duration = Duration::from_secs(2);

/// Source directory resolved to an absolute path
#[derive(Debug, Clone)]
struct ResolvedSource {
    dir: PathBuf,
    category: String,
}

pub struct Synchronizer {
    store: Arc<BackingStoreManager>,
    events: Arc<EventBus>,
    output_dir: PathBuf,
    defaults: SyncConfig,
}

impl Synchronizer {
    pub fn new(
        store: Arc<BackingStoreManager>,
        events: Arc<EventBus>,
        output_dir: PathBuf,
        defaults: SyncConfig,
    ) -> Self {
        Self {
            store,
            events,
            output_dir,
            defaults,
        }
    }

    /// Sync with the configured sources and excludes
    pub async fn sync_default(&self) -> Result<SyncReport, StoreError> {
        self.sync(&self.defaults.sources, &self.defaults.exclude).await
    }

    /// Copy `sources` into the store, skipping names matching `exclude`
    ///
    /// Fails fast with `StoreBusy` while the store is exposed or already
    /// mounted. Once mounted, copy errors are reported in the returned
    /// report (`succeeded == false`) and the store is always released.
    pub async fn sync(
        &self,
        sources: &[SyncSource],
        exclude: &[String],
    ) -> Result<SyncReport, StoreError> {
        let patterns = exclude
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| {
                    StoreError::FilesystemError(format!("invalid exclude pattern {}: {}", p, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let sources = sources
            .iter()
            .map(|s| {
                check_category(&s.category)?;
                Ok(ResolvedSource {
                    dir: self.output_dir.join(&s.path),
                    category: s.category.clone(),
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        let mount = self.store.acquire_local().await?;
        let dest_root = mount.path().to_path_buf();
        info!("Syncing {} source(s) into {}", sources.len(), dest_root.display());

        let mut report = tokio::task::spawn_blocking(move || {
            let mut report = SyncReport::new();
            if let Err(e) = copy_sources(&sources, &patterns, &dest_root, &mut report) {
                report.error = Some(e);
            }
            report
        })
        .await
        .unwrap_or_else(|e| {
            let mut report = SyncReport::new();
            report.error = Some(format!("sync task failed: {}", e));
            report
        });

        if let Err(e) = self.store.release_local(mount).await {
            warn!("Release after sync failed: {}", e);
            report.error.get_or_insert_with(|| e.to_string());
        }

        report.succeeded = report.error.is_none();
        report.finished_at = Some(Utc::now());

        if report.succeeded {
            info!(
                "Sync complete: {} copied ({} bytes), {} up to date, {} excluded",
                report.files_copied, report.bytes_copied, report.files_up_to_date, report.files_excluded
            );
        } else {
            warn!("Sync failed: {}", report.error.as_deref().unwrap_or_default());
        }

        self.events.publish(SystemEvent::SyncCompleted {
            succeeded: report.succeeded,
            files_copied: report.files_copied,
            bytes_copied: report.bytes_copied,
            error: report.error.clone(),
        });
        Ok(report)
    }
}

/// Categories name directories under the mount root and must stay inside it
fn check_category(category: &str) -> Result<(), StoreError> {
    let path = Path::new(category);
    let mut components = path.components().peekable();
    if components.peek().is_none() || !components.all(|c| matches!(c, Component::Normal(_))) {
        return Err(StoreError::FilesystemError(format!(
            "invalid sync category {:?}",
            category
        )));
    }
    Ok(())
}

fn is_excluded(patterns: &[Pattern], name: &str, relative: &str) -> bool {
    patterns
        .iter()
        .any(|p| p.matches(name) || p.matches(relative))
}

/// Whether `dest` already holds this version of the source
fn up_to_date(dest: &Path, src_mtime: SystemTime, src_len: u64) -> bool {
    let Ok(meta) = fs::metadata(dest) else {
        return false;
    };
    let Ok(dest_mtime) = meta.modified() else {
        return false;
    };
    if dest_mtime >= src_mtime {
        return true;
    }
    meta.len() == src_len && dest_mtime + MTIME_SLACK >= src_mtime
}

fn copy_file(src: &Path, dest: &Path, mtime: SystemTime) -> std::io::Result<u64> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let bytes = fs::copy(src, dest)?;
    File::options().write(true).open(dest)?.set_modified(mtime)?;
    Ok(bytes)
}

/// Walk every source and copy what is missing or stale; blocking
fn copy_sources(
    sources: &[ResolvedSource],
    patterns: &[Pattern],
    dest_root: &Path,
    report: &mut SyncReport,
) -> Result<(), String> {
    for source in sources {
        if !source.dir.is_dir() {
            warn!("Sync source {} missing, skipping", source.dir.display());
            continue;
        }
        let totals = report
            .categories
            .entry(source.category.clone())
            .or_insert_with(CategoryTotals::default);

        for entry in WalkDir::new(&source.dir).follow_links(false).sort_by_file_name() {
            let entry = entry.map_err(|e| format!("walk {}: {}", source.dir.display(), e))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(&source.dir) else {
                continue;
            };
            let name = entry.file_name().to_string_lossy();
            let relative_str = relative.to_string_lossy();
            if is_excluded(patterns, &name, &relative_str) {
                debug!("Excluded {}", relative_str);
                report.files_excluded += 1;
                continue;
            }

            let meta = entry
                .metadata()
                .map_err(|e| format!("stat {}: {}", entry.path().display(), e))?;
            let mtime = meta
                .modified()
                .map_err(|e| format!("mtime {}: {}", entry.path().display(), e))?;
            let dest = dest_root.join(&source.category).join(relative);

            if up_to_date(&dest, mtime, meta.len()) {
                report.files_up_to_date += 1;
            } else {
                let bytes = copy_file(entry.path(), &dest, mtime)
                    .map_err(|e| format!("copy {}: {}", entry.path().display(), e))?;
                debug!("Copied {} ({} bytes)", relative_str, bytes);
                report.files_copied += 1;
                report.bytes_copied += bytes;
            }
            totals.files += 1;
            totals.bytes += meta.len();
        }
    }

    let manifest = Manifest {
        generated_at: Utc::now(),
        total_files: report.categories.values().map(|c| c.files).sum(),
        total_bytes: report.categories.values().map(|c| c.bytes).sum(),
        categories: report.categories.clone(),
    };
    let path = dest_root.join(MANIFEST_NAME);
    let json = serde_json::to_vec_pretty(&manifest).map_err(|e| format!("manifest: {}", e))?;
    fs::write(&path, json).map_err(|e| format!("write {}: {}", path.display(), e))?;
    report.manifest_path = Some(path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MountState;
    use crate::testing::{test_store, FakeMounter};
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        store: Arc<BackingStoreManager>,
        mounter: Arc<FakeMounter>,
        sync: Synchronizer,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let events = Arc::new(EventBus::new());
        let (store, mounter) = test_store(&dir, events.clone());
        let output = dir.path().join("output");
        fs::create_dir_all(output.join("reports/host1")).unwrap();
        fs::create_dir_all(output.join("evidence")).unwrap();
        fs::write(output.join("reports/host1/summary.html"), b"<html/>").unwrap();
        fs::write(output.join("evidence/memory.dd"), vec![0u8; 64]).unwrap();
        fs::write(output.join("evidence/netstat.txt"), b"tcp 0 0").unwrap();

        let sync = Synchronizer::new(store.clone(), events, output, SyncConfig::default());
        Fixture {
            dir,
            store,
            mounter,
            sync,
        }
    }

    fn mnt(f: &Fixture) -> PathBuf {
        f.dir.path().join("mnt")
    }

    #[tokio::test]
    async fn test_copies_and_excludes() {
        let f = fixture();
        let report = f.sync.sync_default().await.unwrap();

        assert!(report.succeeded, "{:?}", report.error);
        assert_eq!(report.files_copied, 2);
        assert_eq!(report.files_excluded, 1);
        assert!(mnt(&f).join("reports/host1/summary.html").exists());
        assert!(mnt(&f).join("evidence/netstat.txt").exists());
        assert!(!mnt(&f).join("evidence/memory.dd").exists());
        assert_eq!(f.store.state(), MountState::Unmounted);

        let manifest: Manifest =
            serde_json::from_slice(&fs::read(mnt(&f).join(MANIFEST_NAME)).unwrap()).unwrap();
        assert_eq!(manifest.total_files, 2);
        assert_eq!(manifest.categories["reports"].files, 1);
    }

    #[tokio::test]
    async fn test_second_run_only_counts_up_to_date() {
        let f = fixture();
        f.sync.sync_default().await.unwrap();
        let report = f.sync.sync_default().await.unwrap();

        assert_eq!(report.files_copied, 0);
        assert_eq!(report.files_up_to_date, 2);
    }

    #[tokio::test]
    async fn test_never_deletes() {
        let f = fixture();
        // Something already on the store that no source has
        fs::create_dir_all(mnt(&f).join("reports")).unwrap();
        fs::write(mnt(&f).join("reports/old.txt"), b"keep").unwrap();

        f.sync.sync_default().await.unwrap();

        assert_eq!(fs::read(mnt(&f).join("reports/old.txt")).unwrap(), b"keep");
        let output = f.dir.path().join("output");
        assert!(output.join("reports/host1/summary.html").exists());
        assert!(output.join("evidence/memory.dd").exists());
    }

    #[tokio::test]
    async fn test_newer_destination_is_not_overwritten() {
        let f = fixture();
        let dest = mnt(&f).join("evidence/netstat.txt");
        fs::create_dir_all(dest.parent().unwrap()).unwrap();
        fs::write(&dest, b"edited on the host").unwrap();
        File::options()
            .write(true)
            .open(&dest)
            .unwrap()
            .set_modified(SystemTime::now() + Duration::from_secs(60))
            .unwrap();

        let report = f.sync.sync_default().await.unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"edited on the host");
        assert_eq!(report.files_up_to_date, 1);
    }

    #[tokio::test]
    async fn test_busy_while_exposed() {
        let f = fixture();
        f.store.prepare_for_exposure().await.unwrap();

        let err = f.sync.sync_default().await.unwrap_err();
        assert_eq!(err.code(), "store_busy");
        assert!(!mnt(&f).join(MANIFEST_NAME).exists());
    }

    #[tokio::test]
    async fn test_missing_source_is_skipped() {
        let f = fixture();
        let sources = vec![
            SyncSource {
                path: "nope".to_string(),
                category: "nope".to_string(),
            },
            SyncSource {
                path: "evidence".to_string(),
                category: "evidence".to_string(),
            },
        ];
        let report = f.sync.sync(&sources, &[]).await.unwrap();
        assert!(report.succeeded);
        assert_eq!(report.files_copied, 2);
        assert!(!report.categories.contains_key("nope"));
    }

    #[tokio::test]
    async fn test_category_must_stay_inside_the_store() {
        let f = fixture();
        for category in ["../escaped", "/tmp/escaped", "evidence/../../x", "./evidence", ""] {
            let sources = vec![SyncSource {
                path: "evidence".to_string(),
                category: category.to_string(),
            }];
            let err = f.sync.sync(&sources, &[]).await.unwrap_err();
            assert_eq!(err.code(), "filesystem_error", "{}", category);
        }

        // Rejected before anything was mounted or written
        assert_eq!(f.store.state(), MountState::Unmounted);
        assert_eq!(f.mounter.sync_count(), 0);
        assert!(!f.dir.path().join("escaped").exists());
        assert!(!mnt(&f).join(MANIFEST_NAME).exists());
    }

    #[tokio::test]
    async fn test_nested_category_is_allowed() {
        let f = fixture();
        let sources = vec![SyncSource {
            path: "evidence".to_string(),
            category: "cases/host1".to_string(),
        }];
        let report = f.sync.sync(&sources, &[]).await.unwrap();
        assert!(report.succeeded, "{:?}", report.error);
        assert!(mnt(&f).join("cases/host1/netstat.txt").exists());
    }

    #[tokio::test]
    async fn test_copy_failure_still_releases() {
        let f = fixture();
        // A plain file where the category directory has to go
        fs::create_dir_all(mnt(&f)).unwrap();
        fs::write(mnt(&f).join("evidence"), b"in the way").unwrap();

        let report = f.sync.sync_default().await.unwrap();
        assert!(!report.succeeded);
        let error = report.error.unwrap();
        assert!(error.starts_with("copy "), "{}", error);
        assert!(report.finished_at.is_some());
        assert!(report.manifest_path.is_none());
        // Earlier sources are kept; later ones never ran
        assert!(mnt(&f).join("reports/host1/summary.html").exists());
        assert_eq!(f.store.state(), MountState::Unmounted);
        assert!(f.store.prepare_for_exposure().await.is_ok());
    }

    #[tokio::test]
    async fn test_busy_unmount_is_retried_by_the_next_run() {
        let f = fixture();
        f.mounter.fail_unmount(true);
        let report = f.sync.sync_default().await.unwrap();
        assert!(!report.succeeded);
        assert!(report.error.unwrap().contains("target is busy"));
        assert_eq!(f.store.state(), MountState::MountedLocal);

        f.mounter.fail_unmount(false);
        let report = f.sync.sync_default().await.unwrap();
        assert!(report.succeeded, "{:?}", report.error);
        assert_eq!(f.store.state(), MountState::Unmounted);
        f.store.prepare_for_exposure().await.unwrap();
    }

    #[test]
    fn test_exclude_matches_name_or_relative_path() {
        let patterns = vec![Pattern::new("*.img").unwrap(), Pattern::new("tmp/*").unwrap()];
        assert!(is_excluded(&patterns, "disk.img", "a/b/disk.img"));
        assert!(is_excluded(&patterns, "x.txt", "tmp/x.txt"));
        assert!(!is_excluded(&patterns, "x.txt", "keep/x.txt"));
    }
}
