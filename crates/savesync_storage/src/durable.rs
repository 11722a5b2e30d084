//! Durable storage of committed saves.

use crate::error::StorageResult;
use crate::layout::{sync_directory, OwnerId, StorageKey, StorageLayout};
use crate::staging::StagedArtifact;
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Suffix of the temporary sibling used when a rename cannot cross devices.
const PROMOTE_TEMP_SUFFIX: &str = ".tmp";

#[cfg(unix)]
const CROSS_DEVICE: Option<i32> = Some(18); // EXDEV
#[cfg(windows)]
const CROSS_DEVICE: Option<i32> = Some(17); // ERROR_NOT_SAME_DEVICE
#[cfg(not(any(unix, windows)))]
const CROSS_DEVICE: Option<i32> = None;

type RenameFn = fn(&Path, &Path) -> io::Result<()>;

/// Committed saves, one file per game under the owner's namespace.
///
/// # Visibility
///
/// [`DurableStore::promote`] replaces the previous file with a single
/// `rename`, so readers observe either the old or the new save. Readers must
/// still treat a missing file as "not committed yet" rather than an error:
/// a game that was created but never uploaded has no file at all.
#[derive(Clone)]
pub struct DurableStore {
    layout: Arc<StorageLayout>,
    rename: RenameFn,
}

impl DurableStore {
    /// Creates a durable store over the given layout.
    pub fn new(layout: Arc<StorageLayout>) -> Self {
        Self {
            layout,
            rename: |from, to| fs::rename(from, to),
        }
    }

    #[cfg(test)]
    fn with_rename(layout: Arc<StorageLayout>, rename: RenameFn) -> Self {
        Self { layout, rename }
    }

    /// Moves a staged artifact over the durable copy of its save.
    ///
    /// Steps:
    /// 1. Create the owner's durable directory if needed
    /// 2. Rename the staged file over the durable path
    /// 3. Sync the durable directory so the rename survives a crash
    ///
    /// If staging and storage live on different file systems the staged file
    /// is copied into a temporary sibling, synced, renamed into place and only
    /// then removed from staging.
    ///
    /// Once the new save has been renamed into place it is visible, so the
    /// steps after that (staged cleanup, directory sync) are logged on
    /// failure instead of failing the promotion.
    ///
    /// # Errors
    ///
    /// Returns an error if a step up to the rename fails. On error the staged
    /// file is left where it was and the previous durable file is untouched.
    pub fn promote(&self, artifact: &StagedArtifact) -> StorageResult<PathBuf> {
        let dir = self.layout.durable_dir(artifact.owner());
        fs::create_dir_all(&dir)?;

        let target = self.layout.durable_path(artifact.owner(), artifact.key());
        match (self.rename)(artifact.path(), &target) {
            Ok(()) => {}
            Err(e) if is_cross_device(&e) => {
                tracing::debug!(
                    staged = %artifact.path().display(),
                    "rename crosses file systems, copying"
                );
                copy_then_rename(artifact.path(), &target, self.rename)?;
                if let Err(e) = fs::remove_file(artifact.path()) {
                    tracing::warn!(
                        staged = %artifact.path().display(),
                        error = %e,
                        "failed to remove staged copy after promotion"
                    );
                }
            }
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = sync_directory(&dir) {
            tracing::warn!(dir = %dir.display(), error = %e, "failed to sync durable directory");
        }
        Ok(target)
    }

    /// Opens the durable copy of a save.
    ///
    /// Returns `None` if nothing has been committed for the key.
    pub fn open(&self, owner: OwnerId, key: &StorageKey) -> StorageResult<Option<File>> {
        match File::open(self.layout.durable_path(owner, key)) {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns true if a save has been committed for the key.
    #[must_use]
    pub fn exists(&self, owner: OwnerId, key: &StorageKey) -> bool {
        self.layout.durable_path(owner, key).is_file()
    }

    /// Removes the durable copy of a save.
    ///
    /// Returns false if there was nothing to remove.
    pub fn remove(&self, owner: OwnerId, key: &StorageKey) -> StorageResult<bool> {
        match fs::remove_file(self.layout.durable_path(owner, key)) {
            Ok(()) => {
                sync_directory(&self.layout.durable_dir(owner))?;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl fmt::Debug for DurableStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DurableStore")
            .field("root", &self.layout.storage_root())
            .finish()
    }
}

fn copy_then_rename(source: &Path, target: &Path, rename: RenameFn) -> StorageResult<()> {
    let mut temp_name = target.as_os_str().to_owned();
    temp_name.push(PROMOTE_TEMP_SUFFIX);
    let temp = PathBuf::from(temp_name);

    let result = (|| -> StorageResult<()> {
        fs::copy(source, &temp)?;
        File::open(&temp)?.sync_all()?;
        rename(&temp, target)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}

fn is_cross_device(err: &io::Error) -> bool {
    CROSS_DEVICE.is_some() && err.raw_os_error() == CROSS_DEVICE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::StagingArea;
    #[cfg(unix)]
    use std::cell::RefCell;
    use std::io::{Cursor, Read};
    use tempfile::{tempdir, TempDir};

    fn stores() -> (TempDir, StagingArea, DurableStore) {
        stores_with(|from, to| fs::rename(from, to))
    }

    fn stores_with(rename: RenameFn) -> (TempDir, StagingArea, DurableStore) {
        let dir = tempdir().unwrap();
        let layout = Arc::new(
            StorageLayout::open(&dir.path().join("cache"), &dir.path().join("storage"), true)
                .unwrap(),
        );
        (
            dir,
            StagingArea::new(Arc::clone(&layout)),
            DurableStore::with_rename(layout, rename),
        )
    }

    #[cfg(unix)]
    thread_local! {
        static PINNED: RefCell<Option<PathBuf>> = const { RefCell::new(None) };
    }

    /// Refuses to rename staged attempts, as if staging were on another disk.
    #[cfg(unix)]
    fn split_rename(from: &Path, to: &Path) -> io::Result<()> {
        if from.extension().is_some_and(|ext| ext == "part") {
            return Err(io::Error::from_raw_os_error(CROSS_DEVICE.unwrap_or(18)));
        }
        fs::rename(from, to)
    }

    /// Like `split_rename`, then swaps the pinned staged file for a directory
    /// so it cannot be unlinked.
    #[cfg(unix)]
    fn split_rename_pinning_staged(from: &Path, to: &Path) -> io::Result<()> {
        split_rename(from, to)?;
        if let Some(staged) = PINNED.with(|p| p.borrow().clone()) {
            fs::remove_file(&staged)?;
            fs::create_dir(&staged)?;
        }
        Ok(())
    }

    fn key() -> StorageKey {
        StorageKey::new("game.bin").unwrap()
    }

    fn read_all(mut file: File) -> Vec<u8> {
        let mut data = Vec::new();
        file.read_to_end(&mut data).unwrap();
        data
    }

    #[test]
    fn promote_moves_staged_file() {
        let (_dir, staging, durable) = stores();
        let artifact = staging.receive(5, &key(), &mut Cursor::new(b"rev1")).unwrap();

        let target = durable.promote(&artifact).unwrap();
        assert!(target.is_file());
        assert!(!staging.contains(5, &key()));
        assert_eq!(read_all(durable.open(5, &key()).unwrap().unwrap()), b"rev1");
    }

    #[test]
    fn promote_replaces_previous_revision() {
        let (_dir, staging, durable) = stores();
        let first = staging.receive(5, &key(), &mut Cursor::new(b"old save")).unwrap();
        durable.promote(&first).unwrap();

        let second = staging.receive(5, &key(), &mut Cursor::new(b"new")).unwrap();
        durable.promote(&second).unwrap();

        assert_eq!(read_all(durable.open(5, &key()).unwrap().unwrap()), b"new");
    }

    #[test]
    fn promote_missing_staged_file_keeps_durable_copy() {
        let (_dir, staging, durable) = stores();
        let artifact = staging.receive(5, &key(), &mut Cursor::new(b"good")).unwrap();
        durable.promote(&artifact).unwrap();

        // The artifact now points at a file that is gone.
        assert!(durable.promote(&artifact).is_err());
        assert_eq!(read_all(durable.open(5, &key()).unwrap().unwrap()), b"good");
    }

    #[test]
    fn open_missing_is_none() {
        let (_dir, _staging, durable) = stores();
        assert!(durable.open(9, &key()).unwrap().is_none());
        assert!(!durable.exists(9, &key()));
    }

    #[test]
    fn remove_reports_presence() {
        let (_dir, staging, durable) = stores();
        let artifact = staging.receive(5, &key(), &mut Cursor::new(b"x")).unwrap();
        durable.promote(&artifact).unwrap();

        assert!(durable.remove(5, &key()).unwrap());
        assert!(!durable.remove(5, &key()).unwrap());
    }

    #[test]
    fn copy_then_rename_replaces_target() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("src.bin");
        let target = dir.path().join("dst.bin");
        fs::write(&source, b"fresh").unwrap();
        fs::write(&target, b"stale").unwrap();

        copy_then_rename(&source, &target, |from, to| fs::rename(from, to)).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"fresh");
        assert!(!dir.path().join("dst.bin.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn promote_copies_across_devices() {
        let (_dir, staging, durable) = stores_with(split_rename);
        let first = staging.receive(5, &key(), &mut Cursor::new(b"old")).unwrap();
        durable.promote(&first).unwrap();

        let second = staging.receive(5, &key(), &mut Cursor::new(b"new")).unwrap();
        let target = durable.promote(&second).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"new");
        assert!(!staging.contains(5, &key()));
        assert!(!target.with_file_name("game.bin.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn staged_cleanup_failure_keeps_promotion() {
        let (_dir, staging, durable) = stores_with(split_rename_pinning_staged);
        let artifact = staging.receive(5, &key(), &mut Cursor::new(b"fresh")).unwrap();
        PINNED.with(|p| *p.borrow_mut() = Some(artifact.path().to_path_buf()));

        let target = durable.promote(&artifact).unwrap();
        PINNED.with(|p| p.borrow_mut().take());
        assert_eq!(fs::read(&target).unwrap(), b"fresh");
        assert!(artifact.path().is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn failed_cross_device_copy_keeps_previous_save() {
        fn refuse_all(_from: &Path, _to: &Path) -> io::Result<()> {
            Err(io::Error::from_raw_os_error(CROSS_DEVICE.unwrap_or(18)))
        }

        let (_dir, staging, durable) = stores();
        let first = staging.receive(5, &key(), &mut Cursor::new(b"old")).unwrap();
        durable.promote(&first).unwrap();

        let durable = DurableStore::with_rename(Arc::clone(&durable.layout), refuse_all);
        let second = staging.receive(5, &key(), &mut Cursor::new(b"new")).unwrap();
        assert!(durable.promote(&second).is_err());
        assert_eq!(read_all(durable.open(5, &key()).unwrap().unwrap()), b"old");
        assert!(second.path().exists());
    }
}
