//! On-disk layout for staged and durable saves.
//!
//! ```text
//! <staging_root>/
//! └─ <owner>/<storage_key>.<attempt>.part   # in-flight uploads
//! <storage_root>/
//! ├─ LOCK                      # Advisory lock for single-process ownership
//! └─ <owner>/<storage_key>     # committed saves
//! ```
//!
//! Both namespaces are split by owner, and staged attempts are named after
//! the key of the durable file they will replace. The LOCK file ensures only one process
//! hands out leases over a given set of roots, since leases live in memory.

use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";

/// Identifier of the user owning a namespace.
pub type OwnerId = u64;

/// Opaque file name of a save inside its owner's namespace.
///
/// Keys are generated once when a game is created and are unrelated to the
/// game's display name. A key is a single path component: it cannot be empty,
/// contain separators, or refer to `.`/`..`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey(String);

impl StorageKey {
    /// Validates and wraps a storage key.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidKey`] if the key is not a plain file name.
    pub fn new(key: impl Into<String>) -> StorageResult<Self> {
        let key = key.into();
        let plain = !key.is_empty()
            && key != "."
            && key != ".."
            && key != LOCK_FILE
            && !key.contains(['/', '\\', '\0']);
        if plain {
            Ok(Self(key))
        } else {
            Err(StorageError::InvalidKey(key))
        }
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolves paths for staged and durable saves and holds the storage lock.
///
/// Only one `StorageLayout` can exist per storage root at a time; the lock is
/// released when the layout is dropped.
#[derive(Debug)]
pub struct StorageLayout {
    staging_root: PathBuf,
    storage_root: PathBuf,
    _lock_file: File,
}

impl StorageLayout {
    /// Opens the staging and storage roots.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - A root doesn't exist and `create_if_missing` is false
    /// - Both roots are the same directory
    /// - Another process holds the lock (returns `Locked`)
    /// - I/O errors occur
    pub fn open(
        staging_root: &Path,
        storage_root: &Path,
        create_if_missing: bool,
    ) -> StorageResult<Self> {
        for root in [staging_root, storage_root] {
            if !root.exists() {
                if create_if_missing {
                    fs::create_dir_all(root)?;
                } else {
                    return Err(StorageError::MissingRoot(root.to_path_buf()));
                }
            }
            if !root.is_dir() {
                return Err(StorageError::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("path is not a directory: {}", root.display()),
                )));
            }
        }

        if fs::canonicalize(staging_root)? == fs::canonicalize(storage_root)? {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "staging and storage roots must differ",
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(storage_root.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        Ok(Self {
            staging_root: staging_root.to_path_buf(),
            storage_root: storage_root.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the staging root.
    #[must_use]
    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    /// Returns the durable storage root.
    #[must_use]
    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Returns the owner's scratch directory.
    #[must_use]
    pub fn staging_dir(&self, owner: OwnerId) -> PathBuf {
        self.staging_root.join(owner.to_string())
    }

    /// Returns the owner's durable directory.
    #[must_use]
    pub fn durable_dir(&self, owner: OwnerId) -> PathBuf {
        self.storage_root.join(owner.to_string())
    }

    /// Returns the durable path for a save.
    #[must_use]
    pub fn durable_path(&self, owner: OwnerId, key: &StorageKey) -> PathBuf {
        self.durable_dir(owner).join(key.as_str())
    }

    /// Removes every staged and durable file of an owner.
    ///
    /// Missing directories are ignored.
    pub fn purge_owner(&self, owner: OwnerId) -> StorageResult<()> {
        for dir in [self.durable_dir(owner), self.staging_dir(owner)] {
            match fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Syncs a directory so that entries created, renamed or removed in it are
/// durable.
#[cfg(unix)]
pub(crate) fn sync_directory(path: &Path) -> StorageResult<()> {
    let dir = File::open(path)?;
    dir.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn sync_directory(_path: &Path) -> StorageResult<()> {
    // NTFS journals metadata; directory handles cannot be fsynced.
    Ok(())
}
