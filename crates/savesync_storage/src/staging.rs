//! Quarantine area for uploads that have not been validated yet.
//!
//! Every attempt writes to its own file, `<key>.<attempt>.part`, created with
//! `create_new`. A writer therefore never shares an inode with another
//! attempt or with a file that was already promoted to durable storage.

use crate::error::StorageResult;
use crate::layout::{OwnerId, StorageKey, StorageLayout};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

const ATTEMPT_SUFFIX: &str = ".part";

/// A fully received upload waiting for validation and commit.
///
/// The artifact is owned by the staging area until the commit moves it into
/// durable storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedArtifact {
    owner: OwnerId,
    key: StorageKey,
    path: PathBuf,
    len: u64,
}

impl StagedArtifact {
    /// Returns the owner of the upload.
    #[must_use]
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// Returns the storage key of the upload.
    #[must_use]
    pub fn key(&self) -> &StorageKey {
        &self.key
    }

    /// Returns the path of the staged file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of bytes received.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns true if the upload was empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Write sink for an in-flight upload.
///
/// Dropping the writer without calling [`StagedWriter::finish`] leaves the
/// partial file in the staging area; it is removed when the next attempt for
/// the same key begins and never becomes visible to readers of durable
/// storage.
#[derive(Debug)]
pub struct StagedWriter {
    owner: OwnerId,
    key: StorageKey,
    path: PathBuf,
    file: File,
    written: u64,
}

impl StagedWriter {
    /// Returns the number of bytes written so far.
    #[must_use]
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flushes and syncs the staged file.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn finish(mut self) -> StorageResult<StagedArtifact> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(StagedArtifact {
            owner: self.owner,
            key: self.key,
            path: self.path,
            len: self.written,
        })
    }
}

impl Write for StagedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Per-user scratch directories for incoming uploads.
#[derive(Debug, Clone)]
pub struct StagingArea {
    layout: Arc<StorageLayout>,
}

impl StagingArea {
    /// Creates a staging area over the given layout.
    pub fn new(layout: Arc<StorageLayout>) -> Self {
        Self { layout }
    }

    /// Opens a fresh staged file for an upload.
    ///
    /// Creates the owner's scratch directory if needed and deletes leftovers
    /// of earlier attempts for the key. A writer still holding one of those
    /// keeps writing to an unlinked file.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be created.
    pub fn begin_upload(&self, owner: OwnerId, key: &StorageKey) -> StorageResult<StagedWriter> {
        fs::create_dir_all(self.layout.staging_dir(owner))?;
        self.remove(owner, key)?;

        let name = format!("{key}.{}{ATTEMPT_SUFFIX}", Uuid::new_v4().simple());
        let path = self.layout.staging_dir(owner).join(name);
        let file = OpenOptions::new().write(true).create_new(true).open(&path)?;

        Ok(StagedWriter {
            owner,
            key: key.clone(),
            path,
            file,
            written: 0,
        })
    }

    /// Streams an entire upload into the staging area.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the source or writing the staged file
    /// fails. The partial file stays in the staging area.
    pub fn receive<R: Read>(
        &self,
        owner: OwnerId,
        key: &StorageKey,
        source: &mut R,
    ) -> StorageResult<StagedArtifact> {
        let mut writer = self.begin_upload(owner, key)?;
        io::copy(source, &mut writer)?;
        writer.finish()
    }

    /// Deletes a staged file. A file that is already gone is not an error.
    ///
    /// Only the artifact's own attempt is removed.
    pub fn discard(&self, artifact: StagedArtifact) -> StorageResult<()> {
        remove_if_present(&artifact.path)
    }

    /// Deletes every attempt staged for a key.
    pub fn remove(&self, owner: OwnerId, key: &StorageKey) -> StorageResult<()> {
        for path in self.attempts(owner, key)? {
            remove_if_present(&path)?;
        }
        Ok(())
    }

    /// Returns true if something is staged for the key.
    #[must_use]
    pub fn contains(&self, owner: OwnerId, key: &StorageKey) -> bool {
        self.attempts(owner, key)
            .is_ok_and(|attempts| !attempts.is_empty())
    }

    fn attempts(&self, owner: OwnerId, key: &StorageKey) -> StorageResult<Vec<PathBuf>> {
        let entries = match fs::read_dir(self.layout.staging_dir(owner)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry
                .file_name()
                .to_str()
                .is_some_and(|name| is_attempt_of(name, key))
            {
                found.push(entry.path());
            }
        }
        Ok(found)
    }
}

fn is_attempt_of(name: &str, key: &StorageKey) -> bool {
    name.strip_prefix(key.as_str())
        .and_then(|rest| rest.strip_prefix('.'))
        .and_then(|rest| rest.strip_suffix(ATTEMPT_SUFFIX))
        .is_some_and(|id| id.len() == 32 && id.bytes().all(|b| b.is_ascii_hexdigit()))
}

fn remove_if_present(path: &Path) -> StorageResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
