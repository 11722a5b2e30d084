//! Content hashing for uploaded saves.
//!
//! Every save is identified by the SHA-512 digest of its bytes, rendered as
//! lowercase hex. The digest is computed incrementally so memory use does not
//! depend on the save size.
//!
//! ## Versioning
//!
//! Clients declare hashes computed with the same algorithm. Changing the
//! algorithm invalidates every hash already recorded, so any change must bump
//! [`DIGEST_VERSION`] and be negotiated with clients.

use crate::error::{StorageError, StorageResult};
use sha2::{Digest, Sha512};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Name of the digest algorithm used for save hashes.
pub const DIGEST_ALGORITHM: &str = "sha512";

/// Version of the digest scheme.
pub const DIGEST_VERSION: u16 = 1;

/// Length of a hex-encoded digest.
pub const DIGEST_HEX_LEN: usize = 128;

const READ_CHUNK: usize = 64 * 1024;

/// Lowercase hex digest of a save's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    /// Wraps a hex digest, normalising it to lowercase.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::MissingHash`] if the value is blank.
    pub fn parse(value: &str) -> StorageResult<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(StorageError::MissingHash);
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    /// Returns the hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compares against a client-declared value, ignoring case and
    /// surrounding whitespace.
    #[must_use]
    pub fn matches(&self, declared: &str) -> bool {
        self.0.eq_ignore_ascii_case(declared.trim())
    }

    fn from_digest(bytes: &[u8]) -> Self {
        let mut hex = String::with_capacity(bytes.len() * 2);
        for byte in bytes {
            hex.push_str(&format!("{byte:02x}"));
        }
        Self(hex)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hashes a byte slice.
#[must_use]
pub fn hash_bytes(data: &[u8]) -> ContentHash {
    ContentHash::from_digest(&Sha512::digest(data))
}

/// Hashes everything a reader yields, in fixed-size chunks.
pub fn hash_reader<R: Read>(reader: &mut R) -> io::Result<ContentHash> {
    let mut hasher = Sha512::new();
    let mut buffer = vec![0u8; READ_CHUNK];
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..read]);
    }
    Ok(ContentHash::from_digest(&hasher.finalize()))
}

/// Hashes a file on disk.
pub fn hash_file(path: &Path) -> io::Result<ContentHash> {
    let mut file = File::open(path)?;
    hash_reader(&mut file)
}

/// Verifies a staged file against the hash declared by its uploader.
///
/// The file is read exactly once. Returns the computed hash on success.
///
/// # Errors
///
/// - [`StorageError::MissingHash`] if `declared` is blank
/// - [`StorageError::HashMismatch`] if the digests differ
/// - [`StorageError::Io`] if the file cannot be read
pub fn verify(staged: &Path, declared: &str) -> StorageResult<ContentHash> {
    if declared.trim().is_empty() {
        return Err(StorageError::MissingHash);
    }

    let computed = hash_file(staged)?;
    if computed.matches(declared) {
        Ok(computed)
    } else {
        Err(StorageError::HashMismatch {
            declared: declared.trim().to_string(),
            computed: computed.0,
        })
    }
}
