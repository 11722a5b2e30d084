//! # SaveSync Storage
//!
//! File-system side of the save upload pipeline.
//!
//! This crate knows nothing about leases, users or revisions. It provides:
//!
//! - [`StorageLayout`] - per-owner paths for staged and durable saves
//! - [`StagingArea`] - quarantine for uploads that are still being received
//! - [`verify`] - SHA-512 integrity check of a staged file
//! - [`DurableStore`] - atomic promotion of staged files into durable storage
//!
//! ## Example
//!
//! ```rust
//! use savesync_storage::{
//!     hash_bytes, verify, DurableStore, StagingArea, StorageKey, StorageLayout,
//! };
//! use std::io::Cursor;
//! use std::sync::Arc;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let layout = Arc::new(
//!     StorageLayout::open(&dir.path().join("cache"), &dir.path().join("storage"), true).unwrap(),
//! );
//! let staging = StagingArea::new(Arc::clone(&layout));
//! let durable = DurableStore::new(layout);
//!
//! let key = StorageKey::new("slot.bin").unwrap();
//! let artifact = staging.receive(1, &key, &mut Cursor::new(b"save data")).unwrap();
//! verify(artifact.path(), hash_bytes(b"save data").as_str()).unwrap();
//! durable.promote(&artifact).unwrap();
//! assert!(durable.exists(1, &key));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod durable;
mod error;
mod integrity;
mod layout;
mod staging;

pub use durable::DurableStore;
pub use error::{StorageError, StorageResult};
pub use integrity::{
    hash_bytes, hash_file, hash_reader, verify, ContentHash, DIGEST_ALGORITHM, DIGEST_HEX_LEN,
    DIGEST_VERSION,
};
pub use layout::{OwnerId, StorageKey, StorageLayout};
pub use staging::{StagedArtifact, StagedWriter, StagingArea};
