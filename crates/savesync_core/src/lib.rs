//! # SaveSync Core
//!
//! Lease-guarded, integrity-checked save uploads.
//!
//! A client first asks for a lease on one of its games. The lease token
//! authorizes exactly one upload or download. Uploads are streamed into a
//! per-owner staging area, hashed, and only promoted into durable storage
//! when the hash matches the one the client declared. Each commit advances
//! the game's revision by one.
//!
//! ## Example
//!
//! ```rust
//! use savesync_core::{CoreConfig, GameDirectory, MemoryLedger, SaveCoordinator, UserId};
//! use savesync_storage::hash_bytes;
//! use std::io::Cursor;
//! use std::sync::Arc;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let ledger = Arc::new(MemoryLedger::new());
//! let config = CoreConfig::new(dir.path().join("cache"), dir.path().join("storage"));
//! let coordinator = SaveCoordinator::open(config, ledger.clone()).unwrap();
//!
//! let user = UserId(1);
//! let game = ledger.create_game(user, "Terraria").unwrap();
//! let lease = coordinator.request_lease(user, game.id).unwrap();
//!
//! let data = b"world.wld";
//! let receipt = coordinator
//!     .begin_upload(user, lease.token.as_str(), &mut Cursor::new(data), hash_bytes(data).as_str())
//!     .unwrap();
//! assert_eq!(receipt.record.revision.0, 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod commit;
mod config;
mod coordinator;
mod error;
mod lease;
mod ledger;
mod transfer;
mod types;

pub use clock::{unix_millis, Clock, ManualClock, SystemClock};
pub use commit::CommitEngine;
pub use config::{CoreConfig, DEFAULT_LEASE_TTL, DEFAULT_REAP_INTERVAL};
pub use coordinator::{SaveCoordinator, SaveDownload, UploadReceipt};
pub use error::{CoreError, CoreResult};
pub use lease::{Lease, LeaseGuard, LeaseRegistry, LeaseToken};
pub use ledger::{
    new_storage_key, Game, GameDirectory, Ledger, LedgerError, LedgerResult, MemoryLedger,
    RevisionRecord,
};
pub use transfer::{Transfer, TransferState};
pub use types::{GameId, Revision, UserId};
