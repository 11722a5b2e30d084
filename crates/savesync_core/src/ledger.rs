//! Revision ledger interface.
//!
//! The ledger is the metadata store for games and their revisions. It lives
//! outside this crate (typically a relational database); the coordinator only
//! needs two calls:
//!
//! - [`Ledger::game_by_owner`] to check ownership before granting a lease
//! - [`Ledger::record_revision`] to publish a verified commit
//!
//! [`GameDirectory`] adds the game bookkeeping the request layer needs, and
//! [`MemoryLedger`] implements both for tests and single-node setups.

use crate::types::{GameId, Revision, UserId};
use parking_lot::RwLock;
use savesync_storage::{ContentHash, StorageKey};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use thiserror::Error;
use uuid::Uuid;

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors reported by a ledger.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// No such game for this owner.
    #[error("game not found: {game_id}")]
    NotFound {
        /// The requested game.
        game_id: GameId,
    },

    /// The owner is not allowed to use the game.
    #[error("access to {game_id} refused")]
    Forbidden {
        /// The requested game.
        game_id: GameId,
    },

    /// The backing store failed.
    #[error("ledger backend failure: {0}")]
    Backend(String),
}

/// Revision metadata of a game.
///
/// # Invariants
///
/// - `available` implies `content_hash` and `last_update` are set and
///   `revision >= 1`
/// - `revision` only changes through [`Ledger::record_revision`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionRecord {
    /// The game this record describes.
    pub game_id: GameId,
    /// Number of successful commits so far.
    pub revision: Revision,
    /// Hash of the current durable save.
    pub content_hash: Option<ContentHash>,
    /// Whether a save can be downloaded.
    pub available: bool,
    /// Time of the last commit.
    pub last_update: Option<SystemTime>,
}

impl RevisionRecord {
    /// Creates the record of a game that was never uploaded.
    #[must_use]
    pub fn empty(game_id: GameId) -> Self {
        Self {
            game_id,
            revision: Revision::INITIAL,
            content_hash: None,
            available: false,
            last_update: None,
        }
    }

    /// Returns the record after one more successful commit.
    #[must_use]
    pub fn advanced(&self, hash: ContentHash, at: SystemTime) -> Self {
        Self {
            game_id: self.game_id,
            revision: self.revision.next(),
            content_hash: Some(hash),
            available: true,
            last_update: Some(at),
        }
    }

    /// Checks the availability invariant.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        !self.available
            || (self.content_hash.is_some()
                && self.last_update.is_some()
                && self.revision >= Revision(1))
    }
}

/// A game save slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Game {
    /// Game identifier.
    pub id: GameId,
    /// Owner of the save.
    pub owner: UserId,
    /// Display name chosen by the user.
    pub name: String,
    /// File name of the save in the owner's namespaces.
    pub storage_key: StorageKey,
    /// Current revision metadata.
    pub record: RevisionRecord,
}

/// Metadata store consulted by the coordinator.
pub trait Ledger: Send + Sync {
    /// Looks up a game owned by `owner`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the game doesn't exist or belongs to someone else.
    fn game_by_owner(&self, owner: UserId, game_id: GameId) -> LedgerResult<Game>;

    /// Publishes a verified commit: increments the revision, stores the hash,
    /// marks the save available and stamps the update time.
    fn record_revision(
        &self,
        game_id: GameId,
        hash: &ContentHash,
        at: SystemTime,
    ) -> LedgerResult<RevisionRecord>;
}

/// Game bookkeeping used by the request layer.
pub trait GameDirectory: Ledger {
    /// Creates an empty save slot with a fresh storage key.
    fn create_game(&self, owner: UserId, name: &str) -> LedgerResult<Game>;

    /// Lists the games of an owner, ordered by ID.
    fn games_by_owner(&self, owner: UserId) -> LedgerResult<Vec<Game>>;

    /// Deletes a game row.
    fn remove_game(&self, owner: UserId, game_id: GameId) -> LedgerResult<Game>;
}

/// Generates the storage key of a new game: a UUID with a `.bin` suffix.
pub fn new_storage_key() -> LedgerResult<StorageKey> {
    StorageKey::new(format!("{}.bin", Uuid::new_v4()))
        .map_err(|e| LedgerError::Backend(e.to_string()))
}

/// An in-memory ledger.
///
/// Suitable for tests and for embedding the coordinator without a database.
/// Data does not survive a restart.
#[derive(Debug)]
pub struct MemoryLedger {
    games: RwLock<BTreeMap<GameId, Game>>,
    next_id: AtomicU64,
}

impl MemoryLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self {
            games: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Returns the revision record of a game regardless of owner.
    #[must_use]
    pub fn record(&self, game_id: GameId) -> Option<RevisionRecord> {
        self.games.read().get(&game_id).map(|g| g.record.clone())
    }

    /// Returns the number of games.
    #[must_use]
    pub fn len(&self) -> usize {
        self.games.read().len()
    }

    /// Returns true if there are no games.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger for MemoryLedger {
    fn game_by_owner(&self, owner: UserId, game_id: GameId) -> LedgerResult<Game> {
        self.games
            .read()
            .get(&game_id)
            .filter(|g| g.owner == owner)
            .cloned()
            .ok_or(LedgerError::NotFound { game_id })
    }

    fn record_revision(
        &self,
        game_id: GameId,
        hash: &ContentHash,
        at: SystemTime,
    ) -> LedgerResult<RevisionRecord> {
        let mut games = self.games.write();
        let game = games
            .get_mut(&game_id)
            .ok_or(LedgerError::NotFound { game_id })?;
        game.record = game.record.advanced(hash.clone(), at);
        Ok(game.record.clone())
    }
}

impl GameDirectory for MemoryLedger {
    fn create_game(&self, owner: UserId, name: &str) -> LedgerResult<Game> {
        let id = GameId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let game = Game {
            id,
            owner,
            name: name.to_string(),
            storage_key: new_storage_key()?,
            record: RevisionRecord::empty(id),
        };
        self.games.write().insert(id, game.clone());
        Ok(game)
    }

    fn games_by_owner(&self, owner: UserId) -> LedgerResult<Vec<Game>> {
        Ok(self
            .games
            .read()
            .values()
            .filter(|g| g.owner == owner)
            .cloned()
            .collect())
    }

    fn remove_game(&self, owner: UserId, game_id: GameId) -> LedgerResult<Game> {
        let mut games = self.games.write();
        match games.get(&game_id) {
            Some(game) if game.owner == owner => {}
            _ => return Err(LedgerError::NotFound { game_id }),
        }
        games
            .remove(&game_id)
            .ok_or(LedgerError::NotFound { game_id })
    }
}
