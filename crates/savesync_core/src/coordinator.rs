//! Upload and download coordination.
//!
//! [`SaveCoordinator`] is the surface the request layer talks to. It ties the
//! lease registry, staging area, integrity check and commit engine together:
//!
//! 1. `request_lease` grants exclusive access to a game
//! 2. `begin_upload` stages the stream, verifies its hash and commits it
//! 3. `download` streams the committed save
//!
//! Uploads and downloads release their lease on every exit path.

use crate::clock::{Clock, SystemClock};
use crate::commit::CommitEngine;
use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::lease::{Lease, LeaseGuard, LeaseRegistry};
use crate::ledger::{Game, Ledger, RevisionRecord};
use crate::transfer::{Transfer, TransferState};
use crate::types::{GameId, UserId};
use savesync_storage::{verify, DurableStore, StagingArea, StorageLayout};
use std::fs::File;
use std::io::{self, Read};
use std::sync::Arc;

/// Outcome of a committed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    /// The updated revision record.
    pub record: RevisionRecord,
    /// Number of bytes committed.
    pub bytes: u64,
}

/// A committed save being streamed to a client.
///
/// The game's lease is held until this value is dropped, so no upload can
/// replace the file mid-read.
#[derive(Debug)]
pub struct SaveDownload {
    game: Game,
    file: File,
    len: u64,
    transfer: Transfer,
    _guard: LeaseGuard,
}

impl SaveDownload {
    /// Returns the game being downloaded.
    #[must_use]
    pub fn game(&self) -> &Game {
        &self.game
    }

    /// Returns the size of the save in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns true if the save is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Read for SaveDownload {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Drop for SaveDownload {
    fn drop(&mut self) {
        // The guard field is dropped right after this and frees the lease.
        self.transfer.release();
    }
}

/// Coordinates leases, staging, validation and commits.
pub struct SaveCoordinator {
    config: CoreConfig,
    layout: Arc<StorageLayout>,
    ledger: Arc<dyn Ledger>,
    registry: Arc<LeaseRegistry>,
    staging: StagingArea,
    durable: DurableStore,
    engine: CommitEngine,
}

impl SaveCoordinator {
    /// Opens the storage roots and creates a coordinator using the system
    /// clock.
    ///
    /// # Errors
    ///
    /// Returns `IoFailure` if the roots cannot be opened or are locked by
    /// another process.
    pub fn open(config: CoreConfig, ledger: Arc<dyn Ledger>) -> CoreResult<Self> {
        Self::open_with_clock(config, ledger, Arc::new(SystemClock))
    }

    /// Opens the storage roots with an explicit clock.
    pub fn open_with_clock(
        config: CoreConfig,
        ledger: Arc<dyn Ledger>,
        clock: Arc<dyn Clock>,
    ) -> CoreResult<Self> {
        let layout = Arc::new(StorageLayout::open(
            &config.staging_root,
            &config.storage_root,
            config.create_if_missing,
        )?);
        let registry = Arc::new(LeaseRegistry::new(
            Arc::clone(&ledger),
            Arc::clone(&clock),
            config.lease_ttl,
        ));
        let staging = StagingArea::new(Arc::clone(&layout));
        let durable = DurableStore::new(Arc::clone(&layout));
        let engine = CommitEngine::new(durable.clone(), Arc::clone(&ledger), clock);

        Ok(Self {
            config,
            layout,
            ledger,
            registry,
            staging,
            durable,
            engine,
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Returns the lease registry, shared with the reaper.
    #[must_use]
    pub fn registry(&self) -> &Arc<LeaseRegistry> {
        &self.registry
    }

    /// Grants `user` exclusive access to `game_id`.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Forbidden` or `AlreadyLeased`; see
    /// [`LeaseRegistry::acquire`].
    pub fn request_lease(&self, user: UserId, game_id: GameId) -> CoreResult<Lease> {
        match self.registry.acquire(user, game_id) {
            Ok(lease) => {
                tracing::debug!(%user, %game_id, "lease granted");
                Ok(lease)
            }
            Err(e) => Err(self.report(game_id, e)),
        }
    }

    /// Receives a new revision of the leased game's save.
    ///
    /// The stream is staged, hashed and compared with `declared_hash`. On a
    /// match it is committed and the revision advances by one. The lease is
    /// released whatever the outcome.
    ///
    /// # Errors
    ///
    /// - `InvalidToken` if the lease is unknown or lapsed (also if it lapses
    ///   before the commit)
    /// - `AlreadyLeased` if another request is already using the lease
    /// - `InvalidRequest` if no hash is declared or the upload is too large
    /// - `NotFound` if the leased game is not owned by `user`
    /// - `HashMismatch` if the bytes don't match; the staged file is removed
    /// - `IoFailure` if staging or promotion fails; the staged file is kept
    pub fn begin_upload<R: Read>(
        &self,
        user: UserId,
        lease_token: &str,
        source: &mut R,
        declared_hash: &str,
    ) -> CoreResult<UploadReceipt> {
        let mut transfer = Transfer::new();
        let guard = self.claim(user, lease_token)?;
        let game_id = guard.lease().game_id;
        transfer.leased(game_id)?;

        let result = self
            .upload_leased(&mut transfer, &guard, user, source, declared_hash)
            .map_err(|e| self.report(game_id, e));
        drop(guard);
        transfer.release();
        result
    }

    fn upload_leased<R: Read>(
        &self,
        transfer: &mut Transfer,
        guard: &LeaseGuard,
        user: UserId,
        source: &mut R,
        declared_hash: &str,
    ) -> CoreResult<UploadReceipt> {
        let game_id = guard.lease().game_id;
        if declared_hash.trim().is_empty() {
            return Err(CoreError::invalid_request("declared hash is missing"));
        }

        let game = self
            .ledger
            .game_by_owner(user, game_id)
            .map_err(|e| CoreError::from_ledger(e, user, game_id))?;
        let owner = game.owner.as_u64();

        // Staging clears leftovers of the key, which must not touch the
        // attempt of whoever holds the lease now.
        if !guard.is_held() {
            transfer.advance(TransferState::Expired)?;
            return Err(CoreError::InvalidToken);
        }
        transfer.advance(TransferState::Staging)?;
        let artifact = match self.config.max_upload_size {
            Some(limit) => {
                let mut limited = source.by_ref().take(limit.saturating_add(1));
                let artifact = self.staging.receive(owner, &game.storage_key, &mut limited)?;
                if artifact.len() > limit {
                    self.staging.discard(artifact)?;
                    return Err(CoreError::invalid_request(format!(
                        "upload exceeds {limit} bytes"
                    )));
                }
                artifact
            }
            None => self.staging.receive(owner, &game.storage_key, source)?,
        };

        transfer.advance(TransferState::Validating)?;
        let verified = match verify(artifact.path(), declared_hash) {
            Ok(hash) => hash,
            Err(e) => {
                let err = CoreError::from(e);
                if matches!(err, CoreError::HashMismatch { .. }) {
                    transfer.advance(TransferState::Rejected)?;
                    self.staging.discard(artifact)?;
                }
                return Err(err);
            }
        };

        if !guard.is_held() {
            transfer.advance(TransferState::Expired)?;
            self.staging.discard(artifact)?;
            return Err(CoreError::InvalidToken);
        }

        let record = self.engine.commit(&game, &artifact, &verified)?;
        transfer.advance(TransferState::Committed)?;
        Ok(UploadReceipt {
            record,
            bytes: artifact.len(),
        })
    }

    /// Opens the committed save of the leased game for streaming.
    ///
    /// # Errors
    ///
    /// - `InvalidToken` if the lease is unknown or lapsed
    /// - `NotFound` if the game isn't owned by `user` or was never uploaded
    pub fn download(&self, user: UserId, lease_token: &str) -> CoreResult<SaveDownload> {
        let mut transfer = Transfer::new();
        let guard = self.claim(user, lease_token)?;
        let game_id = guard.lease().game_id;
        transfer.leased(game_id)?;

        let opened = self
            .ledger
            .game_by_owner(user, game_id)
            .map_err(|e| CoreError::from_ledger(e, user, game_id))
            .and_then(|game| {
                match self.durable.open(game.owner.as_u64(), &game.storage_key)? {
                    Some(file) => Ok((game, file)),
                    None => Err(CoreError::NotFound { game_id }),
                }
            })
            .and_then(|(game, file)| {
                let len = file.metadata()?.len();
                Ok((game, file, len))
            });

        match opened {
            Ok((game, file, len)) => {
                transfer.advance(TransferState::Serving)?;
                tracing::debug!(%user, %game_id, bytes = len, "serving save");
                Ok(SaveDownload {
                    game,
                    file,
                    len,
                    transfer,
                    _guard: guard,
                })
            }
            Err(e) => {
                drop(guard);
                transfer.release();
                Err(self.report(game_id, e))
            }
        }
    }

    /// Deletes a game's staged and durable files under its lease, then runs
    /// `forget` (typically removing the ledger row) before releasing it.
    ///
    /// # Errors
    ///
    /// `NotFound` or `AlreadyLeased` if the lease cannot be taken, `IoFailure`
    /// if a file cannot be removed, or whatever `forget` returns.
    pub fn remove_save<F>(&self, user: UserId, game_id: GameId, forget: F) -> CoreResult<Game>
    where
        F: FnOnce(&Game) -> CoreResult<()>,
    {
        let lease = self.request_lease(user, game_id)?;
        let guard = LeaseGuard::claim(&self.registry, user, lease.token.as_str())?;

        let result = self
            .ledger
            .game_by_owner(user, game_id)
            .map_err(|e| CoreError::from_ledger(e, user, game_id))
            .and_then(|game| {
                let owner = game.owner.as_u64();
                self.durable.remove(owner, &game.storage_key)?;
                self.staging.remove(owner, &game.storage_key)?;
                forget(&game)?;
                Ok(game)
            });
        drop(guard);

        match result {
            Ok(game) => {
                tracing::info!(%user, %game_id, "save removed");
                Ok(game)
            }
            Err(e) => Err(self.report(game_id, e)),
        }
    }

    /// Removes every staged and durable file of `user`.
    ///
    /// Used when an account is deleted; callers must make sure the user has
    /// no request in flight.
    pub fn purge_owner(&self, user: UserId) -> CoreResult<()> {
        self.layout.purge_owner(user.as_u64()).map_err(|e| {
            let err = CoreError::from(e);
            tracing::error!(%user, error = %err, "failed to purge user files");
            err
        })
    }

    fn claim(&self, user: UserId, lease_token: &str) -> CoreResult<LeaseGuard> {
        LeaseGuard::claim(&self.registry, user, lease_token).map_err(|e| {
            tracing::debug!(%user, error = %e, "lease token refused");
            e
        })
    }

    /// Logs an error at a level matching its kind and passes it through.
    fn report(&self, game_id: GameId, err: CoreError) -> CoreError {
        if err.is_server_error() {
            tracing::error!(%game_id, error = %err, "save transfer failed");
        } else {
            tracing::debug!(%game_id, error = %err, "save transfer refused");
        }
        err
    }
}
