//! Promotion of verified uploads into durable storage.

use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::ledger::{Game, Ledger, LedgerError, RevisionRecord};
use savesync_storage::{ContentHash, DurableStore, StagedArtifact};
use std::sync::Arc;

/// Moves verified staged files into durable storage and records the new
/// revision.
///
/// The ledger is only written after the file is in place, so a failed move
/// leaves readers on the previous revision. The engine is the only writer of
/// revision numbers.
pub struct CommitEngine {
    durable: DurableStore,
    ledger: Arc<dyn Ledger>,
    clock: Arc<dyn Clock>,
}

impl CommitEngine {
    /// Creates a commit engine.
    pub fn new(durable: DurableStore, ledger: Arc<dyn Ledger>, clock: Arc<dyn Clock>) -> Self {
        Self {
            durable,
            ledger,
            clock,
        }
    }

    /// Commits a staged artifact whose hash has been verified.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` if the artifact was staged for a different save
    /// - `IoFailure` if the move fails; the staged file is kept
    /// - `Ledger` if the ledger rejects the revision after the move
    pub fn commit(
        &self,
        game: &Game,
        artifact: &StagedArtifact,
        verified: &ContentHash,
    ) -> CoreResult<RevisionRecord> {
        if artifact.owner() != game.owner.as_u64() || artifact.key() != &game.storage_key {
            return Err(CoreError::invalid_request(format!(
                "staged file {} does not belong to {}",
                artifact.key(),
                game.id
            )));
        }

        if let Err(e) = self.durable.promote(artifact) {
            tracing::error!(
                game_id = %game.id,
                staged = %artifact.path().display(),
                error = %e,
                "failed to promote staged save"
            );
            return Err(CoreError::IoFailure(e));
        }

        let record = self
            .ledger
            .record_revision(game.id, verified, self.clock.now())
            .map_err(|e| {
                tracing::error!(game_id = %game.id, error = %e, "failed to record revision");
                match e {
                    LedgerError::NotFound { game_id } => CoreError::NotFound { game_id },
                    other => CoreError::Ledger {
                        message: other.to_string(),
                    },
                }
            })?;

        tracing::info!(
            game_id = %game.id,
            user_id = %game.owner,
            revision = record.revision.as_u64(),
            bytes = artifact.len(),
            "save committed"
        );
        Ok(record)
    }
}
