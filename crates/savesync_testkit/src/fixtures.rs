//! Test fixtures.
//!
//! [`TestEnv`] wires a [`SaveCoordinator`] to a temporary directory, an
//! in-memory ledger and a manual clock.

use savesync_core::{
    Clock, CoreConfig, CoreResult, Game, GameDirectory, GameId, Ledger, ManualClock, MemoryLedger,
    SaveCoordinator, UploadReceipt, UserId,
};
use savesync_storage::hash_bytes;
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// A coordinator over temporary storage.
pub struct TestEnv {
    /// In-memory ledger.
    pub ledger: Arc<MemoryLedger>,
    /// Clock driving lease expiry and commit times.
    pub clock: Arc<ManualClock>,
    /// The coordinator under test.
    pub coordinator: SaveCoordinator,
    temp_dir: TempDir,
}

impl TestEnv {
    /// Creates an environment with default settings.
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    /// Creates an environment, letting `configure` adjust the core config.
    pub fn with_config(configure: impl FnOnce(CoreConfig) -> CoreConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = configure(core_config(temp_dir.path()));
        let ledger = Arc::new(MemoryLedger::new());
        let clock = Arc::new(ManualClock::default());
        let coordinator = SaveCoordinator::open_with_clock(
            config,
            Arc::clone(&ledger) as Arc<dyn Ledger>,
            Arc::clone(&clock) as Arc<dyn Clock>,
        )
        .expect("Failed to open coordinator");

        Self {
            ledger,
            clock,
            coordinator,
            temp_dir,
        }
    }

    /// Returns the temporary root.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Returns the durable path of a game's save.
    pub fn durable_path(&self, game: &Game) -> PathBuf {
        self.coordinator
            .config()
            .storage_root
            .join(game.owner.as_u64().to_string())
            .join(game.storage_key.as_str())
    }

    /// Returns true if any upload attempt for the game is still staged.
    pub fn has_staged(&self, game: &Game) -> bool {
        let dir = self
            .coordinator
            .config()
            .staging_root
            .join(game.owner.as_u64().to_string());
        let prefix = format!("{}.", game.storage_key);
        fs::read_dir(dir).is_ok_and(|entries| {
            entries
                .flatten()
                .any(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
        })
    }

    /// Creates a game.
    pub fn create_game(&self, owner: UserId, name: &str) -> Game {
        self.ledger
            .create_game(owner, name)
            .expect("Failed to create game")
    }

    /// Returns the current state of a game.
    pub fn game(&self, owner: UserId, game_id: GameId) -> Game {
        self.ledger
            .game_by_owner(owner, game_id)
            .expect("Game should exist")
    }

    /// Leases the game and uploads `data` with its correct hash.
    pub fn upload(&self, user: UserId, game_id: GameId, data: &[u8]) -> CoreResult<UploadReceipt> {
        self.upload_with_hash(user, game_id, data, hash_bytes(data).as_str())
    }

    /// Leases the game and uploads `data` declaring `hash`.
    pub fn upload_with_hash(
        &self,
        user: UserId,
        game_id: GameId,
        data: &[u8],
        hash: &str,
    ) -> CoreResult<UploadReceipt> {
        let lease = self.coordinator.request_lease(user, game_id)?;
        self.coordinator
            .begin_upload(user, lease.token.as_str(), &mut Cursor::new(data), hash)
    }

    /// Leases the game and reads its current save.
    pub fn download(&self, user: UserId, game_id: GameId) -> CoreResult<Vec<u8>> {
        let lease = self.coordinator.request_lease(user, game_id)?;
        let mut download = self.coordinator.download(user, lease.token.as_str())?;
        let mut data = Vec::new();
        download.read_to_end(&mut data)?;
        Ok(data)
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns a core config rooted in `dir`.
pub fn core_config(dir: &Path) -> CoreConfig {
    CoreConfig::new(dir.join("cache"), dir.join("storage"))
}

/// Runs a test with a fresh environment.
pub fn with_test_env<F, R>(f: F) -> R
where
    F: FnOnce(&TestEnv) -> R,
{
    let env = TestEnv::new();
    f(&env)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates a game for `owner` and commits `revisions` uploads to it.
    ///
    /// Upload `i` (1-based) contains `i` repeated 64 times.
    pub fn game_with_revisions(env: &TestEnv, owner: UserId, revisions: u8) -> Game {
        let game = env.create_game(owner, "scenario");
        for i in 1..=revisions {
            env.upload(owner, game.id, &[i; 64])
                .expect("Scenario upload failed");
        }
        env.game(owner, game.id)
    }
}
