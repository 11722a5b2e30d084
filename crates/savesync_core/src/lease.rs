//! Exclusive, time-bounded upload leases.
//!
//! A lease grants one client the right to write (or read without racing a
//! writer) a game's save. Leases are keyed by game, carry an unguessable
//! token and expire `lease_ttl` after they are granted.
//!
//! # Expiry
//!
//! Expiry is checked on every lookup, so a lapsed lease is rejected even if
//! the reaper has not evicted it yet, and a new `acquire` replaces it. The
//! reaper only bounds memory.
//!
//! # Locking
//!
//! All operations share one mutex. No operation holds it across I/O: the
//! ownership check against the ledger happens before the lock is taken.
//!
//! # Claims
//!
//! A lease is claimed by at most one request at a time. The claim is taken
//! inside the critical section, so a retried or duplicated request carrying
//! the same token fails with `AlreadyLeased` instead of streaming alongside
//! the first one.

use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::ledger::Ledger;
use crate::types::{GameId, UserId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// Opaque lease token handed to the client.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct LeaseToken(String);

impl LeaseToken {
    /// Generates a random token from the OS random number generator.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the token as sent over the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Tokens are bearer credentials; keep them out of logs.
        f.write_str("LeaseToken(..)")
    }
}

/// An exclusive lease over one game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    /// The leased game.
    pub game_id: GameId,
    /// Token proving possession.
    pub token: LeaseToken,
    /// When the lease was granted.
    pub issued_at: SystemTime,
    /// When the lease lapses.
    pub expires_at: SystemTime,
}

impl Lease {
    /// Returns true if the lease has lapsed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug)]
struct Slot {
    lease: Lease,
    claimed: bool,
}

/// The table of live leases.
pub struct LeaseRegistry {
    leases: Mutex<HashMap<GameId, Slot>>,
    ledger: Arc<dyn Ledger>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl LeaseRegistry {
    /// Creates an empty registry.
    pub fn new(ledger: Arc<dyn Ledger>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            leases: Mutex::new(HashMap::new()),
            ledger,
            clock,
            ttl,
        }
    }

    /// Returns the lease lifetime.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Grants `user` the lease for `game_id`.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the game doesn't exist or isn't owned by `user`
    /// - `Forbidden` if the ledger refuses the caller
    /// - `AlreadyLeased` if another live lease exists
    pub fn acquire(&self, user: UserId, game_id: GameId) -> CoreResult<Lease> {
        self.ledger
            .game_by_owner(user, game_id)
            .map_err(|e| CoreError::from_ledger(e, user, game_id))?;

        let now = self.clock.now();
        let mut leases = self.leases.lock();
        if let Some(existing) = leases.get(&game_id) {
            if !existing.lease.is_expired_at(now) {
                return Err(CoreError::AlreadyLeased { game_id });
            }
        }

        let lease = Lease {
            game_id,
            token: LeaseToken::generate(),
            issued_at: now,
            expires_at: now + self.ttl,
        };
        leases.insert(
            game_id,
            Slot {
                lease: lease.clone(),
                claimed: false,
            },
        );
        Ok(lease)
    }

    /// Resolves a token to its game.
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` if no live lease carries the token.
    pub fn validate(&self, token: &str) -> CoreResult<GameId> {
        self.lookup(token).map(|lease| lease.game_id)
    }

    /// Resolves a token to its lease.
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` if no live lease carries the token.
    pub fn lookup(&self, token: &str) -> CoreResult<Lease> {
        let now = self.clock.now();
        let leases = self.leases.lock();
        leases
            .values()
            .map(|slot| &slot.lease)
            .find(|lease| lease.token.as_str() == token)
            .filter(|lease| !lease.is_expired_at(now))
            .cloned()
            .ok_or(CoreError::InvalidToken)
    }

    /// Takes exclusive possession of the lease carrying `token` for `user`.
    ///
    /// The claim lasts until the lease is released.
    ///
    /// # Errors
    ///
    /// - `InvalidToken` if no live lease carries the token
    /// - `NotFound` if the leased game isn't owned by `user`
    /// - `AlreadyLeased` if another request already claimed the lease
    pub fn claim(&self, user: UserId, token: &str) -> CoreResult<Lease> {
        let lease = self.lookup(token)?;
        self.ledger
            .game_by_owner(user, lease.game_id)
            .map_err(|e| CoreError::from_ledger(e, user, lease.game_id))?;

        let now = self.clock.now();
        let mut leases = self.leases.lock();
        match leases.get_mut(&lease.game_id) {
            Some(slot) if slot.lease.token == lease.token && !slot.lease.is_expired_at(now) => {
                if slot.claimed {
                    return Err(CoreError::AlreadyLeased {
                        game_id: lease.game_id,
                    });
                }
                slot.claimed = true;
                Ok(lease)
            }
            // Lapsed or replaced while the ledger was consulted.
            _ => Err(CoreError::InvalidToken),
        }
    }

    /// Returns true if `token` still holds a live lease on `game_id`.
    #[must_use]
    pub fn is_held(&self, game_id: GameId, token: &LeaseToken) -> bool {
        let now = self.clock.now();
        self.leases
            .lock()
            .get(&game_id)
            .is_some_and(|slot| &slot.lease.token == token && !slot.lease.is_expired_at(now))
    }

    /// Removes the lease on `game_id`, if any.
    pub fn release(&self, game_id: GameId) {
        self.leases.lock().remove(&game_id);
    }

    /// Removes the lease on `game_id` only if it still carries `token`.
    ///
    /// Returns true if a lease was removed.
    pub fn release_held(&self, game_id: GameId, token: &LeaseToken) -> bool {
        let mut leases = self.leases.lock();
        match leases.get(&game_id) {
            Some(slot) if &slot.lease.token == token => {
                leases.remove(&game_id);
                true
            }
            _ => false,
        }
    }

    /// Evicts every lease whose expiry is at or before now.
    ///
    /// Returns the number of evicted leases.
    pub fn reap(&self) -> usize {
        let now = self.clock.now();
        let mut leases = self.leases.lock();
        let before = leases.len();
        leases.retain(|_, slot| !slot.lease.is_expired_at(now));
        before - leases.len()
    }

    /// Returns the live lease on `game_id`, if any.
    #[must_use]
    pub fn lease_for(&self, game_id: GameId) -> Option<Lease> {
        let now = self.clock.now();
        self.leases
            .lock()
            .get(&game_id)
            .filter(|slot| !slot.lease.is_expired_at(now))
            .map(|slot| slot.lease.clone())
    }

    /// Returns the number of unexpired leases.
    #[must_use]
    pub fn live_count(&self) -> usize {
        let now = self.clock.now();
        self.leases
            .lock()
            .values()
            .filter(|slot| !slot.lease.is_expired_at(now))
            .count()
    }

    /// Returns the number of stored leases, including lapsed ones not yet
    /// reaped.
    #[must_use]
    pub fn len(&self) -> usize {
        self.leases.lock().len()
    }

    /// Returns true if no lease is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for LeaseRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseRegistry")
            .field("leases", &self.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// Holds a lease for the duration of a request and releases it on drop.
///
/// Release goes through [`LeaseRegistry::release_held`], so a guard whose
/// lease lapsed and was granted to someone else leaves the new lease alone.
#[derive(Debug)]
pub struct LeaseGuard {
    registry: Arc<LeaseRegistry>,
    lease: Lease,
}

impl LeaseGuard {
    /// Claims the live lease identified by `token` on behalf of `user`.
    ///
    /// A failed claim leaves the lease untouched.
    ///
    /// # Errors
    ///
    /// See [`LeaseRegistry::claim`].
    pub fn claim(registry: &Arc<LeaseRegistry>, user: UserId, token: &str) -> CoreResult<Self> {
        let lease = registry.claim(user, token)?;
        Ok(Self {
            registry: Arc::clone(registry),
            lease,
        })
    }

    /// Returns the held lease.
    #[must_use]
    pub fn lease(&self) -> &Lease {
        &self.lease
    }

    /// Returns true if the lease is still live and ours.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.registry.is_held(self.lease.game_id, &self.lease.token)
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.registry
            .release_held(self.lease.game_id, &self.lease.token);
    }
}
