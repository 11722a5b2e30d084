//! Upload/download request state machine.
//!
//! ```text
//! NoLease -> Leased -> Staging -> Validating -> Committed
//!                                     |
//!                                     +-------> Rejected   (hash mismatch)
//! Leased | Staging | Validating ----> Expired   (lease lapsed)
//! Leased ---------------------------> Serving   (download)
//! ```
//!
//! [`Transfer::release`] returns to `NoLease` once the lease is let go, from a
//! terminal state or from a request cut short by an I/O error.

use crate::error::{CoreError, CoreResult};
use crate::types::GameId;

/// Phase of a single upload or download request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// No lease is held.
    NoLease,
    /// The request holds the game's lease.
    Leased,
    /// Bytes are being written to the staging area.
    Staging,
    /// The staged file is being hashed.
    Validating,
    /// The staged file was promoted and the ledger updated.
    Committed,
    /// The staged file did not match its declared hash.
    Rejected,
    /// The lease lapsed before the request finished.
    Expired,
    /// The durable save is being streamed to the client.
    Serving,
}

impl TransferState {
    /// Returns true if the request has finished.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Committed
                | TransferState::Rejected
                | TransferState::Expired
                | TransferState::Serving
        )
    }

    /// Returns true if `next` may follow this state.
    pub fn can_transition_to(&self, next: TransferState) -> bool {
        use TransferState::*;
        matches!(
            (self, next),
            (NoLease, Leased)
                | (Leased, Staging)
                | (Leased, Serving)
                | (Leased, Expired)
                | (Staging, Validating)
                | (Staging, Expired)
                | (Validating, Committed)
                | (Validating, Rejected)
                | (Validating, Expired)
                | (Committed, NoLease)
                | (Rejected, NoLease)
                | (Expired, NoLease)
                | (Serving, NoLease)
        )
    }
}

/// Tracks the state of one request and logs each step.
#[derive(Debug)]
pub struct Transfer {
    game_id: Option<GameId>,
    state: TransferState,
}

impl Transfer {
    /// Starts a request with no lease.
    #[must_use]
    pub fn new() -> Self {
        Self {
            game_id: None,
            state: TransferState::NoLease,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Records that the lease on `game_id` is held.
    pub fn leased(&mut self, game_id: GameId) -> CoreResult<()> {
        self.game_id = Some(game_id);
        self.advance(TransferState::Leased)
    }

    /// Moves to the next state.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if `next` cannot follow the current state.
    pub fn advance(&mut self, next: TransferState) -> CoreResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::trace!(game_id = ?self.game_id, from = ?self.state, to = ?next, "transfer");
        self.state = next;
        Ok(())
    }

    /// Records that the lease was released. Valid from any state.
    pub fn release(&mut self) {
        if self.state == TransferState::NoLease {
            return;
        }
        if !self.state.is_terminal() {
            tracing::trace!(game_id = ?self.game_id, from = ?self.state, "transfer aborted");
        }
        self.state = TransferState::NoLease;
    }
}

impl Default for Transfer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_success_path() {
        let mut t = Transfer::new();
        t.leased(GameId(1)).unwrap();
        t.advance(TransferState::Staging).unwrap();
        t.advance(TransferState::Validating).unwrap();
        t.advance(TransferState::Committed).unwrap();
        assert!(t.state().is_terminal());
        t.release();
        assert_eq!(t.state(), TransferState::NoLease);
    }

    #[test]
    fn release_ends_aborted_request() {
        let mut t = Transfer::new();
        t.leased(GameId(1)).unwrap();
        t.advance(TransferState::Staging).unwrap();
        assert!(t.advance(TransferState::NoLease).is_err());

        t.release();
        assert_eq!(t.state(), TransferState::NoLease);
        // A released transfer can be leased again.
        t.leased(GameId(1)).unwrap();
    }

    #[test]
    fn rejection_only_after_validation() {
        let mut t = Transfer::new();
        t.leased(GameId(1)).unwrap();
        t.advance(TransferState::Staging).unwrap();
        assert!(matches!(
            t.advance(TransferState::Rejected),
            Err(CoreError::InvalidTransition { .. })
        ));
        t.advance(TransferState::Validating).unwrap();
        t.advance(TransferState::Rejected).unwrap();
    }

    #[test]
    fn cannot_commit_without_lease() {
        let mut t = Transfer::new();
        assert!(t.advance(TransferState::Staging).is_err());
        assert!(t.advance(TransferState::Committed).is_err());
        assert_eq!(t.state(), TransferState::NoLease);
    }

    #[test]
    fn lease_can_expire_mid_flight() {
        for stop in [TransferState::Leased, TransferState::Staging, TransferState::Validating] {
            assert!(stop.can_transition_to(TransferState::Expired));
        }
        assert!(!TransferState::Committed.can_transition_to(TransferState::Expired));
    }

    #[test]
    fn download_path() {
        let mut t = Transfer::new();
        t.leased(GameId(2)).unwrap();
        t.advance(TransferState::Serving).unwrap();
        assert!(t.state().is_terminal());
        t.release();
        t.release();
        assert_eq!(t.state(), TransferState::NoLease);
    }
}
