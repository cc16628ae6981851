//! Transaction state.

use crate::error::{StoreError, StoreResult};
use crate::types::{Scope, TransactionId};
use aura_storage::TransactionMode;

/// State of a coordinated transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Waiting for the connection.
    Opening,
    /// The native transaction exists and the unit of work runs.
    Active,
    /// The unit of work succeeded; waiting for the engine to commit.
    Committing,
    /// Committed.
    Committed,
    /// A failure occurred; waiting for the engine to abort.
    Aborting,
    /// Aborted.
    Aborted,
}

impl TransactionState {
    /// Checks if this is a terminal state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }

    /// Checks if the state machine allows moving to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use TransactionState::{Aborted, Aborting, Active, Committed, Committing, Opening};
        matches!(
            (self, next),
            (Opening, Active)
                | (Opening, Aborted)
                | (Active, Committing)
                | (Active, Aborting)
                | (Committing, Committed)
                | (Committing, Aborted)
                | (Aborting, Aborted)
                // The engine may have committed before the abort was requested.
                | (Aborting, Committed)
        )
    }
}

/// Bookkeeping for one coordinated transaction.
#[derive(Debug, Clone)]
pub struct TransactionScope {
    id: TransactionId,
    scope: Scope,
    mode: TransactionMode,
    state: TransactionState,
}

impl TransactionScope {
    /// Creates a transaction in the `Opening` state.
    pub(crate) fn new(id: TransactionId, scope: Scope, mode: TransactionMode) -> Self {
        Self {
            id,
            scope,
            mode,
            state: TransactionState::Opening,
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the collections in scope.
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Returns the access mode.
    #[must_use]
    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the state machine does not allow it.
    pub(crate) fn transition(&mut self, next: TransactionState) -> StoreResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(StoreError::invalid_operation(format!(
                "{} cannot move from {:?} to {next:?}",
                self.id, self.state
            )));
        }
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn create_txn() -> TransactionScope {
        TransactionScope::new(
            TransactionId::new(1),
            Scope::from("book"),
            TransactionMode::ReadWrite,
        )
    }

    #[test]
    fn new_transaction_is_opening() {
        let txn = create_txn();
        assert_eq!(txn.state(), TransactionState::Opening);
        assert!(!txn.state().is_terminal());
    }

    #[test]
    fn commit_path() {
        let mut txn = create_txn();
        txn.transition(TransactionState::Active).unwrap();
        txn.transition(TransactionState::Committing).unwrap();
        txn.transition(TransactionState::Committed).unwrap();
        assert!(txn.state().is_terminal());
    }

    #[test]
    fn cannot_skip_active() {
        let mut txn = create_txn();
        let err = txn.transition(TransactionState::Committing).unwrap_err();
        assert!(matches!(err, StoreError::InvalidOperation { .. }));
        assert_eq!(txn.state(), TransactionState::Opening);
    }

    fn arb_state() -> impl Strategy<Value = TransactionState> {
        prop_oneof![
            Just(TransactionState::Opening),
            Just(TransactionState::Active),
            Just(TransactionState::Committing),
            Just(TransactionState::Committed),
            Just(TransactionState::Aborting),
            Just(TransactionState::Aborted),
        ]
    }

    proptest! {
        #[test]
        fn terminal_states_are_final(steps in prop::collection::vec(arb_state(), 0..12)) {
            let mut txn = create_txn();
            let mut reached_terminal = false;
            for step in steps {
                let before = txn.state();
                let moved = txn.transition(step).is_ok();
                if reached_terminal {
                    prop_assert!(!moved);
                    prop_assert_eq!(txn.state(), before);
                }
                reached_terminal |= txn.state().is_terminal();
            }
        }
    }
}
