//! Ambient transaction detection for the shared connection
//!
//! The session store shares its database connection with business logic that
//! may hold a transaction of its own. Session statements issued inside such a
//! transaction would be committed or rolled back together with it, so every
//! store operation asks the [`ConflictGuard`] first and backs off on `Deny`.
//!
//! Backends combine two sources: the flag kept by the shared connection for
//! transactions opened through its `begin()`, and the database's own view of
//! the connection, which also catches `BEGIN` sent as raw SQL.

use crate::{Error, Result};

/// Anything that can report whether a transaction is open on a connection
pub trait TransactionIndicator {
    fn in_transaction(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Proceed,
    Deny,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ConflictGuard;

impl ConflictGuard {
    pub fn permits<P: TransactionIndicator + ?Sized>(source: &P) -> GuardDecision {
        if source.in_transaction() {
            GuardDecision::Deny
        } else {
            GuardDecision::Proceed
        }
    }

    /// Fails with `Error::TransactionConflict` when `permits` denies.
    ///
    /// Callers must hold the connection lock while checking, otherwise a
    /// transaction can open between the check and the statement.
    pub fn check<P: TransactionIndicator + ?Sized>(source: &P, operation: &str) -> Result<()> {
        match Self::permits(source) {
            GuardDecision::Proceed => Ok(()),
            GuardDecision::Deny => Err(Self::denied(operation)),
        }
    }

    /// The error for an operation refused because of an ambient transaction
    pub fn denied(operation: &str) -> Error {
        Error::TransactionConflict(format!(
            "{} skipped: ambient transaction open on shared connection",
            operation
        ))
    }
}

/// Transaction bookkeeping kept next to a shared connection.
///
/// Backends update it whenever business logic begins or finishes a
/// transaction through the shared handle.
#[derive(Debug, Default)]
pub struct TransactionState {
    open: bool,
}

impl TransactionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly opened transaction. Nesting is not supported.
    pub fn mark_open(&mut self) -> Result<()> {
        if self.open {
            return Err(Error::Database(
                "A transaction is already open on the shared connection".to_string(),
            ));
        }
        self.open = true;
        Ok(())
    }

    pub fn mark_closed(&mut self) {
        self.open = false;
    }
}

impl TransactionIndicator for TransactionState {
    fn in_transaction(&self) -> bool {
        self.open
    }
}
