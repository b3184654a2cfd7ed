//! Ledger interface for anchoring submissions

use std::fmt;

use async_trait::async_trait;

use crate::submission::Submission;
use crate::types::{to_hex, Hash};

/// Handle of a sent anchoring transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHandle(pub Hash);

impl fmt::Display for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", to_hex(&self.0))
    }
}

/// Final state of a confirmed transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    Confirmed,
    Reverted { reason: Option<String> },
}

/// Ledger error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Signing failed: {0}")]
    Signing(String),
    #[error("Broadcast failed: {0}")]
    Broadcast(String),
    #[error("Transaction execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Ledger access for anchoring commitments
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Sign and broadcast a submission
    async fn submit_commitment(&self, submission: &Submission) -> Result<TxHandle, LedgerError>;

    /// Block until the transaction is included
    ///
    /// With `require_success`, a reverted transaction is an
    /// [`LedgerError::ExecutionFailed`] error.
    async fn wait_for_confirmation(
        &self,
        tx: &TxHandle,
        require_success: bool,
    ) -> Result<TxOutcome, LedgerError>;
}
