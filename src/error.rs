//! Tagged error types for grading operations
//!
//! Each fallible step of a grading run returns one of these instead of
//! printing and swallowing a generic error, so the grader can decide per
//! failure kind whether to continue or stop.

use alloy::primitives::B256;
use thiserror::Error;

/// Outcome of a failed transaction submission
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("contract has no function `{0}`")]
    UnknownFunction(String),

    #[error("failed to encode call to `{function}`: {reason}")]
    Encode { function: String, reason: String },

    #[error("nonce lookup failed: {0}")]
    Nonce(String),

    #[error("gas estimation failed: {0}")]
    GasEstimate(String),

    #[error("gas price lookup failed: {0}")]
    GasPrice(String),

    #[error("signing failed: {0}")]
    Sign(String),

    #[error("broadcast rejected: {0}")]
    Broadcast(String),

    #[error("no receipt for {tx_hash}: {reason}")]
    Receipt { tx_hash: B256, reason: String },

    #[error("transaction {0} reverted")]
    Reverted(B256),
}

/// Fatal conditions that end a grading run or one of its phases
#[derive(Debug, Error)]
pub enum GraderError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("student code failed during {phase}: {reason}")]
    Student { phase: &'static str, reason: String },

    #[error("chain error on {chain}: {reason}")]
    Chain { chain: String, reason: String },
}

impl GraderError {
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }

    pub fn student(phase: &'static str, reason: impl Into<String>) -> Self {
        Self::Student {
            phase,
            reason: reason.into(),
        }
    }

    pub fn chain(chain: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Chain {
            chain: chain.into(),
            reason: reason.into(),
        }
    }
}
