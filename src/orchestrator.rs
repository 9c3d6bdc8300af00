//! Deposit and withdrawal submission
//!
//! Each [`TransferRequest`] gets exactly one attempt. A failure is not
//! retried; it simply shows up later as an unmatched transfer.

use alloy::dyn_abi::DynSolValue;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::SolCall;
use std::fmt;
use thiserror::Error;
use tracing::{info, warn};

use crate::chain::ChainHandle;
use crate::contracts::{
    ContractHandle, IBridgeToken, DESTINATION_UNWRAP_FN, DESTINATION_WRAPPED_FN, SOURCE_DEPOSIT_FN,
};
use crate::error::SubmitError;
use crate::events::EventKind;
use crate::keys::Account;
use crate::score::ExpectedTransfer;
use crate::submit::{submit_call, SubmitOptions, Submitter};

/// Which way a transfer crosses the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Lock on the source chain, wrap on the destination chain
    Deposit,
    /// Unwrap on the destination chain, release on the source chain
    Withdrawal,
}

impl Direction {
    /// Event the counterpart contract emits when it completes the transfer
    pub fn completion_event(&self) -> EventKind {
        match self {
            Direction::Deposit => EventKind::Wrap,
            Direction::Withdrawal => EventKind::Withdrawal,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Deposit => f.write_str("deposit"),
            Direction::Withdrawal => f.write_str("withdrawal"),
        }
    }
}

/// One transfer to push through the bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub direction: Direction,
    /// Underlying token on the source chain, for both directions
    pub token: Address,
    pub sender: Address,
    pub receiver: Address,
    pub amount: U256,
}

impl TransferRequest {
    pub fn deposit(token: Address, sender: Address, receiver: Address, amount: U256) -> Self {
        Self {
            direction: Direction::Deposit,
            token,
            sender,
            receiver,
            amount,
        }
    }

    pub fn withdrawal(token: Address, sender: Address, receiver: Address, amount: U256) -> Self {
        Self {
            direction: Direction::Withdrawal,
            token,
            sender,
            receiver,
            amount,
        }
    }

    /// The event a correct bridge emits for this request
    pub fn expected(&self) -> ExpectedTransfer {
        ExpectedTransfer {
            kind: self.direction.completion_event(),
            token: self.token,
            recipient: self.receiver,
            amount: self.amount,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("bridge contracts are not bound")]
    NotBound,

    #[error("{signer} cannot send a transfer from {sender}")]
    WrongSigner { signer: Address, sender: Address },

    #[error("no wrapped token for {underlying}: {reason}")]
    NoWrappedToken { underlying: Address, reason: String },

    #[error(transparent)]
    Submit(#[from] SubmitError),
}

/// Approve the source bridge and deposit
///
/// The signer's nonce is read once. The approval is sent on that nonce
/// without waiting, and the deposit follows immediately on the next one
/// with a fixed gas limit, since estimating against the pre-approval state
/// would fail. A failed approval is logged and the deposit is attempted
/// anyway.
pub async fn submit_deposit<S: Submitter>(
    submitter: &S,
    source: &ContractHandle,
    request: &TransferRequest,
    opts: &SubmitOptions,
) -> Result<B256, TransferError> {
    check_signer(submitter.address(), request)?;

    // Re-reading after an instantly mined approval would skip a nonce
    let base_nonce = submitter.latest_nonce().await?;

    let approve = IBridgeToken::approveCall {
        spender: source.address(),
        amount: request.amount,
    }
    .abi_encode();
    let approve_opts = opts.clone().with_base_nonce(base_nonce).with_nonce_offset(0).without_wait();

    match submitter
        .submit_raw(request.token, Bytes::from(approve), U256::ZERO, &approve_opts)
        .await
    {
        Ok(tx_hash) => info!(token = %request.token, amount = %request.amount, tx_hash = %tx_hash, "Approval sent"),
        Err(e) => warn!(token = %request.token, error = %e, "Approval failed, attempting deposit anyway"),
    }

    let deposit_opts = opts
        .clone()
        .with_base_nonce(base_nonce)
        .with_nonce_offset(1)
        .with_fixed_gas();
    let tx_hash = submitter
        .submit_call(
            source,
            SOURCE_DEPOSIT_FN,
            &[
                ("token", DynSolValue::Address(request.token)),
                ("recipient", DynSolValue::Address(request.receiver)),
                ("amount", DynSolValue::from(request.amount)),
            ],
            &deposit_opts,
        )
        .await?;

    info!(
        token = %request.token,
        recipient = %request.receiver,
        amount = %request.amount,
        tx_hash = %tx_hash,
        "Deposit submitted"
    );
    Ok(tx_hash)
}

/// Unwrap on the destination bridge
///
/// The wrapped token is looked up from the underlying one. No approval is
/// sent: the destination contract burns wrapped tokens directly.
pub async fn submit_withdrawal(
    chain: &ChainHandle,
    destination: &ContractHandle,
    signer: &Account,
    request: &TransferRequest,
    opts: &SubmitOptions,
) -> Result<B256, TransferError> {
    check_signer(signer.address(), request)?;

    let wrapped = destination
        .call_address(
            chain,
            DESTINATION_WRAPPED_FN,
            &[("underlying", DynSolValue::Address(request.token))],
        )
        .await
        .map_err(|e| TransferError::NoWrappedToken {
            underlying: request.token,
            reason: e.to_string(),
        })?;

    if wrapped == Address::ZERO {
        return Err(TransferError::NoWrappedToken {
            underlying: request.token,
            reason: "lookup returned the zero address".to_string(),
        });
    }

    let tx_hash = submit_call(
        chain,
        destination,
        DESTINATION_UNWRAP_FN,
        &[
            ("wrapped_token", DynSolValue::Address(wrapped)),
            ("recipient", DynSolValue::Address(request.receiver)),
            ("amount", DynSolValue::from(request.amount)),
        ],
        signer,
        opts,
    )
    .await?;

    info!(
        token = %request.token,
        wrapped = %wrapped,
        recipient = %request.receiver,
        amount = %request.amount,
        tx_hash = %tx_hash,
        "Unwrap submitted"
    );
    Ok(tx_hash)
}

fn check_signer(signer: Address, request: &TransferRequest) -> Result<(), TransferError> {
    if signer != request.sender {
        return Err(TransferError::WrongSigner {
            signer,
            sender: request.sender,
        });
    }
    Ok(())
}
