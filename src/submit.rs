//! Transaction submission
//!
//! Builds, signs and broadcasts one state-changing call per invocation.
//! Transactions are legacy-priced and signed locally, so the read-only chain
//! provider is enough and nothing is cached between submissions: the nonce
//! is re-read from the chain every time and callers that send several
//! transactions back to back pass an explicit nonce offset, optionally over
//! a base nonce they read once with [`Submitter::latest_nonce`].

use alloy::eips::eip2718::Encodable2718;
use alloy::eips::BlockId;
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::Provider;
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::chain::ChainHandle;
use crate::config::SubmitConfig;
use crate::contracts::{ContractHandle, NamedArgs};
use crate::error::SubmitError;
use crate::keys::Account;

/// Added to a gas estimate that exceeds the configured floor
pub const GAS_ESTIMATE_BUFFER: u64 = 10_000;

/// Interval between receipt polls
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How the gas limit of a transaction is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasLimit {
    /// Use this limit without asking the node
    Fixed(u64),
    /// Estimate, and use the floor unless the estimate exceeds it
    Estimate { floor: u64 },
}

impl GasLimit {
    /// Final limit given a node estimate (ignored for `Fixed`)
    pub fn resolve(&self, estimate: u64) -> u64 {
        match *self {
            GasLimit::Fixed(limit) => limit,
            GasLimit::Estimate { floor } if estimate > floor => {
                estimate.saturating_add(GAS_ESTIMATE_BUFFER)
            }
            GasLimit::Estimate { floor } => floor,
        }
    }
}

/// Per-submission options
#[derive(Debug, Clone)]
pub struct SubmitOptions {
    /// Used instead of the signer's latest on-chain nonce when set
    pub base_nonce: Option<u64>,
    /// Added to the base nonce
    pub nonce_offset: u64,
    pub gas: GasLimit,
    /// Block until a receipt is available
    pub wait: bool,
    pub receipt_timeout: Duration,
}

impl SubmitOptions {
    /// Estimated gas with the configured floor, waiting for the receipt
    pub fn from_config(config: &SubmitConfig) -> Self {
        Self {
            base_nonce: None,
            nonce_offset: 0,
            gas: GasLimit::Estimate {
                floor: config.gas_limit,
            },
            wait: true,
            receipt_timeout: config.receipt_timeout,
        }
    }

    /// Pin the nonce base instead of reading it at submission time
    pub fn with_base_nonce(mut self, nonce: u64) -> Self {
        self.base_nonce = Some(nonce);
        self
    }

    pub fn with_nonce_offset(mut self, offset: u64) -> Self {
        self.nonce_offset = offset;
        self
    }

    /// Skip estimation and use the floor as a fixed limit
    ///
    /// Needed when the call depends on an earlier transaction that may not
    /// be mined yet, since estimation would see the old state and revert.
    pub fn with_fixed_gas(mut self) -> Self {
        let limit = match self.gas {
            GasLimit::Fixed(limit) | GasLimit::Estimate { floor: limit } => limit,
        };
        self.gas = GasLimit::Fixed(limit);
        self
    }

    pub fn without_wait(mut self) -> Self {
        self.wait = false;
        self
    }
}

/// Signs and broadcasts transactions for one account on one chain
#[async_trait]
pub trait Submitter: Send + Sync {
    /// Name of the chain transactions go to
    fn chain_name(&self) -> &str;

    /// Address transactions are sent from
    fn address(&self) -> Address;

    /// Nonce of the account at the `latest` block
    async fn latest_nonce(&self) -> Result<u64, SubmitError>;

    /// Sign and submit a transaction with pre-encoded calldata and value
    async fn submit_raw(
        &self,
        to: Address,
        data: Bytes,
        value: U256,
        opts: &SubmitOptions,
    ) -> Result<B256, SubmitError>;

    /// Encode and submit a contract call with named arguments
    async fn submit_call(
        &self,
        contract: &ContractHandle,
        function: &str,
        args: &NamedArgs<'_>,
        opts: &SubmitOptions,
    ) -> Result<B256, SubmitError> {
        let data = match contract.encode_call(function, args) {
            Ok(data) => data,
            Err(e) => {
                warn!(chain = %self.chain_name(), function = function, error = %e, "Cannot build call");
                return Err(e);
            }
        };

        debug!(
            chain = %self.chain_name(),
            contract = %contract.address(),
            function = function,
            from = %self.address(),
            nonce_offset = opts.nonce_offset,
            "Submitting contract call"
        );

        let tx_hash = self.submit_raw(contract.address(), data, U256::ZERO, opts).await?;
        info!(chain = %self.chain_name(), function = function, tx_hash = %tx_hash, "Call submitted");
        Ok(tx_hash)
    }
}

/// [`Submitter`] for a local account over a live chain connection
#[derive(Debug, Clone, Copy)]
pub struct ChainSubmitter<'a> {
    chain: &'a ChainHandle,
    account: &'a Account,
}

impl<'a> ChainSubmitter<'a> {
    pub fn new(chain: &'a ChainHandle, account: &'a Account) -> Self {
        Self { chain, account }
    }
}

#[async_trait]
impl Submitter for ChainSubmitter<'_> {
    fn chain_name(&self) -> &str {
        self.chain.name()
    }

    fn address(&self) -> Address {
        self.account.address()
    }

    async fn latest_nonce(&self) -> Result<u64, SubmitError> {
        latest_nonce(self.chain, self.account.address()).await
    }

    async fn submit_raw(
        &self,
        to: Address,
        data: Bytes,
        value: U256,
        opts: &SubmitOptions,
    ) -> Result<B256, SubmitError> {
        submit_raw(self.chain, self.account, to, data, value, opts).await
    }
}

/// Encode and submit a contract call with named arguments
pub async fn submit_call(
    chain: &ChainHandle,
    contract: &ContractHandle,
    function: &str,
    args: &NamedArgs<'_>,
    account: &Account,
    opts: &SubmitOptions,
) -> Result<B256, SubmitError> {
    ChainSubmitter::new(chain, account)
        .submit_call(contract, function, args, opts)
        .await
}

/// Sign and submit a transaction with pre-encoded calldata and value
pub async fn submit_raw(
    chain: &ChainHandle,
    account: &Account,
    to: Address,
    data: Bytes,
    value: U256,
    opts: &SubmitOptions,
) -> Result<B256, SubmitError> {
    let result = send(chain, account, to, data, value, opts).await;
    if let Err(e) = &result {
        warn!(
            chain = %chain.name(),
            to = %to,
            from = %account.address(),
            error = %e,
            "Transaction failed"
        );
    }
    result
}

async fn send(
    chain: &ChainHandle,
    account: &Account,
    to: Address,
    data: Bytes,
    value: U256,
    opts: &SubmitOptions,
) -> Result<B256, SubmitError> {
    let provider = chain.provider();
    let from = account.address();

    let base = match opts.base_nonce {
        Some(nonce) => nonce,
        None => latest_nonce(chain, from).await?,
    };
    let nonce = base + opts.nonce_offset;

    let mut tx = TransactionRequest::default()
        .with_from(from)
        .with_to(to)
        .with_input(data)
        .with_value(value)
        .with_nonce(nonce)
        .with_chain_id(chain.chain_id());

    let gas_limit = match opts.gas {
        GasLimit::Fixed(limit) => limit,
        policy @ GasLimit::Estimate { .. } => {
            let estimate = provider
                .estimate_gas(&tx)
                .await
                .map_err(|e| SubmitError::GasEstimate(e.to_string()))?;
            let limit = policy.resolve(estimate);
            debug!(estimate = estimate, gas_limit = limit, "Estimated gas");
            limit
        }
    };

    let gas_price = provider
        .get_gas_price()
        .await
        .map_err(|e| SubmitError::GasPrice(e.to_string()))?;

    tx = tx.with_gas_limit(gas_limit).with_gas_price(gas_price);

    let envelope = tx
        .build(account.wallet())
        .await
        .map_err(|e| SubmitError::Sign(e.to_string()))?;

    let pending = provider
        .send_raw_transaction(&envelope.encoded_2718())
        .await
        .map_err(|e| SubmitError::Broadcast(e.to_string()))?;
    let tx_hash = *pending.tx_hash();

    debug!(
        chain = %chain.name(),
        tx_hash = %tx_hash,
        nonce = nonce,
        gas_limit = gas_limit,
        gas_price = gas_price,
        "Broadcast transaction"
    );

    if opts.wait {
        wait_for_receipt(chain, tx_hash, opts.receipt_timeout).await?;
    }

    Ok(tx_hash)
}

async fn latest_nonce(chain: &ChainHandle, address: Address) -> Result<u64, SubmitError> {
    chain
        .provider()
        .get_transaction_count(address)
        .block_id(BlockId::latest())
        .await
        .map_err(|e| SubmitError::Nonce(e.to_string()))
}

/// Poll for a receipt until it arrives or the timeout elapses
pub async fn wait_for_receipt(
    chain: &ChainHandle,
    tx_hash: B256,
    timeout: Duration,
) -> Result<(), SubmitError> {
    let start = Instant::now();

    while start.elapsed() < timeout {
        match chain.provider().get_transaction_receipt(tx_hash).await {
            Ok(Some(receipt)) => {
                if receipt.status() {
                    debug!(tx_hash = %tx_hash, block = ?receipt.block_number, "Transaction confirmed");
                    return Ok(());
                }
                return Err(SubmitError::Reverted(tx_hash));
            }
            Ok(None) => {}
            Err(e) => debug!(tx_hash = %tx_hash, error = %e, "Receipt poll failed, retrying"),
        }
        tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
    }

    Err(SubmitError::Receipt {
        tx_hash,
        reason: format!("not mined within {:?}", timeout),
    })
}
