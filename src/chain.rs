//! Chain connections
//!
//! A [`ChainHandle`] is opened once per chain per run and carries the
//! read-only alloy provider every other module goes through. Signing is
//! done locally by the submitter, so the provider never holds keys.

use alloy::primitives::{Address, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::transports::http::{Client, Http};
use eyre::{eyre, Result, WrapErr};
use std::future::Future;
use tracing::{debug, info};
use url::Url;

use crate::config::{ChainConfig, ChainRole};

/// Header `extraData` longer than this carries validator seals
const STANDARD_EXTRA_DATA_BYTES: usize = 32;

/// Connection to one EVM chain
#[derive(Clone)]
pub struct ChainHandle {
    name: String,
    role: ChainRole,
    rpc_url: Url,
    chain_id: u64,
    poa: bool,
    provider: RootProvider<Http<Client>>,
}

impl std::fmt::Debug for ChainHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainHandle")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("rpc_url", &self.rpc_url.as_str())
            .field("chain_id", &self.chain_id)
            .field("poa", &self.poa)
            .finish()
    }
}

impl ChainHandle {
    /// Open a connection and verify the node answers
    ///
    /// The chain id comes from the node rather than configuration so that a
    /// misconfigured URL is caught here instead of at signing time.
    pub async fn connect(config: &ChainConfig) -> Result<Self> {
        let provider = ProviderBuilder::new().on_http(config.rpc_url.clone());

        let chain_id = provider
            .get_chain_id()
            .await
            .wrap_err_with(|| format!("Failed to connect to {} at {}", config.name, config.rpc_url))?;

        let mut handle = Self {
            name: config.name.clone(),
            role: config.role,
            rpc_url: config.rpc_url.clone(),
            chain_id,
            poa: config.poa,
            provider,
        };

        let poa = resolve_poa(&handle.name, config.poa, || handle.probe_poa()).await;
        handle.poa = poa;

        info!(
            chain = %handle.name,
            role = %handle.role,
            chain_id = handle.chain_id,
            poa = handle.poa,
            "Connected to chain"
        );

        Ok(handle)
    }

    /// Inspect the latest header for proof-of-authority seals
    ///
    /// Clique/Parlia networks put validator signatures in `extraData`, which
    /// strict header decoders reject. The header is therefore fetched as raw
    /// JSON and the harness only ever reads chain tips via `eth_blockNumber`.
    async fn probe_poa(&self) -> Result<bool> {
        let header: serde_json::Value = self
            .provider
            .raw_request("eth_getBlockByNumber".into(), ("latest", false))
            .await?;

        let extra = header["extraData"]
            .as_str()
            .ok_or_else(|| eyre!("No extraData in latest block"))?;

        Ok(is_poa_extra_data(extra))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> ChainRole {
        self.role
    }

    pub fn rpc_url(&self) -> &Url {
        &self.rpc_url
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Whether proof-of-authority headers were forced or detected
    pub fn is_poa(&self) -> bool {
        self.poa
    }

    pub fn provider(&self) -> &RootProvider<Http<Client>> {
        &self.provider
    }

    /// Current block height
    pub async fn latest_block(&self) -> Result<u64> {
        let block = self
            .provider
            .get_block_number()
            .await
            .wrap_err_with(|| format!("Failed to read block number on {}", self.name))?;
        Ok(block)
    }

    /// Native coin balance of an address
    pub async fn native_balance(&self, address: Address) -> Result<U256> {
        let balance = self
            .provider
            .get_balance(address)
            .await
            .wrap_err_with(|| format!("Failed to read balance of {} on {}", address, self.name))?;
        Ok(balance)
    }
}

/// Decide proof-of-authority mode
///
/// A forced chain is treated as PoA without touching the node. Otherwise the
/// header check decides, and a failed check counts as a standard chain.
async fn resolve_poa<F, Fut>(chain: &str, forced: bool, detect: F) -> bool
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    if forced {
        info!(chain = chain, "Proof-of-authority handling forced by configuration");
        return true;
    }

    match detect().await {
        Ok(detected) => detected,
        Err(e) => {
            debug!(chain = chain, error = %e, "Header probe failed");
            false
        }
    }
}

/// Whether a hex `extraData` string is longer than a standard header allows
pub fn is_poa_extra_data(extra: &str) -> bool {
    let hex_len = extra.trim_start_matches("0x").len();
    hex_len / 2 > STANDARD_EXTRA_DATA_BYTES
}
