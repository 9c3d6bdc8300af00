//! Configuration for grading runs
//!
//! Typed configuration loaded from environment variables (optionally seeded
//! from a `.env` file), plus loaders for the JSON contract description and
//! the CSV token list that accompany a student submission.

use alloy::json_abi::JsonAbi;
use alloy::primitives::{Address, U256};
use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::events::ScanPolicy;

/// Which side of the bridge a chain or contract belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainRole {
    Source,
    Destination,
}

impl ChainRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainRole::Source => "source",
            ChainRole::Destination => "destination",
        }
    }
}

impl fmt::Display for ChainRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainRole {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "source" => Ok(ChainRole::Source),
            "destination" => Ok(ChainRole::Destination),
            other => Err(eyre!("Unknown chain role: {}", other)),
        }
    }
}

/// Root configuration for a grading run
#[derive(Debug, Clone)]
pub struct GraderConfig {
    pub source: ChainConfig,
    pub destination: ChainConfig,
    pub files: FileConfig,
    pub scoring: ScoringConfig,
    pub submit: SubmitConfig,
    pub scan: ScanPolicy,
    pub student: StudentConfig,
}

impl GraderConfig {
    /// Load configuration from environment variables
    ///
    /// Every value has a default, so an empty environment yields the
    /// configuration used for the course testnets (Avalanche Fuji as the
    /// source chain, BSC testnet as the destination chain).
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            source: ChainConfig::from_env_with_prefix("SOURCE", ChainRole::Source)?,
            destination: ChainConfig::from_env_with_prefix("DESTINATION", ChainRole::Destination)?,
            files: FileConfig::from_env(),
            scoring: ScoringConfig::from_env()?,
            submit: SubmitConfig::from_env(),
            scan: ScanPolicy::from_env(),
            student: StudentConfig::from_env(),
        })
    }

    /// Chain configuration for a role
    pub fn chain(&self, role: ChainRole) -> &ChainConfig {
        match role {
            ChainRole::Source => &self.source,
            ChainRole::Destination => &self.destination,
        }
    }
}

/// Connection settings for one chain
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Short chain name as used in the token list (e.g. "avax")
    pub name: String,
    pub role: ChainRole,
    pub rpc_url: Url,
    /// Treat the chain as proof-of-authority without probing its headers
    pub poa: bool,
}

impl ChainConfig {
    /// Avalanche Fuji C-chain
    pub fn default_source() -> Result<Self> {
        Ok(Self {
            name: "avax".to_string(),
            role: ChainRole::Source,
            rpc_url: Url::parse("https://api.avax-test.network/ext/bc/C/rpc")?,
            poa: false,
        })
    }

    /// BSC testnet
    pub fn default_destination() -> Result<Self> {
        Ok(Self {
            name: "bsc".to_string(),
            role: ChainRole::Destination,
            rpc_url: Url::parse("https://data-seed-prebsc-1-s1.binance.org:8545/")?,
            poa: true,
        })
    }

    /// Load from environment with a prefix ("SOURCE" or "DESTINATION")
    pub fn from_env_with_prefix(prefix: &str, role: ChainRole) -> Result<Self> {
        let defaults = match role {
            ChainRole::Source => Self::default_source()?,
            ChainRole::Destination => Self::default_destination()?,
        };

        let rpc_url = match std::env::var(format!("{}_RPC_URL", prefix)) {
            Ok(raw) => Url::parse(&raw).wrap_err_with(|| format!("Invalid {}_RPC_URL", prefix))?,
            Err(_) => defaults.rpc_url,
        };

        Ok(Self {
            name: std::env::var(format!("{}_CHAIN_NAME", prefix)).unwrap_or(defaults.name),
            role,
            rpc_url,
            poa: env_flag(&format!("{}_POA", prefix)).unwrap_or(defaults.poa),
        })
    }
}

/// Locations of the files a grading run reads
///
/// Relative contract-info and token-list paths are resolved against the
/// student directory; the key file is owned by the grader.
#[derive(Debug, Clone)]
pub struct FileConfig {
    pub key_file: PathBuf,
    pub contract_info: PathBuf,
    pub token_list: PathBuf,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            key_file: PathBuf::from("grader_keys.txt"),
            contract_info: PathBuf::from("contract_info.json"),
            token_list: PathBuf::from("erc20s.csv"),
        }
    }
}

impl FileConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            key_file: env_path("GRADER_KEY_FILE").unwrap_or(defaults.key_file),
            contract_info: env_path("GRADER_CONTRACT_INFO").unwrap_or(defaults.contract_info),
            token_list: env_path("GRADER_TOKEN_LIST").unwrap_or(defaults.token_list),
        }
    }

    /// Resolve a possibly relative path against the student directory
    pub fn resolve(student_dir: &Path, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            student_dir.join(path)
        }
    }
}

/// Point budgets and placeholder detection
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    /// Awarded once the student's contract addresses pass the placeholder check
    pub contract_points: f64,
    /// Budget shared by the per-token registration checks
    pub registration_points: f64,
    /// Addresses treated as "not deployed yet" (template defaults)
    pub placeholder_addresses: Vec<Address>,
    /// Base amount for the first transfer; later tokens use multiples
    pub deposit_amount: U256,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            contract_points: 10.0,
            registration_points: 20.0,
            placeholder_addresses: vec![Address::ZERO],
            deposit_amount: U256::from(500u64),
        }
    }
}

impl ScoringConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let placeholder_addresses = match std::env::var("GRADER_PLACEHOLDER_ADDRESSES") {
            Ok(raw) => parse_address_list(&raw)?,
            Err(_) => defaults.placeholder_addresses,
        };

        Ok(Self {
            contract_points: env_parse("GRADER_CONTRACT_POINTS").unwrap_or(defaults.contract_points),
            registration_points: env_parse("GRADER_REGISTRATION_POINTS")
                .unwrap_or(defaults.registration_points),
            placeholder_addresses,
            deposit_amount: env_parse("GRADER_DEPOSIT_AMOUNT").unwrap_or(defaults.deposit_amount),
        })
    }

    /// Check whether an address is one of the configured placeholders
    pub fn is_placeholder(&self, address: &Address) -> bool {
        self.placeholder_addresses.contains(address)
    }
}

/// Transaction submission defaults
#[derive(Debug, Clone)]
pub struct SubmitConfig {
    pub gas_limit: u64,
    pub receipt_timeout: Duration,
    /// Native balance each sending account should hold before transfers
    pub min_native_balance: U256,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            gas_limit: 1_500_000,
            receipt_timeout: Duration::from_secs(180),
            min_native_balance: U256::from(10_000_000_000_000_000u64),
        }
    }
}

impl SubmitConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            gas_limit: env_parse("GRADER_GAS_LIMIT").unwrap_or(defaults.gas_limit),
            receipt_timeout: env_parse("GRADER_RECEIPT_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.receipt_timeout),
            min_native_balance: env_parse("GRADER_MIN_NATIVE_BALANCE_WEI")
                .unwrap_or(defaults.min_native_balance),
        }
    }
}

/// How the student's scanning code is invoked
#[derive(Debug, Clone)]
pub struct StudentConfig {
    /// Program and leading arguments; the chain role is appended
    pub scan_command: Vec<String>,
    pub scan_timeout: Duration,
}

impl Default for StudentConfig {
    fn default() -> Self {
        Self {
            scan_command: vec!["python3".to_string(), "bridge.py".to_string()],
            scan_timeout: Duration::from_secs(300),
        }
    }
}

impl StudentConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let scan_command = std::env::var("GRADER_SCAN_COMMAND")
            .ok()
            .map(|raw| raw.split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .filter(|parts| !parts.is_empty())
            .unwrap_or(defaults.scan_command);

        Self {
            scan_command,
            scan_timeout: env_parse("GRADER_SCAN_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.scan_timeout),
        }
    }
}

// --- Contract info ---

/// Address and ABI of one bridge contract
#[derive(Debug, Clone, Deserialize)]
pub struct ContractInfo {
    pub address: Address,
    pub abi: JsonAbi,
}

/// Read the contract description for one role from a JSON file
///
/// The file maps role names to `{ "address": ..., "abi": [...] }`.
pub fn load_contract_info(path: &Path, role: ChainRole) -> Result<ContractInfo> {
    let content = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("Failed to read contract info {}", path.display()))?;
    let mut contracts: HashMap<String, ContractInfo> = serde_json::from_str(&content)
        .wrap_err_with(|| format!("Malformed contract info {}", path.display()))?;

    contracts
        .remove(role.as_str())
        .ok_or_else(|| eyre!("No '{}' contract in {}", role, path.display()))
}

// --- Token list ---

/// One row of the token list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEntry {
    pub chain: String,
    pub address: Address,
    /// The address exactly as written in the file
    pub listed: String,
}

/// Load `chain,address` rows from a CSV token list
pub fn load_token_list(path: &Path) -> Result<Vec<TokenEntry>> {
    let content = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("Failed to read token list {}", path.display()))?;
    parse_token_list(&content)
}

/// Parse token list content; blank lines are skipped, anything else malformed is an error
pub fn parse_token_list(content: &str) -> Result<Vec<TokenEntry>> {
    let mut tokens = Vec::new();

    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (chain, address) = line
            .split_once(',')
            .ok_or_else(|| eyre!("Token list line {}: expected 'chain,address'", line_no + 1))?;

        let listed = address.trim();
        let address: Address = listed
            .parse()
            .map_err(|e| eyre!("Token list line {}: invalid address: {}", line_no + 1, e))?;

        tokens.push(TokenEntry {
            chain: chain.trim().to_string(),
            address,
            listed: listed.to_string(),
        });
    }

    Ok(tokens)
}

/// Entries listed for a given chain name (case-insensitive)
pub fn entries_on_chain(tokens: &[TokenEntry], chain: &str) -> Vec<TokenEntry> {
    tokens
        .iter()
        .filter(|t| t.chain.eq_ignore_ascii_case(chain))
        .cloned()
        .collect()
}

/// Addresses of the tokens listed for a given chain name (case-insensitive)
pub fn tokens_on_chain(tokens: &[TokenEntry], chain: &str) -> Vec<Address> {
    entries_on_chain(tokens, chain).into_iter().map(|t| t.address).collect()
}

// --- Helper functions ---

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().map(PathBuf::from)
}

fn parse_address_list(raw: &str) -> Result<Vec<Address>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse()
                .map_err(|e| eyre!("Invalid placeholder address '{}': {}", s, e))
        })
        .collect()
}
