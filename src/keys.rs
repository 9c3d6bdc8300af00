//! Test account management
//!
//! Accounts are derived from BIP-39 mnemonics kept one per line in a plain
//! text key file. Asking for an index the file does not have yet generates
//! fresh mnemonics and appends them, so the same account set is reused on
//! every run once created.

use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use alloy::signers::local::{coins_bip39::English, MnemonicBuilder, PrivateKeySigner};
use bip39::Mnemonic;
use eyre::{eyre, Result, WrapErr};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

/// Words in generated mnemonics
const MNEMONIC_WORDS: usize = 12;

/// Key index of the account holding the token minter role
pub const MINTER_KEY: usize = 0;
/// Key index of the account that deposits on the source chain
pub const SENDER_KEY: usize = 1;
/// Key index of the account that receives wrapped tokens
pub const RECEIVER_KEY: usize = 2;

/// An address plus its signing key
#[derive(Clone)]
pub struct Account {
    address: Address,
    signer: PrivateKeySigner,
    wallet: EthereumWallet,
}

impl Account {
    pub fn from_signer(signer: PrivateKeySigner) -> Self {
        Self {
            address: signer.address(),
            wallet: EthereumWallet::from(signer.clone()),
            signer,
        }
    }

    /// Derive the first account (`m/44'/60'/0'/0/0`) of a mnemonic
    pub fn from_mnemonic(phrase: &str) -> Result<Self> {
        let signer = MnemonicBuilder::<English>::default()
            .phrase(phrase.trim())
            .index(0u32)
            .map_err(|e| eyre!("Invalid derivation index: {}", e))?
            .build()
            .map_err(|e| eyre!("Invalid mnemonic: {}", e))?;
        Ok(Self::from_signer(signer))
    }

    /// Create from a hex private key (with or without 0x prefix)
    pub fn from_private_key(key: &str) -> Result<Self> {
        let signer: PrivateKeySigner = key
            .trim()
            .parse()
            .map_err(|e| eyre!("Invalid private key: {}", e))?;
        Ok(Self::from_signer(signer))
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn signer(&self) -> &PrivateKeySigner {
        &self.signer
    }

    pub fn wallet(&self) -> &EthereumWallet {
        &self.wallet
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.address)
            .field("signer", &"<redacted>")
            .finish()
    }
}

/// File-backed mnemonic store
#[derive(Debug, Clone)]
pub struct KeyStore {
    path: PathBuf,
}

impl KeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mnemonics currently stored, in file order
    pub fn mnemonics(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&self.path)
            .wrap_err_with(|| format!("Failed to read key file {}", self.path.display()))?;

        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Account for a key index, generating and persisting keys as needed
    pub fn account(&self, index: usize) -> Result<Account> {
        let mut mnemonics = self.mnemonics()?;

        if index >= mnemonics.len() {
            let missing = index + 1 - mnemonics.len();
            for _ in 0..missing {
                let mnemonic = Mnemonic::generate(MNEMONIC_WORDS)
                    .map_err(|e| eyre!("Failed to generate mnemonic: {}", e))?;
                mnemonics.push(mnemonic.to_string());
            }
            self.write(&mnemonics)?;
            info!(
                path = %self.path.display(),
                generated = missing,
                "Generated new grader keys"
            );
        }

        Account::from_mnemonic(&mnemonics[index])
            .wrap_err_with(|| format!("Key {} in {} is invalid", index, self.path.display()))
    }

    fn write(&self, mnemonics: &[String]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut content = mnemonics.join("\n");
        content.push('\n');
        std::fs::write(&self.path, content)
            .wrap_err_with(|| format!("Failed to write key file {}", self.path.display()))
    }
}

/// The fixed identities a grading run uses
#[derive(Debug, Clone)]
pub struct TestAccounts {
    /// Holds the minter role on the test tokens and funds the others
    pub minter: Account,
    /// Deposits on the source chain; receives withdrawals
    pub sender: Account,
    /// Receives wrapped tokens; submits unwraps on the destination chain
    pub receiver: Account,
}

impl TestAccounts {
    pub fn load(store: &KeyStore) -> Result<Self> {
        Ok(Self {
            minter: store.account(MINTER_KEY)?,
            sender: store.account(SENDER_KEY)?,
            receiver: store.account(RECEIVER_KEY)?,
        })
    }
}
