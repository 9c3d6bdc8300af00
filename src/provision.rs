//! Test account funding
//!
//! Makes sure the sending accounts hold enough test tokens (minted by the
//! account that holds the token's minter role) and enough native coin to
//! pay for gas (transferred from the same account).

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::chain::ChainHandle;
use crate::contracts::IBridgeToken;
use crate::error::SubmitError;
use crate::submit::{GasLimit, SubmitOptions, Submitter};

/// Gas for a plain value transfer
const NATIVE_TRANSFER_GAS: u64 = 21_000;

/// What provisioning did for one (token, account) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// Balance already met the minimum; nothing was sent
    AlreadyFunded { balance: U256 },
    /// The deficit was minted
    Minted { amount: U256, tx_hash: B256 },
    /// The native-coin deficit was transferred
    Transferred { amount: U256, tx_hash: B256 },
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("{minter} does not hold the minter role on {token}")]
    MissingMinterRole { token: Address, minter: Address },

    #[error("failed to read {what}: {reason}")]
    Read { what: String, reason: String },

    #[error(transparent)]
    Submit(#[from] SubmitError),
}

/// Amount that must be added to reach `minimum`, if any
pub fn deficit(balance: U256, minimum: U256) -> Option<U256> {
    (balance < minimum).then(|| minimum - balance)
}

/// Balance and role reads provisioning depends on
#[async_trait]
pub trait BalanceReader: Send + Sync {
    /// Token balance of `account`
    async fn token_balance(&self, token: Address, account: Address) -> Result<U256, ProvisionError>;

    /// Whether `account` holds the token's `MINTER_ROLE`
    async fn is_minter(&self, token: Address, account: Address) -> Result<bool, ProvisionError>;

    /// Native coin balance of `account`
    async fn coin_balance(&self, account: Address) -> Result<U256, ProvisionError>;
}

#[async_trait]
impl BalanceReader for ChainHandle {
    async fn token_balance(&self, token: Address, account: Address) -> Result<U256, ProvisionError> {
        let balance = IBridgeToken::new(token, self.provider())
            .balanceOf(account)
            .call()
            .await
            .map_err(|e| ProvisionError::Read {
                what: format!("balance of {} on {}", account, token),
                reason: e.to_string(),
            })?
            ._0;
        Ok(balance)
    }

    async fn is_minter(&self, token: Address, account: Address) -> Result<bool, ProvisionError> {
        let contract = IBridgeToken::new(token, self.provider());

        let role = contract
            .MINTER_ROLE()
            .call()
            .await
            .map_err(|e| ProvisionError::Read {
                what: format!("MINTER_ROLE of {}", token),
                reason: e.to_string(),
            })?
            ._0;

        let has_role = contract
            .hasRole(role, account)
            .call()
            .await
            .map_err(|e| ProvisionError::Read {
                what: format!("minter role of {} on {}", account, token),
                reason: e.to_string(),
            })?
            ._0;
        Ok(has_role)
    }

    async fn coin_balance(&self, account: Address) -> Result<U256, ProvisionError> {
        self.native_balance(account)
            .await
            .map_err(|e| ProvisionError::Read {
                what: format!("native balance of {}", account),
                reason: e.to_string(),
            })
    }
}

/// Ensure `target` holds at least `minimum` of `token`
///
/// Mints exactly the deficit from `minter`. If the minter lacks the role
/// nothing is sent and the balance is left as it was.
pub async fn ensure_token_balance<R: BalanceReader, S: Submitter>(
    reader: &R,
    token: Address,
    minter: &S,
    target: Address,
    minimum: U256,
    opts: &SubmitOptions,
) -> Result<ProvisionOutcome, ProvisionError> {
    let balance = reader.token_balance(token, target).await?;

    let Some(amount) = deficit(balance, minimum) else {
        debug!(token = %token, account = %target, balance = %balance, "Token balance sufficient");
        return Ok(ProvisionOutcome::AlreadyFunded { balance });
    };

    if !reader.is_minter(token, minter.address()).await? {
        warn!(token = %token, minter = %minter.address(), "Minter account lacks MINTER_ROLE");
        return Err(ProvisionError::MissingMinterRole {
            token,
            minter: minter.address(),
        });
    }

    let data = IBridgeToken::mintCall { to: target, amount }.abi_encode();
    let tx_hash = minter.submit_raw(token, Bytes::from(data), U256::ZERO, opts).await?;

    info!(token = %token, account = %target, amount = %amount, tx_hash = %tx_hash, "Minted test tokens");
    Ok(ProvisionOutcome::Minted { amount, tx_hash })
}

/// Ensure `target` holds at least `minimum` wei, sending the deficit from `funder`
pub async fn ensure_native_balance<R: BalanceReader, S: Submitter>(
    reader: &R,
    funder: &S,
    target: Address,
    minimum: U256,
    opts: &SubmitOptions,
) -> Result<ProvisionOutcome, ProvisionError> {
    let balance = reader.coin_balance(target).await?;

    let Some(amount) = deficit(balance, minimum) else {
        return Ok(ProvisionOutcome::AlreadyFunded { balance });
    };

    let opts = SubmitOptions {
        gas: GasLimit::Fixed(NATIVE_TRANSFER_GAS),
        ..opts.clone()
    };
    let tx_hash = funder.submit_raw(target, Bytes::new(), amount, &opts).await?;

    info!(
        chain = %funder.chain_name(),
        account = %target,
        amount_wei = %amount,
        tx_hash = %tx_hash,
        "Topped up native balance"
    );
    Ok(ProvisionOutcome::Transferred { amount, tx_hash })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SubmitConfig;
    use std::sync::Mutex;

    #[test]
    fn test_no_deficit_when_balance_meets_minimum() {
        assert_eq!(deficit(U256::from(500u64), U256::from(500u64)), None);
        assert_eq!(deficit(U256::from(900u64), U256::from(500u64)), None);
    }

    #[test]
    fn test_deficit_is_exact() {
        assert_eq!(
            deficit(U256::from(120u64), U256::from(500u64)),
            Some(U256::from(380u64))
        );
        assert_eq!(deficit(U256::ZERO, U256::from(500u64)), Some(U256::from(500u64)));
    }

    #[test]
    fn test_mint_calldata_encodes_target_and_amount() {
        let target = Address::repeat_byte(7);
        let data = IBridgeToken::mintCall {
            to: target,
            amount: U256::from(380u64),
        }
        .abi_encode();

        assert_eq!(&data[..4], IBridgeToken::mintCall::SELECTOR.as_slice());
        assert_eq!(&data[16..36], target.as_slice());
        assert_eq!(U256::from_be_slice(&data[36..68]), U256::from(380u64));
    }

    #[test]
    fn test_missing_role_message() {
        let err = ProvisionError::MissingMinterRole {
            token: Address::repeat_byte(1),
            minter: Address::repeat_byte(2),
        };
        assert!(err.to_string().contains("minter role"));
    }

    const TOKEN: Address = Address::new([0x10; 20]);
    const MINTER: Address = Address::new([0x4d; 20]);
    const TARGET: Address = Address::new([0x51; 20]);

    struct SentTx {
        to: Address,
        data: Bytes,
        value: U256,
        gas: GasLimit,
    }

    /// One token and one account's coin balance, with the minter's role switchable
    struct FakeChain {
        token_balance: U256,
        coin_balance: U256,
        minter_has_role: bool,
        role_reads: Mutex<usize>,
        sent: Mutex<Vec<SentTx>>,
    }

    impl FakeChain {
        fn new(token_balance: u64, minter_has_role: bool) -> Self {
            Self {
                token_balance: U256::from(token_balance),
                coin_balance: U256::ZERO,
                minter_has_role,
                role_reads: Mutex::new(0),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl BalanceReader for FakeChain {
        async fn token_balance(&self, token: Address, account: Address) -> Result<U256, ProvisionError> {
            assert_eq!((token, account), (TOKEN, TARGET));
            Ok(self.token_balance)
        }

        async fn is_minter(&self, _token: Address, account: Address) -> Result<bool, ProvisionError> {
            *self.role_reads.lock().unwrap() += 1;
            Ok(account == MINTER && self.minter_has_role)
        }

        async fn coin_balance(&self, _account: Address) -> Result<U256, ProvisionError> {
            Ok(self.coin_balance)
        }
    }

    #[async_trait]
    impl Submitter for FakeChain {
        fn chain_name(&self) -> &str {
            "avax"
        }

        fn address(&self) -> Address {
            MINTER
        }

        async fn latest_nonce(&self) -> Result<u64, SubmitError> {
            Ok(0)
        }

        async fn submit_raw(
            &self,
            to: Address,
            data: Bytes,
            value: U256,
            opts: &SubmitOptions,
        ) -> Result<B256, SubmitError> {
            self.sent.lock().unwrap().push(SentTx {
                to,
                data,
                value,
                gas: opts.gas,
            });
            Ok(B256::repeat_byte(0xee))
        }
    }

    fn options() -> SubmitOptions {
        SubmitOptions::from_config(&SubmitConfig::default())
    }

    #[tokio::test]
    async fn test_funded_account_is_left_alone() {
        let chain = FakeChain::new(900, true);
        let outcome = ensure_token_balance(&chain, TOKEN, &chain, TARGET, U256::from(500u64), &options())
            .await
            .unwrap();

        assert_eq!(outcome, ProvisionOutcome::AlreadyFunded { balance: U256::from(900u64) });
        assert_eq!(*chain.role_reads.lock().unwrap(), 0);
        assert!(chain.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exact_deficit_is_minted() {
        let chain = FakeChain::new(120, true);
        let outcome = ensure_token_balance(&chain, TOKEN, &chain, TARGET, U256::from(500u64), &options())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ProvisionOutcome::Minted {
                amount: U256::from(380u64),
                tx_hash: B256::repeat_byte(0xee),
            }
        );

        let sent = chain.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, TOKEN);
        assert_eq!(sent[0].value, U256::ZERO);
        let expected = IBridgeToken::mintCall {
            to: TARGET,
            amount: U256::from(380u64),
        }
        .abi_encode();
        assert_eq!(sent[0].data.as_ref(), expected.as_slice());
    }

    #[tokio::test]
    async fn test_minter_without_role_mints_nothing() {
        let chain = FakeChain::new(0, false);
        let result = ensure_token_balance(&chain, TOKEN, &chain, TARGET, U256::from(500u64), &options()).await;

        assert!(matches!(
            result,
            Err(ProvisionError::MissingMinterRole { token, minter }) if token == TOKEN && minter == MINTER
        ));
        assert!(chain.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_native_deficit_is_transferred_with_plain_transfer_gas() {
        let chain = FakeChain {
            coin_balance: U256::from(4_000u64),
            ..FakeChain::new(0, true)
        };
        let outcome = ensure_native_balance(&chain, &chain, TARGET, U256::from(10_000u64), &options())
            .await
            .unwrap();

        assert!(matches!(outcome, ProvisionOutcome::Transferred { amount, .. } if amount == U256::from(6_000u64)));

        let sent = chain.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, TARGET);
        assert_eq!(sent[0].value, U256::from(6_000u64));
        assert!(sent[0].data.is_empty());
        assert_eq!(sent[0].gas, GasLimit::Fixed(NATIVE_TRANSFER_GAS));
    }
}
