//! Bridge owner setup
//!
//! Registers every source-chain token from the token list on the source
//! contract and creates its wrapped counterpart on the destination
//! contract. Tokens are handled independently; a failure is logged and the
//! next token is tried.

use alloy::dyn_abi::DynSolValue;
use tracing::{info, warn};

use crate::chain::ChainHandle;
use crate::config::TokenEntry;
use crate::contracts::{ContractHandle, DESTINATION_CREATE_FN, SOURCE_REGISTER_FN};
use crate::keys::Account;
use crate::submit::{submit_call, SubmitOptions};

/// Counts from one registration pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationSummary {
    pub registered: usize,
    pub created: usize,
    pub failed: usize,
}

/// Name and symbol given to the wrapped version of a token
///
/// Derived from the last four characters of the address as written in the
/// token list, case preserved: `Wrapped-XXXX` and `WXXXX`.
pub fn wrapped_token_metadata(listed: &str) -> (String, String) {
    let suffix = listed.get(listed.len().saturating_sub(4)..).unwrap_or(listed);
    (format!("Wrapped-{}", suffix), format!("W{}", suffix))
}

/// Register tokens on the source contract, then create them on the destination
pub async fn register_and_create(
    source_chain: &ChainHandle,
    source: &ContractHandle,
    destination_chain: &ChainHandle,
    destination: &ContractHandle,
    owner: &Account,
    tokens: &[TokenEntry],
    opts: &SubmitOptions,
) -> RegistrationSummary {
    let mut summary = RegistrationSummary::default();

    for token in tokens.iter().map(|t| t.address) {
        info!(token = %token, "Registering token on source contract");
        match submit_call(
            source_chain,
            source,
            SOURCE_REGISTER_FN,
            &[("token", DynSolValue::Address(token))],
            owner,
            opts,
        )
        .await
        {
            Ok(_) => summary.registered += 1,
            Err(e) => {
                warn!(token = %token, error = %e, "Failed to register token");
                summary.failed += 1;
            }
        }
    }

    for entry in tokens {
        let token = entry.address;
        let (name, symbol) = wrapped_token_metadata(&entry.listed);
        let args = [
            ("underlying_token", DynSolValue::Address(token)),
            ("name", DynSolValue::String(name.clone())),
            ("symbol", DynSolValue::String(symbol.clone())),
        ];

        info!(token = %token, name = %name, symbol = %symbol, "Simulating createToken");
        if let Err(e) = destination
            .call(destination_chain, DESTINATION_CREATE_FN, &args, Some(owner.address()))
            .await
        {
            warn!(token = %token, reason = %format!("{:#}", e), "createToken would revert");
            summary.failed += 1;
            continue;
        }

        match submit_call(destination_chain, destination, DESTINATION_CREATE_FN, &args, owner, opts).await {
            Ok(_) => summary.created += 1,
            Err(e) => {
                warn!(token = %token, error = %e, "Failed to create token");
                summary.failed += 1;
            }
        }
    }

    info!(
        registered = summary.registered,
        created = summary.created,
        failed = summary.failed,
        "Registration finished"
    );
    summary
}
