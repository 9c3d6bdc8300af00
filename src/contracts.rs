//! Contract bindings
//!
//! The student's bridge contracts are only known at run time through their
//! JSON ABI, so they are bound dynamically as [`ContractHandle`]s. The test
//! tokens have a fixed interface and use `sol!` bindings.

use alloy::dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt};
use alloy::json_abi::{Event, Function, JsonAbi};
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes};
use alloy::providers::Provider;
use alloy::rpc::types::TransactionRequest;
use alloy::sol;
use eyre::{eyre, Result, WrapErr};
use tracing::debug;

use crate::chain::ChainHandle;
use crate::config::ContractInfo;
use crate::error::SubmitError;

// Bridge contract surface the grader relies on
pub const SOURCE_APPROVED_FN: &str = "approved";
pub const SOURCE_REGISTER_FN: &str = "registerToken";
pub const SOURCE_DEPOSIT_FN: &str = "deposit";
pub const DESTINATION_WRAPPED_FN: &str = "wrapped_tokens";
pub const DESTINATION_CREATE_FN: &str = "createToken";
pub const DESTINATION_UNWRAP_FN: &str = "unwrap";

sol! {
    /// Test token ABI (ERC20 with role-based minting)
    #[derive(Debug)]
    #[sol(rpc)]
    contract IBridgeToken {
        function balanceOf(address account) public view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
        function mint(address to, uint256 amount) external;
        function hasRole(bytes32 role, address account) public view returns (bool);
        function MINTER_ROLE() public view returns (bytes32);
    }
}

/// Arguments for a contract call, keyed by ABI parameter name
pub type NamedArgs<'a> = [(&'a str, DynSolValue)];

/// Parameter names compare without leading underscores and case
pub fn normalize_param_name(name: &str) -> String {
    name.trim_start_matches('_').to_ascii_lowercase()
}

/// A student contract bound to one chain
#[derive(Debug, Clone)]
pub struct ContractHandle {
    chain: String,
    address: Address,
    abi: JsonAbi,
}

impl ContractHandle {
    pub fn new(chain: &ChainHandle, info: ContractInfo) -> Self {
        Self::for_chain(chain.name(), info)
    }

    /// Bind by chain name alone, without an open connection
    pub fn for_chain(chain: impl Into<String>, info: ContractInfo) -> Self {
        Self {
            chain: chain.into(),
            address: info.address,
            abi: info.abi,
        }
    }

    /// Name of the chain this handle is bound to
    pub fn chain(&self) -> &str {
        &self.chain
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn abi(&self) -> &JsonAbi {
        &self.abi
    }

    /// Look up an event by name
    pub fn event(&self, name: &str) -> Option<&Event> {
        self.abi.event(name).and_then(|overloads| overloads.first())
    }

    /// Resolve a function by name, preferring the overload with matching arity
    pub fn function(&self, name: &str, arity: usize) -> Result<&Function, SubmitError> {
        let overloads = self
            .abi
            .function(name)
            .ok_or_else(|| SubmitError::UnknownFunction(name.to_string()))?;

        overloads
            .iter()
            .find(|f| f.inputs.len() == arity)
            .or_else(|| overloads.first())
            .ok_or_else(|| SubmitError::UnknownFunction(name.to_string()))
    }

    /// ABI-encode a call (selector included)
    pub fn encode_call(&self, name: &str, args: &NamedArgs<'_>) -> Result<Bytes, SubmitError> {
        let function = self.function(name, args.len())?;
        let values = order_args(function, args)?;

        function
            .abi_encode_input(&values)
            .map(Bytes::from)
            .map_err(|e| SubmitError::Encode {
                function: name.to_string(),
                reason: e.to_string(),
            })
    }

    /// Read-only call returning the decoded outputs
    pub async fn call(
        &self,
        chain: &ChainHandle,
        name: &str,
        args: &NamedArgs<'_>,
        from: Option<Address>,
    ) -> Result<Vec<DynSolValue>> {
        let function = self.function(name, args.len())?;
        let data = self.encode_call(name, args)?;

        let mut tx = TransactionRequest::default()
            .with_to(self.address)
            .with_input(data);
        if let Some(from) = from {
            tx = tx.with_from(from);
        }

        let output = chain
            .provider()
            .call(&tx)
            .await
            .wrap_err_with(|| format!("eth_call {}.{} failed", self.chain, name))?;

        debug!(chain = %self.chain, function = name, bytes = output.len(), "Read call returned");

        function
            .abi_decode_output(&output, false)
            .map_err(|e| eyre!("Failed to decode {} output: {}", name, e))
    }

    /// Read call expected to return a single bool
    pub async fn call_bool(&self, chain: &ChainHandle, name: &str, args: &NamedArgs<'_>) -> Result<bool> {
        match self.call(chain, name, args, None).await?.first() {
            Some(DynSolValue::Bool(value)) => Ok(*value),
            other => Err(eyre!("{} returned {:?}, expected bool", name, other)),
        }
    }

    /// Read call expected to return a single address
    pub async fn call_address(
        &self,
        chain: &ChainHandle,
        name: &str,
        args: &NamedArgs<'_>,
    ) -> Result<Address> {
        match self.call(chain, name, args, None).await?.first() {
            Some(DynSolValue::Address(value)) => Ok(*value),
            other => Err(eyre!("{} returned {:?}, expected address", name, other)),
        }
    }
}

/// Order named arguments to the function's parameter order
///
/// Names are matched without leading underscores or case. If the names do
/// not line up but the count does, the arguments are taken positionally.
pub fn order_args(function: &Function, args: &NamedArgs<'_>) -> Result<Vec<DynSolValue>, SubmitError> {
    if function.inputs.len() != args.len() {
        return Err(SubmitError::Encode {
            function: function.name.clone(),
            reason: format!(
                "expected {} arguments, got {}",
                function.inputs.len(),
                args.len()
            ),
        });
    }

    let by_name: Option<Vec<DynSolValue>> = function
        .inputs
        .iter()
        .map(|param| {
            let wanted = normalize_param_name(&param.name);
            args.iter()
                .find(|(name, _)| normalize_param_name(name) == wanted)
                .map(|(_, value)| value.clone())
        })
        .collect();

    Ok(match by_name {
        Some(values) => values,
        None => {
            debug!(
                function = %function.name,
                "Argument names do not match ABI, using positional order"
            );
            args.iter().map(|(_, value)| value.clone()).collect()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;

    fn deposit_abi() -> JsonAbi {
        serde_json::from_value(serde_json::json!([
            {
                "type": "function",
                "name": "deposit",
                "stateMutability": "nonpayable",
                "inputs": [
                    {"name": "_token", "type": "address"},
                    {"name": "_recipient", "type": "address"},
                    {"name": "_amount", "type": "uint256"}
                ],
                "outputs": []
            },
            {
                "type": "event",
                "name": "Deposit",
                "anonymous": false,
                "inputs": [
                    {"name": "token", "type": "address", "indexed": true},
                    {"name": "recipient", "type": "address", "indexed": true},
                    {"name": "amount", "type": "uint256", "indexed": false}
                ]
            }
        ]))
        .unwrap()
    }

    fn handle() -> ContractHandle {
        ContractHandle {
            chain: "avax".to_string(),
            address: Address::repeat_byte(9),
            abi: deposit_abi(),
        }
    }

    #[test]
    fn test_named_args_are_reordered() {
        let token = Address::repeat_byte(1);
        let recipient = Address::repeat_byte(2);
        let handle = handle();
        let function = handle.function("deposit", 3).unwrap();

        let ordered = order_args(
            function,
            &[
                ("amount", DynSolValue::from(U256::from(500u64))),
                ("recipient", DynSolValue::Address(recipient)),
                ("token", DynSolValue::Address(token)),
            ],
        )
        .unwrap();

        assert_eq!(ordered[0], DynSolValue::Address(token));
        assert_eq!(ordered[1], DynSolValue::Address(recipient));
        assert_eq!(ordered[2], DynSolValue::from(U256::from(500u64)));
    }

    #[test]
    fn test_unmatched_names_fall_back_to_positions() {
        let handle = handle();
        let function = handle.function("deposit", 3).unwrap();

        let ordered = order_args(
            function,
            &[
                ("a", DynSolValue::Address(Address::repeat_byte(1))),
                ("b", DynSolValue::Address(Address::repeat_byte(2))),
                ("c", DynSolValue::from(U256::from(1u64))),
            ],
        )
        .unwrap();

        assert_eq!(ordered[0], DynSolValue::Address(Address::repeat_byte(1)));
    }

    #[test]
    fn test_wrong_arity_is_an_encode_error() {
        let handle = handle();
        let err = handle
            .encode_call("deposit", &[("token", DynSolValue::Address(Address::ZERO))])
            .unwrap_err();
        assert!(matches!(err, SubmitError::Encode { .. }));
    }

    #[test]
    fn test_unknown_function() {
        let err = handle().encode_call("withdraw", &[]).unwrap_err();
        assert!(matches!(err, SubmitError::UnknownFunction(name) if name == "withdraw"));
    }

    #[test]
    fn test_encoded_call_starts_with_selector() {
        let handle = handle();
        let data = handle
            .encode_call(
                "deposit",
                &[
                    ("token", DynSolValue::Address(Address::repeat_byte(1))),
                    ("recipient", DynSolValue::Address(Address::repeat_byte(2))),
                    ("amount", DynSolValue::from(U256::from(500u64))),
                ],
            )
            .unwrap();

        let selector = handle.function("deposit", 3).unwrap().selector();
        assert_eq!(&data[..4], selector.as_slice());
        assert_eq!(data.len(), 4 + 3 * 32);
    }

    #[test]
    fn test_event_lookup() {
        assert!(handle().event("Deposit").is_some());
        assert!(handle().event("Wrap").is_none());
    }

    #[test]
    fn test_normalize_param_name() {
        assert_eq!(normalize_param_name("_Recipient"), "recipient");
        assert_eq!(normalize_param_name("underlying_token"), "underlying_token");
    }
}
