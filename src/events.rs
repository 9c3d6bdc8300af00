//! Bridge event scanning
//!
//! Queries a small window of recent blocks for the `Wrap` and `Withdrawal`
//! events emitted by the student's bridge contracts and materializes them
//! into comparable [`ObservedEvent`] records.

use alloy::dyn_abi::{DynSolValue, EventExt};
use alloy::json_abi::Event;
use alloy::primitives::{Address, U256};
use alloy::providers::Provider;
use alloy::rpc::types::{Filter, Log};
use eyre::{eyre, Result, WrapErr};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::chain::ChainHandle;
use crate::contracts::{normalize_param_name, ContractHandle};

/// Event name emitted by the destination contract when it mints wrapped tokens
pub const WRAP_EVENT: &str = "Wrap";
/// Event name emitted by the source contract when it releases underlying tokens
pub const WITHDRAWAL_EVENT: &str = "Withdrawal";

/// Kind of bridge event the grader reconciles against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    Wrap,
    Withdrawal,
}

impl EventKind {
    /// Solidity event name
    pub fn event_name(&self) -> &'static str {
        match self {
            EventKind::Wrap => WRAP_EVENT,
            EventKind::Withdrawal => WITHDRAWAL_EVENT,
        }
    }

    /// Field carrying the underlying token address
    fn token_field(&self) -> &'static str {
        match self {
            EventKind::Wrap => "underlying_token",
            EventKind::Withdrawal => "token",
        }
    }

    /// Field carrying the recipient address
    fn recipient_field(&self) -> &'static str {
        match self {
            EventKind::Wrap => "to",
            EventKind::Withdrawal => "recipient",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

/// A bridge event read back from the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObservedEvent {
    pub kind: EventKind,
    pub block_number: u64,
    /// Underlying token (for wraps: the token locked on the source chain)
    pub token: Address,
    /// Wrapped token minted on the destination chain (wraps only)
    pub wrapped_token: Option<Address>,
    pub recipient: Address,
    pub amount: U256,
    /// 0x-prefixed transaction hash
    pub tx_hash: String,
    /// Contract that emitted the log
    pub contract: Address,
}

/// Timing and window parameters for event scans
#[derive(Debug, Clone)]
pub struct ScanPolicy {
    /// Number of blocks behind the tip to include
    pub window: u64,
    /// Wait before the first scan so block production can catch up
    pub initial_delay: Duration,
    /// Wait before each rescan when nothing was found
    pub retry_delay: Duration,
    /// Rescans allowed after an empty result
    pub retries: u32,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self {
            window: 5,
            initial_delay: Duration::from_secs(5),
            retry_delay: Duration::from_secs(5),
            retries: 1,
        }
    }
}

impl ScanPolicy {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |key: &str| {
            std::env::var(key)
                .ok()
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
        };

        Self {
            window: std::env::var("GRADER_SCAN_WINDOW")
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.window),
            initial_delay: secs("GRADER_SCAN_DELAY_SECS").unwrap_or(defaults.initial_delay),
            retry_delay: secs("GRADER_SCAN_RETRY_DELAY_SECS").unwrap_or(defaults.retry_delay),
            retries: std::env::var("GRADER_SCAN_RETRIES")
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.retries),
        }
    }

    /// Policy with no waiting, for tests and local devnets
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            retry_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Block range `[start, end]` to scan given the current tip
    pub fn block_range(&self, tip: u64) -> (u64, u64) {
        recent_range(tip, self.window)
    }
}

fn recent_range(tip: u64, window: u64) -> (u64, u64) {
    (tip.saturating_sub(window), tip)
}

/// Scan the recent window of one chain for one event kind
///
/// Retrieves every log in `[tip - window, tip]` emitted by `contract` whose
/// first topic is the event selector.
pub async fn scan_recent(
    chain: &ChainHandle,
    contract: &ContractHandle,
    kind: EventKind,
    window: u64,
) -> Result<Vec<ObservedEvent>> {
    let event = contract
        .event(kind.event_name())
        .ok_or_else(|| eyre!("Contract ABI has no '{}' event", kind))?
        .clone();

    let tip = chain.latest_block().await?;
    let (start, end) = recent_range(tip, window);

    let filter = Filter::new()
        .address(contract.address())
        .event_signature(event.selector())
        .from_block(start)
        .to_block(end);

    let logs = chain
        .provider()
        .get_logs(&filter)
        .await
        .wrap_err_with(|| format!("Failed to get {} logs from block {} to {}", kind, start, end))?;

    debug!(
        chain = %chain.name(),
        event = %kind,
        from = start,
        to = end,
        logs = logs.len(),
        "Fetched event logs"
    );

    let mut events = Vec::with_capacity(logs.len());
    for log in &logs {
        match decode_observed(kind, &event, log) {
            Ok(observed) => events.push(observed),
            Err(e) => warn!(
                chain = %chain.name(),
                event = %kind,
                error = %e,
                "Skipping undecodable log"
            ),
        }
    }

    Ok(events)
}

/// Run a scan under a policy: wait, scan, and rescan while nothing is found
///
/// A failed scan attempt counts as an empty result so that the retry still
/// happens; the final result may be empty.
pub async fn scan_with_retry<F, Fut>(policy: &ScanPolicy, kind: EventKind, scan: F) -> Vec<ObservedEvent>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Vec<ObservedEvent>>>,
{
    tokio::time::sleep(policy.initial_delay).await;

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let events = match scan().await {
            Ok(events) => events,
            Err(e) => {
                warn!(event = %kind, attempt = attempt, error = %e, "Event scan failed");
                Vec::new()
            }
        };

        if !events.is_empty() {
            info!(event = %kind, count = events.len(), attempt = attempt, "Found events");
            return events;
        }

        if attempt > policy.retries {
            warn!(event = %kind, attempts = attempt, "No events found");
            return events;
        }

        info!(
            event = %kind,
            retry_in_secs = policy.retry_delay.as_secs(),
            "No events found, scanning again"
        );
        tokio::time::sleep(policy.retry_delay).await;
    }
}

/// Decode one log into an [`ObservedEvent`] using the contract's event ABI
pub fn decode_observed(kind: EventKind, event: &Event, log: &Log) -> Result<ObservedEvent> {
    let decoded = event
        .decode_log_parts(log.topics().iter().copied(), &log.data().data, false)
        .map_err(|e| eyre!("Failed to decode {} log: {}", kind, e))?;

    let mut indexed = decoded.indexed.into_iter();
    let mut body = decoded.body.into_iter();
    let mut fields: HashMap<String, DynSolValue> = HashMap::new();
    for input in &event.inputs {
        let value = if input.indexed {
            indexed.next()
        } else {
            body.next()
        };
        if let Some(value) = value {
            fields.insert(normalize_param_name(&input.name), value);
        }
    }

    let tx_hash = log
        .transaction_hash
        .map(|h| format!("0x{}", hex::encode(h)))
        .unwrap_or_default();

    Ok(ObservedEvent {
        kind,
        block_number: log.block_number.unwrap_or_default(),
        token: address_field(&fields, kind.token_field())?,
        wrapped_token: match kind {
            EventKind::Wrap => address_field(&fields, "wrapped_token").ok(),
            EventKind::Withdrawal => None,
        },
        recipient: address_field(&fields, kind.recipient_field())?,
        amount: uint_field(&fields, "amount")?,
        tx_hash,
        contract: log.address(),
    })
}

fn address_field(fields: &HashMap<String, DynSolValue>, name: &str) -> Result<Address> {
    match fields.get(name) {
        Some(DynSolValue::Address(address)) => Ok(*address),
        Some(other) => Err(eyre!("Field '{}' is not an address: {:?}", name, other)),
        None => Err(eyre!("Event has no '{}' field", name)),
    }
}

fn uint_field(fields: &HashMap<String, DynSolValue>, name: &str) -> Result<U256> {
    match fields.get(name) {
        Some(DynSolValue::Uint(value, _)) => Ok(*value),
        Some(other) => Err(eyre!("Field '{}' is not an integer: {:?}", name, other)),
        None => Err(eyre!("Event has no '{}' field", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Bytes, LogData, B256};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn wrap_event_abi() -> Event {
        serde_json::from_value(serde_json::json!({
            "type": "event",
            "name": "Wrap",
            "anonymous": false,
            "inputs": [
                {"name": "underlying_token", "type": "address", "indexed": true},
                {"name": "wrapped_token", "type": "address", "indexed": true},
                {"name": "to", "type": "address", "indexed": true},
                {"name": "amount", "type": "uint256", "indexed": false}
            ]
        }))
        .unwrap()
    }

    fn address_topic(address: Address) -> B256 {
        address.into_word()
    }

    fn sample_event(amount: u64) -> ObservedEvent {
        ObservedEvent {
            kind: EventKind::Wrap,
            block_number: 1,
            token: Address::repeat_byte(1),
            wrapped_token: None,
            recipient: Address::repeat_byte(2),
            amount: U256::from(amount),
            tx_hash: String::new(),
            contract: Address::ZERO,
        }
    }

    #[test]
    fn test_block_range_saturates() {
        let policy = ScanPolicy::default();
        assert_eq!(policy.block_range(100), (95, 100));
        assert_eq!(policy.block_range(3), (0, 3));
    }

    #[test]
    fn test_decode_wrap_log() {
        let event = wrap_event_abi();
        let underlying = Address::repeat_byte(0x11);
        let wrapped = Address::repeat_byte(0x22);
        let to = Address::repeat_byte(0x33);
        let emitter = Address::repeat_byte(0x44);

        let data = LogData::new_unchecked(
            vec![
                event.selector(),
                address_topic(underlying),
                address_topic(wrapped),
                address_topic(to),
            ],
            Bytes::from(U256::from(500u64).to_be_bytes::<32>().to_vec()),
        );
        let log = Log {
            inner: alloy::primitives::Log {
                address: emitter,
                data,
            },
            block_number: Some(42),
            transaction_hash: Some(B256::repeat_byte(0xaa)),
            ..Default::default()
        };

        let observed = decode_observed(EventKind::Wrap, &event, &log).unwrap();
        assert_eq!(observed.token, underlying);
        assert_eq!(observed.wrapped_token, Some(wrapped));
        assert_eq!(observed.recipient, to);
        assert_eq!(observed.amount, U256::from(500u64));
        assert_eq!(observed.block_number, 42);
        assert_eq!(observed.contract, emitter);
        assert!(observed.tx_hash.starts_with("0xaaaa"));
    }

    #[test]
    fn test_decode_rejects_missing_fields() {
        let event: Event = serde_json::from_value(serde_json::json!({
            "type": "event",
            "name": "Withdrawal",
            "anonymous": false,
            "inputs": [
                {"name": "token", "type": "address", "indexed": false},
                {"name": "amount", "type": "uint256", "indexed": false}
            ]
        }))
        .unwrap();

        let mut body = Address::repeat_byte(1).into_word().to_vec();
        body.extend_from_slice(&U256::from(7u64).to_be_bytes::<32>());
        let log = Log {
            inner: alloy::primitives::Log {
                address: Address::ZERO,
                data: LogData::new_unchecked(vec![event.selector()], Bytes::from(body)),
            },
            ..Default::default()
        };

        let err = decode_observed(EventKind::Withdrawal, &event, &log).unwrap_err();
        assert!(err.to_string().contains("recipient"));
    }

    #[tokio::test]
    async fn test_scan_with_retry_returns_first_non_empty() {
        let calls = AtomicU32::new(0);
        let events = scan_with_retry(&ScanPolicy::immediate(), EventKind::Wrap, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Ok(Vec::new())
                } else {
                    Ok(vec![sample_event(500)])
                }
            }
        })
        .await;

        assert_eq!(events.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_scan_with_retry_gives_up_after_one_rescan() {
        let calls = AtomicU32::new(0);
        let events = scan_with_retry(&ScanPolicy::immediate(), EventKind::Withdrawal, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(Vec::new()) }
        })
        .await;

        assert!(events.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_scan_errors_count_as_empty() {
        let calls = AtomicU32::new(0);
        let events = scan_with_retry(&ScanPolicy::immediate(), EventKind::Wrap, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(eyre!("rpc unavailable")) }
        })
        .await;

        assert!(events.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
