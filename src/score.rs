//! Scoring
//!
//! Pure functions only, apart from [`log_mismatches`] which exists solely
//! to explain a [`MatchReport`] in the logs.

use alloy::primitives::{Address, U256};
use serde::Serialize;
use tracing::{debug, info};

use crate::events::{EventKind, ObservedEvent};

/// Upper bound of every score
pub const MAX_SCORE: f64 = 100.0;

/// Registration state of one token on both bridge contracts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistrationCheck {
    pub token: Address,
    /// `approved(token)` on the source contract
    pub source_approved: bool,
    /// `wrapped_tokens(token)` is non-zero on the destination contract
    pub destination_created: bool,
}

impl RegistrationCheck {
    pub fn is_complete(&self) -> bool {
        self.source_approved && self.destination_created
    }

    fn failures(&self) -> u32 {
        u32::from(!self.source_approved) + u32::from(!self.destination_created)
    }
}

/// Points earned for token registration
///
/// Each token carries two checks worth `budget / (2 * tokens)` each; the
/// share of every failed check is deducted. No tokens earns nothing.
pub fn registration_points(budget: f64, checks: &[RegistrationCheck]) -> f64 {
    if checks.is_empty() || budget <= 0.0 {
        return 0.0;
    }

    let share = budget / (2.0 * checks.len() as f64);
    let failures: u32 = checks.iter().map(RegistrationCheck::failures).sum();

    (budget - share * f64::from(failures)).clamp(0.0, budget)
}

/// The event a correct bridge emits for a submitted transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExpectedTransfer {
    pub kind: EventKind,
    /// Underlying token address
    pub token: Address,
    pub recipient: Address,
    pub amount: U256,
}

impl ExpectedTransfer {
    pub fn matches(&self, event: &ObservedEvent) -> bool {
        event.kind == self.kind
            && event.recipient == self.recipient
            && event.amount == self.amount
            && event.token == self.token
    }
}

/// Result of reconciling expected transfers against observed events
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatchReport {
    /// `(expected index, observed index)` pairs
    pub matched: Vec<(usize, usize)>,
    /// Indices of expected transfers with no matching event
    pub unmatched: Vec<usize>,
}

impl MatchReport {
    pub fn matched_count(&self) -> usize {
        self.matched.len()
    }
}

/// Match each expected transfer to the first unused equal event
///
/// Expected transfers are visited in order and each consumes at most one
/// event, so duplicate events never earn double credit and two identical
/// transfers need two events.
pub fn reconcile(expected: &[ExpectedTransfer], observed: &[ObservedEvent]) -> MatchReport {
    let mut used = vec![false; observed.len()];
    let mut report = MatchReport::default();

    for (i, transfer) in expected.iter().enumerate() {
        let hit = observed
            .iter()
            .enumerate()
            .find(|(j, event)| !used[*j] && transfer.matches(event))
            .map(|(j, _)| j);

        match hit {
            Some(j) => {
                used[j] = true;
                report.matched.push((i, j));
            }
            None => report.unmatched.push(i),
        }
    }

    report
}

/// Transfer score scaled to 100, floored by the registration score
///
/// Every request contributes two possible matches (the deposit's wrap and
/// the withdrawal's release).
pub fn final_score(matched: usize, total_requests: usize, floor: f64) -> f64 {
    let scaled = if total_requests == 0 {
        0.0
    } else {
        MAX_SCORE * matched as f64 / (2.0 * total_requests as f64)
    };

    clamp_score(scaled).max(clamp_score(floor))
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        return 0.0;
    }
    score.clamp(0.0, MAX_SCORE)
}

/// Log what each unmatched transfer was compared against
pub fn log_mismatches(expected: &[ExpectedTransfer], observed: &[ObservedEvent], report: &MatchReport) {
    for &i in &report.unmatched {
        let Some(transfer) = expected.get(i) else {
            continue;
        };

        info!(
            event = %transfer.kind,
            token = %transfer.token,
            recipient = %transfer.recipient,
            amount = %transfer.amount,
            "No matching event for transfer"
        );

        for event in observed.iter().filter(|e| e.kind == transfer.kind) {
            debug!(
                token = %event.token,
                recipient = %event.recipient,
                amount = %event.amount,
                token_ok = event.token == transfer.token,
                recipient_ok = event.recipient == transfer.recipient,
                amount_ok = event.amount == transfer.amount,
                tx_hash = %event.tx_hash,
                "Compared against event"
            );
        }
    }
}
