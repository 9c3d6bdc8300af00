use serde::Serialize;
use std::fmt;
use std::time::Duration;

pub mod chain;
pub mod config;
pub mod contracts;
pub mod error;
pub mod events;
pub mod grader;
pub mod keys;
pub mod orchestrator;
pub mod provision;
pub mod register;
pub mod score;
pub mod student;
pub mod submit;

pub use chain::ChainHandle;
pub use config::{ChainRole, GraderConfig};
pub use contracts::ContractHandle;
pub use error::{GraderError, SubmitError};
pub use events::{EventKind, ObservedEvent, ScanPolicy};
pub use grader::{grade, BridgeBackend, Grader, GradingContext, LiveBackend};
pub use keys::{Account, KeyStore, TestAccounts};
pub use orchestrator::{Direction, TransferRequest};
pub use score::{final_score, reconcile, registration_points, MatchReport};
pub use student::{ProcessBridge, StudentBridge};
pub use submit::{ChainSubmitter, Submitter};

/// Step of a grading run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
    LocateContracts,
    CheckAddresses,
    CheckRegistration,
    SubmitDeposits,
    StudentScanSource,
    ScanWrapEvents,
    SubmitWithdrawals,
    StudentScanDestination,
    ScanWithdrawalEvents,
    Reconcile,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::LocateContracts => "locate_contracts",
            Phase::CheckAddresses => "check_addresses",
            Phase::CheckRegistration => "check_registration",
            Phase::SubmitDeposits => "submit_deposits",
            Phase::StudentScanSource => "student_scan(source)",
            Phase::ScanWrapEvents => "scan_wrap_events",
            Phase::SubmitWithdrawals => "submit_withdrawals",
            Phase::StudentScanDestination => "student_scan(destination)",
            Phase::ScanWithdrawalEvents => "scan_withdrawal_events",
            Phase::Reconcile => "reconcile",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents the outcome of a single grading phase
#[derive(Debug, Clone)]
pub enum PhaseResult {
    Pass {
        phase: Phase,
        detail: String,
        duration: Duration,
    },
    Fail {
        phase: Phase,
        error: String,
        duration: Duration,
    },
}

impl PhaseResult {
    pub fn pass(phase: Phase, detail: impl Into<String>, duration: Duration) -> Self {
        Self::Pass {
            phase,
            detail: detail.into(),
            duration,
        }
    }

    pub fn fail(phase: Phase, error: impl Into<String>, duration: Duration) -> Self {
        Self::Fail {
            phase,
            error: error.into(),
            duration,
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass { .. })
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, Self::Fail { .. })
    }

    pub fn phase(&self) -> Phase {
        match self {
            Self::Pass { phase, .. } => *phase,
            Self::Fail { phase, .. } => *phase,
        }
    }
}

impl fmt::Display for PhaseResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass {
                phase,
                detail,
                duration,
            } => {
                write!(
                    f,
                    "\x1b[32mPASS\x1b[0m: {} - {} ({}ms)",
                    phase,
                    detail,
                    duration.as_millis()
                )
            }
            Self::Fail {
                phase,
                error,
                duration,
            } => {
                write!(
                    f,
                    "\x1b[31mFAIL\x1b[0m: {} - {}\n    ({}ms)",
                    phase,
                    error,
                    duration.as_millis()
                )
            }
        }
    }
}

/// Phase results and score of one grading run
#[derive(Debug, Clone)]
pub struct GradeReport {
    student: String,
    phases: Vec<PhaseResult>,
    /// Contract points plus registration points
    pub floor: f64,
    pub score: f64,
    pub matches: Option<MatchReport>,
    start_time: std::time::Instant,
}

impl GradeReport {
    pub fn new(student: impl Into<String>) -> Self {
        Self {
            student: student.into(),
            phases: Vec::new(),
            floor: 0.0,
            score: 0.0,
            matches: None,
            start_time: std::time::Instant::now(),
        }
    }

    pub fn add_result(&mut self, result: PhaseResult) {
        self.phases.push(result);
    }

    pub fn phases(&self) -> &[PhaseResult] {
        &self.phases
    }

    /// Result recorded for a phase, if it was reached
    pub fn phase(&self, phase: Phase) -> Option<&PhaseResult> {
        self.phases.iter().find(|r| r.phase() == phase)
    }

    /// Phase that ended the run early, if any
    pub fn failed_phase(&self) -> Option<Phase> {
        self.phases.iter().find(|r| r.is_fail()).map(PhaseResult::phase)
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn print_summary(&self) {
        println!();
        println!("Grading: {}", self.student);
        println!("----------------------------------------");
        for result in &self.phases {
            println!("  {}", result);
        }
        println!("----------------------------------------");
        if let Some(matches) = &self.matches {
            println!(
                "Matched: {} ({} unmatched)",
                matches.matched_count(),
                matches.unmatched.len()
            );
        }
        println!("Floor:   {:.2}", self.floor);
        println!("Score:   \x1b[1m{:.2}\x1b[0m", self.score);
        println!("Elapsed: {:.1}s", self.elapsed().as_secs_f64());
        println!("----------------------------------------");
    }
}

impl fmt::Display for GradeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GradeReport({} - score {:.2})", self.student, self.score)
    }
}
