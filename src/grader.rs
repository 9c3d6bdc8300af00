//! Grading state machine
//!
//! ```text
//! LOCATE_CONTRACTS -> CHECK_ADDRESSES -> CHECK_REGISTRATION -> SUBMIT_DEPOSITS
//!   -> STUDENT_SCAN(source) -> SCAN_WRAP_EVENTS -> SUBMIT_WITHDRAWALS
//!   -> STUDENT_SCAN(destination) -> SCAN_WITHDRAWAL_EVENTS -> RECONCILE
//! ```
//!
//! Failing to locate the contracts or finding placeholder addresses scores
//! 0. Incomplete registration, or a failing student scan, stops the run at
//! the registration floor. Chain access goes through [`BridgeBackend`] and
//! student code through [`StudentBridge`].

use alloy::dyn_abi::DynSolValue;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::Provider;
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use std::path::Path;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::chain::ChainHandle;
use crate::config::{load_token_list, tokens_on_chain, ChainRole, ContractInfo, FileConfig, GraderConfig, ScoringConfig};
use crate::contracts::{ContractHandle, DESTINATION_WRAPPED_FN, SOURCE_APPROVED_FN};
use crate::error::GraderError;
use crate::events::{scan_recent, scan_with_retry, EventKind, ObservedEvent, ScanPolicy};
use crate::keys::{KeyStore, TestAccounts};
use crate::orchestrator::{submit_deposit, submit_withdrawal, Direction, TransferError, TransferRequest};
use crate::provision::{ensure_native_balance, ensure_token_balance};
use crate::score::{final_score, log_mismatches, reconcile, registration_points, ExpectedTransfer, RegistrationCheck};
use crate::student::{ProcessBridge, StudentBridge};
use crate::submit::{ChainSubmitter, SubmitOptions};
use crate::{GradeReport, Phase, PhaseResult};

/// Chain-side operations of a grading run
#[async_trait]
pub trait BridgeBackend: Send + Sync {
    /// Bind the student's contracts; called once before any other method
    async fn bind_contracts(
        &mut self,
        source: ContractInfo,
        destination: ContractInfo,
    ) -> Result<(), GraderError>;

    /// Registration state of one source token on both contracts
    async fn registration(&self, token: Address) -> RegistrationCheck;

    /// Account that deposits on the source chain
    fn sender(&self) -> Address;

    /// Account that receives wrapped tokens and unwraps them
    fn receiver(&self) -> Address;

    /// Fund the sending side of a request
    async fn provision(&self, request: &TransferRequest) -> Result<()>;

    /// Submit a request once
    async fn submit(&self, request: &TransferRequest) -> Result<B256, TransferError>;

    /// Read recent bridge events of one kind
    async fn scan_recent(&self, kind: EventKind) -> Result<Vec<ObservedEvent>>;
}

/// Drives one grading run
pub struct Grader<B, S> {
    backend: B,
    student: S,
    tokens: Vec<Address>,
    scoring: ScoringConfig,
    scan: ScanPolicy,
}

impl<B: BridgeBackend, S: StudentBridge> Grader<B, S> {
    /// `tokens` are the source-chain tokens to register and transfer
    pub fn new(backend: B, student: S, tokens: Vec<Address>, scoring: ScoringConfig, scan: ScanPolicy) -> Self {
        Self {
            backend,
            student,
            tokens,
            scoring,
            scan,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Run every phase and return the report with the final score
    pub async fn run(&mut self, name: &str) -> GradeReport {
        let mut report = GradeReport::new(name);

        // LOCATE_CONTRACTS
        let started = Instant::now();
        let located = async {
            let source = self.student.contract_info(ChainRole::Source).await?;
            let destination = self.student.contract_info(ChainRole::Destination).await?;
            if self.tokens.is_empty() {
                return Err(GraderError::config("token list has no tokens for the source chain"));
            }
            Ok::<_, GraderError>((source, destination))
        }
        .await;

        let (source, destination) = match located {
            Ok(infos) => {
                report.add_result(PhaseResult::pass(
                    Phase::LocateContracts,
                    format!("source {}, destination {}", infos.0.address, infos.1.address),
                    started.elapsed(),
                ));
                infos
            }
            Err(e) => {
                error!(error = %e, "Could not locate contracts");
                report.add_result(PhaseResult::fail(Phase::LocateContracts, e.to_string(), started.elapsed()));
                return finish(report, 0.0);
            }
        };

        // CHECK_ADDRESSES
        let started = Instant::now();
        for (role, address) in [(ChainRole::Source, source.address), (ChainRole::Destination, destination.address)] {
            if self.scoring.is_placeholder(&address) {
                warn!(role = %role, address = %address, "Contract address was never changed");
                report.add_result(PhaseResult::fail(
                    Phase::CheckAddresses,
                    format!("{} contract address {} is a placeholder", role, address),
                    started.elapsed(),
                ));
                return finish(report, 0.0);
            }
        }

        if let Err(e) = self.backend.bind_contracts(source, destination).await {
            error!(error = %e, "Could not bind contracts");
            report.add_result(PhaseResult::fail(Phase::CheckAddresses, e.to_string(), started.elapsed()));
            return finish(report, 0.0);
        }

        report.floor = self.scoring.contract_points;
        report.add_result(PhaseResult::pass(
            Phase::CheckAddresses,
            format!("+{} points", self.scoring.contract_points),
            started.elapsed(),
        ));

        // CHECK_REGISTRATION
        let started = Instant::now();
        let mut checks = Vec::with_capacity(self.tokens.len());
        for token in &self.tokens {
            let check = self.backend.registration(*token).await;
            info!(
                token = %token,
                approved = check.source_approved,
                created = check.destination_created,
                "Registration check"
            );
            checks.push(check);
        }

        let earned = registration_points(self.scoring.registration_points, &checks);
        report.floor += earned;

        let incomplete = checks.iter().filter(|c| !c.is_complete()).count();
        if incomplete > 0 {
            report.add_result(PhaseResult::fail(
                Phase::CheckRegistration,
                format!("{} of {} tokens not fully registered (+{:.2} points)", incomplete, checks.len(), earned),
                started.elapsed(),
            ));
            let floor = report.floor;
            return finish(report, floor);
        }
        report.add_result(PhaseResult::pass(
            Phase::CheckRegistration,
            format!("{} tokens registered (+{:.2} points)", checks.len(), earned),
            started.elapsed(),
        ));

        // SUBMIT_DEPOSITS
        let deposits = self.deposit_requests();
        let started = Instant::now();
        let sent = self.submit_all(&deposits).await;
        report.add_result(PhaseResult::pass(
            Phase::SubmitDeposits,
            format!("{} of {} submitted", sent, deposits.len()),
            started.elapsed(),
        ));

        // STUDENT_SCAN(source)
        if let Err(phase_failed) = self.student_scan(&mut report, ChainRole::Source).await {
            let floor = report.floor;
            info!(phase = %phase_failed, "Stopping at registration floor");
            return finish(report, floor);
        }

        // SCAN_WRAP_EVENTS
        let wraps = self.scan_events(&mut report, EventKind::Wrap).await;

        // SUBMIT_WITHDRAWALS
        let withdrawals: Vec<_> = deposits.iter().map(withdrawal_for).collect();
        let started = Instant::now();
        let sent = self.submit_all(&withdrawals).await;
        report.add_result(PhaseResult::pass(
            Phase::SubmitWithdrawals,
            format!("{} of {} submitted", sent, withdrawals.len()),
            started.elapsed(),
        ));

        // STUDENT_SCAN(destination)
        if let Err(phase_failed) = self.student_scan(&mut report, ChainRole::Destination).await {
            let floor = report.floor;
            info!(phase = %phase_failed, "Stopping at registration floor");
            return finish(report, floor);
        }

        // SCAN_WITHDRAWAL_EVENTS
        let releases = self.scan_events(&mut report, EventKind::Withdrawal).await;

        // RECONCILE
        let started = Instant::now();
        let expected: Vec<ExpectedTransfer> = deposits
            .iter()
            .chain(withdrawals.iter())
            .map(TransferRequest::expected)
            .collect();
        let observed: Vec<ObservedEvent> = wraps.into_iter().chain(releases).collect();

        let matches = reconcile(&expected, &observed);
        log_mismatches(&expected, &observed, &matches);

        let score = final_score(matches.matched_count(), deposits.len(), report.floor);
        report.add_result(PhaseResult::pass(
            Phase::Reconcile,
            format!("{} of {} transfers matched", matches.matched_count(), expected.len()),
            started.elapsed(),
        ));
        report.matches = Some(matches);

        finish(report, score)
    }

    /// One deposit per token; the n-th token moves `n * deposit_amount`
    fn deposit_requests(&self) -> Vec<TransferRequest> {
        let sender = self.backend.sender();
        let receiver = self.backend.receiver();

        self.tokens
            .iter()
            .enumerate()
            .map(|(i, token)| {
                let amount = self.scoring.deposit_amount * U256::from(i as u64 + 1);
                TransferRequest::deposit(*token, sender, receiver, amount)
            })
            .collect()
    }

    /// Provision and submit each request once; returns how many were accepted
    async fn submit_all(&self, requests: &[TransferRequest]) -> usize {
        let mut sent = 0;
        for request in requests {
            if let Err(e) = self.backend.provision(request).await {
                warn!(direction = %request.direction, token = %request.token, error = %e, "Provisioning failed");
            }

            match self.backend.submit(request).await {
                Ok(_) => sent += 1,
                Err(e) => warn!(
                    direction = %request.direction,
                    token = %request.token,
                    amount = %request.amount,
                    error = %e,
                    "Transfer not submitted"
                ),
            }
        }
        sent
    }

    async fn student_scan(&self, report: &mut GradeReport, role: ChainRole) -> Result<(), Phase> {
        let phase = match role {
            ChainRole::Source => Phase::StudentScanSource,
            ChainRole::Destination => Phase::StudentScanDestination,
        };

        let started = Instant::now();
        match self.student.scan_blocks(role).await {
            Ok(()) => {
                report.add_result(PhaseResult::pass(phase, "completed", started.elapsed()));
                Ok(())
            }
            Err(e) => {
                error!(chain = %role, error = %e, "Student scan failed");
                report.add_result(PhaseResult::fail(phase, e.to_string(), started.elapsed()));
                Err(phase)
            }
        }
    }

    async fn scan_events(&self, report: &mut GradeReport, kind: EventKind) -> Vec<ObservedEvent> {
        let phase = match kind {
            EventKind::Wrap => Phase::ScanWrapEvents,
            EventKind::Withdrawal => Phase::ScanWithdrawalEvents,
        };

        let started = Instant::now();
        let events = scan_with_retry(&self.scan, kind, || self.backend.scan_recent(kind)).await;
        report.add_result(PhaseResult::pass(
            phase,
            format!("{} events", events.len()),
            started.elapsed(),
        ));
        events
    }
}

/// The unwrap that sends a deposit back to its original sender
fn withdrawal_for(deposit: &TransferRequest) -> TransferRequest {
    TransferRequest::withdrawal(deposit.token, deposit.receiver, deposit.sender, deposit.amount)
}

fn finish(mut report: GradeReport, score: f64) -> GradeReport {
    report.score = score;
    info!(score = score, floor = report.floor, "Grading finished");
    report
}

// --- Live chains ---

/// Everything a run against real chains needs, built once
#[derive(Debug, Clone)]
pub struct GradingContext {
    pub config: GraderConfig,
    pub source: ChainHandle,
    pub destination: ChainHandle,
    pub accounts: TestAccounts,
}

impl GradingContext {
    /// Connect both chains and load the test accounts
    pub async fn connect(config: GraderConfig) -> Result<Self> {
        let source = ChainHandle::connect(&config.source).await?;
        let destination = ChainHandle::connect(&config.destination).await?;
        let accounts = TestAccounts::load(&KeyStore::new(&config.files.key_file))?;

        info!(
            minter = %accounts.minter.address(),
            sender = %accounts.sender.address(),
            receiver = %accounts.receiver.address(),
            "Loaded test accounts"
        );

        Ok(Self {
            config,
            source,
            destination,
            accounts,
        })
    }

    pub fn chain(&self, role: ChainRole) -> &ChainHandle {
        match role {
            ChainRole::Source => &self.source,
            ChainRole::Destination => &self.destination,
        }
    }

    pub fn submit_options(&self) -> SubmitOptions {
        SubmitOptions::from_config(&self.config.submit)
    }
}

#[derive(Debug, Clone)]
struct BoundContracts {
    source: ContractHandle,
    destination: ContractHandle,
}

/// [`BridgeBackend`] over live RPC connections
#[derive(Debug)]
pub struct LiveBackend {
    ctx: GradingContext,
    contracts: Option<BoundContracts>,
}

impl LiveBackend {
    pub fn new(ctx: GradingContext) -> Self {
        Self { ctx, contracts: None }
    }

    fn contracts(&self) -> Result<&BoundContracts> {
        self.contracts
            .as_ref()
            .ok_or_else(|| eyre!("Bridge contracts are not bound"))
    }
}

#[async_trait]
impl BridgeBackend for LiveBackend {
    async fn bind_contracts(
        &mut self,
        source: ContractInfo,
        destination: ContractInfo,
    ) -> Result<(), GraderError> {
        for (chain, address) in [(&self.ctx.source, source.address), (&self.ctx.destination, destination.address)] {
            let code = chain
                .provider()
                .get_code_at(address)
                .await
                .map_err(|e| GraderError::chain(chain.name(), e.to_string()))?;
            if code.is_empty() {
                return Err(GraderError::chain(
                    chain.name(),
                    format!("no contract deployed at {}", address),
                ));
            }
        }

        self.contracts = Some(BoundContracts {
            source: ContractHandle::new(&self.ctx.source, source),
            destination: ContractHandle::new(&self.ctx.destination, destination),
        });
        Ok(())
    }

    async fn registration(&self, token: Address) -> RegistrationCheck {
        let mut check = RegistrationCheck {
            token,
            source_approved: false,
            destination_created: false,
        };
        let Ok(contracts) = self.contracts() else {
            return check;
        };

        match contracts
            .source
            .call_bool(&self.ctx.source, SOURCE_APPROVED_FN, &[("token", DynSolValue::Address(token))])
            .await
        {
            Ok(approved) => check.source_approved = approved,
            Err(e) => warn!(token = %token, error = %e, "Could not read source approval"),
        }

        match contracts
            .destination
            .call_address(
                &self.ctx.destination,
                DESTINATION_WRAPPED_FN,
                &[("underlying", DynSolValue::Address(token))],
            )
            .await
        {
            Ok(wrapped) => check.destination_created = wrapped != Address::ZERO,
            Err(e) => warn!(token = %token, error = %e, "Could not read wrapped token"),
        }

        check
    }

    fn sender(&self) -> Address {
        self.ctx.accounts.sender.address()
    }

    fn receiver(&self) -> Address {
        self.ctx.accounts.receiver.address()
    }

    async fn provision(&self, request: &TransferRequest) -> Result<()> {
        let opts = self.ctx.submit_options();
        let minimum_native = self.ctx.config.submit.min_native_balance;
        let minter = &self.ctx.accounts.minter;

        match request.direction {
            Direction::Deposit => {
                let chain = &self.ctx.source;
                let funder = ChainSubmitter::new(chain, minter);
                ensure_native_balance(chain, &funder, request.sender, minimum_native, &opts).await?;
                ensure_token_balance(chain, request.token, &funder, request.sender, request.amount, &opts).await?;
            }
            Direction::Withdrawal => {
                let chain = &self.ctx.destination;
                let funder = ChainSubmitter::new(chain, minter);
                ensure_native_balance(chain, &funder, request.sender, minimum_native, &opts).await?;
            }
        }
        Ok(())
    }

    async fn submit(&self, request: &TransferRequest) -> Result<B256, TransferError> {
        let contracts = self.contracts().map_err(|_| TransferError::NotBound)?;
        let opts = self.ctx.submit_options();

        match request.direction {
            Direction::Deposit => {
                let sender = ChainSubmitter::new(&self.ctx.source, &self.ctx.accounts.sender);
                submit_deposit(&sender, &contracts.source, request, &opts).await
            }
            Direction::Withdrawal => {
                submit_withdrawal(
                    &self.ctx.destination,
                    &contracts.destination,
                    &self.ctx.accounts.receiver,
                    request,
                    &opts,
                )
                .await
            }
        }
    }

    async fn scan_recent(&self, kind: EventKind) -> Result<Vec<ObservedEvent>> {
        let contracts = self.contracts()?;
        let window = self.ctx.config.scan.window;
        match kind {
            EventKind::Wrap => scan_recent(&self.ctx.destination, &contracts.destination, kind, window).await,
            EventKind::Withdrawal => scan_recent(&self.ctx.source, &contracts.source, kind, window).await,
        }
    }
}

/// Grade the submission in `student_dir` against live chains
///
/// Connection and key errors are returned; everything after that is
/// reflected in the report's score.
pub async fn grade(config: GraderConfig, student_dir: &Path) -> Result<GradeReport> {
    let name = student_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| student_dir.display().to_string());

    let token_path = FileConfig::resolve(student_dir, &config.files.token_list);
    let tokens = load_token_list(&token_path)
        .wrap_err_with(|| format!("Cannot grade {}", name))?;
    let tokens = tokens_on_chain(&tokens, &config.source.name);

    let student = ProcessBridge::new(student_dir, &config.files, &config.student);
    let scoring = config.scoring.clone();
    let scan = config.scan.clone();

    let ctx = GradingContext::connect(config).await?;
    let mut grader = Grader::new(LiveBackend::new(ctx), student, tokens, scoring, scan);

    Ok(grader.run(&name).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::json_abi::JsonAbi;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    const TOKEN: Address = Address::new([0x10; 20]);
    const SENDER: Address = Address::new([0x51; 20]);
    const RECEIVER: Address = Address::new([0x52; 20]);

    #[derive(Default)]
    struct FakeBackend {
        calls: Mutex<Vec<String>>,
        unregistered: HashMap<Address, (bool, bool)>,
        scans: Mutex<HashMap<EventKind, VecDeque<Vec<ObservedEvent>>>>,
        submitted: Mutex<Vec<TransferRequest>>,
    }

    impl FakeBackend {
        fn with_scans(kind: EventKind, responses: Vec<Vec<ObservedEvent>>) -> Self {
            let backend = Self::default();
            backend.add_scans(kind, responses);
            backend
        }

        fn add_scans(&self, kind: EventKind, responses: Vec<Vec<ObservedEvent>>) {
            self.scans.lock().unwrap().insert(kind, responses.into());
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn count(&self, prefix: &str) -> usize {
            self.calls().iter().filter(|c| c.starts_with(prefix)).count()
        }
    }

    #[async_trait]
    impl BridgeBackend for FakeBackend {
        async fn bind_contracts(&mut self, _: ContractInfo, _: ContractInfo) -> Result<(), GraderError> {
            self.record("bind");
            Ok(())
        }

        async fn registration(&self, token: Address) -> RegistrationCheck {
            self.record("registration");
            let (source_approved, destination_created) =
                self.unregistered.get(&token).copied().unwrap_or((true, true));
            RegistrationCheck {
                token,
                source_approved,
                destination_created,
            }
        }

        fn sender(&self) -> Address {
            SENDER
        }

        fn receiver(&self) -> Address {
            RECEIVER
        }

        async fn provision(&self, request: &TransferRequest) -> Result<()> {
            self.record(format!("provision:{}", request.direction));
            Ok(())
        }

        async fn submit(&self, request: &TransferRequest) -> Result<B256, TransferError> {
            self.record(format!("submit:{}", request.direction));
            self.submitted.lock().unwrap().push(request.clone());
            Ok(B256::repeat_byte(1))
        }

        async fn scan_recent(&self, kind: EventKind) -> Result<Vec<ObservedEvent>> {
            self.record(format!("scan:{}", kind));
            Ok(self
                .scans
                .lock()
                .unwrap()
                .get_mut(&kind)
                .and_then(VecDeque::pop_front)
                .unwrap_or_default())
        }
    }

    struct FakeStudent {
        info_fails: bool,
        source_address: Address,
        scan_fails: Option<ChainRole>,
        scans: Mutex<Vec<ChainRole>>,
    }

    impl Default for FakeStudent {
        fn default() -> Self {
            Self {
                info_fails: false,
                source_address: Address::repeat_byte(0xa1),
                scan_fails: None,
                scans: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl StudentBridge for FakeStudent {
        async fn contract_info(&self, role: ChainRole) -> Result<ContractInfo, GraderError> {
            if self.info_fails {
                return Err(GraderError::student("contract_info(source)", "boom"));
            }
            let address = match role {
                ChainRole::Source => self.source_address,
                ChainRole::Destination => Address::repeat_byte(0xa2),
            };
            Ok(ContractInfo {
                address,
                abi: JsonAbi::default(),
            })
        }

        async fn scan_blocks(&self, role: ChainRole) -> Result<(), GraderError> {
            self.scans.lock().unwrap().push(role);
            if self.scan_fails == Some(role) {
                return Err(GraderError::student("scan_blocks", "exit status 1"));
            }
            Ok(())
        }
    }

    fn event(kind: EventKind, token: Address, recipient: Address, amount: u64) -> ObservedEvent {
        ObservedEvent {
            kind,
            block_number: 100,
            token,
            wrapped_token: None,
            recipient,
            amount: U256::from(amount),
            tx_hash: "0xabc".to_string(),
            contract: Address::repeat_byte(0xa2),
        }
    }

    fn grader(backend: FakeBackend, student: FakeStudent, tokens: Vec<Address>) -> Grader<FakeBackend, FakeStudent> {
        Grader::new(backend, student, tokens, ScoringConfig::default(), ScanPolicy::immediate())
    }

    #[tokio::test]
    async fn test_contract_info_failure_scores_zero_without_chain_calls() {
        let student = FakeStudent {
            info_fails: true,
            ..Default::default()
        };
        let mut grader = grader(FakeBackend::default(), student, vec![TOKEN]);
        let report = grader.run("alice").await;

        assert_eq!(report.score, 0.0);
        assert_eq!(report.failed_phase(), Some(Phase::LocateContracts));
        assert!(grader.backend().calls().is_empty());
    }

    #[tokio::test]
    async fn test_placeholder_address_scores_zero() {
        let student = FakeStudent {
            source_address: Address::ZERO,
            ..Default::default()
        };
        let mut grader = grader(FakeBackend::default(), student, vec![TOKEN]);
        let report = grader.run("alice").await;

        assert_eq!(report.score, 0.0);
        assert_eq!(report.failed_phase(), Some(Phase::CheckAddresses));
        assert!(grader.backend().calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_token_list_scores_zero() {
        let mut grader = grader(FakeBackend::default(), FakeStudent::default(), vec![]);
        let report = grader.run("alice").await;

        assert_eq!(report.score, 0.0);
        assert_eq!(report.failed_phase(), Some(Phase::LocateContracts));
    }

    #[tokio::test]
    async fn test_incomplete_registration_returns_floor_without_deposits() {
        let other = Address::repeat_byte(0x11);
        let mut backend = FakeBackend::default();
        backend.unregistered.insert(TOKEN, (false, true));

        let mut grader = grader(backend, FakeStudent::default(), vec![TOKEN, other]);
        let report = grader.run("alice").await;

        // 20 points over 4 checks, one failed: 15 + 10 contract points
        assert_eq!(report.score, 25.0);
        assert_eq!(report.floor, 25.0);
        assert_eq!(report.failed_phase(), Some(Phase::CheckRegistration));
        assert_eq!(grader.backend().count("submit"), 0);
        assert_eq!(grader.backend().count("provision"), 0);
    }

    #[tokio::test]
    async fn test_matching_deposit_scores_one_transfer() {
        let backend = FakeBackend::with_scans(
            EventKind::Wrap,
            vec![vec![event(EventKind::Wrap, TOKEN, RECEIVER, 500)]],
        );
        let mut grader = grader(backend, FakeStudent::default(), vec![TOKEN]);
        let report = grader.run("alice").await;

        let matches = report.matches.as_ref().unwrap();
        assert_eq!(matches.matched_count(), 1);
        assert_eq!(matches.unmatched, vec![1]);
        // one of two possible matches for a single request
        assert_eq!(report.score, 50.0);
        assert_eq!(report.floor, 30.0);
    }

    #[tokio::test]
    async fn test_full_round_trip_scores_hundred() {
        let backend = FakeBackend::with_scans(
            EventKind::Wrap,
            vec![vec![event(EventKind::Wrap, TOKEN, RECEIVER, 500)]],
        );
        backend.add_scans(
            EventKind::Withdrawal,
            vec![vec![event(EventKind::Withdrawal, TOKEN, SENDER, 500)]],
        );
        let mut grader = grader(backend, FakeStudent::default(), vec![TOKEN]);
        let report = grader.run("alice").await;

        assert_eq!(report.score, 100.0);
        assert_eq!(report.failed_phase(), None);
    }

    #[tokio::test]
    async fn test_no_events_after_retry_falls_back_to_floor() {
        let mut grader = grader(FakeBackend::default(), FakeStudent::default(), vec![TOKEN]);
        let report = grader.run("alice").await;

        assert_eq!(report.matches.as_ref().unwrap().matched_count(), 0);
        assert_eq!(report.score, 30.0);
        assert_eq!(grader.backend().count("scan:Wrap"), 2);
        assert_eq!(grader.backend().count("scan:Withdrawal"), 2);
    }

    #[tokio::test]
    async fn test_retry_picks_up_late_events() {
        let backend = FakeBackend::with_scans(
            EventKind::Wrap,
            vec![vec![], vec![event(EventKind::Wrap, TOKEN, RECEIVER, 500)]],
        );
        let mut grader = grader(backend, FakeStudent::default(), vec![TOKEN]);
        let report = grader.run("alice").await;

        assert_eq!(report.matches.as_ref().unwrap().matched_count(), 1);
        assert_eq!(grader.backend().count("scan:Wrap"), 2);
    }

    #[tokio::test]
    async fn test_duplicate_events_credit_once() {
        let backend = FakeBackend::with_scans(
            EventKind::Wrap,
            vec![vec![
                event(EventKind::Wrap, TOKEN, RECEIVER, 500),
                event(EventKind::Wrap, TOKEN, RECEIVER, 500),
            ]],
        );
        let mut grader = grader(backend, FakeStudent::default(), vec![TOKEN]);
        let report = grader.run("alice").await;

        assert_eq!(report.matches.as_ref().unwrap().matched_count(), 1);
        assert_eq!(report.score, 50.0);
    }

    #[tokio::test]
    async fn test_amounts_scale_with_token_position() {
        let second = Address::repeat_byte(0x20);
        let mut grader = grader(FakeBackend::default(), FakeStudent::default(), vec![TOKEN, second]);
        grader.run("alice").await;

        let submitted = grader.backend().submitted.lock().unwrap().clone();
        assert_eq!(submitted.len(), 4);
        assert_eq!(submitted[0], TransferRequest::deposit(TOKEN, SENDER, RECEIVER, U256::from(500u64)));
        assert_eq!(submitted[1], TransferRequest::deposit(second, SENDER, RECEIVER, U256::from(1000u64)));
        assert_eq!(submitted[2], TransferRequest::withdrawal(TOKEN, RECEIVER, SENDER, U256::from(500u64)));
        assert_eq!(submitted[3].direction, Direction::Withdrawal);
    }

    #[tokio::test]
    async fn test_source_scan_failure_stops_at_floor() {
        let student = FakeStudent {
            scan_fails: Some(ChainRole::Source),
            ..Default::default()
        };
        let backend = FakeBackend::with_scans(
            EventKind::Wrap,
            vec![vec![event(EventKind::Wrap, TOKEN, RECEIVER, 500)]],
        );
        let mut grader = grader(backend, student, vec![TOKEN]);
        let report = grader.run("alice").await;

        assert_eq!(report.score, 30.0);
        assert_eq!(report.failed_phase(), Some(Phase::StudentScanSource));
        assert_eq!(grader.backend().count("submit:withdrawal"), 0);
        assert_eq!(grader.backend().count("scan"), 0);
    }

    #[tokio::test]
    async fn test_destination_scan_failure_stops_at_floor() {
        let student = FakeStudent {
            scan_fails: Some(ChainRole::Destination),
            ..Default::default()
        };
        let mut grader = grader(FakeBackend::default(), student, vec![TOKEN]);
        let report = grader.run("alice").await;

        assert_eq!(report.score, 30.0);
        assert_eq!(report.failed_phase(), Some(Phase::StudentScanDestination));
        assert_eq!(grader.backend().count("submit:withdrawal"), 1);
        assert_eq!(grader.backend().count("scan:Withdrawal"), 0);
    }
}
