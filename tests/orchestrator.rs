use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use oxidity_migrator::domain::error::{AppError, MigrationError};
use oxidity_migrator::domain::flow::Flow;
use oxidity_migrator::domain::instruction::{ProtocolContext, ProtocolFamily, ProtocolId};
use oxidity_migrator::services::execution::orchestrator::{
    AttemptState, Orchestrator, RevocationOutcome,
};
use oxidity_migrator::services::execution::substrate::{
    DryRunOutcome, ExecutionMode, ExecutionSubstrate, SubmissionOutcome,
};
use oxidity_migrator::services::flow::builder::{
    CollateralLeg, FinancingHint, MigrationRequest, ProtocolEndpoint, build_migration_flow,
};
use oxidity_migrator::services::flow::financing::{
    FinancingPlan, FinancingProviderKind, FinancingProviders, ProviderTerms, wrap_with_financing,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
enum Scripted {
    Ok(SubmissionOutcome),
    Err(String),
}

struct FakeSubstrate {
    dry_run: Option<DryRunOutcome>,
    batched: Scripted,
    sequential: Scripted,
    revoke_error: Option<String>,
    calls: Mutex<Vec<String>>,
}

impl FakeSubstrate {
    fn new(batched: Scripted, sequential: Scripted) -> Self {
        Self {
            dry_run: Some(DryRunOutcome::passed(420_000)),
            batched,
            sequential,
            revoke_error: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl ExecutionSubstrate for FakeSubstrate {
    async fn dry_run(&self, _flow: &Flow, _plan: &FinancingPlan) -> Result<DryRunOutcome, AppError> {
        self.record("dry_run");
        match &self.dry_run {
            Some(outcome) => Ok(outcome.clone()),
            // Hang until the caller gives up.
            None => std::future::pending().await,
        }
    }

    async fn execute(
        &self,
        _flow: &Flow,
        _plan: &FinancingPlan,
        mode: ExecutionMode,
    ) -> Result<SubmissionOutcome, AppError> {
        self.record(format!("execute:{mode}"));
        let scripted = match mode {
            ExecutionMode::Batched => self.batched.clone(),
            ExecutionMode::Sequential => self.sequential.clone(),
        };
        match scripted {
            Scripted::Ok(outcome) => Ok(outcome),
            Scripted::Err(msg) => Err(AppError::Connection(msg)),
        }
    }

    async fn revoke(&self, _flow: &Flow) -> Result<(), AppError> {
        self.record("revoke");
        match &self.revoke_error {
            Some(msg) => Err(AppError::Connection(msg.clone())),
            None => Ok(()),
        }
    }
}

const USER: Address = Address::new([0x01; 20]);
const ROUTER: Address = Address::new([0x5E; 20]);
const USDC: Address = Address::new([0xC0; 20]);
const WETH: Address = Address::new([0xE1; 20]);

fn flow_and_plan() -> (Flow, FinancingPlan) {
    let endpoint = |name: &str| ProtocolEndpoint {
        id: ProtocolId::new(ProtocolFamily::SharedPool, name),
        context: ProtocolContext::SharedPool,
    };
    let request = MigrationRequest {
        user: USER,
        source: endpoint("aave-v3"),
        destination: endpoint("spark"),
        debt_token: USDC,
        debt_amount: U256::from(1_000u64),
        repay_all: false,
        legs: vec![CollateralLeg {
            token: WETH,
            amount: U256::from(5u64),
            withdraw_max: false,
        }],
        financing: FinancingHint {
            provider: FinancingProviderKind::BalancerV2,
            premium_bps: 0,
            buffer_bps: 30,
        },
        settlement: ROUTER,
        allocation: None,
    };
    let flow = build_migration_flow(&request).expect("flow");
    let providers = FinancingProviders::new(HashMap::from([(
        FinancingProviderKind::BalancerV2,
        ProviderTerms {
            premium_bps: 0,
            all_tokens: true,
            tokens: vec![],
        },
    )]));
    let plan = wrap_with_financing(
        &flow,
        request.requested_amount(),
        FinancingProviderKind::BalancerV2,
        0,
        30,
        &providers,
    )
    .expect("plan");
    (flow, plan)
}

fn rejected(reason: &str) -> Scripted {
    Scripted::Ok(SubmissionOutcome::Rejected(reason.into()))
}

#[tokio::test]
async fn simulation_revert_fails_without_executing() {
    let mut fake = FakeSubstrate::new(
        Scripted::Ok(SubmissionOutcome::BatchedSuccess),
        Scripted::Ok(SubmissionOutcome::SequentialSuccess),
    );
    fake.dry_run = Some(DryRunOutcome::reverted("InsufficientRepayment"));
    let fake = Arc::new(fake);
    let orchestrator = Orchestrator::new(fake.clone(), ExecutionMode::Batched, true);
    let (flow, plan) = flow_and_plan();

    let report = orchestrator
        .run(&flow, &plan, &CancellationToken::new())
        .await;

    assert_eq!(report.state, AttemptState::Failed);
    assert_eq!(
        report.transitions,
        vec![AttemptState::Idle, AttemptState::Simulating, AttemptState::Failed]
    );
    assert!(!report.transitions.contains(&AttemptState::Executing));
    assert_eq!(
        report.error,
        Some(MigrationError::Simulation {
            reason: "InsufficientRepayment".into()
        })
    );
    assert_eq!(fake.calls(), vec!["dry_run"]);
}

#[tokio::test]
async fn rejected_batch_falls_back_to_sequential_once() {
    let fake = Arc::new(FakeSubstrate::new(
        rejected("wallet_sendCalls unsupported"),
        Scripted::Ok(SubmissionOutcome::SequentialSuccess),
    ));
    let orchestrator = Orchestrator::new(fake.clone(), ExecutionMode::Batched, false);
    let (flow, plan) = flow_and_plan();

    let report = orchestrator
        .run(&flow, &plan, &CancellationToken::new())
        .await;

    assert!(report.succeeded());
    assert!(!report.batching_used);
    assert_eq!(report.mode_used, Some(ExecutionMode::Sequential));
    assert_eq!(
        report.transitions,
        vec![
            AttemptState::Idle,
            AttemptState::Simulating,
            AttemptState::SimulationPassed,
            AttemptState::Executing,
            AttemptState::RetryingSequential,
            AttemptState::Succeeded,
        ]
    );
    assert_eq!(
        fake.calls(),
        vec!["dry_run", "execute:batched", "execute:sequential"]
    );
    assert_eq!(report.revocation, RevocationOutcome::NotRequested);
}

#[tokio::test]
async fn batched_success_records_batching() {
    let fake = Arc::new(FakeSubstrate::new(
        Scripted::Ok(SubmissionOutcome::BatchedSuccess),
        rejected("unused"),
    ));
    let orchestrator = Orchestrator::new(fake.clone(), ExecutionMode::Batched, true);
    let (flow, plan) = flow_and_plan();

    let report = orchestrator
        .run(&flow, &plan, &CancellationToken::new())
        .await;

    assert!(report.succeeded());
    assert!(report.batching_used);
    assert_eq!(report.revocation, RevocationOutcome::Revoked);
    assert_eq!(fake.calls(), vec!["dry_run", "execute:batched", "revoke"]);
}

#[tokio::test]
async fn both_modes_rejected_reports_both_reasons() {
    let fake = Arc::new(FakeSubstrate::new(
        rejected("bundle refused"),
        rejected("first tx reverted"),
    ));
    let orchestrator = Orchestrator::new(fake.clone(), ExecutionMode::Batched, true);
    let (flow, plan) = flow_and_plan();

    let report = orchestrator
        .run(&flow, &plan, &CancellationToken::new())
        .await;

    assert_eq!(report.state, AttemptState::Failed);
    assert_eq!(
        report.error,
        Some(MigrationError::Execution {
            primary: "bundle refused".into(),
            fallback: Some("first tx reverted".into()),
        })
    );
    assert_eq!(report.failure.as_ref().map(|f| f.kind), Some("execution_failed"));
    // no revocation after a failed attempt
    assert!(!fake.calls().contains(&"revoke".to_string()));
}

#[tokio::test]
async fn sequential_preference_never_retries() {
    let fake = Arc::new(FakeSubstrate::new(
        Scripted::Ok(SubmissionOutcome::BatchedSuccess),
        rejected("nonce too low"),
    ));
    let orchestrator = Orchestrator::new(fake.clone(), ExecutionMode::Sequential, false);
    let (flow, plan) = flow_and_plan();

    let report = orchestrator
        .run(&flow, &plan, &CancellationToken::new())
        .await;

    assert_eq!(report.state, AttemptState::Failed);
    assert!(!report.transitions.contains(&AttemptState::RetryingSequential));
    assert_eq!(fake.calls(), vec!["dry_run", "execute:sequential"]);
}

#[tokio::test]
async fn transport_error_after_dispatch_is_not_retried() {
    let fake = Arc::new(FakeSubstrate::new(
        Scripted::Err("connection reset".into()),
        Scripted::Ok(SubmissionOutcome::SequentialSuccess),
    ));
    let orchestrator = Orchestrator::new(fake.clone(), ExecutionMode::Batched, false);
    let (flow, plan) = flow_and_plan();

    let report = orchestrator
        .run(&flow, &plan, &CancellationToken::new())
        .await;

    assert_eq!(report.state, AttemptState::Failed);
    assert_eq!(fake.calls(), vec!["dry_run", "execute:batched"]);
    assert!(matches!(
        report.error,
        Some(MigrationError::Execution { fallback: None, .. })
    ));
}

#[tokio::test]
async fn cancelled_before_start_touches_nothing() {
    let fake = Arc::new(FakeSubstrate::new(
        Scripted::Ok(SubmissionOutcome::BatchedSuccess),
        Scripted::Ok(SubmissionOutcome::SequentialSuccess),
    ));
    let orchestrator = Orchestrator::new(fake.clone(), ExecutionMode::Batched, false);
    let (flow, plan) = flow_and_plan();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = orchestrator.run(&flow, &plan, &cancel).await;

    assert_eq!(report.error, Some(MigrationError::Cancelled));
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn cancellation_interrupts_a_hanging_simulation() {
    let mut fake = FakeSubstrate::new(
        Scripted::Ok(SubmissionOutcome::BatchedSuccess),
        Scripted::Ok(SubmissionOutcome::SequentialSuccess),
    );
    fake.dry_run = None;
    let fake = Arc::new(fake);
    let orchestrator = Orchestrator::new(fake.clone(), ExecutionMode::Batched, false);
    let (flow, plan) = flow_and_plan();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let report = tokio::time::timeout(Duration::from_secs(5), orchestrator.run(&flow, &plan, &cancel))
        .await
        .expect("cancellation should end the attempt");

    assert_eq!(report.state, AttemptState::Failed);
    assert_eq!(report.error, Some(MigrationError::Cancelled));
    assert!(!report.transitions.contains(&AttemptState::Executing));
    assert_eq!(fake.calls(), vec!["dry_run"]);
}

#[tokio::test]
async fn revocation_failure_keeps_success() {
    let mut fake = FakeSubstrate::new(
        Scripted::Ok(SubmissionOutcome::BatchedSuccess),
        Scripted::Ok(SubmissionOutcome::SequentialSuccess),
    );
    fake.revoke_error = Some("gas spike".into());
    let fake = Arc::new(fake);
    let orchestrator = Orchestrator::new(fake.clone(), ExecutionMode::Batched, true);
    let (flow, plan) = flow_and_plan();

    let report = orchestrator
        .run(&flow, &plan, &CancellationToken::new())
        .await;

    assert!(report.succeeded());
    assert!(report.error.is_none());
    assert!(matches!(report.revocation, RevocationOutcome::Failed(ref msg) if msg.contains("gas spike")));
}
