// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::domain::error::{ErrorReport, MigrationError};
use crate::domain::flow::Flow;
use crate::services::execution::substrate::{
    ExecutionMode, ExecutionSubstrate, SubmissionOutcome,
};
use crate::services::flow::financing::FinancingPlan;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    Idle,
    Simulating,
    SimulationPassed,
    Executing,
    RetryingSequential,
    Succeeded,
    Failed,
}

impl AttemptState {
    pub fn is_terminal(self) -> bool {
        matches!(self, AttemptState::Succeeded | AttemptState::Failed)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum RevocationOutcome {
    NotRequested,
    Revoked,
    Failed(String),
}

/// Everything the caller needs to display or record one attempt.
#[derive(Clone, Debug, Serialize)]
pub struct AttemptReport {
    pub state: AttemptState,
    pub transitions: Vec<AttemptState>,
    pub batching_used: bool,
    pub mode_used: Option<ExecutionMode>,
    pub revocation: RevocationOutcome,
    pub failure: Option<ErrorReport>,
    #[serde(skip)]
    pub error: Option<MigrationError>,
}

impl AttemptReport {
    fn new() -> Self {
        Self {
            state: AttemptState::Idle,
            transitions: vec![AttemptState::Idle],
            batching_used: false,
            mode_used: None,
            revocation: RevocationOutcome::NotRequested,
            failure: None,
            error: None,
        }
    }

    fn enter(&mut self, state: AttemptState) {
        tracing::debug!(target: "orchestrator", from = ?self.state, to = ?state, "Attempt transition");
        self.state = state;
        self.transitions.push(state);
    }

    fn fail(mut self, error: MigrationError) -> Self {
        tracing::warn!(
            target: "orchestrator",
            kind = error.kind(),
            error = %error,
            "Migration attempt failed"
        );
        self.enter(AttemptState::Failed);
        self.failure = Some(error.report());
        self.error = Some(error);
        self
    }

    pub fn succeeded(&self) -> bool {
        self.state == AttemptState::Succeeded
    }
}

/// Drives simulate-then-execute for a single frozen flow.
///
/// The batched to sequential fallback is the only retry; nothing else is
/// replayed because lending calls are not safe to resend.
#[derive(Clone)]
pub struct Orchestrator {
    substrate: Arc<dyn ExecutionSubstrate>,
    preferred: ExecutionMode,
    revoke_after_success: bool,
}

impl Orchestrator {
    pub fn new(
        substrate: Arc<dyn ExecutionSubstrate>,
        preferred: ExecutionMode,
        revoke_after_success: bool,
    ) -> Self {
        Self {
            substrate,
            preferred,
            revoke_after_success,
        }
    }

    pub async fn run(
        &self,
        flow: &Flow,
        plan: &FinancingPlan,
        cancel: &CancellationToken,
    ) -> AttemptReport {
        let mut report = AttemptReport::new();
        if cancel.is_cancelled() {
            return report.fail(MigrationError::Cancelled);
        }

        report.enter(AttemptState::Simulating);
        let dry_run = tokio::select! {
            _ = cancel.cancelled() => return report.fail(MigrationError::Cancelled),
            outcome = self.substrate.dry_run(flow, plan) => outcome,
        };
        match dry_run {
            Ok(outcome) if outcome.success => {
                tracing::info!(
                    target: "orchestrator",
                    gas_used = outcome.gas_used,
                    instructions = flow.len(),
                    "Simulation passed"
                );
            }
            Ok(outcome) => {
                let reason = outcome
                    .reason
                    .unwrap_or_else(|| "reverted without reason".to_string());
                return report.fail(MigrationError::Simulation { reason });
            }
            Err(err) => {
                return report.fail(MigrationError::Simulation {
                    reason: err.to_string(),
                });
            }
        }
        report.enter(AttemptState::SimulationPassed);

        if cancel.is_cancelled() {
            return report.fail(MigrationError::Cancelled);
        }

        report.enter(AttemptState::Executing);
        let primary = match self.substrate.execute(flow, plan, self.preferred).await {
            Ok(SubmissionOutcome::Rejected(reason)) => reason,
            Ok(outcome) => return self.finish(report, flow, outcome).await,
            // Outcome unknown after dispatch; resending could double-apply.
            Err(err) => {
                return report.fail(MigrationError::Execution {
                    primary: err.to_string(),
                    fallback: None,
                });
            }
        };

        if self.preferred == ExecutionMode::Sequential {
            return report.fail(MigrationError::Execution {
                primary,
                fallback: None,
            });
        }

        tracing::warn!(
            target: "orchestrator",
            reason = %primary,
            "Batched execution refused; retrying sequentially"
        );
        report.enter(AttemptState::RetryingSequential);
        let fallback = match self
            .substrate
            .execute(flow, plan, ExecutionMode::Sequential)
            .await
        {
            Ok(SubmissionOutcome::Rejected(reason)) => reason,
            Ok(outcome) => return self.finish(report, flow, outcome).await,
            Err(err) => err.to_string(),
        };
        report.fail(MigrationError::Execution {
            primary,
            fallback: Some(fallback),
        })
    }

    async fn finish(
        &self,
        mut report: AttemptReport,
        flow: &Flow,
        outcome: SubmissionOutcome,
    ) -> AttemptReport {
        report.batching_used = outcome == SubmissionOutcome::BatchedSuccess;
        report.mode_used = Some(if report.batching_used {
            ExecutionMode::Batched
        } else {
            ExecutionMode::Sequential
        });
        report.enter(AttemptState::Succeeded);
        tracing::info!(
            target: "orchestrator",
            batching_used = report.batching_used,
            "Migration executed"
        );

        if self.revoke_after_success {
            report.revocation = match self.substrate.revoke(flow).await {
                Ok(()) => RevocationOutcome::Revoked,
                Err(err) => {
                    tracing::warn!(
                        target: "orchestrator",
                        error = %err,
                        "Post-migration revocation failed"
                    );
                    RevocationOutcome::Failed(err.to_string())
                }
            };
        }
        report
    }
}
