// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::domain::error::AppError;
use crate::domain::flow::Flow;
use crate::services::flow::financing::FinancingPlan;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Every call in one atomic bundle.
    Batched,
    /// One call at a time; always available.
    Sequential,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Batched => f.write_str("batched"),
            ExecutionMode::Sequential => f.write_str("sequential"),
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowercase = s.trim().to_lowercase();
        match lowercase.as_str() {
            "batched" | "batch" | "bundle" | "atomic" => Ok(ExecutionMode::Batched),
            "sequential" | "seq" | "single" => Ok(ExecutionMode::Sequential),
            other => Err(format!("unknown execution mode '{other}'")),
        }
    }
}

/// Result of a state-free dry run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DryRunOutcome {
    pub success: bool,
    pub gas_used: u64,
    pub reason: Option<String>,
}

impl DryRunOutcome {
    pub fn passed(gas_used: u64) -> Self {
        Self {
            success: true,
            gas_used,
            reason: None,
        }
    }

    pub fn reverted(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            gas_used: 0,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum SubmissionOutcome {
    BatchedSuccess,
    SequentialSuccess,
    Rejected(String),
}

/// The ledger that runs a flow and settles its transient loan.
///
/// `dry_run` must have the same semantics as `execute` without mutating state.
#[async_trait]
pub trait ExecutionSubstrate: Send + Sync {
    async fn dry_run(&self, flow: &Flow, plan: &FinancingPlan) -> Result<DryRunOutcome, AppError>;

    async fn execute(
        &self,
        flow: &Flow,
        plan: &FinancingPlan,
        mode: ExecutionMode,
    ) -> Result<SubmissionOutcome, AppError>;

    /// Withdraw the standing authorizations the flow needed.
    async fn revoke(&self, flow: &Flow) -> Result<(), AppError>;
}
