// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use alloy::primitives::Address;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Connection failed to endpoint: {0}")]
    Connection(String),

    #[error("Validation failed for field {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Address {0} is invalid or not checksummed")]
    InvalidAddress(String),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Unknown(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

/// Everything that can stop a migration attempt.
///
/// Construction errors are raised while resolving contexts, allocating debt or
/// assembling the flow and always block execution. `Simulation` and
/// `Execution` are terminal for the attempt that produced them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MigrationError {
    #[error("Unresolved protocol context: {0}")]
    UnresolvedContext(String),

    #[error("Isolation violation: {0}")]
    IsolationViolation(String),

    #[error("Zero allocation: {0}")]
    ZeroAllocation(String),

    #[error("Missing price data: {0}")]
    MissingPriceData(String),

    #[error("Unsupported protocol family: {0}")]
    UnsupportedFamily(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid output reference: {0}")]
    InvalidReference(String),

    #[error("Invalid financing terms: {0}")]
    InvalidFinancing(String),

    #[error("Financing provider {provider} does not support token {token}")]
    ProviderUnavailable { provider: String, token: Address },

    #[error("Resulting position unsafe: health factor {health} below minimum {minimum}")]
    UnsafePosition { health: String, minimum: String },

    #[error("Simulation reverted: {reason}")]
    Simulation { reason: String },

    #[error(
        "Execution failed: {primary}; sequential fallback: {}",
        .fallback.as_deref().unwrap_or("not attempted")
    )]
    Execution {
        primary: String,
        fallback: Option<String>,
    },

    #[error("Migration attempt cancelled before execution")]
    Cancelled,
}

impl MigrationError {
    /// Stable machine-readable label for analytics.
    pub fn kind(&self) -> &'static str {
        match self {
            MigrationError::UnresolvedContext(_) => "unresolved_context",
            MigrationError::IsolationViolation(_) => "isolation_violation",
            MigrationError::ZeroAllocation(_) => "zero_allocation",
            MigrationError::MissingPriceData(_) => "missing_price_data",
            MigrationError::UnsupportedFamily(_) => "unsupported_family",
            MigrationError::MissingField(_) => "missing_field",
            MigrationError::InvalidReference(_) => "invalid_reference",
            MigrationError::InvalidFinancing(_) => "invalid_financing",
            MigrationError::ProviderUnavailable { .. } => "provider_unavailable",
            MigrationError::UnsafePosition { .. } => "unsafe_position",
            MigrationError::Simulation { .. } => "simulation_reverted",
            MigrationError::Execution { .. } => "execution_failed",
            MigrationError::Cancelled => "cancelled",
        }
    }

    fn is_construction(&self) -> bool {
        !matches!(
            self,
            MigrationError::Simulation { .. }
                | MigrationError::Execution { .. }
                | MigrationError::Cancelled
        )
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            stage: if self.is_construction() {
                "construction"
            } else {
                "runtime"
            },
            message: self.to_string(),
        }
    }
}

/// Kind + message pair surfaced to callers and analytics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub kind: &'static str,
    /// `construction` when no chain state was touched, `runtime` otherwise.
    pub stage: &'static str,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_error_renders_both_reasons() {
        let err = MigrationError::Execution {
            primary: "wallet_sendCalls unsupported".into(),
            fallback: Some("tx 1 reverted".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("wallet_sendCalls unsupported"));
        assert!(msg.contains("tx 1 reverted"));

        let single = MigrationError::Execution {
            primary: "rejected".into(),
            fallback: None,
        };
        assert!(single.to_string().contains("not attempted"));
    }

    #[test]
    fn taxonomy_splits_construction_from_runtime() {
        assert!(MigrationError::IsolationViolation("x".into()).is_construction());
        assert!(
            MigrationError::ProviderUnavailable {
                provider: "balancer".into(),
                token: Address::ZERO
            }
            .is_construction()
        );
        assert!(
            !MigrationError::Simulation {
                reason: "boom".into()
            }
            .is_construction()
        );
        assert!(!MigrationError::Cancelled.is_construction());
    }

    #[test]
    fn report_carries_kind_and_message() {
        let report = MigrationError::MissingField("pool".into()).report();
        assert_eq!(report.kind, "missing_field");
        assert_eq!(report.stage, "construction");
        assert_eq!(report.message, "Missing required field: pool");
        assert_eq!(MigrationError::Cancelled.report().stage, "runtime");
    }
}
