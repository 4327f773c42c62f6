// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::domain::constants::{BPS_DENOMINATOR, WAD};
use crate::domain::error::MigrationError;
use alloy::primitives::U256;
use serde::{Serialize, Serializer};
use std::fmt;

/// Risk-weighted collateral over debt, WAD fixed point (1e18 == 1.0).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthFactor {
    Finite(U256),
    Infinite,
}

impl HealthFactor {
    pub fn is_infinite(self) -> bool {
        matches!(self, HealthFactor::Infinite)
    }

    /// Health factor in basis points, saturating for the infinite case.
    pub fn as_bps(self) -> u64 {
        match self {
            HealthFactor::Infinite => u64::MAX,
            HealthFactor::Finite(wad) => (wad.saturating_mul(U256::from(BPS_DENOMINATOR))
                / U256::from(WAD))
            .saturating_to::<u64>(),
        }
    }
}

impl fmt::Display for HealthFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthFactor::Infinite => f.write_str("inf"),
            HealthFactor::Finite(_) => {
                let bps = self.as_bps();
                write!(f, "{}.{:04}", bps / BPS_DENOMINATOR, bps % BPS_DENOMINATOR)
            }
        }
    }
}

impl Serialize for HealthFactor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// Collateral that remains after the migration, valued in USD.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CollateralExposure {
    pub collateral_usd: U256,
    pub liquidation_threshold_bps: u32,
}

/// `Σ(collateral_usd * threshold) / debt_usd`; infinite exactly when debt is zero.
///
/// Collateral and debt must share one USD scale; the result does not depend on it.
pub fn estimate_resulting_health(legs: &[CollateralExposure], debt_usd: U256) -> HealthFactor {
    if debt_usd.is_zero() {
        return HealthFactor::Infinite;
    }
    let weighted = legs.iter().fold(U256::ZERO, |acc, leg| {
        acc.saturating_add(
            leg.collateral_usd
                .saturating_mul(U256::from(leg.liquidation_threshold_bps)),
        )
    });
    let scaled = weighted.saturating_mul(U256::from(WAD)) / U256::from(BPS_DENOMINATOR);
    HealthFactor::Finite(scaled / debt_usd)
}

/// Block and warn thresholds, both in basis points of 1.0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RiskLimits {
    pub min_health_bps: u64,
    pub warn_health_bps: u64,
}

impl RiskLimits {
    pub fn check(&self, health: HealthFactor) -> Result<HealthFactor, MigrationError> {
        let bps = health.as_bps();
        if bps < self.min_health_bps {
            return Err(MigrationError::UnsafePosition {
                health: health.to_string(),
                minimum: format_bps(self.min_health_bps),
            });
        }
        if bps < self.warn_health_bps {
            tracing::warn!(
                target: "risk",
                health = %health,
                warn_at = %format_bps(self.warn_health_bps),
                "Resulting position is close to liquidation"
            );
        }
        Ok(health)
    }
}

fn format_bps(bps: u64) -> String {
    format!("{}.{:04}", bps / BPS_DENOMINATOR, bps % BPS_DENOMINATOR)
}
