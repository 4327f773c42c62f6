// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::domain::constants::{BPS_DENOMINATOR, NORMALIZED_DECIMALS};
use crate::domain::error::MigrationError;
use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// Collateral leg with a resolved USD price (8 decimals).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedLeg {
    pub token: Address,
    pub decimals: u8,
    pub balance: U256,
    pub price_usd: U256,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AllocationLeg {
    pub token: Address,
    pub decimals: u8,
    pub balance: U256,
    pub price_usd: U256,
    pub proportion_bps: u64,
    pub allocated_amount: U256,
}

/// Scale `balance` to 18 decimals.
pub fn normalize(balance: U256, decimals: u8) -> U256 {
    if decimals <= NORMALIZED_DECIMALS {
        let scale = U256::from(10u64).pow(U256::from(NORMALIZED_DECIMALS - decimals));
        balance.saturating_mul(scale)
    } else {
        let scale = U256::from(10u64).pow(U256::from(decimals - NORMALIZED_DECIMALS));
        balance / scale
    }
}

/// USD value with 26 decimals (18 from normalization, 8 from the oracle).
pub fn usd_value(balance: U256, decimals: u8, price_usd: U256) -> U256 {
    normalize(balance, decimals).saturating_mul(price_usd)
}

/// Split `total` across `legs` in proportion to their USD value.
///
/// Truncation remainders (both in bps and in token units) land on the first
/// leg, so the allocated amounts always sum to `total` exactly. Legs keep
/// their input order.
pub fn allocate(total: U256, legs: &[PricedLeg]) -> Vec<AllocationLeg> {
    let values: Vec<U256> = legs
        .iter()
        .map(|leg| usd_value(leg.balance, leg.decimals, leg.price_usd))
        .collect();
    let total_usd = values
        .iter()
        .fold(U256::ZERO, |acc, v| acc.saturating_add(*v));

    let denominator = U256::from(BPS_DENOMINATOR);
    let mut out: Vec<AllocationLeg> = legs
        .iter()
        .zip(values.iter())
        .map(|(leg, value)| {
            let proportion_bps = if total_usd.is_zero() {
                0
            } else {
                (value.saturating_mul(denominator) / total_usd).saturating_to::<u64>()
            };
            AllocationLeg {
                token: leg.token,
                decimals: leg.decimals,
                balance: leg.balance,
                price_usd: leg.price_usd,
                proportion_bps,
                allocated_amount: U256::ZERO,
            }
        })
        .collect();

    if total_usd.is_zero() || out.is_empty() {
        return out;
    }

    let bps_sum: u64 = out.iter().map(|l| l.proportion_bps).sum();
    out[0].proportion_bps += BPS_DENOMINATOR.saturating_sub(bps_sum);

    for leg in out.iter_mut() {
        leg.allocated_amount = total.saturating_mul(U256::from(leg.proportion_bps)) / denominator;
    }
    let allocated = out
        .iter()
        .fold(U256::ZERO, |acc, l| acc.saturating_add(l.allocated_amount));
    out[0].allocated_amount += total.saturating_sub(allocated);

    out
}

/// Reject allocations that would build a flow with an empty or unpriced leg.
pub fn ensure_allocated(legs: &[AllocationLeg]) -> Result<(), MigrationError> {
    if legs.is_empty() {
        return Err(MigrationError::ZeroAllocation("no collateral legs".into()));
    }
    if legs.iter().all(|l| l.proportion_bps == 0) {
        return Err(MigrationError::MissingPriceData(
            "collateral legs have no USD value".into(),
        ));
    }
    if let Some(leg) = legs.iter().find(|l| l.allocated_amount.is_zero()) {
        return Err(MigrationError::ZeroAllocation(format!(
            "collateral {} receives no debt share",
            leg.token
        )));
    }
    Ok(())
}
