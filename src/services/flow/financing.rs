// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::domain::constants::BPS_DENOMINATOR;
use crate::domain::error::MigrationError;
use crate::domain::flow::Flow;
use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Transient-loan sources the settlement substrate can draw from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinancingProviderKind {
    BalancerV2,
    AaveV3,
    MorphoBlue,
}

impl FinancingProviderKind {
    pub fn code(self) -> u8 {
        match self {
            FinancingProviderKind::BalancerV2 => 0,
            FinancingProviderKind::AaveV3 => 1,
            FinancingProviderKind::MorphoBlue => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FinancingProviderKind::BalancerV2 => "balancer_v2",
            FinancingProviderKind::AaveV3 => "aave_v3",
            FinancingProviderKind::MorphoBlue => "morpho_blue",
        }
    }
}

impl fmt::Display for FinancingProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FinancingProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowercase = s.trim().to_lowercase();
        match lowercase.as_str() {
            "balancer" | "balancer_v2" | "balancerv2" => Ok(FinancingProviderKind::BalancerV2),
            "aave" | "aave_v3" | "aavev3" => Ok(FinancingProviderKind::AaveV3),
            "morpho" | "morpho_blue" | "morphoblue" => Ok(FinancingProviderKind::MorphoBlue),
            other => Err(format!("unknown financing provider '{other}'")),
        }
    }
}

/// Fee and token coverage of one provider.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ProviderTerms {
    #[serde(default)]
    pub premium_bps: u32,
    /// Lends any token when set; otherwise only `tokens`.
    #[serde(default)]
    pub all_tokens: bool,
    #[serde(default)]
    pub tokens: Vec<Address>,
}

impl ProviderTerms {
    pub fn supports(&self, token: Address) -> bool {
        self.all_tokens || self.tokens.contains(&token)
    }
}

#[derive(Clone, Debug, Default)]
pub struct FinancingProviders {
    terms: HashMap<FinancingProviderKind, ProviderTerms>,
}

impl FinancingProviders {
    pub fn new(terms: HashMap<FinancingProviderKind, ProviderTerms>) -> Self {
        Self { terms }
    }

    pub fn terms(&self, kind: FinancingProviderKind) -> Option<&ProviderTerms> {
        self.terms.get(&kind)
    }

    pub fn supports(&self, kind: FinancingProviderKind, token: Address) -> bool {
        self.terms(kind).is_some_and(|t| t.supports(token))
    }

    pub fn premium_bps(&self, kind: FinancingProviderKind) -> Option<u32> {
        self.terms(kind).map(|t| t.premium_bps)
    }

    /// Cheapest configured provider that lends `token`; ties keep the lower code.
    pub fn cheapest_for(&self, token: Address) -> Option<FinancingProviderKind> {
        let mut candidates: Vec<(FinancingProviderKind, u32)> = self
            .terms
            .iter()
            .filter(|(_, t)| t.supports(token))
            .map(|(k, t)| (*k, t.premium_bps))
            .collect();
        candidates.sort_by_key(|(k, premium)| (*premium, k.code()));
        candidates.first().map(|(k, _)| *k)
    }
}

/// Financing envelope the settlement substrate must borrow and get back.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FinancingPlan {
    pub provider_kind: FinancingProviderKind,
    pub token: Address,
    pub premium_bps: u32,
    pub buffer_bps: u32,
    pub requested_amount: U256,
    pub required_amount: U256,
    pub settlement: Address,
}

/// `requested * (10000 + premium + buffer) / 10000`, rounded up so the lender
/// is never short by a truncated unit.
///
/// Any non-zero fee makes the result exceed `requested`. Each extra fee bp adds
/// at least one unit only once `requested >= 10000`; below that, neighbouring
/// fee levels can round to the same amount.
pub fn required_amount(requested: U256, premium_bps: u32, buffer_bps: u32) -> U256 {
    let denominator = U256::from(BPS_DENOMINATOR);
    let factor = denominator + U256::from(premium_bps) + U256::from(buffer_bps);
    let scaled = requested.saturating_mul(factor);
    let quotient = scaled / denominator;
    if (scaled % denominator).is_zero() {
        quotient
    } else {
        quotient + U256::from(1u64)
    }
}

/// Compute the financing envelope for a built flow.
///
/// The flow must already push the financed token to its settlement target;
/// this only sizes the loan and checks the provider can lend the token.
pub fn wrap_with_financing(
    flow: &Flow,
    requested: U256,
    provider_kind: FinancingProviderKind,
    premium_bps: u32,
    buffer_bps: u32,
    providers: &FinancingProviders,
) -> Result<FinancingPlan, MigrationError> {
    let Some(settlement) = flow.settlement() else {
        return Err(MigrationError::UnresolvedContext(
            "flow has no settlement target".into(),
        ));
    };
    if requested.is_zero() {
        return Err(MigrationError::ZeroAllocation(
            "financing request is zero".into(),
        ));
    }
    if !providers.supports(provider_kind, settlement.token) {
        return Err(MigrationError::ProviderUnavailable {
            provider: provider_kind.to_string(),
            token: settlement.token,
        });
    }
    if !flow.pushes_to(settlement.token, settlement.target) {
        return Err(MigrationError::UnresolvedContext(format!(
            "flow never pushes {} to settlement {}",
            settlement.token, settlement.target
        )));
    }

    let required = required_amount(requested, premium_bps, buffer_bps);
    tracing::debug!(
        target: "financing",
        provider = %provider_kind,
        token = %settlement.token,
        requested = %requested,
        required = %required,
        premium_bps,
        buffer_bps,
        "Financing envelope computed"
    );

    Ok(FinancingPlan {
        provider_kind,
        token: settlement.token,
        premium_bps,
        buffer_bps,
        requested_amount: requested,
        required_amount: required,
        settlement: settlement.target,
    })
}
