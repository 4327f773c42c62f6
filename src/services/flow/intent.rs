// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::domain::constants::MAX_FINANCING_BPS;
use crate::domain::error::MigrationError;
use crate::domain::flow::Flow;
use crate::domain::instruction::{ProtocolContext, ProtocolFamily, ProtocolId};
use crate::services::flow::allocator::{AllocationLeg, PricedLeg, allocate, usd_value};
use crate::services::flow::builder::{
    CollateralLeg, DebtSwapRequest, FinancingHint, MigrationRequest, ProtocolEndpoint,
    build_debt_swap_flow, build_migration_flow,
};
use crate::services::flow::context::{RawContextParams, resolve_context, resolve_destination_context};
use crate::services::flow::financing::{
    FinancingPlan, FinancingProviderKind, FinancingProviders, wrap_with_financing,
};
use crate::services::flow::prices::PriceSnapshot;
use crate::services::flow::risk::{
    CollateralExposure, HealthFactor, RiskLimits, estimate_resulting_health,
};
use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointIntent {
    pub family: ProtocolFamily,
    pub name: String,
    pub params: RawContextParams,
}

impl EndpointIntent {
    fn id(&self) -> ProtocolId {
        ProtocolId::new(self.family, self.name.clone())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegIntent {
    pub token: Address,
    pub decimals: u8,
    #[serde(default)]
    pub amount: U256,
    #[serde(default)]
    pub withdraw_max: bool,
    /// Supplied balance used for pricing; defaults to `amount`, and is
    /// required when `withdraw_max` is set.
    #[serde(default)]
    pub balance: Option<U256>,
    /// Destination liquidation threshold for this collateral.
    pub liquidation_threshold_bps: u32,
}

impl LegIntent {
    fn balance(&self) -> Result<U256, MigrationError> {
        match self.balance {
            Some(balance) => Ok(balance),
            None if self.withdraw_max => Err(MigrationError::MissingField(format!(
                "balance (withdraw_max leg {})",
                self.token
            ))),
            None => Ok(self.amount),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancingIntent {
    #[serde(default)]
    pub provider: Option<FinancingProviderKind>,
    #[serde(default)]
    pub buffer_bps: Option<u32>,
}

/// Caller-facing description of a collateral + debt migration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationIntent {
    pub user: Address,
    pub source: EndpointIntent,
    pub destination: EndpointIntent,
    pub debt_token: Address,
    pub debt_decimals: u8,
    pub debt_amount: U256,
    #[serde(default)]
    pub repay_all: bool,
    pub legs: Vec<LegIntent>,
    #[serde(default)]
    pub financing: FinancingIntent,
    #[serde(default)]
    pub settlement: Option<Address>,
    /// Sub-account indices the user already occupies on the destination.
    #[serde(default)]
    pub used_sub_accounts: Vec<u8>,
}

/// Caller-facing description of an in-place debt swap.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebtSwapIntent {
    pub user: Address,
    pub protocol: EndpointIntent,
    pub swap_venue: String,
    pub current_debt_token: Address,
    pub current_debt_decimals: u8,
    pub current_debt_amount: U256,
    pub new_debt_token: Address,
    pub new_debt_decimals: u8,
    pub max_new_debt: U256,
    #[serde(default)]
    pub repay_all: bool,
    #[serde(default)]
    pub financing: FinancingIntent,
    #[serde(default)]
    pub settlement: Option<Address>,
    /// Collateral backing the position, for the health pre-check.
    #[serde(default)]
    pub collateral: Vec<LegIntent>,
}

/// Everything an intent needs besides itself to become a plan.
#[derive(Clone, Debug)]
pub struct PlanningEnv {
    pub prices: PriceSnapshot,
    pub providers: FinancingProviders,
    pub limits: RiskLimits,
    pub default_buffer_bps: u32,
    pub default_settlement: Option<Address>,
}

/// Output of planning: the frozen flow plus its financing envelope.
#[derive(Clone, Debug, Serialize)]
pub struct MigrationPlan {
    pub flow: Flow,
    pub financing: FinancingPlan,
    pub allocation: Vec<AllocationLeg>,
    pub health: Option<HealthFactor>,
}

impl PlanningEnv {
    fn settlement(&self, explicit: Option<Address>) -> Result<Address, MigrationError> {
        explicit
            .or(self.default_settlement)
            .ok_or_else(|| MigrationError::MissingField("settlement".into()))
    }

    fn financing_hint(
        &self,
        intent: &FinancingIntent,
        token: Address,
    ) -> Result<FinancingHint, MigrationError> {
        let provider = match intent.provider {
            Some(kind) => kind,
            None => self.providers.cheapest_for(token).ok_or_else(|| {
                MigrationError::ProviderUnavailable {
                    provider: "any".into(),
                    token,
                }
            })?,
        };
        let premium_bps = self.providers.premium_bps(provider).ok_or_else(|| {
            MigrationError::ProviderUnavailable {
                provider: provider.to_string(),
                token,
            }
        })?;
        let buffer_bps = intent.buffer_bps.unwrap_or(self.default_buffer_bps);
        if buffer_bps > MAX_FINANCING_BPS {
            return Err(MigrationError::InvalidFinancing(format!(
                "buffer {buffer_bps} bps exceeds {MAX_FINANCING_BPS}"
            )));
        }
        Ok(FinancingHint {
            provider,
            premium_bps,
            buffer_bps,
        })
    }

    fn exposures(&self, legs: &[LegIntent]) -> Result<Vec<CollateralExposure>, MigrationError> {
        legs.iter()
            .map(|leg| {
                let price = self.prices.require(leg.token)?;
                Ok(CollateralExposure {
                    collateral_usd: usd_value(leg.balance()?, leg.decimals, price),
                    liquidation_threshold_bps: leg.liquidation_threshold_bps,
                })
            })
            .collect()
    }

    fn check_health(
        &self,
        legs: &[LegIntent],
        debt_token: Address,
        debt_decimals: u8,
        debt_amount: U256,
    ) -> Result<HealthFactor, MigrationError> {
        let exposures = self.exposures(legs)?;
        let debt_usd = usd_value(debt_amount, debt_decimals, self.prices.require(debt_token)?);
        self.limits
            .check(estimate_resulting_health(&exposures, debt_usd))
    }
}

impl MigrationIntent {
    /// Every token the planner needs a price for.
    pub fn tokens(&self) -> Vec<Address> {
        let mut tokens: Vec<Address> = self.legs.iter().map(|l| l.token).collect();
        tokens.push(self.debt_token);
        tokens
    }

    pub fn plan(&self, env: &PlanningEnv) -> Result<MigrationPlan, MigrationError> {
        let source_ctx = resolve_context(self.source.family, &self.source.params)?;
        let destination_ctx = resolve_destination_context(
            self.destination.family,
            &self.destination.params,
            &source_ctx,
            &self.used_sub_accounts,
        )?;

        let priced: Vec<PricedLeg> = self
            .legs
            .iter()
            .map(|leg| {
                Ok(PricedLeg {
                    token: leg.token,
                    decimals: leg.decimals,
                    balance: leg.balance()?,
                    price_usd: env.prices.require(leg.token)?,
                })
            })
            .collect::<Result<_, MigrationError>>()?;
        let allocation = allocate(self.debt_amount, &priced);

        let financing = env.financing_hint(&self.financing, self.debt_token)?;
        let settlement = env.settlement(self.settlement)?;
        let request = MigrationRequest {
            user: self.user,
            source: endpoint(&self.source, source_ctx),
            destination: endpoint(&self.destination, destination_ctx),
            debt_token: self.debt_token,
            debt_amount: self.debt_amount,
            repay_all: self.repay_all,
            legs: self
                .legs
                .iter()
                .map(|leg| CollateralLeg {
                    token: leg.token,
                    amount: leg.amount,
                    withdraw_max: leg.withdraw_max,
                })
                .collect(),
            financing,
            settlement,
            allocation: (self.legs.len() > 1).then(|| allocation.clone()),
        };

        let flow = build_migration_flow(&request)?;
        let plan = wrap_with_financing(
            &flow,
            request.requested_amount(),
            financing.provider,
            financing.premium_bps,
            financing.buffer_bps,
            &env.providers,
        )?;
        let health = env.check_health(
            &self.legs,
            self.debt_token,
            self.debt_decimals,
            plan.required_amount,
        )?;

        Ok(MigrationPlan {
            flow,
            financing: plan,
            allocation,
            health: Some(health),
        })
    }
}

impl DebtSwapIntent {
    pub fn tokens(&self) -> Vec<Address> {
        let mut tokens: Vec<Address> = self.collateral.iter().map(|l| l.token).collect();
        tokens.push(self.current_debt_token);
        tokens.push(self.new_debt_token);
        tokens
    }

    pub fn plan(&self, env: &PlanningEnv) -> Result<MigrationPlan, MigrationError> {
        let context = resolve_context(self.protocol.family, &self.protocol.params)?;
        // The borrowed token pays the loan back through the swap.
        let financing = env.financing_hint(&self.financing, self.current_debt_token)?;
        let request = DebtSwapRequest {
            user: self.user,
            protocol: endpoint(&self.protocol, context),
            swap_venue: ProtocolId::new(ProtocolFamily::SwapVenue, self.swap_venue.clone()),
            current_debt_token: self.current_debt_token,
            current_debt_amount: self.current_debt_amount,
            new_debt_token: self.new_debt_token,
            max_new_debt: self.max_new_debt,
            repay_all: self.repay_all,
            financing,
            settlement: env.settlement(self.settlement)?,
        };

        let flow = build_debt_swap_flow(&request)?;
        let plan = wrap_with_financing(
            &flow,
            request.requested_amount(),
            financing.provider,
            financing.premium_bps,
            financing.buffer_bps,
            &env.providers,
        )?;
        let health = if self.collateral.is_empty() {
            None
        } else {
            Some(env.check_health(
                &self.collateral,
                self.new_debt_token,
                self.new_debt_decimals,
                self.max_new_debt,
            )?)
        };

        Ok(MigrationPlan {
            flow,
            financing: plan,
            allocation: Vec::new(),
            health,
        })
    }
}

fn endpoint(intent: &EndpointIntent, context: ProtocolContext) -> ProtocolEndpoint {
    ProtocolEndpoint {
        id: intent.id(),
        context,
    }
}
