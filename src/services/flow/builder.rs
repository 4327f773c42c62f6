// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::domain::constants::BPS_DENOMINATOR;
use crate::domain::error::MigrationError;
use crate::domain::flow::{Flow, FlowDraft};
use crate::domain::instruction::{
    Instruction, Operation, OutputReference, ProtocolContext, ProtocolFamily, ProtocolId, Target,
};
use crate::services::flow::allocator::{AllocationLeg, ensure_allocated};
use crate::services::flow::financing::{FinancingProviderKind, required_amount};
use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// A gateway plus the resolved context the flow addresses on it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolEndpoint {
    pub id: ProtocolId,
    pub context: ProtocolContext,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralLeg {
    pub token: Address,
    #[serde(default)]
    pub amount: U256,
    /// Read the live supplied balance instead of trusting `amount`.
    #[serde(default)]
    pub withdraw_max: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancingHint {
    pub provider: FinancingProviderKind,
    pub premium_bps: u32,
    pub buffer_bps: u32,
}

/// Fully resolved input for a collateral + debt migration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MigrationRequest {
    pub user: Address,
    pub source: ProtocolEndpoint,
    pub destination: ProtocolEndpoint,
    pub debt_token: Address,
    pub debt_amount: U256,
    /// Over-repay by the buffer to clear accrued interest; the surplus comes back as a refund.
    pub repay_all: bool,
    pub legs: Vec<CollateralLeg>,
    pub financing: FinancingHint,
    pub settlement: Address,
    pub allocation: Option<Vec<AllocationLeg>>,
}

impl MigrationRequest {
    /// Amount the transient loan must deliver to the repay step.
    pub fn requested_amount(&self) -> U256 {
        repay_amount(self.debt_amount, self.repay_all, self.financing.buffer_bps)
    }

    /// Amount the destination borrow has to raise to settle the loan.
    pub fn required_amount(&self) -> U256 {
        required_amount(
            self.requested_amount(),
            self.financing.premium_bps,
            self.financing.buffer_bps,
        )
    }
}

/// Resolved input for replacing debt token A with token B on one protocol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DebtSwapRequest {
    pub user: Address,
    pub protocol: ProtocolEndpoint,
    pub swap_venue: ProtocolId,
    pub current_debt_token: Address,
    pub current_debt_amount: U256,
    pub new_debt_token: Address,
    /// Upper bound of new debt the swap may consume.
    pub max_new_debt: U256,
    pub repay_all: bool,
    pub financing: FinancingHint,
    pub settlement: Address,
}

impl DebtSwapRequest {
    pub fn requested_amount(&self) -> U256 {
        repay_amount(
            self.current_debt_amount,
            self.repay_all,
            self.financing.buffer_bps,
        )
    }

    pub fn required_amount(&self) -> U256 {
        required_amount(
            self.requested_amount(),
            self.financing.premium_bps,
            self.financing.buffer_bps,
        )
    }
}

fn repay_amount(debt: U256, repay_all: bool, buffer_bps: u32) -> U256 {
    if !repay_all {
        return debt;
    }
    let denominator = U256::from(BPS_DENOMINATOR);
    debt.saturating_mul(denominator + U256::from(buffer_bps)) / denominator
}

fn check_isolated_market(
    side: &str,
    endpoint: &ProtocolEndpoint,
    debt_token: Address,
    legs: &[CollateralLeg],
) -> Result<(), MigrationError> {
    let Some(market) = endpoint.context.as_market() else {
        return Ok(());
    };
    if legs.len() > 1 {
        return Err(MigrationError::IsolationViolation(format!(
            "{side} market {} accepts a single collateral, got {}",
            endpoint.id.name,
            legs.len()
        )));
    }
    if market.loan_token != debt_token {
        return Err(MigrationError::IsolationViolation(format!(
            "{side} market lends {}, position owes {}",
            market.loan_token, debt_token
        )));
    }
    if let Some(leg) = legs.iter().find(|l| l.token != market.collateral_token) {
        return Err(MigrationError::IsolationViolation(format!(
            "{side} market collateral is {}, leg carries {}",
            market.collateral_token, leg.token
        )));
    }
    Ok(())
}

fn check_allocation(
    legs: &[CollateralLeg],
    allocation: Option<&[AllocationLeg]>,
) -> Result<(), MigrationError> {
    let Some(allocation) = allocation else {
        return Ok(());
    };
    ensure_allocated(allocation)?;
    let aligned = allocation.len() == legs.len()
        && allocation.iter().zip(legs).all(|(a, l)| a.token == l.token);
    if !aligned {
        return Err(MigrationError::UnresolvedContext(
            "debt allocation does not line up with the collateral legs".into(),
        ));
    }
    Ok(())
}

/// Validate a migration request before any instruction is assembled.
fn validate_migration(request: &MigrationRequest) -> Result<(), MigrationError> {
    if request.debt_amount.is_zero() {
        return Err(MigrationError::ZeroAllocation("debt amount is zero".into()));
    }
    if request.legs.is_empty() {
        return Err(MigrationError::ZeroAllocation("no collateral legs".into()));
    }
    if let Some(leg) = request
        .legs
        .iter()
        .find(|l| !l.withdraw_max && l.amount.is_zero())
    {
        return Err(MigrationError::ZeroAllocation(format!(
            "collateral {} resolves to zero",
            leg.token
        )));
    }
    for endpoint in [&request.source, &request.destination] {
        if !endpoint.id.family.is_lending() {
            return Err(MigrationError::UnsupportedFamily(format!(
                "{} cannot hold a lending position",
                endpoint.id
            )));
        }
    }
    check_isolated_market("source", &request.source, request.debt_token, &request.legs)?;
    check_isolated_market(
        "destination",
        &request.destination,
        request.debt_token,
        &request.legs,
    )?;

    if let (Some(src), Some(dst)) = (
        request.source.context.as_vault(),
        request.destination.context.as_vault(),
    ) {
        if src.sub_account == dst.sub_account && src.same_vaults(dst) {
            return Err(MigrationError::UnresolvedContext(format!(
                "source and destination both address sub-account {}",
                src.sub_account
            )));
        }
    }

    check_allocation(&request.legs, request.allocation.as_deref())
}

/// Vault-to-vault moves across different vault sets take everything, so no dust
/// is left under the old sub-account.
fn forces_full_withdraw(request: &MigrationRequest) -> bool {
    match (
        request.source.context.as_vault(),
        request.destination.context.as_vault(),
    ) {
        (Some(src), Some(dst)) => !src.same_vaults(dst),
        _ => false,
    }
}

fn lending(
    endpoint: &ProtocolEndpoint,
    operation: Operation,
    token: Address,
    user: Address,
) -> Result<Instruction, MigrationError> {
    Instruction::new(
        endpoint.id.clone(),
        operation,
        token,
        user,
        endpoint.context.clone(),
    )
}

fn push(
    draft: &mut FlowDraft,
    token: Address,
    user: Address,
    amount: OutputReference,
    to: Address,
) -> Result<(), MigrationError> {
    draft.consume(
        Instruction::router(Operation::PushToken, token, user)?
            .with_input(amount)
            .with_target(Target::Account(to)),
    )
}

/// Assemble the ordered flow for moving a position between two lending protocols.
///
/// Order: repay, withdraw (per leg), approve + deposit (per leg), borrow,
/// push to settlement, then the optional refund push.
pub fn build_migration_flow(request: &MigrationRequest) -> Result<Flow, MigrationError> {
    validate_migration(request)?;

    let user = request.user;
    let full_withdraw = forces_full_withdraw(request);
    let mut draft = FlowDraft::new();

    let refund = draft.produce(
        lending(&request.source, Operation::Repay, request.debt_token, user)?
            .with_literal(request.requested_amount()),
    )?;

    let mut withdrawn = Vec::with_capacity(request.legs.len());
    for leg in &request.legs {
        let instruction = lending(
            &request.source,
            Operation::WithdrawCollateral,
            leg.token,
            user,
        )?;
        let slot = if leg.withdraw_max || full_withdraw {
            let balance = draft.produce(lending(
                &request.source,
                Operation::GetSupplyBalance,
                leg.token,
                user,
            )?)?;
            draft.produce(instruction.with_input(balance))?
        } else {
            draft.produce(instruction.with_literal(leg.amount))?
        };
        withdrawn.push((leg.token, slot));
    }

    for (token, slot) in &withdrawn {
        draft.consume(
            Instruction::router(Operation::Approve, *token, user)?
                .with_input(*slot)
                .with_target(Target::Gateway(request.destination.id.name.clone())),
        )?;
        draft.consume(
            lending(
                &request.destination,
                Operation::DepositCollateral,
                *token,
                user,
            )?
            .with_input(*slot),
        )?;
    }

    let required = request.required_amount();
    let borrowed = draft.produce(
        lending(
            &request.destination,
            Operation::Borrow,
            request.debt_token,
            user,
        )?
        .with_literal(required),
    )?;
    push(
        &mut draft,
        request.debt_token,
        user,
        borrowed,
        request.settlement,
    )?;
    if request.repay_all {
        push(&mut draft, request.debt_token, user, refund, user)?;
    }
    draft.settle_to(request.debt_token, request.settlement);

    let flow = draft.freeze();
    tracing::info!(
        target: "flow",
        source = %request.source.id,
        destination = %request.destination.id,
        legs = request.legs.len(),
        instructions = flow.len(),
        full_withdraw,
        required = %required,
        "Migration flow built"
    );
    Ok(flow)
}

/// Assemble the flow that swaps the debt asset of a position in place.
///
/// The new debt is borrowed first and swapped exact-out into the old debt
/// token, which settles the transient loan; unspent new debt returns to the user.
pub fn build_debt_swap_flow(request: &DebtSwapRequest) -> Result<Flow, MigrationError> {
    if request.current_debt_token == request.new_debt_token {
        return Err(MigrationError::UnresolvedContext(
            "debt swap needs two different tokens".into(),
        ));
    }
    if request.current_debt_amount.is_zero() {
        return Err(MigrationError::ZeroAllocation("current debt is zero".into()));
    }
    if request.max_new_debt.is_zero() {
        return Err(MigrationError::ZeroAllocation("new debt bound is zero".into()));
    }
    if request.swap_venue.family != ProtocolFamily::SwapVenue {
        return Err(MigrationError::UnsupportedFamily(format!(
            "{} is not a swap venue",
            request.swap_venue
        )));
    }

    let user = request.user;
    let old = request.current_debt_token;
    let new = request.new_debt_token;
    let required = request.required_amount();
    let mut draft = FlowDraft::new();

    let refund = draft.produce(
        lending(&request.protocol, Operation::Repay, old, user)?
            .with_literal(request.requested_amount()),
    )?;
    let borrowed = draft.produce(
        lending(&request.protocol, Operation::Borrow, new, user)?
            .with_literal(request.max_new_debt),
    )?;
    draft.consume(
        Instruction::router(Operation::Approve, new, user)?
            .with_input(borrowed)
            .with_target(Target::Gateway(request.swap_venue.name.clone())),
    )?;
    let (bought, leftover) = draft.swap(
        Instruction::new(
            request.swap_venue.clone(),
            Operation::SwapExactOut,
            new,
            user,
            ProtocolContext::SwapVenue {
                token_out: old,
                amount_out: required,
            },
        )?
        .with_input(borrowed),
    )?;
    push(&mut draft, old, user, bought, request.settlement)?;
    push(&mut draft, new, user, leftover, user)?;
    if request.repay_all {
        push(&mut draft, old, user, refund, user)?;
    }
    draft.settle_to(old, request.settlement);

    let flow = draft.freeze();
    tracing::info!(
        target: "flow",
        protocol = %request.protocol.id,
        venue = %request.swap_venue,
        from = %old,
        to = %new,
        instructions = flow.len(),
        required = %required,
        "Debt swap flow built"
    );
    Ok(flow)
}
