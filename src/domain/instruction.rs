// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::domain::constants::{LITERAL_INPUT_INDEX, ROUTER_GATEWAY};
use crate::domain::error::MigrationError;
use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lending action kinds the router understands. The discriminant is the wire code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Repay = 0,
    WithdrawCollateral = 1,
    DepositCollateral = 2,
    Borrow = 3,
    SwapExactOut = 4,
    GetSupplyBalance = 5,
    Approve = 6,
    PushToken = 7,
    ToOutput = 8,
}

impl Operation {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Repay => "repay",
            Operation::WithdrawCollateral => "withdraw_collateral",
            Operation::DepositCollateral => "deposit_collateral",
            Operation::Borrow => "borrow",
            Operation::SwapExactOut => "swap_exact_out",
            Operation::GetSupplyBalance => "get_supply_balance",
            Operation::Approve => "approve",
            Operation::PushToken => "push_token",
            Operation::ToOutput => "to_output",
        }
    }

    /// Number of output slots the router appends when this operation runs.
    ///
    /// Approve records an empty placeholder slot; deposits and pushes record nothing.
    pub fn produced_slots(self) -> usize {
        match self {
            Operation::DepositCollateral | Operation::PushToken => 0,
            Operation::SwapExactOut => 2,
            Operation::Repay
            | Operation::WithdrawCollateral
            | Operation::Borrow
            | Operation::GetSupplyBalance
            | Operation::Approve
            | Operation::ToOutput => 1,
        }
    }

    fn accepted_by(self, family: ProtocolFamily) -> bool {
        match self {
            Operation::Approve | Operation::PushToken | Operation::ToOutput => {
                family == ProtocolFamily::Router
            }
            Operation::SwapExactOut => family == ProtocolFamily::SwapVenue,
            Operation::Repay
            | Operation::WithdrawCollateral
            | Operation::DepositCollateral
            | Operation::Borrow
            | Operation::GetSupplyBalance => family.is_lending(),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of protocol families. Every family carries its own context shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolFamily {
    /// One global market per asset.
    SharedPool,
    /// Several named pools with identical asset semantics.
    VersionedPool,
    /// Market keyed by (loan, collateral, oracle, irm, lltv).
    PairIsolated,
    /// Positions namespaced by a per-user sub-account index.
    SubAccountVault,
    /// Exact-out swap venue used by debt swaps.
    SwapVenue,
    /// The router's own plumbing (approve, push, inject).
    Router,
}

impl ProtocolFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolFamily::SharedPool => "shared_pool",
            ProtocolFamily::VersionedPool => "versioned_pool",
            ProtocolFamily::PairIsolated => "pair_isolated",
            ProtocolFamily::SubAccountVault => "sub_account_vault",
            ProtocolFamily::SwapVenue => "swap_venue",
            ProtocolFamily::Router => "router",
        }
    }

    pub fn is_lending(self) -> bool {
        match self {
            ProtocolFamily::SharedPool
            | ProtocolFamily::VersionedPool
            | ProtocolFamily::PairIsolated
            | ProtocolFamily::SubAccountVault => true,
            ProtocolFamily::SwapVenue | ProtocolFamily::Router => false,
        }
    }
}

impl fmt::Display for ProtocolFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolFamily {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "shared_pool" | "shared" => Ok(ProtocolFamily::SharedPool),
            "versioned_pool" | "versioned" => Ok(ProtocolFamily::VersionedPool),
            "pair_isolated" | "isolated_market" => Ok(ProtocolFamily::PairIsolated),
            "sub_account_vault" | "vault" => Ok(ProtocolFamily::SubAccountVault),
            "swap_venue" | "swap" => Ok(ProtocolFamily::SwapVenue),
            "router" => Ok(ProtocolFamily::Router),
            other => Err(MigrationError::UnsupportedFamily(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MarketParams {
    pub loan_token: Address,
    pub collateral_token: Address,
    pub oracle: Address,
    pub irm: Address,
    pub lltv: U256,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VaultContext {
    pub borrow_vault: Address,
    pub collateral_vaults: Vec<Address>,
    pub sub_account: u8,
}

impl VaultContext {
    /// True when both contexts address the same borrow vault and collateral vault set.
    pub fn same_vaults(&self, other: &VaultContext) -> bool {
        if self.borrow_vault != other.borrow_vault
            || self.collateral_vaults.len() != other.collateral_vaults.len()
        {
            return false;
        }
        self.collateral_vaults
            .iter()
            .all(|v| other.collateral_vaults.contains(v))
    }
}

/// Protocol-family-specific addressing blob carried by every instruction.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum ProtocolContext {
    SharedPool,
    VersionedPool { pool: Address },
    PairIsolated(MarketParams),
    SubAccountVault(VaultContext),
    SwapVenue { token_out: Address, amount_out: U256 },
    Router,
}

impl ProtocolContext {
    pub fn family(&self) -> ProtocolFamily {
        match self {
            ProtocolContext::SharedPool => ProtocolFamily::SharedPool,
            ProtocolContext::VersionedPool { .. } => ProtocolFamily::VersionedPool,
            ProtocolContext::PairIsolated(_) => ProtocolFamily::PairIsolated,
            ProtocolContext::SubAccountVault(_) => ProtocolFamily::SubAccountVault,
            ProtocolContext::SwapVenue { .. } => ProtocolFamily::SwapVenue,
            ProtocolContext::Router => ProtocolFamily::Router,
        }
    }

    pub fn as_market(&self) -> Option<&MarketParams> {
        match self {
            ProtocolContext::PairIsolated(market) => Some(market),
            _ => None,
        }
    }

    pub fn as_vault(&self) -> Option<&VaultContext> {
        match self {
            ProtocolContext::SubAccountVault(vault) => Some(vault),
            _ => None,
        }
    }
}

/// A registered gateway on the router together with the family it speaks.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProtocolId {
    pub family: ProtocolFamily,
    pub name: String,
}

impl ProtocolId {
    pub fn new(family: ProtocolFamily, name: impl Into<String>) -> Self {
        Self {
            family,
            name: name.into(),
        }
    }

    pub fn router() -> Self {
        Self::new(ProtocolFamily::Router, ROUTER_GATEWAY)
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.family)
    }
}

/// Typed handle into a flow's output-slot arena.
///
/// Only the flow arena hands these out, so a reference always names a slot
/// that an earlier instruction produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct OutputReference(usize);

impl OutputReference {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "slot", rename_all = "snake_case")]
pub enum AmountSource {
    Literal,
    Output(OutputReference),
}

impl AmountSource {
    pub fn wire_index(self) -> U256 {
        match self {
            AmountSource::Literal => U256::from(LITERAL_INPUT_INDEX),
            AmountSource::Output(reference) => U256::from(reference.index()),
        }
    }

    pub fn reference(self) -> Option<OutputReference> {
        match self {
            AmountSource::Literal => None,
            AmountSource::Output(reference) => Some(reference),
        }
    }
}

/// Counterparty of a router plumbing operation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// Plain account that receives pushed tokens.
    Account(Address),
    /// Router gateway allowed to pull an approved amount.
    Gateway(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Instruction {
    protocol: ProtocolId,
    operation: Operation,
    token: Address,
    user: Address,
    literal_amount: U256,
    context: ProtocolContext,
    amount_source: AmountSource,
    target: Option<Target>,
}

impl Instruction {
    /// Validates that the context matches the protocol family and that the
    /// family accepts the operation.
    pub fn new(
        protocol: ProtocolId,
        operation: Operation,
        token: Address,
        user: Address,
        context: ProtocolContext,
    ) -> Result<Self, MigrationError> {
        if context.family() != protocol.family {
            return Err(MigrationError::UnsupportedFamily(format!(
                "{} context supplied to {} gateway {}",
                context.family(),
                protocol.family,
                protocol.name
            )));
        }
        if !operation.accepted_by(protocol.family) {
            return Err(MigrationError::UnsupportedFamily(format!(
                "{} is not supported by {} gateway {}",
                operation, protocol.family, protocol.name
            )));
        }
        Ok(Self {
            protocol,
            operation,
            token,
            user,
            literal_amount: U256::ZERO,
            context,
            amount_source: AmountSource::Literal,
            target: None,
        })
    }

    /// Router plumbing instruction (approve, push, inject).
    pub fn router(operation: Operation, token: Address, user: Address) -> Result<Self, MigrationError> {
        Self::new(ProtocolId::router(), operation, token, user, ProtocolContext::Router)
    }

    pub fn with_literal(mut self, amount: U256) -> Self {
        self.literal_amount = amount;
        self.amount_source = AmountSource::Literal;
        self
    }

    pub fn with_input(mut self, reference: OutputReference) -> Self {
        self.amount_source = AmountSource::Output(reference);
        self
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = Some(target);
        self
    }

    pub fn protocol(&self) -> &ProtocolId {
        &self.protocol
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn token(&self) -> Address {
        self.token
    }

    pub fn user(&self) -> Address {
        self.user
    }

    pub fn literal_amount(&self) -> U256 {
        self.literal_amount
    }

    pub fn context(&self) -> &ProtocolContext {
        &self.context
    }

    pub fn amount_source(&self) -> AmountSource {
        self.amount_source
    }

    pub fn target(&self) -> Option<&Target> {
        self.target.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared(name: &str) -> ProtocolId {
        ProtocolId::new(ProtocolFamily::SharedPool, name)
    }

    #[test]
    fn rejects_context_from_another_family() {
        let err = Instruction::new(
            shared("aave-v3"),
            Operation::Repay,
            Address::ZERO,
            Address::ZERO,
            ProtocolContext::VersionedPool {
                pool: Address::from([0x01; 20]),
            },
        )
        .expect_err("mixed families must fail");
        assert_eq!(err.kind(), "unsupported_family");
    }

    #[test]
    fn rejects_plumbing_operation_on_lending_gateway() {
        let err = Instruction::new(
            shared("aave-v3"),
            Operation::PushToken,
            Address::ZERO,
            Address::ZERO,
            ProtocolContext::SharedPool,
        )
        .expect_err("push belongs to the router");
        assert!(matches!(err, MigrationError::UnsupportedFamily(_)));
    }

    #[test]
    fn literal_sentinel_is_999() {
        assert_eq!(AmountSource::Literal.wire_index(), U256::from(999u64));
        assert_eq!(
            AmountSource::Output(OutputReference::new(3)).wire_index(),
            U256::from(3u64)
        );
    }

    #[test]
    fn slot_production_table() {
        assert_eq!(Operation::DepositCollateral.produced_slots(), 0);
        assert_eq!(Operation::PushToken.produced_slots(), 0);
        assert_eq!(Operation::Approve.produced_slots(), 1);
        assert_eq!(Operation::SwapExactOut.produced_slots(), 2);
    }

    #[test]
    fn family_parses_aliases() {
        assert_eq!(
            "sub-account-vault".parse::<ProtocolFamily>().unwrap(),
            ProtocolFamily::SubAccountVault
        );
        assert!("compound".parse::<ProtocolFamily>().is_err());
    }

    #[test]
    fn vault_comparison_ignores_collateral_order() {
        let a = VaultContext {
            borrow_vault: Address::from([0x01; 20]),
            collateral_vaults: vec![Address::from([0x02; 20]), Address::from([0x03; 20])],
            sub_account: 0,
        };
        let mut b = a.clone();
        b.collateral_vaults.reverse();
        b.sub_account = 4;
        assert!(a.same_vaults(&b));
        b.borrow_vault = Address::from([0x09; 20]);
        assert!(!a.same_vaults(&b));
    }
}
