// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::domain::error::{AppError, MigrationError};
use crate::domain::instruction::{ProtocolContext, ProtocolId};
use crate::services::flow::intent::MigrationIntent;
use alloy::primitives::Address;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One addressable market on a protocol, as reported by discovery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketDescriptor {
    pub protocol: ProtocolId,
    pub collateral_token: Address,
    pub debt_token: Address,
    pub liquidation_threshold_bps: u32,
    pub context: ProtocolContext,
}

/// Which markets exist. Used by callers to vet an intent, never by the builder.
#[async_trait]
pub trait MarketDiscovery: Send + Sync {
    async fn supported_collaterals(
        &self,
        protocol: &ProtocolId,
        debt_token: Address,
    ) -> Result<HashSet<Address>, AppError>;

    async fn markets_for(
        &self,
        protocol: &ProtocolId,
        collateral_token: Address,
    ) -> Result<Vec<MarketDescriptor>, AppError>;
}

/// Reject intents whose destination cannot take every collateral leg.
pub async fn vet_destination(
    discovery: &dyn MarketDiscovery,
    intent: &MigrationIntent,
) -> Result<(), AppError> {
    let destination = ProtocolId::new(intent.destination.family, intent.destination.name.clone());
    let supported = discovery
        .supported_collaterals(&destination, intent.debt_token)
        .await?;
    if let Some(leg) = intent.legs.iter().find(|l| !supported.contains(&l.token)) {
        return Err(MigrationError::UnresolvedContext(format!(
            "{destination} does not accept {} as collateral against {}",
            leg.token, intent.debt_token
        ))
        .into());
    }
    tracing::debug!(
        target: "flow",
        destination = %destination,
        legs = intent.legs.len(),
        "Destination accepts every collateral leg"
    );
    Ok(())
}
