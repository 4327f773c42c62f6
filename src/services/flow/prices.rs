// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::domain::error::{AppError, MigrationError};
use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use std::collections::HashMap;

/// USD price source with 8 decimals. A zero price means "no data".
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn prices(&self, tokens: &[Address]) -> Result<HashMap<Address, U256>, AppError>;
}

/// Fully resolved prices for one attempt, handed to the allocator by value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PriceSnapshot {
    prices: HashMap<Address, U256>,
}

impl PriceSnapshot {
    pub fn new(prices: HashMap<Address, U256>) -> Self {
        Self { prices }
    }

    pub async fn fetch(oracle: &dyn PriceOracle, tokens: &[Address]) -> Result<Self, AppError> {
        let mut unique: Vec<Address> = Vec::with_capacity(tokens.len());
        for token in tokens {
            if !unique.contains(token) {
                unique.push(*token);
            }
        }
        let prices = oracle.prices(&unique).await?;
        let missing = unique
            .iter()
            .filter(|t| prices.get(*t).is_none_or(|p| p.is_zero()))
            .count();
        tracing::debug!(
            target: "price_feed",
            requested = unique.len(),
            missing,
            "Price snapshot resolved"
        );
        Ok(Self { prices })
    }

    /// Price of `token`, or zero when the oracle had nothing.
    pub fn get(&self, token: Address) -> U256 {
        self.prices.get(&token).copied().unwrap_or_default()
    }

    pub fn require(&self, token: Address) -> Result<U256, MigrationError> {
        let price = self.get(token);
        if price.is_zero() {
            return Err(MigrationError::MissingPriceData(format!(
                "no USD price for {token}"
            )));
        }
        Ok(price)
    }
}
