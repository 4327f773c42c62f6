// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::common::retry::retry_read;
use crate::domain::constants::{CHAINLINK_STALENESS_SECS, USD_PRICE_DECIMALS};
use crate::domain::error::AppError;
use crate::infrastructure::network::provider::HttpProvider;
use crate::services::flow::prices::PriceOracle;
use alloy::primitives::{Address, U256};
use alloy::sol;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

const CACHE_TTL: Duration = Duration::from_secs(30);
const READ_ATTEMPTS: usize = 3;
const READ_BACKOFF: Duration = Duration::from_millis(100);

sol! {
    #[sol(rpc)]
    contract AggregatorV3Interface {
        function latestRoundData() external view returns (uint80 roundId, int256 answer, uint256 startedAt, uint256 updatedAt, uint80 answeredInRound);
        function decimals() external view returns (uint8);
    }
}

/// On-chain USD prices from Chainlink aggregators.
///
/// Tokens without a configured feed, negative answers and stale rounds all
/// come back as zero so the planner can report missing data for the token
/// that actually matters.
#[derive(Clone)]
pub struct ChainlinkOracle {
    provider: HttpProvider,
    feeds: HashMap<Address, Address>,
    cache: Arc<RwLock<HashMap<Address, (U256, Instant)>>>,
    decimals_cache: Arc<Mutex<HashMap<Address, u8>>>,
    staleness: Duration,
}

impl ChainlinkOracle {
    pub fn new(provider: HttpProvider, feeds: HashMap<Address, Address>) -> Self {
        Self {
            provider,
            feeds,
            cache: Arc::new(RwLock::new(HashMap::new())),
            decimals_cache: Arc::new(Mutex::new(HashMap::new())),
            staleness: Duration::from_secs(CHAINLINK_STALENESS_SECS),
        }
    }

    async fn cached(&self, token: Address) -> Option<U256> {
        let guard = self.cache.read().await;
        guard
            .get(&token)
            .filter(|(_, at)| at.elapsed() < CACHE_TTL)
            .map(|(price, _)| *price)
    }

    async fn feed_decimals(&self, feed: Address) -> Result<u8, AppError> {
        let cached = self
            .decimals_cache
            .lock()
            .ok()
            .and_then(|m| m.get(&feed).copied());
        if let Some(dec) = cached {
            return Ok(dec);
        }
        let contract = AggregatorV3Interface::new(feed, self.provider.clone());
        let dec = retry_read("decimals", READ_ATTEMPTS, READ_BACKOFF, || {
            let c = contract.clone();
            async move { c.decimals().call().await }
        })
        .await
        .map_err(|e| AppError::Connection(format!("Chainlink decimals failed: {}", e)))?;
        if let Ok(mut guard) = self.decimals_cache.lock() {
            guard.insert(feed, dec);
        }
        Ok(dec)
    }

    async fn read_price(&self, token: Address) -> Result<U256, AppError> {
        if let Some(price) = self.cached(token).await {
            return Ok(price);
        }
        let Some(feed) = self.feeds.get(&token).copied() else {
            tracing::debug!(target: "price_feed", %token, "No Chainlink feed configured");
            return Ok(U256::ZERO);
        };

        let decimals = self.feed_decimals(feed).await?;
        let contract = AggregatorV3Interface::new(feed, self.provider.clone());
        let latest = retry_read("latestRoundData", READ_ATTEMPTS, READ_BACKOFF, || {
            let c = contract.clone();
            async move { c.latestRoundData().call().await }
        })
        .await
        .map_err(|e| AppError::Connection(format!("Chainlink price failed: {}", e)))?;

        if latest.answer.is_negative() {
            tracing::warn!(target: "price_feed", %token, %feed, "Chainlink answer negative");
            return Ok(U256::ZERO);
        }
        let updated_at: u64 = latest.updatedAt.try_into().unwrap_or(u64::MAX);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let age = now.saturating_sub(updated_at);
        if age > self.staleness.as_secs() {
            tracing::warn!(target: "price_feed", %token, age, "Chainlink price stale");
            return Ok(U256::ZERO);
        }

        let price = rescale(latest.answer.into_raw(), decimals, USD_PRICE_DECIMALS);
        self.cache
            .write()
            .await
            .insert(token, (price, Instant::now()));
        Ok(price)
    }
}

/// Move a fixed-point value from `from` decimals to `to` decimals, truncating.
pub fn rescale(value: U256, from: u8, to: u8) -> U256 {
    match from.cmp(&to) {
        std::cmp::Ordering::Equal => value,
        std::cmp::Ordering::Greater => value / U256::from(10u64).pow(U256::from(from - to)),
        std::cmp::Ordering::Less => {
            value.saturating_mul(U256::from(10u64).pow(U256::from(to - from)))
        }
    }
}

#[async_trait]
impl PriceOracle for ChainlinkOracle {
    async fn prices(&self, tokens: &[Address]) -> Result<HashMap<Address, U256>, AppError> {
        let reads = join_all(tokens.iter().map(|t| self.read_price(*t))).await;
        let mut out = HashMap::with_capacity(tokens.len());
        for (token, read) in tokens.iter().zip(reads) {
            out.insert(*token, read?);
        }
        Ok(out)
    }
}
