// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::domain::error::AppError;
use crate::domain::instruction::ProtocolId;
use crate::infrastructure::network::provider::HttpProvider;
use crate::services::flow::discovery::{MarketDescriptor, MarketDiscovery};
use alloy::primitives::Address;
use alloy::providers::Provider;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

#[derive(Deserialize, Debug)]
struct MarketRegistryFile {
    chains: HashMap<String, ChainMarketsFile>,
}

#[derive(Deserialize, Debug)]
struct ChainMarketsFile {
    #[serde(default)]
    markets: Vec<MarketDescriptor>,
}

/// Static market list per chain, loaded from JSON.
#[derive(Clone, Debug, Default)]
pub struct MarketRegistry {
    markets: Vec<MarketDescriptor>,
}

impl MarketRegistry {
    pub fn load_from_file(path: &str, chain_id: u64) -> Result<Self, AppError> {
        let p = Path::new(path);
        if !p.exists() {
            return Err(AppError::Config(format!(
                "Market registry not found: {}",
                path
            )));
        }
        let raw = fs::read_to_string(p)
            .map_err(|e| AppError::Config(format!("Failed to read registry {}: {e}", path)))?;
        Self::from_json(&raw, chain_id)
            .map_err(|e| AppError::Config(format!("Failed to parse registry {}: {e}", path)))
    }

    pub fn from_json(raw: &str, chain_id: u64) -> Result<Self, serde_json::Error> {
        let file: MarketRegistryFile = serde_json::from_str(raw)?;
        let markets = file
            .chains
            .into_iter()
            .find(|(chain, _)| chain.parse::<u64>().ok() == Some(chain_id))
            .map(|(_, c)| c.markets)
            .unwrap_or_default();
        tracing::info!(target: "registry", chain_id, markets = markets.len(), "Market registry loaded");
        Ok(Self { markets })
    }

    pub fn len(&self) -> usize {
        self.markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }

    /// Drop markets whose tokens have no code on the connected chain.
    pub async fn validate_with_provider(mut self, provider: &HttpProvider) -> Self {
        let mut checked: HashMap<Address, bool> = HashMap::new();
        let mut kept = Vec::with_capacity(self.markets.len());
        for market in self.markets {
            let mut live = true;
            for token in [market.collateral_token, market.debt_token] {
                let ok = match checked.get(&token) {
                    Some(ok) => *ok,
                    None => {
                        let ok = has_code(provider, token).await;
                        checked.insert(token, ok);
                        ok
                    }
                };
                live &= ok;
            }
            if live {
                kept.push(market);
            } else {
                tracing::warn!(
                    target: "registry",
                    protocol = %market.protocol,
                    collateral = %format!("{:#x}", market.collateral_token),
                    debt = %format!("{:#x}", market.debt_token),
                    "Market token has no code; dropping"
                );
            }
        }
        self.markets = kept;
        self
    }
}

async fn has_code(provider: &HttpProvider, addr: Address) -> bool {
    match provider.get_code_at(addr).await {
        Ok(code) => !code.is_empty(),
        Err(e) => {
            tracing::warn!(target: "registry", address = %format!("{:#x}", addr), error = %e, "Code lookup failed");
            false
        }
    }
}

#[async_trait]
impl MarketDiscovery for MarketRegistry {
    async fn supported_collaterals(
        &self,
        protocol: &ProtocolId,
        debt_token: Address,
    ) -> Result<HashSet<Address>, AppError> {
        Ok(self
            .markets
            .iter()
            .filter(|m| &m.protocol == protocol && m.debt_token == debt_token)
            .map(|m| m.collateral_token)
            .collect())
    }

    async fn markets_for(
        &self,
        protocol: &ProtocolId,
        collateral_token: Address,
    ) -> Result<Vec<MarketDescriptor>, AppError> {
        Ok(self
            .markets
            .iter()
            .filter(|m| &m.protocol == protocol && m.collateral_token == collateral_token)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::instruction::{ProtocolContext, ProtocolFamily};
    use alloy::primitives::address;

    const WETH: Address = address!("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
    const USDC: Address = address!("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");
    const WBTC: Address = address!("0x2260FAC5E5542a773Aa44fBCfeDf7C193bc2C599");

    const REGISTRY: &str = r#"{
        "chains": {
            "1": {
                "markets": [
                    {
                        "protocol": {"family": "shared_pool", "name": "aave-v3"},
                        "collateral_token": "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2",
                        "debt_token": "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
                        "liquidation_threshold_bps": 8250,
                        "context": {"family": "shared_pool"}
                    },
                    {
                        "protocol": {"family": "shared_pool", "name": "aave-v3"},
                        "collateral_token": "0x2260FAC5E5542a773Aa44fBCfeDf7C193bc2C599",
                        "debt_token": "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
                        "liquidation_threshold_bps": 7800,
                        "context": {"family": "shared_pool"}
                    },
                    {
                        "protocol": {"family": "versioned_pool", "name": "compound-v3"},
                        "collateral_token": "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2",
                        "debt_token": "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
                        "liquidation_threshold_bps": 8300,
                        "context": {"family": "versioned_pool", "pool": "0xc3d688B66703497DAA19211EEdff47f25384cdc3"}
                    }
                ]
            },
            "8453": { "markets": [] }
        }
    }"#;

    #[tokio::test]
    async fn lookups_filter_by_protocol_and_token() {
        let registry = MarketRegistry::from_json(REGISTRY, 1).expect("parse");
        assert_eq!(registry.len(), 3);

        let aave = ProtocolId::new(ProtocolFamily::SharedPool, "aave-v3");
        let collaterals = registry.supported_collaterals(&aave, USDC).await.unwrap();
        assert_eq!(collaterals, HashSet::from([WETH, WBTC]));

        let comet = ProtocolId::new(ProtocolFamily::VersionedPool, "compound-v3");
        let markets = registry.markets_for(&comet, WETH).await.unwrap();
        assert_eq!(markets.len(), 1);
        assert!(matches!(markets[0].context, ProtocolContext::VersionedPool { .. }));
        assert!(registry.markets_for(&comet, WBTC).await.unwrap().is_empty());
    }

    #[test]
    fn unknown_chain_yields_empty_registry() {
        let registry = MarketRegistry::from_json(REGISTRY, 10).expect("parse");
        assert!(registry.is_empty());
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = MarketRegistry::load_from_file("/nonexistent/markets.json", 1).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
