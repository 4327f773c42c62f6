// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::common::parsing::{parse_address_hex, parse_boolish};
use crate::domain::constants::{
    BPS_DENOMINATOR, DEFAULT_BUFFER_BPS, DEFAULT_MIN_HEALTH_FACTOR_BPS, DEFAULT_RECEIPT_POLL_MS,
    DEFAULT_RECEIPT_TIMEOUT_MS, DEFAULT_WARN_HEALTH_FACTOR_BPS, MAX_FINANCING_BPS,
};
use crate::domain::error::AppError;
use crate::services::execution::substrate::ExecutionMode;
use crate::services::flow::financing::{FinancingProviderKind, FinancingProviders, ProviderTerms};
use crate::services::flow::risk::RiskLimits;
use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use config::{Config, Environment, File};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

#[derive(Debug, Deserialize, Clone)]
pub struct MigratorSettings {
    // General
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default, deserialize_with = "deserialize_boolish")]
    pub log_json: bool,

    // Chain
    pub rpc_url: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    pub router_address: Address,
    /// Where financed flows send the repayment; defaults to the router.
    pub settlement_address: Option<Address>,

    // Identity
    pub wallet_key: Option<String>,

    // Execution
    #[serde(default = "default_execution_mode")]
    pub execution_mode: String,
    #[serde(default = "default_true", deserialize_with = "deserialize_boolish")]
    pub revoke_after_success: bool,
    #[serde(default = "default_sim_backend")]
    pub simulation_backend: String,
    #[serde(default = "default_receipt_poll_ms")]
    pub receipt_poll_ms: u64,
    #[serde(default = "default_receipt_timeout_ms")]
    pub receipt_timeout_ms: u64,

    // Financing & risk
    #[serde(default = "default_buffer_bps")]
    pub default_buffer_bps: u32,
    #[serde(default)]
    pub financing_providers: HashMap<String, ProviderTerms>,
    #[serde(default = "default_min_health")]
    pub min_health_factor_bps: u64,
    #[serde(default = "default_warn_health")]
    pub warn_health_factor_bps: u64,

    // Data
    /// Token address -> Chainlink USD aggregator.
    #[serde(default)]
    pub chainlink_feeds: HashMap<String, String>,
    pub markets_path: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_chain_id() -> u64 {
    1
}
fn default_true() -> bool {
    true
}
fn default_execution_mode() -> String {
    "batched".to_string()
}
fn default_sim_backend() -> String {
    "eth_simulate".to_string()
}
fn default_receipt_poll_ms() -> u64 {
    DEFAULT_RECEIPT_POLL_MS
}
fn default_receipt_timeout_ms() -> u64 {
    DEFAULT_RECEIPT_TIMEOUT_MS
}
fn default_buffer_bps() -> u32 {
    DEFAULT_BUFFER_BPS
}
fn default_min_health() -> u64 {
    DEFAULT_MIN_HEALTH_FACTOR_BPS
}
fn default_warn_health() -> u64 {
    DEFAULT_WARN_HEALTH_FACTOR_BPS
}

/// Env vars arrive as strings; accept the usual yes/no spellings.
fn deserialize_boolish<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Bool(b) => Ok(b),
        Raw::Text(s) => parse_boolish(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid boolean '{s}'"))),
    }
}

impl MigratorSettings {
    pub fn load_with_path(path: Option<&str>) -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let mut builder = Config::builder();
        if let Some(selected_path) = path {
            builder = builder.add_source(File::from(Path::new(selected_path)).required(true));
        } else {
            builder = builder.add_source(File::with_name("config").required(false));
        }
        // Precedence: env/.env > config file.
        builder = builder.add_source(Environment::default());

        let settings: MigratorSettings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load() -> Result<Self, AppError> {
        Self::load_with_path(None)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        Url::parse(&self.rpc_url)
            .map_err(|e| AppError::Config(format!("Invalid RPC_URL '{}': {e}", self.rpc_url)))?;
        if self.router_address == Address::ZERO {
            return Err(AppError::Config("ROUTER_ADDRESS is missing".to_string()));
        }
        if self.default_buffer_bps > MAX_FINANCING_BPS {
            return Err(AppError::Validation {
                field: "default_buffer_bps".into(),
                message: format!("{} exceeds {}", self.default_buffer_bps, MAX_FINANCING_BPS),
            });
        }
        if self.min_health_factor_bps < BPS_DENOMINATOR {
            return Err(AppError::Validation {
                field: "min_health_factor_bps".into(),
                message: "must be at least 10000 (health factor 1.0)".into(),
            });
        }
        if self.warn_health_factor_bps < self.min_health_factor_bps {
            return Err(AppError::Validation {
                field: "warn_health_factor_bps".into(),
                message: "must not be below min_health_factor_bps".into(),
            });
        }
        self.execution_mode()?;
        self.providers()?;
        self.chainlink_feeds()?;
        Ok(())
    }

    pub fn execution_mode(&self) -> Result<ExecutionMode, AppError> {
        ExecutionMode::from_str(&self.execution_mode).map_err(AppError::Config)
    }

    pub fn settlement_or_router(&self) -> Address {
        self.settlement_address.unwrap_or(self.router_address)
    }

    pub fn providers(&self) -> Result<FinancingProviders, AppError> {
        let mut terms = HashMap::new();
        for (name, t) in &self.financing_providers {
            let kind = FinancingProviderKind::from_str(name).map_err(AppError::Config)?;
            if t.premium_bps > MAX_FINANCING_BPS {
                return Err(AppError::Validation {
                    field: format!("financing_providers.{name}.premium_bps"),
                    message: format!("{} exceeds {}", t.premium_bps, MAX_FINANCING_BPS),
                });
            }
            terms.insert(kind, t.clone());
        }
        Ok(FinancingProviders::new(terms))
    }

    pub fn risk_limits(&self) -> RiskLimits {
        RiskLimits {
            min_health_bps: self.min_health_factor_bps,
            warn_health_bps: self.warn_health_factor_bps,
        }
    }

    pub fn chainlink_feeds(&self) -> Result<HashMap<Address, Address>, AppError> {
        self.chainlink_feeds
            .iter()
            .map(|(token, feed)| {
                let t = parse_address_hex(token).ok_or_else(|| {
                    AppError::InvalidAddress(format!("chainlink_feeds key {token}"))
                })?;
                let f = parse_address_hex(feed).ok_or_else(|| {
                    AppError::InvalidAddress(format!("chainlink_feeds:{token} -> {feed}"))
                })?;
                Ok((t, f))
            })
            .collect()
    }

    pub fn signer(&self) -> Result<PrivateKeySigner, AppError> {
        let key = self
            .wallet_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AppError::Config("WALLET_KEY is missing".to_string()))?;
        PrivateKeySigner::from_str(key)
            .map_err(|e| AppError::Config(format!("Invalid WALLET_KEY: {e}")))
    }

    pub fn receipt_poll(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_ms.max(100))
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_millis(self.receipt_timeout_ms.max(self.receipt_poll_ms).max(1_000))
    }

    pub fn effective_log_level(&self) -> &str {
        if self.debug { "debug" } else { &self.log_level }
    }
}
