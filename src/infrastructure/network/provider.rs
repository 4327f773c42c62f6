// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::domain::error::AppError;
use alloy::network::Ethereum;
use alloy::providers::{Provider, RootProvider};
use url::Url;

pub type HttpProvider = RootProvider<Ethereum>;

pub struct ConnectionFactory;

impl ConnectionFactory {
    pub fn http(rpc_url: &str) -> Result<HttpProvider, AppError> {
        let url =
            Url::parse(rpc_url).map_err(|e| AppError::Config(format!("Invalid RPC URL: {}", e)))?;
        Ok(RootProvider::new_http(url))
    }

    /// Connect and make sure the node serves the configured chain.
    pub async fn http_checked(rpc_url: &str, chain_id: u64) -> Result<HttpProvider, AppError> {
        let provider = Self::http(rpc_url)?;
        let remote = provider
            .get_chain_id()
            .await
            .map_err(|e| AppError::Connection(format!("{rpc_url}: {e}")))?;
        if remote != chain_id {
            return Err(AppError::Config(format!(
                "RPC serves chain {remote}, configuration expects {chain_id}"
            )));
        }
        tracing::info!(target: "provider", chain_id, "Connected to RPC");
        Ok(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_url() {
        let err = ConnectionFactory::http("not a url").err().expect("invalid url");
        assert!(matches!(err, AppError::Config(_)));
    }
}
