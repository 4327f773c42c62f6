// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::domain::error::AppError;
use crate::infrastructure::data::router_abi::decode_router_revert;
use crate::infrastructure::network::provider::HttpProvider;
use alloy::providers::Provider;
use alloy::rpc::types::eth::TransactionRequest;
use alloy::rpc::types::eth::simulate::{SimBlock, SimCallResult, SimulatePayload};
use alloy::transports::{RpcError as TransportRpcError, TransportError};
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationOutcome {
    pub success: bool,
    pub gas_used: u64,
    pub return_data: Vec<u8>,
    pub reason: Option<String>,
}

static ETH_SIMULATE_MISSING: OnceLock<()> = OnceLock::new();

#[derive(Clone, Debug)]
struct RpcErrorInfo {
    code: Option<i64>,
    message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimulationBackendMethod {
    EthSimulate,
    EthCall,
}

#[derive(Clone, Debug)]
pub struct SimulationBackend {
    order: Vec<SimulationBackendMethod>,
}

impl SimulationBackend {
    pub fn new(config: impl AsRef<str>) -> Self {
        let primary = SimulationBackendMethod::from_config(config.as_ref());
        let mut order = vec![primary];
        for candidate in [SimulationBackendMethod::EthSimulate, SimulationBackendMethod::EthCall] {
            if candidate != primary {
                order.push(candidate);
            }
        }
        Self { order }
    }

    pub fn order(&self) -> &[SimulationBackendMethod] {
        &self.order
    }
}

impl SimulationBackendMethod {
    fn from_config(config: &str) -> Self {
        for token in config
            .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            let lowercase = token.to_lowercase();
            match lowercase.as_str() {
                "eth_call" | "ethcall" | "call" => return Self::EthCall,
                "eth_simulate" | "ethsimulate" | "eth_simulatev1" | "ethsimulatev1"
                | "simulate" | "anvil" => return Self::EthSimulate,
                _ => {}
            }
        }
        Self::EthSimulate
    }
}

/// Read-only execution of call sequences against the latest state.
#[derive(Clone)]
pub struct Simulator {
    provider: HttpProvider,
    backend: SimulationBackend,
}

impl Simulator {
    pub fn new(provider: HttpProvider, backend: SimulationBackend) -> Self {
        Self { provider, backend }
    }

    /// Simulate `calls` in order within one block; later calls see earlier effects.
    pub async fn simulate_calls(
        &self,
        calls: &[TransactionRequest],
    ) -> Result<Vec<SimulationOutcome>, AppError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        for method in self.backend.order() {
            match method {
                SimulationBackendMethod::EthSimulate => {
                    if let Some(outcomes) = self.try_calls_with_eth_simulate(calls).await? {
                        if outcomes.len() == calls.len() {
                            return Ok(outcomes);
                        }
                        tracing::warn!(
                            target: "simulation",
                            backend = "eth_simulate",
                            expected = calls.len(),
                            got = outcomes.len(),
                            "simulation outcome count mismatch; falling back"
                        );
                    }
                }
                SimulationBackendMethod::EthCall => return self.calls_with_eth_call(calls).await,
            }
        }
        self.calls_with_eth_call(calls).await
    }

    async fn try_calls_with_eth_simulate(
        &self,
        calls: &[TransactionRequest],
    ) -> Result<Option<Vec<SimulationOutcome>>, AppError> {
        if ETH_SIMULATE_MISSING.get().is_some() {
            return Ok(None);
        }
        let payload = SimulatePayload {
            block_state_calls: vec![SimBlock {
                block_overrides: None,
                state_overrides: None,
                calls: calls.to_vec(),
            }],
            trace_transfers: false,
            validation: false,
            return_full_transactions: false,
        };

        match self.provider.simulate(&payload).await {
            Ok(blocks) => {
                let outcomes: Vec<SimulationOutcome> = blocks
                    .iter()
                    .flat_map(|blk| blk.calls.iter().map(sim_call_result_to_outcome))
                    .collect();
                if outcomes.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(outcomes))
                }
            }
            Err(e) if rpc_method_unavailable(&e) => {
                if ETH_SIMULATE_MISSING.set(()).is_ok() {
                    tracing::warn!(
                        target: "simulation",
                        "eth_simulateV1 not available on node; falling back"
                    );
                }
                Ok(None)
            }
            Err(e) => Ok(Some(rejected_simulation_outcomes(calls.len(), &e))),
        }
    }

    /// eth_call cannot carry state between calls, so a multi-call sequence
    /// reports failure instead of a misleading pass.
    async fn calls_with_eth_call(
        &self,
        calls: &[TransactionRequest],
    ) -> Result<Vec<SimulationOutcome>, AppError> {
        if calls.len() > 1 {
            return Ok(non_stateful_eth_call_outcomes(calls.len()));
        }
        let mut outcomes = Vec::with_capacity(calls.len());
        for call in calls {
            outcomes.push(self.call_with_eth_call(call.clone()).await);
        }
        Ok(outcomes)
    }

    async fn call_with_eth_call(&self, req: TransactionRequest) -> SimulationOutcome {
        let gas_used = match self.provider.estimate_gas(req.clone()).await {
            Ok(g) => g,
            Err(e) => {
                let msg = format!("estimate_gas failed: {e}");
                return SimulationOutcome {
                    success: false,
                    gas_used: 0,
                    return_data: msg.clone().into_bytes(),
                    reason: Some(msg),
                };
            }
        };

        match self.provider.call(req).await {
            Ok(bytes) => SimulationOutcome {
                success: true,
                gas_used,
                return_data: bytes.to_vec(),
                reason: None,
            },
            Err(e) => {
                let msg = format!("eth_call failed: {e}");
                SimulationOutcome {
                    success: false,
                    gas_used,
                    return_data: msg.clone().into_bytes(),
                    reason: Some(msg),
                }
            }
        }
    }
}

fn non_stateful_eth_call_outcomes(count: usize) -> Vec<SimulationOutcome> {
    let reason =
        "eth_call fallback is non-stateful for multi-call sequences; treating as failed simulation"
            .to_string();
    tracing::warn!(
        target: "simulation",
        call_count = count,
        "eth_call fallback cannot safely simulate dependent calls"
    );
    (0..count)
        .map(|_| SimulationOutcome {
            success: false,
            gas_used: 0,
            return_data: reason.as_bytes().to_vec(),
            reason: Some(reason.clone()),
        })
        .collect()
}

/// The node ran the simulation and refused it; its reason is the verdict.
fn rejected_simulation_outcomes(count: usize, err: &TransportError) -> Vec<SimulationOutcome> {
    let info = rpc_error_info(err);
    let reason = match info.code {
        Some(code) => format!("eth_simulateV1 failed: {} (code {code})", info.message),
        None => format!("eth_simulateV1 failed: {}", info.message),
    };
    tracing::warn!(
        target: "simulation",
        backend = "eth_simulate",
        rpc_code = info.code,
        reason = %reason,
        "eth_simulateV1 failed"
    );
    (0..count)
        .map(|_| SimulationOutcome {
            success: false,
            gas_used: 0,
            return_data: reason.as_bytes().to_vec(),
            reason: Some(reason.clone()),
        })
        .collect()
}

fn parse_rpc_error_from_text(text: &str) -> Option<RpcErrorInfo> {
    let parsed: serde_json::Value = serde_json::from_str(text).ok()?;
    let err = parsed.get("error").unwrap_or(&parsed);
    let code = err.get("code").and_then(|v| v.as_i64());
    let message = err
        .get("message")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    Some(RpcErrorInfo { code, message })
}

fn rpc_error_info(err: &TransportError) -> RpcErrorInfo {
    match err {
        TransportRpcError::ErrorResp(payload) => RpcErrorInfo {
            code: Some(payload.code),
            message: payload.message.to_string(),
        },
        TransportRpcError::DeserError { text, .. } => parse_rpc_error_from_text(text)
            .unwrap_or_else(|| RpcErrorInfo {
                code: None,
                message: err.to_string(),
            }),
        _ => RpcErrorInfo {
            code: None,
            message: err.to_string(),
        },
    }
}

pub(crate) fn rpc_method_unavailable(err: &TransportError) -> bool {
    let info = rpc_error_info(err);
    if matches!(info.code, Some(-32601)) {
        return true;
    }
    rpc_method_unavailable_message(&info.message)
}

fn rpc_method_unavailable_message(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    (msg.contains("method") && msg.contains("not found"))
        || (msg.contains("namespace") && msg.contains("disabled"))
        || msg.contains("not supported")
}

fn sim_call_result_to_outcome(call: &SimCallResult) -> SimulationOutcome {
    let success = call.error.is_none() && call.status;
    let reason = if success {
        None
    } else if !call.return_data.is_empty() {
        Some(decode_router_revert(&call.return_data))
    } else {
        call.error
            .as_ref()
            .map(|e| format!("{} (code {})", e.message, e.code))
            .or_else(|| Some(decode_router_revert(&call.return_data)))
    };
    if let Some(reason) = &reason {
        tracing::debug!(target: "simulation", reason = %reason, "Simulated call reverted");
    }
    SimulationOutcome {
        success,
        gas_used: call.gas_used,
        return_data: call.return_data.to_vec(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::data::router_abi::MigrationRouter;
    use alloy::primitives::{Address, Bytes, U256};
    use alloy::rpc::json_rpc::ErrorPayload;
    use alloy::rpc::types::eth::simulate::SimulateError;
    use alloy_sol_types::SolError;

    #[test]
    fn backend_config_picks_first_known_token() {
        let backend = SimulationBackend::new("debug,eth_call");
        assert_eq!(
            backend.order(),
            &[
                SimulationBackendMethod::EthCall,
                SimulationBackendMethod::EthSimulate
            ]
        );
        let default = SimulationBackend::new("mystery");
        assert_eq!(default.order()[0], SimulationBackendMethod::EthSimulate);
    }

    #[test]
    fn revert_data_wins_over_rpc_message() {
        let data = MigrationRouter::InsufficientRepayment {
            token: Address::from([7u8; 20]),
            required: U256::from(1_003u64),
            available: U256::from(1_000u64),
        }
        .abi_encode();
        let call = SimCallResult {
            return_data: Bytes::from(data),
            logs: Vec::new(),
            gas_used: 90_000,
            status: false,
            error: Some(SimulateError {
                code: 3,
                message: "execution reverted".to_string(),
            }),
        };
        let outcome = sim_call_result_to_outcome(&call);
        assert!(!outcome.success);
        let reason = outcome.reason.expect("reason");
        assert!(reason.contains("needed 1003"), "{reason}");
    }

    #[test]
    fn rpc_error_without_data_keeps_message() {
        let call = SimCallResult {
            return_data: Bytes::new(),
            logs: Vec::new(),
            gas_used: 21_000,
            status: false,
            error: Some(SimulateError {
                code: -32000,
                message: "out of gas".to_string(),
            }),
        };
        let outcome = sim_call_result_to_outcome(&call);
        assert_eq!(outcome.reason.as_deref(), Some("out of gas (code -32000)"));
    }

    #[test]
    fn unavailable_detection_matches_node_messages() {
        assert!(rpc_method_unavailable_message(
            "RPC error -32601: Method eth_simulateV1 not found"
        ));
        assert!(rpc_method_unavailable_message("wallet_sendCalls is not supported"));
        assert!(!rpc_method_unavailable_message("execution reverted: custom error"));
    }

    #[test]
    fn node_error_from_simulate_is_kept_as_reason() {
        let err: TransportError = TransportRpcError::ErrorResp(ErrorPayload {
            code: -38014,
            message: "insufficient funds for gas * price + value".into(),
            data: None,
        });
        assert!(!rpc_method_unavailable(&err));
        let outcomes = rejected_simulation_outcomes(3, &err);
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| !o.success));
        let reason = outcomes[0].reason.as_deref().expect("reason");
        assert!(reason.contains("insufficient funds for gas"), "{reason}");
        assert!(reason.contains("-38014"), "{reason}");
    }

    #[test]
    fn method_not_found_code_counts_as_unavailable() {
        let err: TransportError = TransportRpcError::ErrorResp(ErrorPayload {
            code: -32601,
            message: "the method eth_simulateV1 does not exist".into(),
            data: None,
        });
        assert!(rpc_method_unavailable(&err));
    }

    #[test]
    fn multi_call_eth_call_fallback_fails_closed() {
        let outcomes = non_stateful_eth_call_outcomes(3);
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| !o.success && o.reason.is_some()));
    }
}
