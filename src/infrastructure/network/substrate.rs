// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::common::parsing::parse_u64_flexible;
use crate::domain::constants::{CALLS_STATUS_CONFIRMED, CALLS_STATUS_PENDING};
use crate::domain::error::AppError;
use crate::domain::flow::Flow;
use crate::infrastructure::data::router_abi::{MigrationRouter, encode_flow, financed_calldata};
use crate::infrastructure::network::provider::HttpProvider;
use crate::infrastructure::network::simulation::{Simulator, rpc_method_unavailable};
use crate::services::execution::substrate::{
    DryRunOutcome, ExecutionMode, ExecutionSubstrate, SubmissionOutcome,
};
use crate::services::flow::financing::FinancingPlan;
use alloy::consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::primitives::{Address, B256, Bytes, TxKind, U256};
use alloy::providers::Provider;
use alloy::rpc::types::eth::{TransactionInput, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::{RpcError, TransportError};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// One call the user account has to send, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedCall {
    pub to: Address,
    pub data: Bytes,
}

impl PlannedCall {
    fn request(&self, from: Address) -> TransactionRequest {
        TransactionRequest {
            from: Some(from),
            to: Some(TxKind::Call(self.to)),
            value: Some(U256::ZERO),
            input: TransactionInput::new(self.data.clone()),
            ..Default::default()
        }
    }
}

/// Execution substrate backed by the migration router contract over JSON-RPC.
///
/// Batched mode goes through EIP-5792 `wallet_sendCalls`; sequential mode signs
/// and sends each call locally and waits for its receipt before the next.
pub struct RouterSubstrate {
    provider: HttpProvider,
    simulator: Simulator,
    signer: PrivateKeySigner,
    router: Address,
    chain_id: u64,
    receipt_poll: Duration,
    receipt_timeout: Duration,
}

impl RouterSubstrate {
    pub fn new(
        provider: HttpProvider,
        simulator: Simulator,
        signer: PrivateKeySigner,
        router: Address,
        chain_id: u64,
        receipt_poll: Duration,
        receipt_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            simulator,
            signer,
            router,
            chain_id,
            receipt_poll,
            receipt_timeout,
        }
    }

    fn caller(&self) -> Address {
        self.signer.address()
    }

    async fn authorization_calls(&self, flow: &Flow, revoke: bool) -> Result<Vec<PlannedCall>, AppError> {
        let router = MigrationRouter::new(self.router, self.provider.clone());
        let instructions = encode_flow(flow)?;
        let (targets, data) = if revoke {
            let out = router
                .deauthorizeInstructions(instructions, self.caller())
                .call()
                .await
                .map_err(|e| AppError::Connection(format!("deauthorizeInstructions: {e}")))?;
            (out.targets, out.data)
        } else {
            let out = router
                .authorizeInstructions(instructions, self.caller())
                .call()
                .await
                .map_err(|e| AppError::Connection(format!("authorizeInstructions: {e}")))?;
            (out.targets, out.data)
        };
        if targets.len() != data.len() {
            return Err(AppError::Validation {
                field: "authorizations".into(),
                message: format!("{} targets for {} payloads", targets.len(), data.len()),
            });
        }
        Ok(targets
            .into_iter()
            .zip(data)
            .filter(|(to, payload)| *to != Address::ZERO && !payload.is_empty())
            .map(|(to, data)| PlannedCall { to, data })
            .collect())
    }

    /// Authorizations first, then the financed router call.
    pub async fn planned_calls(
        &self,
        flow: &Flow,
        plan: &FinancingPlan,
    ) -> Result<Vec<PlannedCall>, AppError> {
        let mut calls = self.authorization_calls(flow, false).await?;
        calls.push(PlannedCall {
            to: self.router,
            data: financed_calldata(flow, plan)?,
        });
        Ok(calls)
    }

    async fn send_signed(&self, call: &PlannedCall) -> Result<B256, AppError> {
        let request = call.request(self.caller());
        let nonce = self
            .provider
            .get_transaction_count(self.caller())
            .pending()
            .await
            .map_err(|e| AppError::Connection(format!("nonce fetch failed: {e}")))?;
        let fees = self
            .provider
            .estimate_eip1559_fees()
            .await
            .map_err(|e| AppError::Connection(format!("fee estimate failed: {e}")))?;
        let gas = self
            .provider
            .estimate_gas(request)
            .await
            .map_err(|e| AppError::Connection(format!("gas estimate failed: {e}")))?;

        let mut tx = TxEip1559 {
            chain_id: self.chain_id,
            nonce,
            max_priority_fee_per_gas: fees.max_priority_fee_per_gas,
            max_fee_per_gas: fees.max_fee_per_gas,
            gas_limit: gas.saturating_add(gas / 5),
            to: TxKind::Call(call.to),
            value: U256::ZERO,
            access_list: Default::default(),
            input: call.data.clone(),
        };
        let sig = TxSignerSync::sign_transaction_sync(&self.signer, &mut tx)
            .map_err(|e| AppError::Initialization(format!("Sign tx failed: {e}")))?;
        let signed: TxEnvelope = tx.into_signed(sig).into();
        let raw = signed.encoded_2718();
        let pending = self
            .provider
            .send_raw_transaction(&raw)
            .await
            .map_err(|e| AppError::Connection(format!("send failed: {e}")))?;
        Ok(*pending.tx_hash())
    }

    /// `Ok(false)` when the transaction mined but reverted.
    async fn wait_for_receipt(&self, hash: B256) -> Result<bool, AppError> {
        let deadline = Instant::now() + self.receipt_timeout;
        loop {
            match self.provider.get_transaction_receipt(hash).await {
                Ok(Some(receipt)) => return Ok(receipt.status()),
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(target: "substrate", tx = %hash, error = %e, "Receipt poll failed");
                }
            }
            if Instant::now() >= deadline {
                return Err(AppError::Connection(format!(
                    "no receipt for {hash} after {:?}",
                    self.receipt_timeout
                )));
            }
            sleep(self.receipt_poll).await;
        }
    }

    /// Send calls one by one. Only a refusal before the first send is a
    /// rejection; anything later leaves chain state changed and is an error.
    async fn send_sequential(&self, calls: &[PlannedCall]) -> Result<SubmissionOutcome, AppError> {
        for (step, call) in calls.iter().enumerate() {
            let hash = match self.send_signed(call).await {
                Ok(hash) => hash,
                Err(e) if step == 0 => return Ok(SubmissionOutcome::Rejected(e.to_string())),
                Err(e) => return Err(e),
            };
            tracing::info!(target: "substrate", step, tx = %hash, to = %call.to, "Call sent");
            if !self.wait_for_receipt(hash).await? {
                let message = format!("call {step} ({hash}) reverted");
                if step == 0 {
                    return Ok(SubmissionOutcome::Rejected(message));
                }
                return Err(AppError::Connection(message));
            }
        }
        Ok(SubmissionOutcome::SequentialSuccess)
    }

    async fn send_batched(&self, calls: &[PlannedCall]) -> Result<SubmissionOutcome, AppError> {
        let params = json!([{
            "version": "2.0.0",
            "chainId": format!("{:#x}", self.chain_id),
            "from": format!("{:#x}", self.caller()),
            "atomicRequired": true,
            "calls": calls.iter().map(|c| json!({
                "to": format!("{:#x}", c.to),
                "data": c.data.to_string(),
                "value": "0x0",
            })).collect::<Vec<_>>(),
        }]);
        let response: serde_json::Value = match self
            .provider
            .raw_request("wallet_sendCalls".into(), params)
            .await
        {
            Ok(v) => v,
            Err(e) => return batch_send_failure(e),
        };
        let Some(id) = response
            .get("id")
            .and_then(|v| v.as_str())
            .or_else(|| response.as_str())
            .map(str::to_string)
        else {
            return Ok(SubmissionOutcome::Rejected(format!(
                "wallet_sendCalls returned no bundle id: {response}"
            )));
        };
        tracing::info!(target: "substrate", bundle = %id, calls = calls.len(), "Batch accepted");

        let deadline = Instant::now() + self.receipt_timeout;
        loop {
            let status: serde_json::Value = self
                .provider
                .raw_request("wallet_getCallsStatus".into(), json!([id]))
                .await
                .map_err(|e| AppError::Connection(format!("wallet_getCallsStatus: {e}")))?;
            match parse_calls_status(&status) {
                Some(code) if code == CALLS_STATUS_CONFIRMED => {
                    return Ok(SubmissionOutcome::BatchedSuccess);
                }
                // 4xx: never landed; 5xx: atomic batch reverted as a whole.
                Some(code) if code >= 400 => {
                    return Ok(SubmissionOutcome::Rejected(format!(
                        "batch {id} finished with status {code}"
                    )));
                }
                Some(code) if code >= CALLS_STATUS_PENDING => {}
                other => {
                    tracing::debug!(target: "substrate", bundle = %id, status = ?other, "Unrecognized batch status");
                }
            }
            if Instant::now() >= deadline {
                return Err(AppError::Connection(format!(
                    "batch {id} unresolved after {:?}",
                    self.receipt_timeout
                )));
            }
            sleep(self.receipt_poll).await;
        }
    }
}

/// Only an explicit answer from the node refuses the batch. A transport failure
/// may hit after the node took the calls, so it ends the attempt.
fn batch_send_failure(err: TransportError) -> Result<SubmissionOutcome, AppError> {
    if rpc_method_unavailable(&err) {
        return Ok(SubmissionOutcome::Rejected(format!(
            "wallet_sendCalls unsupported: {err}"
        )));
    }
    if matches!(err, RpcError::ErrorResp(_)) {
        return Ok(SubmissionOutcome::Rejected(format!(
            "wallet_sendCalls refused: {err}"
        )));
    }
    tracing::warn!(target: "substrate", error = %err, "Batch outcome unknown after transport failure");
    Err(AppError::Connection(format!("wallet_sendCalls: {err}")))
}

/// Accepts numeric or hex-string status codes.
fn parse_calls_status(status: &serde_json::Value) -> Option<u64> {
    let field = status.get("status")?;
    if let Some(code) = field.as_u64() {
        return Some(code);
    }
    parse_u64_flexible(field.as_str()?)
}

#[async_trait]
impl ExecutionSubstrate for RouterSubstrate {
    async fn dry_run(&self, flow: &Flow, plan: &FinancingPlan) -> Result<DryRunOutcome, AppError> {
        let calls = self.planned_calls(flow, plan).await?;
        let requests: Vec<TransactionRequest> =
            calls.iter().map(|c| c.request(self.caller())).collect();
        let outcomes = self.simulator.simulate_calls(&requests).await?;

        let gas_used = outcomes.iter().map(|o| o.gas_used).sum();
        if let Some((step, failed)) = outcomes.iter().enumerate().find(|(_, o)| !o.success) {
            let reason = failed
                .reason
                .clone()
                .unwrap_or_else(|| "reverted without reason".to_string());
            tracing::debug!(target: "substrate", step, reason = %reason, "Dry run reverted");
            return Ok(DryRunOutcome {
                success: false,
                gas_used,
                reason: Some(reason),
            });
        }
        Ok(DryRunOutcome::passed(gas_used))
    }

    async fn execute(
        &self,
        flow: &Flow,
        plan: &FinancingPlan,
        mode: ExecutionMode,
    ) -> Result<SubmissionOutcome, AppError> {
        let calls = match self.planned_calls(flow, plan).await {
            Ok(calls) => calls,
            Err(e) => return Ok(SubmissionOutcome::Rejected(e.to_string())),
        };
        tracing::info!(target: "substrate", %mode, calls = calls.len(), "Submitting migration");
        match mode {
            ExecutionMode::Batched => self.send_batched(&calls).await,
            ExecutionMode::Sequential => self.send_sequential(&calls).await,
        }
    }

    async fn revoke(&self, flow: &Flow) -> Result<(), AppError> {
        let calls = self.authorization_calls(flow, true).await?;
        for call in &calls {
            let hash = self.send_signed(call).await?;
            if !self.wait_for_receipt(hash).await? {
                return Err(AppError::Connection(format!("revocation {hash} reverted")));
            }
        }
        tracing::info!(target: "substrate", revoked = calls.len(), "Authorizations revoked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::rpc::json_rpc::ErrorPayload;
    use alloy::transports::TransportErrorKind;

    #[test]
    fn calls_status_accepts_number_and_hex() {
        assert_eq!(parse_calls_status(&json!({"status": 200})), Some(200));
        assert_eq!(parse_calls_status(&json!({"status": "0xc8"})), Some(200));
        assert_eq!(parse_calls_status(&json!({"status": "100"})), Some(100));
        assert_eq!(parse_calls_status(&json!({"state": "CONFIRMED"})), None);
    }

    fn node_error(code: i64, message: &'static str) -> TransportError {
        RpcError::ErrorResp(ErrorPayload {
            code,
            message: message.into(),
            data: None,
        })
    }

    #[test]
    fn batch_refusals_allow_sequential_retry() {
        let unsupported = batch_send_failure(node_error(-32601, "method not found"));
        assert!(matches!(unsupported, Ok(SubmissionOutcome::Rejected(_))));
        let refused = batch_send_failure(node_error(4100, "user rejected the request"));
        match refused {
            Ok(SubmissionOutcome::Rejected(reason)) => {
                assert!(reason.contains("user rejected"), "{reason}")
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn dropped_connection_during_batch_send_is_terminal() {
        let dropped = batch_send_failure(TransportErrorKind::custom_str("connection closed"));
        match dropped {
            Err(AppError::Connection(msg)) => assert!(msg.contains("connection closed"), "{msg}"),
            other => panic!("expected connection error, got {other:?}"),
        }
        let gone = batch_send_failure(RpcError::Transport(TransportErrorKind::BackendGone));
        assert!(matches!(gone, Err(AppError::Connection(_))));
    }

    #[test]
    fn planned_call_request_targets_router() {
        let call = PlannedCall {
            to: Address::from([0x22; 20]),
            data: Bytes::from(vec![0xab, 0xcd]),
        };
        let req = call.request(Address::from([0x11; 20]));
        assert_eq!(req.to, Some(TxKind::Call(Address::from([0x22; 20]))));
        assert_eq!(req.from, Some(Address::from([0x11; 20])));
        assert_eq!(req.value, Some(U256::ZERO));
    }
}
