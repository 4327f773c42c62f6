// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::domain::error::MigrationError;
use crate::domain::flow::Flow;
use crate::domain::instruction::{Instruction, Operation, ProtocolContext, Target};
use crate::services::flow::financing::FinancingPlan;
use alloy::primitives::Bytes;
use alloy::sol;
use alloy::sol_types::{SolCall, SolInterface, SolValue};
use alloy_sol_types::{Revert, SolError};

sol! {
    #[sol(rpc)]
    interface MigrationRouter {
        function executeFinanced(
            uint8 provider,
            address token,
            uint256 amount,
            ProtocolInstruction[] calldata instructions
        ) external;

        function authorizeInstructions(ProtocolInstruction[] calldata instructions, address caller)
            external
            view
            returns (address[] memory targets, bytes[] memory data);

        function deauthorizeInstructions(ProtocolInstruction[] calldata instructions, address caller)
            external
            view
            returns (address[] memory targets, bytes[] memory data);

        error UnknownGateway(string name);
        error InvalidInput(uint256 step, uint256 index);
        error StepFailed(uint256 step, bytes reason);
        error InsufficientRepayment(address token, uint256 required, uint256 available);
        error UnsupportedOperation(uint256 step, uint8 op);
        error NotAuthorized(address caller);
        error FinancingProviderDisabled(uint8 provider);
    }

    struct InputPtr {
        uint256 index;
    }

    /// One step as the router gateway decodes it from `ProtocolInstruction.data`.
    struct LendingInstruction {
        uint8 op;
        address token;
        address user;
        uint256 amount;
        bytes context;
        InputPtr input;
    }

    struct ProtocolInstruction {
        string protocolName;
        bytes data;
    }

    struct MarketParams {
        address loanToken;
        address collateralToken;
        address oracle;
        address irm;
        uint256 lltv;
    }

    struct SubAccountContext {
        address borrowVault;
        address[] collateralVaults;
        uint8 subAccount;
    }
}

fn encode_context(instruction: &Instruction) -> Result<Bytes, MigrationError> {
    let encoded = match instruction.context() {
        ProtocolContext::SharedPool => Vec::new(),
        ProtocolContext::VersionedPool { pool } => pool.abi_encode(),
        ProtocolContext::PairIsolated(market) => MarketParams {
            loanToken: market.loan_token,
            collateralToken: market.collateral_token,
            oracle: market.oracle,
            irm: market.irm,
            lltv: market.lltv,
        }
        .abi_encode(),
        ProtocolContext::SubAccountVault(vault) => SubAccountContext {
            borrowVault: vault.borrow_vault,
            collateralVaults: vault.collateral_vaults.clone(),
            subAccount: vault.sub_account,
        }
        .abi_encode(),
        ProtocolContext::SwapVenue {
            token_out,
            amount_out,
        } => (*token_out, *amount_out).abi_encode_params(),
        ProtocolContext::Router => match (instruction.operation(), instruction.target()) {
            (Operation::Approve, Some(Target::Gateway(name))) => name.abi_encode(),
            (Operation::PushToken, Some(Target::Account(to))) => to.abi_encode(),
            (Operation::ToOutput, _) => Vec::new(),
            (op, target) => {
                return Err(MigrationError::MissingField(format!(
                    "{op} needs a {} target, got {target:?}",
                    if op == Operation::Approve {
                        "gateway"
                    } else {
                        "account"
                    }
                )));
            }
        },
    };
    Ok(encoded.into())
}

/// Encode one instruction the way its gateway decodes it.
pub fn encode_instruction(instruction: &Instruction) -> Result<ProtocolInstruction, MigrationError> {
    let lending = LendingInstruction {
        op: instruction.operation().code(),
        token: instruction.token(),
        user: instruction.user(),
        amount: instruction.literal_amount(),
        context: encode_context(instruction)?,
        input: InputPtr {
            index: instruction.amount_source().wire_index(),
        },
    };
    Ok(ProtocolInstruction {
        protocolName: instruction.protocol().name.clone(),
        data: lending.abi_encode().into(),
    })
}

pub fn encode_flow(flow: &Flow) -> Result<Vec<ProtocolInstruction>, MigrationError> {
    flow.instructions().iter().map(encode_instruction).collect()
}

/// Calldata for the router entry point that borrows, runs the flow and settles.
pub fn financed_calldata(flow: &Flow, plan: &FinancingPlan) -> Result<Bytes, MigrationError> {
    let call = MigrationRouter::executeFinancedCall {
        provider: plan.provider_kind.code(),
        token: plan.token,
        amount: plan.requested_amount,
        instructions: encode_flow(flow)?,
    };
    Ok(call.abi_encode().into())
}

pub fn decode_router_revert(revert_data: &[u8]) -> String {
    if revert_data.is_empty() {
        return "Reverted with no data (OOG or empty)".to_string();
    }

    if let Ok(decoded) = MigrationRouter::MigrationRouterErrors::abi_decode(revert_data) {
        return match decoded {
            MigrationRouter::MigrationRouterErrors::UnknownGateway(e) => {
                format!("Unknown gateway '{}'", e.name)
            }
            MigrationRouter::MigrationRouterErrors::InvalidInput(e) => {
                format!("Step {} references missing output {}", e.step, e.index)
            }
            MigrationRouter::MigrationRouterErrors::StepFailed(e) => {
                let inner = match Revert::abi_decode(&e.reason) {
                    Ok(revert) => revert.reason().to_string(),
                    Err(_) => String::from_utf8(e.reason.to_vec())
                        .unwrap_or_else(|_| format!("0x{}", hex::encode(&e.reason))),
                };
                format!("Step {} failed: {}", e.step, inner)
            }
            MigrationRouter::MigrationRouterErrors::InsufficientRepayment(e) => format!(
                "Financing short: needed {} of token {:?}, had {}",
                e.required, e.token, e.available
            ),
            MigrationRouter::MigrationRouterErrors::UnsupportedOperation(e) => {
                format!("Step {} uses unsupported operation {}", e.step, e.op)
            }
            MigrationRouter::MigrationRouterErrors::NotAuthorized(e) => {
                format!("Caller {:?} has not authorized the router", e.caller)
            }
            MigrationRouter::MigrationRouterErrors::FinancingProviderDisabled(e) => {
                format!("Financing provider {} disabled on router", e.provider)
            }
        };
    }

    if let Ok(msg) = Revert::abi_decode(revert_data) {
        return format!("Standard Revert: {}", msg.reason());
    }

    format!("Unknown Revert: 0x{}", hex::encode(revert_data))
}
