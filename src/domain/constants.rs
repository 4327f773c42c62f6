// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

// =============================================================================
// INSTRUCTION WIRE CONSTANTS
// =============================================================================

/// Input index meaning "use the literal amount on this instruction".
pub const LITERAL_INPUT_INDEX: u64 = 999;

/// Output slots must stay addressable below the literal sentinel.
pub const MAX_OUTPUT_SLOTS: usize = LITERAL_INPUT_INDEX as usize;

/// Gateway name the router registers for its own plumbing operations.
pub const ROUTER_GATEWAY: &str = "router";

// =============================================================================
// FIXED POINT
// =============================================================================

pub const BPS_DENOMINATOR: u64 = 10_000;

/// Oracle prices are USD with 8 decimals (Chainlink convention).
pub const USD_PRICE_DECIMALS: u8 = 8;

/// Token balances are normalized to 18 decimals before pricing.
pub const NORMALIZED_DECIMALS: u8 = 18;

pub const WAD: u128 = 1_000_000_000_000_000_000;

// =============================================================================
// SUB-ACCOUNT VAULTS
// =============================================================================

pub const MAX_SUB_ACCOUNT: u8 = u8::MAX;

// =============================================================================
// FINANCING & RISK DEFAULTS
// =============================================================================

pub const DEFAULT_BUFFER_BPS: u32 = 30;
pub const MAX_FINANCING_BPS: u32 = 5_000;

/// 1.05 expressed in bps of a health factor of 1.0.
pub const DEFAULT_MIN_HEALTH_FACTOR_BPS: u64 = 10_500;
pub const DEFAULT_WARN_HEALTH_FACTOR_BPS: u64 = 12_000;

pub const CHAINLINK_STALENESS_SECS: u64 = 3_600;

// =============================================================================
// EXECUTION
// =============================================================================

pub const DEFAULT_RECEIPT_POLL_MS: u64 = 1_000;
pub const DEFAULT_RECEIPT_TIMEOUT_MS: u64 = 120_000;

/// EIP-5792 call bundle status codes.
pub const CALLS_STATUS_PENDING: u64 = 100;
pub const CALLS_STATUS_CONFIRMED: u64 = 200;
