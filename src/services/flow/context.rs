// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::domain::constants::MAX_SUB_ACCOUNT;
use crate::domain::error::MigrationError;
use crate::domain::instruction::{
    MarketParams, ProtocolContext, ProtocolFamily, VaultContext,
};
use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// Loosely-typed addressing parameters as they arrive from callers.
///
/// Every field is optional so that a missing value surfaces as
/// `MissingField` instead of a deserialization error.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum RawContextParams {
    Empty,
    Pool {
        pool_id: Option<Address>,
    },
    Market {
        loan_token: Option<Address>,
        collateral_token: Option<Address>,
        oracle: Option<Address>,
        irm: Option<Address>,
        lltv: Option<U256>,
    },
    Vault {
        borrow_vault: Option<Address>,
        #[serde(default)]
        collateral_vaults: Vec<Address>,
        sub_account: Option<u8>,
    },
    Swap {
        token_out: Option<Address>,
        amount_out: Option<U256>,
    },
}

impl RawContextParams {
    pub fn shape(&self) -> &'static str {
        match self {
            RawContextParams::Empty => "empty",
            RawContextParams::Pool { .. } => "pool",
            RawContextParams::Market { .. } => "market",
            RawContextParams::Vault { .. } => "vault",
            RawContextParams::Swap { .. } => "swap",
        }
    }
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, MigrationError> {
    value.ok_or_else(|| MigrationError::MissingField(field.to_string()))
}

/// Turn raw parameters into the context shape of `family`.
pub fn resolve_context(
    family: ProtocolFamily,
    raw: &RawContextParams,
) -> Result<ProtocolContext, MigrationError> {
    match (family, raw) {
        (ProtocolFamily::SharedPool, RawContextParams::Empty) => Ok(ProtocolContext::SharedPool),
        (ProtocolFamily::Router, RawContextParams::Empty) => Ok(ProtocolContext::Router),
        (ProtocolFamily::VersionedPool, RawContextParams::Pool { pool_id }) => {
            Ok(ProtocolContext::VersionedPool {
                pool: required(*pool_id, "pool_id")?,
            })
        }
        (
            ProtocolFamily::PairIsolated,
            RawContextParams::Market {
                loan_token,
                collateral_token,
                oracle,
                irm,
                lltv,
            },
        ) => Ok(ProtocolContext::PairIsolated(MarketParams {
            loan_token: required(*loan_token, "loan_token")?,
            collateral_token: required(*collateral_token, "collateral_token")?,
            oracle: required(*oracle, "oracle")?,
            irm: required(*irm, "irm")?,
            lltv: required(*lltv, "lltv")?,
        })),
        (
            ProtocolFamily::SubAccountVault,
            RawContextParams::Vault {
                borrow_vault,
                collateral_vaults,
                sub_account,
            },
        ) => {
            if collateral_vaults.is_empty() {
                return Err(MigrationError::MissingField("collateral_vaults".into()));
            }
            Ok(ProtocolContext::SubAccountVault(VaultContext {
                borrow_vault: required(*borrow_vault, "borrow_vault")?,
                collateral_vaults: collateral_vaults.clone(),
                sub_account: required(*sub_account, "sub_account")?,
            }))
        }
        (
            ProtocolFamily::SwapVenue,
            RawContextParams::Swap {
                token_out,
                amount_out,
            },
        ) => Ok(ProtocolContext::SwapVenue {
            token_out: required(*token_out, "token_out")?,
            amount_out: required(*amount_out, "amount_out")?,
        }),
        (family, raw) => Err(MigrationError::UnsupportedFamily(format!(
            "{} parameters cannot address a {} protocol",
            raw.shape(),
            family
        ))),
    }
}

/// Resolve the context a position is moved *into*.
///
/// Sub-account vaults without an explicit index get the lowest free index
/// that differs from the source position's index.
pub fn resolve_destination_context(
    family: ProtocolFamily,
    raw: &RawContextParams,
    source: &ProtocolContext,
    used_sub_accounts: &[u8],
) -> Result<ProtocolContext, MigrationError> {
    let RawContextParams::Vault {
        borrow_vault,
        collateral_vaults,
        sub_account,
    } = raw
    else {
        return resolve_context(family, raw);
    };
    if family != ProtocolFamily::SubAccountVault {
        return resolve_context(family, raw);
    }

    let source_index = source.as_vault().map(|v| v.sub_account);
    // An explicit index equal to the source is only a collision when the
    // vault sets match too; the builder checks that.
    let index = match *sub_account {
        Some(explicit) => explicit,
        None => select_sub_account_index(source_index, used_sub_accounts)?,
    };

    tracing::debug!(
        target: "flow",
        sub_account = index,
        source_sub_account = ?source_index,
        used = ?used_sub_accounts,
        "Resolved destination sub-account"
    );

    resolve_context(
        family,
        &RawContextParams::Vault {
            borrow_vault: *borrow_vault,
            collateral_vaults: collateral_vaults.clone(),
            sub_account: Some(index),
        },
    )
}

/// Lowest index in `[0, 255]` that is neither used nor the source index.
pub fn select_sub_account_index(source: Option<u8>, used: &[u8]) -> Result<u8, MigrationError> {
    (0..=MAX_SUB_ACCOUNT)
        .find(|idx| Some(*idx) != source && !used.contains(idx))
        .ok_or_else(|| {
            MigrationError::UnresolvedContext("every sub-account index is already in use".into())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault_raw(sub_account: Option<u8>) -> RawContextParams {
        RawContextParams::Vault {
            borrow_vault: Some(Address::from([0x10; 20])),
            collateral_vaults: vec![Address::from([0x11; 20])],
            sub_account,
        }
    }

    #[test]
    fn picks_lowest_unused_index_skipping_source() {
        assert_eq!(select_sub_account_index(Some(3), &[0, 3]).unwrap(), 1);
        assert_eq!(select_sub_account_index(Some(0), &[]).unwrap(), 1);
        assert_eq!(select_sub_account_index(None, &[]).unwrap(), 0);
    }

    #[test]
    fn exhausted_sub_accounts_fail() {
        let used: Vec<u8> = (0..=u8::MAX).collect();
        let err = select_sub_account_index(None, &used).expect_err("no free index");
        assert_eq!(err.kind(), "unresolved_context");
    }

    #[test]
    fn shape_mismatch_is_unsupported_family() {
        let err = resolve_context(ProtocolFamily::VersionedPool, &RawContextParams::Empty)
            .expect_err("empty params cannot name a pool");
        assert!(matches!(err, MigrationError::UnsupportedFamily(_)));
    }

    #[test]
    fn missing_pool_id_is_missing_field() {
        let err = resolve_context(
            ProtocolFamily::VersionedPool,
            &RawContextParams::Pool { pool_id: None },
        )
        .expect_err("pool id required");
        assert_eq!(err, MigrationError::MissingField("pool_id".into()));
    }

    #[test]
    fn market_requires_every_component() {
        let err = resolve_context(
            ProtocolFamily::PairIsolated,
            &RawContextParams::Market {
                loan_token: Some(Address::from([1; 20])),
                collateral_token: Some(Address::from([2; 20])),
                oracle: Some(Address::from([3; 20])),
                irm: None,
                lltv: Some(U256::from(860_000_000_000_000_000u64)),
            },
        )
        .expect_err("irm missing");
        assert_eq!(err, MigrationError::MissingField("irm".into()));
    }

    #[test]
    fn source_vault_requires_explicit_index() {
        let err = resolve_context(ProtocolFamily::SubAccountVault, &vault_raw(None))
            .expect_err("source index must be known");
        assert_eq!(err, MigrationError::MissingField("sub_account".into()));
    }

    #[test]
    fn destination_vault_avoids_source_index() {
        let source = resolve_context(ProtocolFamily::SubAccountVault, &vault_raw(Some(3))).unwrap();
        let dest = resolve_destination_context(
            ProtocolFamily::SubAccountVault,
            &vault_raw(None),
            &source,
            &[0, 3],
        )
        .unwrap();
        assert_eq!(dest.as_vault().map(|v| v.sub_account), Some(1));

        let explicit = resolve_destination_context(
            ProtocolFamily::SubAccountVault,
            &vault_raw(Some(7)),
            &source,
            &[0, 3],
        )
        .unwrap();
        assert_eq!(explicit.as_vault().map(|v| v.sub_account), Some(7));
    }

    #[test]
    fn raw_params_deserialize_with_missing_fields() {
        let raw: RawContextParams =
            serde_json::from_str(r#"{"shape":"vault","collateral_vaults":[]}"#).unwrap();
        let err = resolve_context(ProtocolFamily::SubAccountVault, &raw).unwrap_err();
        assert_eq!(err, MigrationError::MissingField("collateral_vaults".into()));
    }
}
