use alloy::primitives::{Address, U256};
use oxidity_migrator::domain::instruction::{
    AmountSource, MarketParams, Operation, ProtocolContext, ProtocolFamily, ProtocolId, Target,
    VaultContext,
};
use oxidity_migrator::infrastructure::data::router_abi::{encode_flow, financed_calldata};
use oxidity_migrator::services::flow::allocator::{PricedLeg, allocate};
use oxidity_migrator::services::flow::builder::{
    CollateralLeg, FinancingHint, MigrationRequest, ProtocolEndpoint, build_migration_flow,
};
use oxidity_migrator::services::flow::context::{
    RawContextParams, resolve_context, resolve_destination_context,
};
use oxidity_migrator::services::flow::financing::{
    FinancingProviderKind, FinancingProviders, ProviderTerms, wrap_with_financing,
};
use std::collections::HashMap;

const USER: Address = Address::new([0x01; 20]);
const ROUTER: Address = Address::new([0x5E; 20]);
const USDC: Address = Address::new([0xC0; 20]);
const WETH: Address = Address::new([0xE1; 20]);
const WBTC: Address = Address::new([0xB1; 20]);

fn usd(dollars: u64) -> U256 {
    U256::from(dollars) * U256::from(100_000_000u64)
}

fn shared(name: &str) -> ProtocolEndpoint {
    ProtocolEndpoint {
        id: ProtocolId::new(ProtocolFamily::SharedPool, name),
        context: ProtocolContext::SharedPool,
    }
}

fn balancer() -> FinancingProviders {
    FinancingProviders::new(HashMap::from([(
        FinancingProviderKind::BalancerV2,
        ProviderTerms {
            premium_bps: 0,
            all_tokens: true,
            tokens: vec![],
        },
    )]))
}

fn request(legs: Vec<CollateralLeg>, debt: u64) -> MigrationRequest {
    MigrationRequest {
        user: USER,
        source: shared("aave-v3"),
        destination: shared("spark"),
        debt_token: USDC,
        debt_amount: U256::from(debt),
        repay_all: false,
        legs,
        financing: FinancingHint {
            provider: FinancingProviderKind::BalancerV2,
            premium_bps: 0,
            buffer_bps: 0,
        },
        settlement: ROUTER,
        allocation: None,
    }
}

fn leg(token: Address, amount: u64) -> CollateralLeg {
    CollateralLeg {
        token,
        amount: U256::from(amount),
        withdraw_max: false,
    }
}

#[test]
fn single_collateral_shared_pool_migration_has_six_steps() {
    let flow = build_migration_flow(&request(vec![leg(WETH, 5)], 1_000)).expect("flow");
    assert_eq!(
        flow.operations(),
        vec![
            Operation::Repay,
            Operation::WithdrawCollateral,
            Operation::Approve,
            Operation::DepositCollateral,
            Operation::Borrow,
            Operation::PushToken,
        ]
    );
    let ix = flow.instructions();
    assert_eq!(ix[0].literal_amount(), U256::from(1_000u64));
    assert_eq!(ix[0].amount_source(), AmountSource::Literal);
    // withdraw produced slot 1 (repay took 0); approve and deposit read it
    assert_eq!(ix[2].amount_source().reference().map(|r| r.index()), Some(1));
    assert_eq!(ix[3].amount_source().reference().map(|r| r.index()), Some(1));
    assert_eq!(ix[2].target(), Some(&Target::Gateway("spark".into())));
    // borrow lands after the approve placeholder slot
    assert_eq!(ix[5].amount_source().reference().map(|r| r.index()), Some(3));
    assert_eq!(ix[5].target(), Some(&Target::Account(ROUTER)));
    assert!(flow.references_are_backward());
}

#[test]
fn two_collateral_split_keeps_every_unit() {
    let legs = [
        PricedLeg {
            token: WETH,
            decimals: 18,
            balance: U256::from(10u64).pow(U256::from(18u64)),
            price_usd: usd(3_000),
        },
        PricedLeg {
            token: WBTC,
            decimals: 18,
            balance: U256::from(10u64).pow(U256::from(18u64)),
            price_usd: usd(1_000),
        },
    ];
    let allocation = allocate(U256::from(1_001u64), &legs);
    assert_eq!(allocation[0].proportion_bps, 7_500);
    assert_eq!(allocation[1].proportion_bps, 2_500);
    assert_eq!(allocation[0].allocated_amount, U256::from(751u64));
    assert_eq!(allocation[1].allocated_amount, U256::from(250u64));

    let mut req = request(vec![leg(WETH, 1), leg(WBTC, 1)], 1_001);
    req.allocation = Some(allocation);
    let flow = build_migration_flow(&req).expect("multi-leg flow");
    let borrows = flow
        .operations()
        .into_iter()
        .filter(|op| *op == Operation::Borrow)
        .count();
    assert_eq!(borrows, 1);
}

#[test]
fn allocation_sums_to_total_for_awkward_prices() {
    let legs: Vec<PricedLeg> = [(0x11u8, 7u64, 1_234u64), (0x22, 3, 987), (0x33, 11, 5)]
        .into_iter()
        .map(|(byte, balance, price)| PricedLeg {
            token: Address::new([byte; 20]),
            decimals: 6,
            balance: U256::from(balance),
            price_usd: usd(price),
        })
        .collect();
    for total in [1u64, 2, 999, 1_000_003, 77_777_777] {
        let out = allocate(U256::from(total), &legs);
        let sum = out
            .iter()
            .fold(U256::ZERO, |acc, l| acc + l.allocated_amount);
        assert_eq!(sum, U256::from(total), "total {total}");
        assert_eq!(out.iter().map(|l| l.proportion_bps).sum::<u64>(), 10_000);
    }
}

#[test]
fn destination_sub_account_takes_lowest_free_index() {
    let raw = |sub_account| RawContextParams::Vault {
        borrow_vault: Some(Address::new([0xB0; 20])),
        collateral_vaults: vec![Address::new([0xC1; 20])],
        sub_account,
    };
    let source = resolve_context(ProtocolFamily::SubAccountVault, &raw(Some(3))).expect("source");
    let destination =
        resolve_destination_context(ProtocolFamily::SubAccountVault, &raw(None), &source, &[0, 3])
            .expect("destination");
    assert_eq!(destination.as_vault().map(|v| v.sub_account), Some(1));
}

#[test]
fn isolated_market_refuses_second_collateral() {
    let market = ProtocolEndpoint {
        id: ProtocolId::new(ProtocolFamily::PairIsolated, "morpho-blue"),
        context: ProtocolContext::PairIsolated(MarketParams {
            loan_token: USDC,
            collateral_token: WETH,
            oracle: Address::new([0x0A; 20]),
            irm: Address::new([0x0B; 20]),
            lltv: U256::from(860_000_000_000_000_000u64),
        }),
    };
    let mut req = request(vec![leg(WETH, 1), leg(WBTC, 1)], 1_000);
    req.destination = market;
    let err = build_migration_flow(&req).expect_err("two legs into one market");
    assert_eq!(err.kind(), "isolation_violation");
}

#[test]
fn vault_to_vault_reads_balance_before_withdraw() {
    let vault = |sub_account, collateral: u8| ProtocolEndpoint {
        id: ProtocolId::new(ProtocolFamily::SubAccountVault, "euler"),
        context: ProtocolContext::SubAccountVault(VaultContext {
            borrow_vault: Address::new([0xB0; 20]),
            collateral_vaults: vec![Address::new([collateral; 20])],
            sub_account,
        }),
    };
    let mut req = request(vec![leg(WETH, 5)], 1_000);
    req.source = vault(0, 0xC1);
    req.destination = vault(1, 0xC2);
    let flow = build_migration_flow(&req).expect("vault flow");
    let ix = flow.instructions();
    assert_eq!(ix[1].operation(), Operation::GetSupplyBalance);
    assert_eq!(ix[2].operation(), Operation::WithdrawCollateral);
    assert_eq!(ix[2].amount_source().reference().map(|r| r.index()), Some(1));
    for (pos, instruction) in ix.iter().enumerate() {
        if let Some(reference) = instruction.amount_source().reference() {
            let producer = flow.slot(reference).expect("slot exists").producer;
            assert!(producer < pos, "instruction {pos} reads a later slot");
        }
    }
}

#[test]
fn financed_flow_encodes_for_the_router() {
    let mut req = request(vec![leg(WETH, 5)], 1_000);
    req.financing.buffer_bps = 30;
    let flow = build_migration_flow(&req).expect("flow");
    let plan = wrap_with_financing(
        &flow,
        req.requested_amount(),
        FinancingProviderKind::BalancerV2,
        0,
        30,
        &balancer(),
    )
    .expect("plan");
    assert_eq!(plan.required_amount, U256::from(1_003u64));
    assert_eq!(plan.settlement, ROUTER);

    let encoded = encode_flow(&flow).expect("encode");
    assert_eq!(encoded.len(), flow.len());
    let calldata = financed_calldata(&flow, &plan).expect("calldata");
    assert!(calldata.len() > 4);
}

#[test]
fn provider_without_token_is_unavailable() {
    let flow = build_migration_flow(&request(vec![leg(WETH, 5)], 1_000)).expect("flow");
    let providers = FinancingProviders::new(HashMap::from([(
        FinancingProviderKind::MorphoBlue,
        ProviderTerms {
            premium_bps: 0,
            all_tokens: false,
            tokens: vec![WETH],
        },
    )]));
    let err = wrap_with_financing(
        &flow,
        U256::from(1_000u64),
        FinancingProviderKind::MorphoBlue,
        0,
        0,
        &providers,
    )
    .expect_err("USDC not lent");
    assert_eq!(err.kind(), "provider_unavailable");
}
