// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use clap::{Args, Parser, Subcommand};
use oxidity_migrator::app::config::MigratorSettings;
use oxidity_migrator::app::logging::setup_logging;
use oxidity_migrator::domain::error::AppError;
use oxidity_migrator::infrastructure::data::market_registry::MarketRegistry;
use oxidity_migrator::infrastructure::network::price_feed::ChainlinkOracle;
use oxidity_migrator::infrastructure::network::provider::{ConnectionFactory, HttpProvider};
use oxidity_migrator::infrastructure::network::simulation::{SimulationBackend, Simulator};
use oxidity_migrator::infrastructure::network::substrate::RouterSubstrate;
use oxidity_migrator::services::execution::orchestrator::{AttemptReport, Orchestrator};
use oxidity_migrator::services::execution::substrate::ExecutionMode;
use oxidity_migrator::services::flow::discovery::vet_destination;
use oxidity_migrator::services::flow::intent::{
    DebtSwapIntent, MigrationIntent, MigrationPlan, PlanningEnv,
};
use oxidity_migrator::services::flow::prices::PriceSnapshot;
use serde::Serialize;
use std::fs;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about = "oxidity migrator")]
struct Cli {
    /// Path to config file (default: config.{toml,yaml,...})
    #[arg(long)]
    config: Option<String>,

    /// Emit JSON logs (overrides config/env)
    #[arg(long, default_value_t = false)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the flow and financing envelope without touching chain state
    Plan(IntentArgs),
    /// Plan, simulate and submit
    Execute(ExecuteArgs),
}

#[derive(Args, Debug)]
struct IntentArgs {
    /// JSON intent file
    #[arg(long)]
    intent: String,

    /// Intent is a same-protocol debt swap instead of a migration
    #[arg(long, default_value_t = false)]
    debt_swap: bool,
}

#[derive(Args, Debug)]
struct ExecuteArgs {
    #[command(flatten)]
    intent: IntentArgs,

    /// Preferred execution mode (batched|sequential); overrides config
    #[arg(long)]
    mode: Option<String>,

    /// Keep router authorizations in place after success
    #[arg(long, default_value_t = false)]
    keep_authorization: bool,
}

#[derive(Serialize)]
struct ExecutionSummary<'a> {
    plan: &'a MigrationPlan,
    attempt: &'a AttemptReport,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse();
    let settings = MigratorSettings::load_with_path(cli.config.as_deref())?;
    setup_logging(
        settings.effective_log_level(),
        cli.log_json || settings.log_json,
    );

    let provider = ConnectionFactory::http_checked(&settings.rpc_url, settings.chain_id).await?;

    match cli.command {
        Command::Plan(args) => {
            let plan = plan_from_file(&settings, &provider, &args).await?;
            print_json(&plan)
        }
        Command::Execute(args) => {
            let plan = plan_from_file(&settings, &provider, &args.intent).await?;
            let preferred = match args.mode.as_deref() {
                Some(raw) => ExecutionMode::from_str(raw).map_err(AppError::Config)?,
                None => settings.execution_mode()?,
            };
            let revoke = settings.revoke_after_success && !args.keep_authorization;

            let simulator = Simulator::new(
                provider.clone(),
                SimulationBackend::new(&settings.simulation_backend),
            );
            let substrate = RouterSubstrate::new(
                provider.clone(),
                simulator,
                settings.signer()?,
                settings.router_address,
                settings.chain_id,
                settings.receipt_poll(),
                settings.receipt_timeout(),
            );
            let orchestrator = Orchestrator::new(Arc::new(substrate), preferred, revoke);

            let cancel = CancellationToken::new();
            let ctrl_c_token = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!(target: "main", "Interrupt received; cancelling before execution");
                    ctrl_c_token.cancel();
                }
            });

            let report = orchestrator.run(&plan.flow, &plan.financing, &cancel).await;
            print_json(&ExecutionSummary {
                plan: &plan,
                attempt: &report,
            })?;
            match report.error {
                Some(err) => Err(err.into()),
                None => Ok(()),
            }
        }
    }
}

async fn plan_from_file(
    settings: &MigratorSettings,
    provider: &HttpProvider,
    args: &IntentArgs,
) -> Result<MigrationPlan, AppError> {
    let raw = fs::read_to_string(&args.intent)
        .map_err(|e| AppError::Config(format!("Failed to read intent {}: {e}", args.intent)))?;
    let oracle = ChainlinkOracle::new(provider.clone(), settings.chainlink_feeds()?);
    let mut env = PlanningEnv {
        prices: PriceSnapshot::default(),
        providers: settings.providers()?,
        limits: settings.risk_limits(),
        default_buffer_bps: settings.default_buffer_bps,
        default_settlement: Some(settings.settlement_or_router()),
    };

    let plan = if args.debt_swap {
        let intent: DebtSwapIntent = parse_intent(&raw, &args.intent)?;
        env.prices = PriceSnapshot::fetch(&oracle, &intent.tokens()).await?;
        intent.plan(&env)?
    } else {
        let intent: MigrationIntent = parse_intent(&raw, &args.intent)?;
        if let Some(path) = settings.markets_path.as_deref() {
            let registry = MarketRegistry::load_from_file(path, settings.chain_id)?
                .validate_with_provider(provider)
                .await;
            vet_destination(&registry, &intent).await?;
        }
        env.prices = PriceSnapshot::fetch(&oracle, &intent.tokens()).await?;
        intent.plan(&env)?
    };

    tracing::info!(
        target: "main",
        instructions = plan.flow.len(),
        provider = %plan.financing.provider_kind,
        required = %plan.financing.required_amount,
        "Plan ready"
    );
    Ok(plan)
}

fn parse_intent<T: serde::de::DeserializeOwned>(raw: &str, path: &str) -> Result<T, AppError> {
    serde_json::from_str(raw)
        .map_err(|e| AppError::Config(format!("Failed to parse intent {path}: {e}")))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let body = serde_json::to_string_pretty(value).map_err(anyhow::Error::from)?;
    println!("{body}");
    Ok(())
}
