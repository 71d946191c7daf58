use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cryptotrader::api::ExchangeGateway;
use cryptotrader::execution::AnalysisOrchestrator;
use cryptotrader::risk::RiskOrchestrator;
use cryptotrader::strategy::{SignalConfig, SignalEngine, Strategy};
use cryptotrader::{AuditSink, ExchangeClient, PostgresStore, Settings, Store};

#[derive(Parser, Debug)]
#[command(name = "cryptotrader")]
#[command(about = "Signal-driven crypto trading bot with TP/SL monitoring")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the analysis and TP/SL loops until Ctrl+C (default)
    Run,
    /// Run a single analysis cycle
    Analyze,
    /// Run a single TP/SL check cycle
    CheckRisk,
    /// Check exchange connectivity
    TestConnection,
    /// Show account balances
    Balance {
        /// Only this currency
        currency: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let settings = Settings::load().context("failed to load configuration")?;
    settings.validate().context("invalid configuration")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(settings).await,
        Command::Analyze => {
            let (store, gateway) = connect(&settings).await?;
            let orchestrator =
                AnalysisOrchestrator::new(store, gateway, signal_engine(&settings), &settings);
            let report = orchestrator.run_cycle().await?;
            tracing::info!("✅ Analysis cycle done: {}", report);
            Ok(())
        }
        Command::CheckRisk => {
            let (store, gateway) = connect(&settings).await?;
            let orchestrator = RiskOrchestrator::new(store, gateway, &settings);
            let report = orchestrator.run_cycle().await?;
            tracing::info!("✅ Risk cycle done: {}", report);
            Ok(())
        }
        Command::TestConnection => {
            let client = ExchangeClient::new(&settings.exchange)?;
            if client.test_connection().await {
                tracing::info!("✅ Connected to {}", settings.exchange.base_url());
                Ok(())
            } else {
                anyhow::bail!("could not reach {}", settings.exchange.base_url())
            }
        }
        Command::Balance { currency } => {
            let client = ExchangeClient::new(&settings.exchange)?;
            let balances = client.get_balance(currency.as_deref()).await;
            if balances.is_empty() {
                tracing::warn!("No balances returned");
            }
            for balance in balances {
                tracing::info!(
                    "  {:<8} total {:>16.8}  available {:>16.8}",
                    balance.currency,
                    balance.balance.unwrap_or(0.0),
                    balance.available_amount()
                );
            }
            Ok(())
        }
    }
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    tracing::info!("🚀 cryptotrader starting");
    tracing::info!("📊 Configuration:");
    tracing::info!("  Exchange: {}", settings.exchange.base_url());
    tracing::info!("  Timeframe: {}", settings.signals.timeframe);
    tracing::info!("  Analysis every {}s", settings.monitor.analysis_interval_secs);
    tracing::info!("  TP/SL check every {}s", settings.monitor.tp_sl_check_interval_secs);
    match settings.trading.auto_buy_quote_amount {
        Some(amount) => tracing::info!("  Auto-buy: {} per signal", amount),
        None => tracing::info!("  Auto-buy: off (signals are logged only)"),
    }

    let strategy = signal_engine(&settings);
    tracing::info!(
        "  Strategy: {} (needs {} candles)",
        strategy.name(),
        strategy.min_candles_required()
    );
    if settings.signals.candle_count < strategy.min_candles_required() {
        tracing::warn!(
            "candle_count {} is below the strategy minimum, every instrument will be skipped",
            settings.signals.candle_count
        );
    }

    let (store, gateway) = connect(&settings).await?;

    let analysis = Arc::new(AnalysisOrchestrator::new(
        store.clone(),
        gateway.clone(),
        strategy,
        &settings,
    ));
    let risk = Arc::new(RiskOrchestrator::new(store, gateway, &settings));

    tracing::info!("🔄 Spawning loops...");
    let analysis_handle = analysis.spawn();
    let risk_handle = risk.spawn();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    tracing::info!("⚠️  Received Ctrl+C, shutting down...");

    analysis_handle.stop().await;
    risk_handle.stop().await;

    tracing::info!("👋 Shutdown complete");
    Ok(())
}

async fn connect(settings: &Settings) -> anyhow::Result<(Arc<dyn Store>, Arc<dyn ExchangeGateway>)> {
    if !settings.has_credentials() {
        anyhow::bail!("exchange API key and secret are required (CRYPTO_API_KEY / CRYPTO_API_SECRET)");
    }

    let postgres = Arc::new(
        PostgresStore::new(&settings.database_url)
            .await
            .context("failed to connect to Postgres")?,
    );
    tracing::info!("Postgres persistence enabled");

    let audit: Arc<dyn AuditSink> = postgres.clone();
    let client = ExchangeClient::new(&settings.exchange)?.with_audit(audit);

    let store: Arc<dyn Store> = postgres;
    let gateway: Arc<dyn ExchangeGateway> = Arc::new(client);
    Ok((store, gateway))
}

fn signal_engine(settings: &Settings) -> Arc<dyn Strategy> {
    Arc::new(SignalEngine::new(SignalConfig::from(&settings.signals)))
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cryptotrader=info")),
        )
        .init();
}
