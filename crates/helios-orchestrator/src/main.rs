/*
[INPUT]:  CLI arguments, YAML configuration file, OS shutdown signals
[OUTPUT]: Running market making tasks with graceful shutdown
[POS]:    Binary entry point
[UPDATE]: When changing CLI flags, startup flow, or shutdown handling
*/

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use rust_decimal_macros::dec;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use helios_orchestrator::events::EventBus;
use helios_orchestrator::optimizer::VariantConfigTemplate;
use helios_orchestrator::{LiveOptimizerController, StrategyConfig};

#[derive(Parser, Debug)]
#[command(
    name = "helios-orchestrator",
    version,
    about = "Runs paper-trading strategy variants and evaluates them for promotion"
)]
struct Cli {
    #[arg(long = "config", value_name = "PATH")]
    config_path: PathBuf,
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    log_level: String,
    #[arg(long = "dry-run")]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(&args.log_level)?;

    info!(
        config_path = %args.config_path.display(),
        dry_run = args.dry_run,
        "starting helios-mm-strategy"
    );

    let config = load_config(&args.config_path)?;
    info!(symbol = %config.symbol, "configuration loaded");

    if args.dry_run {
        info!("dry-run requested; configuration validated");
        return Ok(());
    }

    // The exchange REST/WS client and the indicator/signal pipeline are
    // injected interfaces outside this crate's scope, so this binary runs
    // the self-contained paper-trading side of the system: the Optimizer
    // Controller and its Variants. A live deployment wires the Stop
    // Manager, Coordinator, and Reconciler on top with a concrete
    // `ExchangeAdapter` and a real tick/signal source.
    let events = EventBus::default();
    let controller = LiveOptimizerController::new(events.clone());
    let template = template_from_config(&config);
    let base_leverage = rust_decimal::Decimal::from(config.trading.default_leverage);
    let base_position_size = rust_decimal::Decimal::try_from(config.trading.position_size_percent)
        .unwrap_or(dec!(0.5));
    controller.start(
        &config.symbol,
        &config.optimizer,
        base_leverage,
        base_position_size,
        &config.trading,
        &template,
        0,
    );
    info!(variants = controller.get_status().len(), "optimizer started");

    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone());

    let shutdown_task = {
        let shutdown = shutdown.clone();
        let controller = controller.clone();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            controller.stop(&std::collections::HashMap::new(), 0);
        })
    };

    shutdown.cancelled().await;
    info!("shutdown signal received");

    shutdown_task.await.context("shutdown task join")?;
    info!("shutdown complete");

    Ok(())
}

fn template_from_config(config: &StrategyConfig) -> VariantConfigTemplate {
    VariantConfigTemplate {
        starting_balance: dec!(10000),
        initial_sl_roi: rust_decimal::Decimal::try_from(config.trading.initial_sl_roi).unwrap_or(dec!(0.5)),
        initial_tp_roi: rust_decimal::Decimal::try_from(config.trading.initial_tp_roi).unwrap_or(dec!(2.0)),
        maker_fee: rust_decimal::Decimal::try_from(config.trading.maker_fee).unwrap_or(dec!(0.0002)),
        taker_fee: rust_decimal::Decimal::try_from(config.trading.taker_fee).unwrap_or(dec!(0.0006)),
        slippage_percent: dec!(0.02),
        fill_probability: dec!(1.0),
        circuit_breaker_threshold: config.optimizer.error_handling.circuit_breaker_threshold,
        circuit_breaker_reset_ms: config.optimizer.error_handling.circuit_breaker_reset_ms as i64,
        strong_buy_threshold: dec!(0.8),
        strong_sell_threshold: dec!(-0.8),
        paper_trading: true,
    }
}

fn init_tracing(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level).context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow!(err))
        .context("initialize tracing subscriber")?;
    Ok(())
}

fn load_config(path: &std::path::Path) -> Result<StrategyConfig> {
    let path_str = path
        .to_str()
        .context("config path must be valid utf-8")?;
    StrategyConfig::from_file(path_str).context("load config")
}

fn setup_signal_handlers(shutdown: CancellationToken) {
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install SIGINT handler");
            return;
        }
        info!("received SIGINT");
        shutdown_clone.cancel();
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let shutdown_clone = shutdown.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("received SIGTERM");
                    shutdown_clone.cancel();
                }
                Err(err) => {
                    warn!(error = %err, "failed to install SIGTERM handler");
                }
            }
        });
    }
}
