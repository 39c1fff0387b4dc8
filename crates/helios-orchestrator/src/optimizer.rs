/*
[INPUT]:  Strategy config, a stream of market ticks + externally computed signals
[OUTPUT]: A running set of paper-trading Variants, promotion decisions, telemetry
[POS]:    Top of the variant stack; owns C10 instances
[UPDATE]: When the variant-generation or promotion algorithm changes
*/

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rust_decimal::{Decimal, MathematicalOps};
use sysinfo::{Pid, ProcessRefreshKind, System};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::OptimizerConfig;
use crate::events::{EventBus, HeliosEvent};
use crate::trailing::{TrailingConfig, TrailingMode};
use crate::variant::{Metrics, Signal, TradeRecord, Variant, VariantConfig};

const DEFAULT_PUBLISH_INTERVAL_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionDecision {
    Promote,
    HoldOut,
}

fn dec_from_f64(v: f64) -> Decimal {
    Decimal::try_from(v).unwrap_or(Decimal::ZERO)
}

/// Rolled-up totals across every running variant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateMetrics {
    pub variant_count: usize,
    pub total_trades: u64,
    pub total_net_pnl: Decimal,
}

/// Snapshot published on the telemetry loop's tick: aggregate plus
/// per-variant metrics and process memory at the time it was taken.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySnapshot {
    pub aggregate: AggregateMetrics,
    pub per_variant: Vec<(String, Metrics)>,
    pub resident_memory_bytes: u64,
}

/// Current process resident set size. `sysinfo` doesn't expose a
/// heap-allocator byte count on every platform, so this reports the one
/// real number it gives us rather than faking a second one.
fn resident_memory_bytes() -> u64 {
    let mut system = System::new();
    let pid = Pid::from_u32(std::process::id());
    system.refresh_processes_specifics(
        sysinfo::ProcessesToUpdate::Some(&[pid]),
        ProcessRefreshKind::new().with_memory(),
    );
    system.process(pid).map(|p| p.memory()).unwrap_or(0)
}

/// One default variant per profile, then one ablation per configured
/// variation value for leverage and position size, capped at
/// `maxConcurrentVariants`.
pub fn generate_variant_configs(
    symbol: &str,
    optimizer_cfg: &OptimizerConfig,
    base_leverage: Decimal,
    base_position_size_percent: Decimal,
    trailing: TrailingConfig,
    base: &VariantConfigTemplate,
) -> Vec<(String, VariantConfig)> {
    let mut out = Vec::new();
    let profiles = if optimizer_cfg.profiles.is_empty() {
        vec!["default".to_string()]
    } else {
        optimizer_cfg.profiles.clone()
    };

    for profile in &profiles {
        out.push((
            format!("{profile}:default"),
            base.build(symbol, profile.clone(), base_leverage, base_position_size_percent, trailing),
        ));
    }

    for profile in &profiles {
        for variation in &optimizer_cfg.leverage.variations {
            out.push((
                format!("{profile}:leverage={variation}"),
                base.build(symbol, profile.clone(), dec_from_f64(*variation), base_position_size_percent, trailing),
            ));
        }
        for variation in &optimizer_cfg.position_size.variations {
            out.push((
                format!("{profile}:positionSize={variation}"),
                base.build(symbol, profile.clone(), base_leverage, dec_from_f64(*variation), trailing),
            ));
        }
    }

    out.truncate(optimizer_cfg.max_concurrent_variants as usize);
    out
}

#[derive(Debug, Clone)]
pub struct VariantConfigTemplate {
    pub starting_balance: Decimal,
    pub initial_sl_roi: Decimal,
    pub initial_tp_roi: Decimal,
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
    pub slippage_percent: Decimal,
    pub fill_probability: Decimal,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_reset_ms: i64,
    pub strong_buy_threshold: Decimal,
    pub strong_sell_threshold: Decimal,
    pub paper_trading: bool,
}

impl VariantConfigTemplate {
    fn build(&self, symbol: &str, profile_name: String, leverage: Decimal, position_size_percent: Decimal, trailing: TrailingConfig) -> VariantConfig {
        VariantConfig {
            symbol: symbol.to_string(),
            profile_name,
            starting_balance: self.starting_balance,
            position_size_percent,
            leverage,
            initial_sl_roi: self.initial_sl_roi,
            initial_tp_roi: self.initial_tp_roi,
            maker_fee: self.maker_fee,
            taker_fee: self.taker_fee,
            slippage_percent: self.slippage_percent,
            fill_probability: self.fill_probability,
            trailing,
            circuit_breaker_threshold: self.circuit_breaker_threshold,
            circuit_breaker_reset_ms: self.circuit_breaker_reset_ms,
            strong_buy_threshold: self.strong_buy_threshold,
            strong_sell_threshold: self.strong_sell_threshold,
            paper_trading: self.paper_trading,
        }
    }
}

fn trailing_config_from(trading: &crate::config::TradingConfig) -> TrailingConfig {
    TrailingConfig {
        break_even_buffer: dec_from_f64(trading.break_even_buffer),
        trailing_step_percent: dec_from_f64(trading.trailing_step_percent),
        trailing_move_percent: dec_from_f64(trading.trailing_move_percent),
        mode: TrailingMode::parse(&trading.trailing_mode).unwrap_or(TrailingMode::Staircase),
    }
}

/// Evaluates the promotion gate described by the component contract:
/// sample-size gate, per-check thresholds, a composite score, and a
/// significance test on per-trade returns.
pub fn evaluate_promotion(metrics: &Metrics, promotion: &crate::config::PromotionConfig) -> PromotionDecision {
    let min_sample_size = promotion.min_sample_size as u64;
    if metrics.trades_count < min_sample_size {
        return PromotionDecision::HoldOut;
    }

    let min_win_rate = dec_from_f64(promotion.min_win_rate);
    let min_avg_roi = dec_from_f64(promotion.min_avg_roi);
    let min_sharpe = dec_from_f64(promotion.min_sharpe_ratio);

    let win_rate_ok = metrics.win_rate >= min_win_rate;
    let avg_roi_ok = metrics.avg_roi >= min_avg_roi;
    let sharpe_ok = metrics.sharpe_ratio >= min_sharpe;

    let score = dec_from_f64(0.3) * safe_ratio(metrics.win_rate, min_win_rate)
        + dec_from_f64(0.4) * safe_ratio(metrics.avg_roi, min_avg_roi)
        + dec_from_f64(0.3) * safe_ratio(metrics.sharpe_ratio, min_sharpe);

    let significant = is_significant(&metrics.returns);

    if win_rate_ok && avg_roi_ok && sharpe_ok && score >= Decimal::ONE && significant {
        PromotionDecision::Promote
    } else {
        PromotionDecision::HoldOut
    }
}

fn safe_ratio(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator.is_zero() {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// z = mean/(sigma/sqrt(n)); significant when |z| >= 1.96. If sigma==0,
/// significant iff mean != 0.
fn is_significant(returns: &[Decimal]) -> bool {
    let n = returns.len();
    if n == 0 {
        return false;
    }
    let n_dec = Decimal::new(n as i64, 0);
    let mean: Decimal = returns.iter().copied().sum::<Decimal>() / n_dec;
    let variance: Decimal = returns.iter().map(|r| (*r - mean) * (*r - mean)).sum::<Decimal>() / n_dec;
    if variance.is_zero() {
        return !mean.is_zero();
    }
    let sigma = variance.sqrt().unwrap_or(Decimal::ZERO);
    if sigma.is_zero() {
        return !mean.is_zero();
    }
    let sqrt_n = n_dec.sqrt().unwrap_or(Decimal::ONE);
    let z = mean / (sigma / sqrt_n);
    z.abs() >= dec_from_f64(1.96)
}

pub struct LiveOptimizerController {
    events: EventBus,
    running: AtomicBool,
    variants: Mutex<HashMap<String, Variant>>,
    telemetry_task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl LiveOptimizerController {
    pub fn new(events: EventBus) -> Arc<Self> {
        Arc::new(Self {
            events,
            running: AtomicBool::new(false),
            variants: Mutex::new(HashMap::new()),
            telemetry_task: Mutex::new(None),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Idempotent: generates the variant set from config, instantiates
    /// Variants, and starts the periodic telemetry-publish loop; a second
    /// call while already running is a no-op.
    pub fn start(
        self: &Arc<Self>,
        symbol: &str,
        optimizer_cfg: &OptimizerConfig,
        base_leverage: Decimal,
        base_position_size_percent: Decimal,
        trading_cfg: &crate::config::TradingConfig,
        template: &VariantConfigTemplate,
        created_at: i64,
    ) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let trailing = trailing_config_from(trading_cfg);
        let configs = generate_variant_configs(symbol, optimizer_cfg, base_leverage, base_position_size_percent, trailing, template);

        let mut variants = self.variants.lock().unwrap();
        variants.clear();
        for (idx, (variant_id, cfg)) in configs.into_iter().enumerate() {
            variants.insert(
                variant_id.clone(),
                Variant::new(variant_id, cfg, created_at, self.events.clone(), idx as u64 + 1),
            );
        }
        drop(variants);
        self.events.emit(HeliosEvent::OptimizerStarted);

        let publish_interval_ms = optimizer_cfg.publish_interval_ms.unwrap_or(DEFAULT_PUBLISH_INTERVAL_MS);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Self::telemetry_loop(Arc::clone(self), cancel.clone(), publish_interval_ms));
        *self.telemetry_task.lock().unwrap() = Some((cancel, handle));
    }

    async fn telemetry_loop(self: Arc<Self>, cancel: CancellationToken, interval_ms: u64) {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if !self.is_running() {
                        continue;
                    }
                    let snapshot = self.export_snapshot();
                    self.events.emit(HeliosEvent::TelemetryMetrics(snapshot));
                }
            }
        }
    }

    /// Idempotent: stops the telemetry loop and, for open variant
    /// positions, marks them closed at the last mid price with reason
    /// `manual`.
    pub fn stop(&self, last_mid_by_symbol: &HashMap<String, Decimal>, now_ms: i64) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some((cancel, _handle)) = self.telemetry_task.lock().unwrap().take() {
            cancel.cancel();
        }
        let default_mid = last_mid_by_symbol.values().next().copied().unwrap_or(Decimal::ZERO);
        let mut variants = self.variants.lock().unwrap();
        for variant in variants.values_mut() {
            variant.force_close_manual(default_mid, now_ms);
        }
        drop(variants);
        self.events.emit(HeliosEvent::OptimizerStopped);
    }

    /// Fan-out to every variant trading `symbol`. Each variant's own
    /// `process_tick` isolates its internal errors; a panic-free bug in one
    /// variant never reaches another. A variant trading a different symbol
    /// never sees this tick.
    pub fn on_market_update(&self, symbol: &str, mid_price: Decimal, signal: Option<Signal>, now_ms: i64) {
        if !self.is_running() {
            return;
        }
        let mut variants = self.variants.lock().unwrap();
        for variant in variants.values_mut().filter(|v| v.symbol() == symbol) {
            variant.process_tick(mid_price, signal, now_ms);
        }
    }

    pub fn get_status(&self) -> Vec<(String, Metrics)> {
        let variants = self.variants.lock().unwrap();
        variants.iter().map(|(id, v)| (id.clone(), v.metrics().clone())).collect()
    }

    pub fn evaluate_promotion(&self, variant_id: &str, promotion: &crate::config::PromotionConfig) -> Option<PromotionDecision> {
        let variants = self.variants.lock().unwrap();
        variants.get(variant_id).map(|v| evaluate_promotion(v.metrics(), promotion))
    }

    /// Per-variant metrics ordered best-to-worst by net P&L.
    pub fn get_performance_comparison(&self) -> Vec<(String, Metrics)> {
        let mut status = self.get_status();
        status.sort_by_key(|(_, m)| std::cmp::Reverse(m.total_net_pnl));
        status
    }

    /// Full trade history for every variant.
    pub fn get_results(&self) -> Vec<(String, Vec<TradeRecord>)> {
        let variants = self.variants.lock().unwrap();
        variants
            .iter()
            .map(|(id, v)| (id.clone(), v.trade_history().iter().cloned().collect()))
            .collect()
    }

    /// A point-in-time telemetry snapshot: aggregate + per-variant metrics
    /// and current process resident memory.
    pub fn export_snapshot(&self) -> TelemetrySnapshot {
        let per_variant = self.get_status();
        let aggregate = AggregateMetrics {
            variant_count: per_variant.len(),
            total_trades: per_variant.iter().map(|(_, m)| m.trades_count).sum(),
            total_net_pnl: per_variant.iter().map(|(_, m)| m.total_net_pnl).sum(),
        };
        TelemetrySnapshot {
            aggregate,
            per_variant,
            resident_memory_bytes: resident_memory_bytes(),
        }
    }
}
