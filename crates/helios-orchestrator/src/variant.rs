/*
[INPUT]:  Market ticks, an externally computed signal (score + type)
[OUTPUT]: Paper position lifecycle, trade history, rolling performance metrics
[POS]:    Owned by C11 (Optimizer), one per configured strategy permutation
[UPDATE]: When a new metric or circuit-breaker rule is added
*/

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_decimal::{Decimal, MathematicalOps};
use thiserror::Error;

use crate::decimal::Side;
use crate::events::{EventBus, HeliosEvent};
use crate::simulator::{self, EntryState, FillModel};
use crate::trailing::{self, TrailingConfig, TrailingReason};

#[derive(Debug, Error)]
pub enum VariantError {
    #[error(transparent)]
    Invalid(#[from] crate::decimal::InvalidInputError),
    #[error(transparent)]
    Trailing(#[from] crate::trailing::TrailingError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalType {
    StrongSell,
    Sell,
    Neutral,
    Buy,
    StrongBuy,
}

#[derive(Debug, Clone, Copy)]
pub struct Signal {
    pub score: Decimal,
    pub signal_type: SignalType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    SignalReversal,
    EmergencyClose,
    Manual,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeRecord {
    pub side: Side,
    pub size: Decimal,
    pub leverage: Decimal,
    pub gross_pnl: Decimal,
    pub net_pnl: Decimal,
    pub roi: Decimal,
    pub total_fees: Decimal,
    pub funding_fees: Decimal,
    pub exit_reason: ExitReason,
    pub opened_at: i64,
    pub closed_at: i64,
    pub variant_id: String,
    pub experimental: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metrics {
    pub trades_count: u64,
    pub win_count: u64,
    pub loss_count: u64,
    pub total_net_pnl: Decimal,
    pub avg_pnl_per_trade: Decimal,
    pub avg_roi: Decimal,
    pub win_rate: Decimal,
    pub max_drawdown: Decimal,
    pub peak_balance: Decimal,
    pub sharpe_ratio: Decimal,
    pub avg_latency_ms: Decimal,
    pub returns: Vec<Decimal>,
}

impl Metrics {
    fn record_close(&mut self, starting_balance: Decimal, net_pnl: Decimal, roi: Decimal) {
        self.trades_count += 1;
        if net_pnl > Decimal::ZERO {
            self.win_count += 1;
        } else {
            self.loss_count += 1;
        }
        self.total_net_pnl += net_pnl;
        self.avg_pnl_per_trade = self.total_net_pnl / Decimal::new(self.trades_count as i64, 0);
        self.returns.push(roi);
        let sum: Decimal = self.returns.iter().copied().sum();
        self.avg_roi = sum / Decimal::new(self.returns.len() as i64, 0);
        self.win_rate = Decimal::new(self.win_count as i64, 0) / Decimal::new(self.trades_count as i64, 0);

        let balance = starting_balance + self.total_net_pnl;
        self.peak_balance = self.peak_balance.max(balance);
        if self.peak_balance > Decimal::ZERO {
            let drawdown = (self.peak_balance - balance) / self.peak_balance;
            self.max_drawdown = self.max_drawdown.max(drawdown);
        }

        self.sharpe_ratio = sharpe_ratio(&self.returns);
    }
}

/// Annualized by √T with T=250 trading periods, per-trade returns.
fn sharpe_ratio(returns: &[Decimal]) -> Decimal {
    let n = returns.len();
    if n < 2 {
        return Decimal::ZERO;
    }
    let n_dec = Decimal::new(n as i64, 0);
    let mean: Decimal = returns.iter().copied().sum::<Decimal>() / n_dec;
    let variance: Decimal = returns.iter().map(|r| (*r - mean) * (*r - mean)).sum::<Decimal>() / n_dec;
    if variance.is_zero() {
        return Decimal::ZERO;
    }
    let std_dev = variance.sqrt().unwrap_or(Decimal::ZERO);
    if std_dev.is_zero() {
        return Decimal::ZERO;
    }
    let sqrt_t = Decimal::new(250, 0).sqrt().unwrap_or(Decimal::ONE);
    (mean / std_dev) * sqrt_t
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerState {
    Closed,
    Open,
}

struct PaperPosition {
    symbol: String,
    side: Side,
    entry: EntryState,
    opened_at: i64,
    current_stop: Decimal,
    take_profit: Decimal,
    last_roi_step: i64,
    break_even_armed: bool,
}

#[derive(Debug, Clone)]
pub struct VariantConfig {
    pub symbol: String,
    pub profile_name: String,
    pub starting_balance: Decimal,
    pub position_size_percent: Decimal,
    pub leverage: Decimal,
    pub initial_sl_roi: Decimal,
    pub initial_tp_roi: Decimal,
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
    pub slippage_percent: Decimal,
    pub fill_probability: Decimal,
    pub trailing: TrailingConfig,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_reset_ms: i64,
    pub strong_buy_threshold: Decimal,
    pub strong_sell_threshold: Decimal,
    pub paper_trading: bool,
}

const MAX_TRADE_HISTORY: usize = 500;

pub struct Variant {
    pub variant_id: String,
    config: VariantConfig,
    position: Option<PaperPosition>,
    metrics: Metrics,
    trade_history: VecDeque<TradeRecord>,
    error_count: u32,
    last_error: Option<String>,
    circuit_breaker_state: CircuitBreakerState,
    circuit_opened_at: Option<i64>,
    created_at: i64,
    rng: StdRng,
    events: EventBus,
}

impl Variant {
    pub fn new(variant_id: impl Into<String>, config: VariantConfig, created_at: i64, events: EventBus, seed: u64) -> Self {
        Self {
            variant_id: variant_id.into(),
            config,
            position: None,
            metrics: Metrics::default(),
            trade_history: VecDeque::new(),
            error_count: 0,
            last_error: None,
            circuit_breaker_state: CircuitBreakerState::Closed,
            circuit_opened_at: None,
            created_at,
            rng: StdRng::seed_from_u64(seed),
            events,
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn circuit_breaker_state(&self) -> CircuitBreakerState {
        self.circuit_breaker_state
    }

    pub fn has_position(&self) -> bool {
        self.position.is_some()
    }

    pub fn account_balance(&self) -> Decimal {
        self.config.starting_balance + self.metrics.total_net_pnl
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn symbol(&self) -> &str {
        &self.config.symbol
    }

    pub fn trade_history(&self) -> &VecDeque<TradeRecord> {
        &self.trade_history
    }

    /// Catches all domain errors raised while processing this tick; never
    /// propagates them to the Optimizer or other variants.
    pub fn process_tick(&mut self, mid_price: Decimal, signal: Option<Signal>, now_ms: i64) {
        if self.circuit_breaker_state == CircuitBreakerState::Open {
            let opened_at = self.circuit_opened_at.unwrap_or(now_ms);
            if now_ms - opened_at >= self.config.circuit_breaker_reset_ms {
                self.circuit_breaker_state = CircuitBreakerState::Closed;
                self.circuit_opened_at = None;
                self.error_count = 0;
                self.events.emit(HeliosEvent::VariantCircuitBreakerClosed { variant_id: self.variant_id.clone() });
            } else {
                return;
            }
        }

        if let Err(e) = self.process_tick_inner(mid_price, signal, now_ms) {
            self.error_count += 1;
            self.last_error = Some(e.to_string());
            self.events.emit(HeliosEvent::VariantError {
                variant_id: self.variant_id.clone(),
                reason: e.to_string(),
            });
            if self.error_count >= self.config.circuit_breaker_threshold {
                self.circuit_breaker_state = CircuitBreakerState::Open;
                self.circuit_opened_at = Some(now_ms);
                self.events
                    .emit(HeliosEvent::VariantCircuitBreakerOpened { variant_id: self.variant_id.clone() });
            }
        }
    }

    fn process_tick_inner(&mut self, mid_price: Decimal, signal: Option<Signal>, now_ms: i64) -> Result<(), VariantError> {
        if let Some(position) = self.position.as_mut() {
            let mark = simulator::mark_to_market(position.side, &position.entry, mid_price, Decimal::ONE, Decimal::ZERO);

            let current_roi = mark.unrealized_roi;
            let trailing_result = trailing::next_stop(
                position.side,
                position.entry.entry_fill_price,
                position.current_stop,
                current_roi,
                position.last_roi_step,
                self.config.leverage,
                position.entry.entry_fee_rate,
                self.config.taker_fee,
                &self.config.trailing,
                position.break_even_armed,
            )?;
            if trailing_result.reason != TrailingReason::NoChange {
                position.current_stop = trailing_result.new_stop;
                position.last_roi_step = trailing_result.new_last_step;
                position.break_even_armed = trailing_result.break_even_armed;
            }

            let hit_stop = match position.side {
                Side::Long => mid_price <= position.current_stop,
                Side::Short => mid_price >= position.current_stop,
            };
            let hit_tp = match position.side {
                Side::Long => mid_price >= position.take_profit,
                Side::Short => mid_price <= position.take_profit,
            };

            if hit_stop || hit_tp {
                let reason = if hit_stop { ExitReason::StopLoss } else { ExitReason::TakeProfit };
                let exit = simulator::simulate_exit(
                    position.side,
                    &position.entry,
                    mid_price,
                    self.config.taker_fee,
                    self.config.slippage_percent,
                    Decimal::ONE,
                    Decimal::ZERO,
                );
                let starting_balance = self.config.starting_balance;
                let record = TradeRecord {
                    side: position.side,
                    size: position.entry.size,
                    leverage: self.config.leverage,
                    gross_pnl: exit.gross_realized,
                    net_pnl: exit.net_realized,
                    roi: exit.realized_roi,
                    total_fees: position.entry.entry_fee + exit.exit_fee,
                    funding_fees: Decimal::ZERO,
                    exit_reason: reason,
                    opened_at: position.opened_at,
                    closed_at: now_ms,
                    variant_id: self.variant_id.clone(),
                    experimental: true,
                };
                let closed_symbol = position.symbol.clone();
                self.metrics.record_close(starting_balance, record.net_pnl, record.roi);
                self.push_trade(record.clone());
                self.position = None;
                self.events.emit(HeliosEvent::VariantPositionClosed {
                    variant_id: self.variant_id.clone(),
                    symbol: closed_symbol,
                    net_pnl: record.net_pnl,
                });
            }
            return Ok(());
        }

        if !self.config.paper_trading {
            return Ok(());
        }

        let Some(signal) = signal else { return Ok(()) };
        let side = match signal.signal_type {
            SignalType::StrongBuy if signal.score >= self.config.strong_buy_threshold => Some(Side::Long),
            SignalType::StrongSell if signal.score <= self.config.strong_sell_threshold => Some(Side::Short),
            _ => None,
        };
        let Some(side) = side else { return Ok(()) };

        let entry = simulator::simulate_entry(
            self.account_balance(),
            self.config.position_size_percent,
            self.config.leverage,
            side,
            mid_price,
            FillModel::Taker,
            None,
            self.config.maker_fee,
            self.config.taker_fee,
            self.config.slippage_percent,
            self.config.fill_probability,
            Decimal::ONE,
            &mut self.rng,
        )?;

        let current_stop = crate::trailing::calculate_initial_stop(side, entry.entry_fill_price, self.config.initial_sl_roi, self.config.leverage)?;
        let take_profit = crate::decimal::calc_take_profit_price(side, entry.entry_fill_price, self.config.initial_tp_roi, self.config.leverage)?;

        self.position = Some(PaperPosition {
            symbol: self.config.symbol.clone(),
            side,
            entry,
            opened_at: now_ms,
            current_stop,
            take_profit,
            last_roi_step: 0,
            break_even_armed: false,
        });
        self.events.emit(HeliosEvent::VariantPositionOpened {
            variant_id: self.variant_id.clone(),
            symbol: self.config.symbol.clone(),
        });
        Ok(())
    }

    fn push_trade(&mut self, record: TradeRecord) {
        if self.trade_history.len() >= MAX_TRADE_HISTORY {
            self.trade_history.pop_front();
        }
        self.trade_history.push_back(record);
    }

    /// For `stop()`: marks any open position closed at `last_mid` with
    /// reason `manual`.
    pub fn force_close_manual(&mut self, last_mid: Decimal, now_ms: i64) {
        let Some(position) = self.position.take() else { return };
        let exit = simulator::simulate_exit(
            position.side,
            &position.entry,
            last_mid,
            self.config.taker_fee,
            self.config.slippage_percent,
            Decimal::ONE,
            Decimal::ZERO,
        );
        let starting_balance = self.config.starting_balance;
        let record = TradeRecord {
            side: position.side,
            size: position.entry.size,
            leverage: self.config.leverage,
            gross_pnl: exit.gross_realized,
            net_pnl: exit.net_realized,
            roi: exit.realized_roi,
            total_fees: position.entry.entry_fee + exit.exit_fee,
            funding_fees: Decimal::ZERO,
            exit_reason: ExitReason::Manual,
            opened_at: position.opened_at,
            closed_at: now_ms,
            variant_id: self.variant_id.clone(),
            experimental: true,
        };
        self.metrics.record_close(starting_balance, record.net_pnl, record.roi);
        self.push_trade(record);
    }
}
