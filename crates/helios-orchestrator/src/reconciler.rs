/*
[INPUT]:  Locally tracked open positions, exchange's reported positions/stops
[OUTPUT]: Drift detection, global trading halt on ghost positions, stop repair
[POS]:    Timer-driven; consumes C3 budget via the adapter, drives C8
[UPDATE]: When a new drift category is added
*/

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, warn};

use helios_exchange::ExchangeAdapter;

use crate::decimal::Side;
use crate::events::{EventBus, HeliosEvent};
use crate::stop_manager::{ReplaceStopLossOutcome, StopManager, SymbolSpecs};
use crate::stores::AccountStateStore;

#[derive(Debug, Clone)]
pub struct TrackedPosition {
    pub symbol: String,
    pub position_id: i64,
    pub side: Side,
    pub size: Decimal,
    pub desired_stop_price: Decimal,
}

pub struct Reconciler {
    account_store: Arc<AccountStateStore>,
    stop_manager: Arc<StopManager>,
    adapter: Arc<dyn ExchangeAdapter>,
    events: EventBus,
    halt_trading: Box<dyn Fn() + Send + Sync>,
}

impl Reconciler {
    pub fn new(
        account_store: Arc<AccountStateStore>,
        stop_manager: Arc<StopManager>,
        adapter: Arc<dyn ExchangeAdapter>,
        events: EventBus,
        halt_trading: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            account_store,
            stop_manager,
            adapter,
            events,
            halt_trading: Box::new(halt_trading),
        }
    }

    /// Never returns failure to its caller; all outcomes are reported via
    /// drift score and events. `tracked` is the local view; `specs` resolves
    /// per-symbol tick/lot sizes for the stop repair path.
    pub async fn reconcile(
        &self,
        tracked: &[TrackedPosition],
        specs: impl Fn(&str) -> SymbolSpecs,
        now_ms: i64,
    ) {
        let exchange_positions = match self.adapter.get_all_positions().await {
            Ok(response) => response.data,
            Err(e) => {
                warn!(error = %e, "reconciler: failed to fetch exchange positions, skipping this pass");
                return;
            }
        };

        for local in tracked {
            let exchange_match = exchange_positions
                .iter()
                .find(|p| p.symbol == local.symbol && !p.qty.is_zero());

            let Some(_exchange_pos) = exchange_match else {
                // Ghost: local believes a position is open, exchange disagrees.
                self.account_store.register_drift();
                self.events.emit(HeliosEvent::ReconcilerDrift {
                    symbol: local.symbol.clone(),
                    score: self.account_store.drift_score(),
                });
                (self.halt_trading)();
                self.account_store.clear_position(&local.symbol);
                continue;
            };

            let open_stops = match self.adapter.get_open_stop_orders(&local.symbol).await {
                Ok(response) => response
                    .data
                    .items
                    .into_iter()
                    .map(|o| (o.cl_ord_id, o.price.unwrap_or(Decimal::ZERO)))
                    .collect::<Vec<_>>(),
                Err(e) => {
                    warn!(symbol = %local.symbol, error = %e, "reconciler: failed to fetch open stop orders");
                    continue;
                }
            };

            let symbol_specs = specs(&local.symbol);
            let verification = self
                .stop_manager
                .verify_stops(&local.symbol, local.desired_stop_price, &open_stops, symbol_specs.tick_size)
                .await;

            if verification.missing_stop || verification.wrong_stop {
                self.account_store.register_drift();
                self.events.emit(HeliosEvent::ReconcilerDrift {
                    symbol: local.symbol.clone(),
                    score: self.account_store.drift_score(),
                });

                match self
                    .stop_manager
                    .replace_stop_loss(
                        &local.symbol,
                        local.side,
                        local.size,
                        local.desired_stop_price,
                        local.position_id,
                        symbol_specs,
                        now_ms,
                    )
                    .await
                {
                    Ok(ReplaceStopLossOutcome::Success { .. }) => {
                        info!(symbol = %local.symbol, "reconciler: repaired stop drift");
                    }
                    Ok(ReplaceStopLossOutcome::Skipped { .. }) => {}
                    Err(e) => {
                        warn!(symbol = %local.symbol, error = %e, "reconciler: stop repair failed");
                    }
                }
            } else {
                self.account_store.clear_drift();
            }
        }

        // Positions the exchange holds that local never opened: log, never
        // autofix (out of scope of the core).
        for exchange_pos in exchange_positions.iter().filter(|p| !p.qty.is_zero()) {
            if !tracked.iter().any(|t| t.symbol == exchange_pos.symbol) {
                warn!(symbol = %exchange_pos.symbol, "reconciler: unexpected exchange position with no local tracking");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use helios_exchange::{
        ExitOrderPayload, GetPositionsResponse, MarginMode, OpenStopOrdersData,
        OpenStopOrdersResponse, Order, OrderStatus, OrderType, PlaceOrderData, PlaceOrderResponse,
        Position, StopOrderPayload, TimeInForce,
    };
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn fake_position(symbol: &str, qty: Decimal) -> Position {
        Position {
            bankruptcy_price: Decimal::ZERO,
            created_at: String::new(),
            entry_price: dec!(50000),
            entry_value: Decimal::ZERO,
            holding_margin: Decimal::ZERO,
            id: 1,
            initial_margin: Decimal::ZERO,
            leverage: dec!(10),
            liq_price: Decimal::ZERO,
            maint_margin: Decimal::ZERO,
            margin_asset: "USDT".to_string(),
            margin_mode: MarginMode::Cross,
            mark_price: dec!(50000),
            mmr: Decimal::ZERO,
            position_value: Decimal::ZERO,
            qty,
            realized_pnl: Decimal::ZERO,
            status: "open".to_string(),
            symbol: symbol.to_string(),
            time: String::new(),
            updated_at: String::new(),
            upnl: Decimal::ZERO,
            user: String::new(),
        }
    }

    struct FakeAdapter {
        positions: Vec<Position>,
        open_stops: Vec<(String, Decimal)>,
    }

    #[async_trait]
    impl ExchangeAdapter for FakeAdapter {
        async fn place_stop_order(&self, _payload: StopOrderPayload) -> helios_exchange::Result<PlaceOrderResponse> {
            Ok(PlaceOrderResponse { data: PlaceOrderData { order_id: 1, price: None } })
        }
        async fn place_exit_order(&self, _payload: ExitOrderPayload) -> helios_exchange::Result<PlaceOrderResponse> {
            Ok(PlaceOrderResponse { data: PlaceOrderData { order_id: 1, price: None } })
        }
        async fn cancel_stop_order(&self, _symbol: &str, _order_id: i64) -> helios_exchange::Result<()> {
            Ok(())
        }
        async fn get_all_positions(&self) -> helios_exchange::Result<GetPositionsResponse> {
            Ok(GetPositionsResponse { data: self.positions.clone() })
        }
        async fn get_open_stop_orders(&self, _symbol: &str) -> helios_exchange::Result<OpenStopOrdersResponse> {
            let items = self
                .open_stops
                .iter()
                .map(|(oid, price)| Order {
                    avail_locked: Decimal::ZERO,
                    cl_ord_id: oid.clone(),
                    closed_block: 0,
                    created_at: String::new(),
                    created_block: 0,
                    fill_avg_price: Decimal::ZERO,
                    fill_qty: Decimal::ZERO,
                    id: 1,
                    leverage: dec!(10),
                    liq_id: 0,
                    margin: Decimal::ZERO,
                    order_type: OrderType::Market,
                    payload: None,
                    position_id: 1,
                    price: Some(*price),
                    qty: dec!(1),
                    reduce_only: true,
                    remark: String::new(),
                    side: helios_exchange::Side::Sell,
                    source: String::new(),
                    status: OrderStatus::New,
                    symbol: "BTC-USD".to_string(),
                    time_in_force: TimeInForce::Gtc,
                    updated_at: String::new(),
                    user: String::new(),
                })
                .collect();
            Ok(OpenStopOrdersResponse { data: OpenStopOrdersData { items } })
        }
    }

    fn stop_manager() -> Arc<StopManager> {
        use crate::rate_budget::{RateBudgetConfig, RateBudgetManager};
        use crate::stop_coordinator::{RetryConfig, StopReplaceCoordinator};

        Arc::new(StopManager::new(
            Arc::new(AccountStateStore::new()),
            crate::stop_manager::DebounceConfig::default(),
            Decimal::ZERO,
            |symbol| {
                Arc::new(StopReplaceCoordinator::new(
                    symbol,
                    Arc::new(FakeAdapter { positions: vec![], open_stops: vec![] }),
                    Arc::new(RateBudgetManager::new(RateBudgetConfig::new(100.0, 100.0, 100.0, 100.0, 0.0), EventBus::default())),
                    EventBus::default(),
                    RetryConfig::default(),
                ))
            },
        ))
    }

    #[tokio::test]
    async fn ghost_position_halts_trading_and_clears_local() {
        let adapter = Arc::new(FakeAdapter { positions: vec![], open_stops: vec![] });
        let account_store = Arc::new(AccountStateStore::new());
        account_store.record_position(crate::stores::PositionRecord {
            symbol: "BTC-USD".to_string(),
            side: Side::Long,
            entry_price: dec!(50000),
            size: dec!(1),
            leverage: dec!(10),
        });

        let halted = Arc::new(AtomicBool::new(false));
        let halted_clone = halted.clone();
        let reconciler = Reconciler::new(
            account_store.clone(),
            stop_manager(),
            adapter,
            EventBus::default(),
            move || halted_clone.store(true, Ordering::SeqCst),
        );

        let tracked = vec![TrackedPosition {
            symbol: "BTC-USD".to_string(),
            position_id: 1,
            side: Side::Long,
            size: dec!(1),
            desired_stop_price: dec!(49985),
        }];

        reconciler
            .reconcile(&tracked, |_| SymbolSpecs { tick_size: dec!(0.1), lot_size: dec!(0.01) }, 1_000)
            .await;

        assert!(halted.load(Ordering::SeqCst));
        assert!(account_store.get_position("BTC-USD").is_none());
    }

    #[tokio::test]
    async fn consistent_stop_clears_drift() {
        let adapter = Arc::new(FakeAdapter {
            positions: vec![fake_position("BTC-USD", dec!(1))],
            open_stops: vec![("stop:BTC-USD:1:sl:1".to_string(), dec!(49985))],
        });
        let account_store = Arc::new(AccountStateStore::new());
        account_store.register_drift();

        let reconciler = Reconciler::new(account_store.clone(), stop_manager(), adapter, EventBus::default(), || {});

        let tracked = vec![TrackedPosition {
            symbol: "BTC-USD".to_string(),
            position_id: 1,
            side: Side::Long,
            size: dec!(1),
            desired_stop_price: dec!(49985),
        }];

        reconciler
            .reconcile(&tracked, |_| SymbolSpecs { tick_size: dec!(0.1), lot_size: dec!(0.01) }, 1_000)
            .await;

        assert_eq!(account_store.drift_score(), 0);
    }
}
