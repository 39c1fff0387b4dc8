/*
[INPUT]:  Desired protective-stop intent per symbol (price, size, position id)
[OUTPUT]: Debounced, rounded, idempotent stop-replacement calls delegated to C7
[POS]:    Owns one StopReplaceCoordinator per symbol; sits above C7, below the
          main trader
[UPDATE]: When the debounce or rounding contract changes
*/

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::Mutex as AsyncMutex;

use crate::decimal::{round_to_lot_size, round_to_tick_size, Side};
use crate::stop_coordinator::{CoordinatorError, StopReplaceCoordinator};
use crate::stores::AccountStateStore;
use crate::validator::StopOrderIntent;

#[derive(Debug, Clone, Copy)]
pub struct SymbolSpecs {
    pub tick_size: Decimal,
    pub lot_size: Decimal,
}

#[derive(Debug, Clone, Copy)]
pub struct DebounceConfig {
    pub min_interval_ms: i64,
    pub min_move_ticks: i64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self { min_interval_ms: 1500, min_move_ticks: 2 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReplaceStopLossOutcome {
    Skipped { stop_price: Decimal },
    Success { order_id: Option<i64>, stop_price: Decimal },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyStopsResult {
    pub missing_stop: bool,
    pub wrong_stop: bool,
}

pub struct StopManager {
    coordinators: AsyncMutex<HashMap<String, Arc<StopReplaceCoordinator>>>,
    account_store: Arc<AccountStateStore>,
    debounce: DebounceConfig,
    slippage_buffer_percent: Decimal,
    make_coordinator: Box<dyn Fn(&str) -> Arc<StopReplaceCoordinator> + Send + Sync>,
}

impl StopManager {
    pub fn new(
        account_store: Arc<AccountStateStore>,
        debounce: DebounceConfig,
        slippage_buffer_percent: Decimal,
        make_coordinator: impl Fn(&str) -> Arc<StopReplaceCoordinator> + Send + Sync + 'static,
    ) -> Self {
        Self {
            coordinators: AsyncMutex::new(HashMap::new()),
            account_store,
            debounce,
            slippage_buffer_percent,
            make_coordinator: Box::new(make_coordinator),
        }
    }

    async fn coordinator_for(&self, symbol: &str) -> Arc<StopReplaceCoordinator> {
        let mut coordinators = self.coordinators.lock().await;
        coordinators
            .entry(symbol.to_string())
            .or_insert_with(|| (self.make_coordinator)(symbol))
            .clone()
    }

    /// Places the first protective stop for a freshly opened position.
    pub async fn ensure_initial_stops(
        &self,
        symbol: &str,
        position_side: Side,
        size: Decimal,
        initial_sl: Decimal,
        position_id: i64,
        specs: SymbolSpecs,
        now_ms: i64,
    ) -> Result<ReplaceStopLossOutcome, CoordinatorError> {
        self.replace_stop_loss(symbol, position_side, size, initial_sl, position_id, specs, now_ms)
            .await
    }

    /// Applies a slippage buffer (widening), rounds to tick/lot, debounces,
    /// allocates a revision, and delegates the actual replacement to C7.
    pub async fn replace_stop_loss(
        &self,
        symbol: &str,
        position_side: Side,
        size: Decimal,
        stop_price: Decimal,
        position_id: i64,
        specs: SymbolSpecs,
        now_ms: i64,
    ) -> Result<ReplaceStopLossOutcome, CoordinatorError> {
        let buffer_frac = self.slippage_buffer_percent / Decimal::ONE_HUNDRED;
        // Widen in the direction away from the position: long's stop moves
        // down, short's stop moves up.
        let adjusted = match position_side {
            Side::Long => stop_price * (Decimal::ONE - buffer_frac),
            Side::Short => stop_price * (Decimal::ONE + buffer_frac),
        };

        let rounded_stop = round_to_tick_size(adjusted, specs.tick_size)
            .map_err(|e| CoordinatorError::Validation(crate::validator::ValidationError {
                field: "stopPrice",
                reason: e.to_string(),
            }))?;
        let rounded_size = round_to_lot_size(size, specs.lot_size)
            .map_err(|e| CoordinatorError::Validation(crate::validator::ValidationError {
                field: "size",
                reason: e.to_string(),
            }))?;

        let meta = self.account_store.get_stop_meta(symbol);
        let tick_tolerance = specs.tick_size * Decimal::new(self.debounce.min_move_ticks, 0);
        if now_ms - meta.last_update_ts < self.debounce.min_interval_ms
            && (rounded_stop - meta.last_stop_price).abs() < tick_tolerance
        {
            return Ok(ReplaceStopLossOutcome::Skipped { stop_price: meta.last_stop_price });
        }

        let revision = self.account_store.next_stop_revision(symbol);
        let kind = "sl";
        let client_oid = format!("stop:{symbol}:{position_id}:{kind}:{revision}");

        let intent = StopOrderIntent {
            client_oid,
            position_side: match position_side {
                Side::Long => helios_exchange::Side::Buy,
                Side::Short => helios_exchange::Side::Sell,
            },
            symbol: symbol.to_string(),
            stop_price: rounded_stop,
            size: rounded_size,
        };

        let coordinator = self.coordinator_for(symbol).await;
        let outcome = coordinator.replace_stop_order(intent, position_side, rounded_size).await?;

        if outcome.success {
            self.account_store.record_stop_update(
                symbol,
                rounded_stop,
                outcome.order_id.unwrap_or(0),
                now_ms,
            );
        }

        Ok(ReplaceStopLossOutcome::Success { order_id: outcome.order_id, stop_price: rounded_stop })
    }

    /// Enumerates open stop orders owned by this system (clientOid prefix
    /// `stop:<symbol>:`) and compares the latest owned one against
    /// `desired_stop_price` within tick tolerance.
    pub async fn verify_stops(
        &self,
        symbol: &str,
        desired_stop_price: Decimal,
        open_orders: &[(String, Decimal)],
        tick_size: Decimal,
    ) -> VerifyStopsResult {
        let prefix = format!("stop:{symbol}:");
        let owned: Vec<&(String, Decimal)> = open_orders.iter().filter(|(oid, _)| oid.starts_with(&prefix)).collect();

        let Some((_, latest_price)) = owned.last() else {
            return VerifyStopsResult { missing_stop: true, wrong_stop: false };
        };

        let wrong = (*latest_price - desired_stop_price).abs() > tick_size;
        VerifyStopsResult { missing_stop: false, wrong_stop: wrong }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::rate_budget::{RateBudgetConfig, RateBudgetManager};
    use crate::stop_coordinator::RetryConfig as RC;
    use async_trait::async_trait;
    use helios_exchange::{
        ExchangeAdapter, ExitOrderPayload, GetPositionsResponse, OpenStopOrdersResponse,
        PlaceOrderData, PlaceOrderResponse, StopOrderPayload,
    };
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicI64, Ordering};

    struct FakeAdapter {
        next_order_id: AtomicI64,
    }

    #[async_trait]
    impl ExchangeAdapter for FakeAdapter {
        async fn place_stop_order(&self, _payload: StopOrderPayload) -> helios_exchange::Result<PlaceOrderResponse> {
            let id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
            Ok(PlaceOrderResponse { data: PlaceOrderData { order_id: id, price: None } })
        }
        async fn place_exit_order(&self, _payload: ExitOrderPayload) -> helios_exchange::Result<PlaceOrderResponse> {
            Ok(PlaceOrderResponse { data: PlaceOrderData { order_id: 999, price: None } })
        }
        async fn cancel_stop_order(&self, _symbol: &str, _order_id: i64) -> helios_exchange::Result<()> {
            Ok(())
        }
        async fn get_all_positions(&self) -> helios_exchange::Result<GetPositionsResponse> {
            unimplemented!()
        }
        async fn get_open_stop_orders(&self, _symbol: &str) -> helios_exchange::Result<OpenStopOrdersResponse> {
            unimplemented!()
        }
    }

    fn manager() -> StopManager {
        let account_store = Arc::new(AccountStateStore::new());
        StopManager::new(account_store, DebounceConfig::default(), dec!(0.05), |symbol| {
            Arc::new(StopReplaceCoordinator::new(
                symbol,
                Arc::new(FakeAdapter { next_order_id: AtomicI64::new(1) }),
                Arc::new(RateBudgetManager::new(RateBudgetConfig::new(100.0, 100.0, 100.0, 100.0, 0.0), EventBus::default())),
                EventBus::default(),
                RC::default(),
            ))
        })
    }

    fn specs() -> SymbolSpecs {
        SymbolSpecs { tick_size: dec!(0.1), lot_size: dec!(0.01) }
    }

    #[tokio::test]
    async fn first_call_places_a_stop() {
        let mgr = manager();
        let outcome = mgr
            .replace_stop_loss("BTC-USD", Side::Long, dec!(1), dec!(49985), 1, specs(), 10_000)
            .await
            .unwrap();
        assert!(matches!(outcome, ReplaceStopLossOutcome::Success { .. }));
    }

    #[tokio::test]
    async fn debounce_skips_rapid_tiny_moves() {
        let mgr = manager();
        mgr.replace_stop_loss("BTC-USD", Side::Long, dec!(1), dec!(49985), 1, specs(), 10_000)
            .await
            .unwrap();
        // Same price, 100ms later: debounced.
        let outcome = mgr
            .replace_stop_loss("BTC-USD", Side::Long, dec!(1), dec!(49985.01), 1, specs(), 10_100)
            .await
            .unwrap();
        assert!(matches!(outcome, ReplaceStopLossOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn large_move_bypasses_debounce() {
        let mgr = manager();
        mgr.replace_stop_loss("BTC-USD", Side::Long, dec!(1), dec!(49985), 1, specs(), 10_000)
            .await
            .unwrap();
        let outcome = mgr
            .replace_stop_loss("BTC-USD", Side::Long, dec!(1), dec!(49950), 1, specs(), 10_050)
            .await
            .unwrap();
        assert!(matches!(outcome, ReplaceStopLossOutcome::Success { .. }));
    }

    #[tokio::test]
    async fn verify_stops_detects_missing_and_wrong() {
        let mgr = manager();
        let missing = mgr.verify_stops("BTC-USD", dec!(49985), &[], dec!(0.1)).await;
        assert!(missing.missing_stop);

        let owned = vec![("stop:BTC-USD:1:sl:1".to_string(), dec!(49000))];
        let wrong = mgr.verify_stops("BTC-USD", dec!(49985), &owned, dec!(0.1)).await;
        assert!(!wrong.missing_stop);
        assert!(wrong.wrong_stop);
    }
}
