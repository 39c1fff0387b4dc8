/*
[INPUT]:  Desired stop-order replacement for one symbol
[OUTPUT]: Confirmed stop order id, or an emergency close / CriticalUnprotected
[POS]:    Per-symbol state machine, owned exclusively by C8 (Stop Manager)
[UPDATE]: When the retry/escalation contract changes
*/

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use helios_exchange::{ExchangeAdapter, HeliosError};
use rand::Rng;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::decimal::Side;
use crate::events::{EventBus, HeliosEvent};
use crate::rate_budget::{Priority, RateBudgetManager};
use crate::validator::{self, ExitOrderIntent, StopOrderIntent, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Canceling,
    Placing,
    Confirmed,
    Error,
    EmergencyClosing,
    CriticalUnprotected,
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("exchange error: {0}")]
    Exchange(#[from] HeliosError),
    #[error("position is unprotected after a failed emergency close: {0}")]
    CriticalUnprotected(String),
}

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplaceOutcome {
    pub success: bool,
    pub order_id: Option<i64>,
    pub final_state: CoordinatorState,
}

fn jittered_delay(retry_config: &RetryConfig, retry_index: u32, rng: &mut impl Rng) -> Duration {
    let base_ms = retry_config.base_delay.as_millis() as f64;
    let factor = 2f64.powi(retry_index as i32);
    let jitter = 0.8 + rng.gen_range(0.0..0.4);
    let delay_ms = (base_ms * factor * jitter).min(retry_config.max_delay.as_millis() as f64);
    Duration::from_millis(delay_ms as u64)
}

fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

struct Inner {
    state: CoordinatorState,
}

/// One instance per symbol. `inner` is guarded by a tokio Mutex that doubles
/// as the single-worker FIFO queue described in the concurrency model:
/// `replace_stop_order` holds the lock for the full cancel-then-place
/// sequence, so concurrent callers are serviced strictly in arrival order.
pub struct StopReplaceCoordinator {
    symbol: String,
    adapter: Arc<dyn ExchangeAdapter>,
    rate_budget: Arc<RateBudgetManager>,
    events: EventBus,
    retry_config: RetryConfig,
    current_order_id: AtomicI64,
    retry_count: AtomicU32,
    inner: Mutex<Inner>,
}

impl StopReplaceCoordinator {
    pub fn new(
        symbol: impl Into<String>,
        adapter: Arc<dyn ExchangeAdapter>,
        rate_budget: Arc<RateBudgetManager>,
        events: EventBus,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            adapter,
            rate_budget,
            events,
            retry_config,
            current_order_id: AtomicI64::new(0),
            retry_count: AtomicU32::new(0),
            inner: Mutex::new(Inner { state: CoordinatorState::Idle }),
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.inner.try_lock().map(|g| g.state).unwrap_or(CoordinatorState::Placing)
    }

    fn current_order_id(&self) -> Option<i64> {
        let id = self.current_order_id.load(Ordering::SeqCst);
        if id == 0 { None } else { Some(id) }
    }

    pub async fn replace_stop_order(
        &self,
        new_params: StopOrderIntent,
        position_side: Side,
        exit_size: Decimal,
    ) -> Result<ReplaceOutcome, CoordinatorError> {
        let mut guard = self.inner.lock().await;

        let payload = validator::validate_stop_order(&new_params)?;

        loop {
            if let Some(existing) = self.current_order_id() {
                guard.state = CoordinatorState::Canceling;
                self.rate_budget
                    .request(Priority::Critical, 1.0)
                    .await
                    .map_err(|_| HeliosError::TransientExchange("rate budget unavailable".into()))?;
                match self.adapter.cancel_stop_order(&self.symbol, existing).await {
                    Ok(()) => {}
                    Err(e) if e.is_terminal_already() => {
                        // Already filled/canceled: treated as a successful cancel.
                    }
                    Err(e) => {
                        if let HeliosError::RateLimited { .. } = e {
                            self.rate_budget.report_429();
                        }
                        if let Some(outcome) = self.handle_error(&mut guard, position_side, exit_size).await? {
                            return Ok(outcome);
                        }
                        continue;
                    }
                }
            }

            guard.state = CoordinatorState::Placing;
            self.rate_budget
                .request(Priority::Critical, 1.0)
                .await
                .map_err(|_| HeliosError::TransientExchange("rate budget unavailable".into()))?;
            match self.adapter.place_stop_order(payload.clone()).await {
                Ok(response) => {
                    let order_id = response.data.order_id;
                    self.current_order_id.store(order_id, Ordering::SeqCst);
                    self.retry_count.store(0, Ordering::SeqCst);
                    guard.state = CoordinatorState::Confirmed;
                    guard.state = CoordinatorState::Idle;
                    self.events.emit(HeliosEvent::StopReplaced {
                        symbol: self.symbol.clone(),
                        order_id,
                        price: new_params.stop_price,
                    });
                    return Ok(ReplaceOutcome {
                        success: true,
                        order_id: Some(order_id),
                        final_state: CoordinatorState::Idle,
                    });
                }
                Err(e) => {
                    if let HeliosError::RateLimited { .. } = e {
                        self.rate_budget.report_429();
                    }
                    if let Some(outcome) = self.handle_error(&mut guard, position_side, exit_size).await? {
                        return Ok(outcome);
                    }
                    continue;
                }
            }
        }
    }

    /// Returns `Some(outcome)` when the retry budget is exhausted and an
    /// emergency close has been attempted (terminal); `None` means the
    /// caller should retry the cancel-then-place sequence again.
    async fn handle_error(
        &self,
        guard: &mut Inner,
        position_side: Side,
        exit_size: Decimal,
    ) -> Result<Option<ReplaceOutcome>, CoordinatorError> {
        guard.state = CoordinatorState::Error;
        let retry_index = self.retry_count.fetch_add(1, Ordering::SeqCst);
        if retry_index < self.retry_config.max_retries {
            let mut rng = rand::thread_rng();
            let delay = jittered_delay(&self.retry_config, retry_index, &mut rng);
            tokio::time::sleep(delay).await;
            return Ok(None);
        }

        let outcome = self.emergency_close(guard, position_side, exit_size).await?;
        Ok(Some(outcome))
    }

    async fn emergency_close(
        &self,
        guard: &mut Inner,
        position_side: Side,
        exit_size: Decimal,
    ) -> Result<ReplaceOutcome, CoordinatorError> {
        guard.state = CoordinatorState::EmergencyClosing;
        let intent = ExitOrderIntent {
            client_oid: format!("emergency_{}_{}", self.symbol, now_epoch_ms()),
            position_side: match position_side {
                Side::Long => helios_exchange::Side::Buy,
                Side::Short => helios_exchange::Side::Sell,
            },
            symbol: self.symbol.clone(),
            size: exit_size,
        };
        let payload = validator::validate_exit_order(&intent)?;

        let submit = self.rate_budget.request(Priority::Critical, 1.0).await;
        let result = if submit.is_ok() {
            self.adapter.place_exit_order(payload).await
        } else {
            Err(HeliosError::TransientExchange("rate budget unavailable".into()))
        };

        match result {
            Ok(_response) => {
                self.current_order_id.store(0, Ordering::SeqCst);
                self.retry_count.store(0, Ordering::SeqCst);
                guard.state = CoordinatorState::Idle;
                self.events.emit(HeliosEvent::StopEmergency {
                    symbol: self.symbol.clone(),
                    reason: "retry_budget_exhausted".to_string(),
                });
                Ok(ReplaceOutcome {
                    success: true,
                    order_id: None,
                    final_state: CoordinatorState::Idle,
                })
            }
            Err(e) => {
                guard.state = CoordinatorState::CriticalUnprotected;
                self.events.emit(HeliosEvent::StopCritical { symbol: self.symbol.clone() });
                Err(CoordinatorError::CriticalUnprotected(format!(
                    "{}: emergency close failed: {e}",
                    self.symbol
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use helios_exchange::{
        ExitOrderPayload, GetPositionsResponse, OpenStopOrdersResponse, PlaceOrderData,
        PlaceOrderResponse, StopOrderPayload,
    };
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicUsize;

    struct FakeAdapter {
        place_stop_failures: AtomicUsize,
        place_exit_should_fail: bool,
        next_order_id: AtomicI64,
    }

    #[async_trait]
    impl ExchangeAdapter for FakeAdapter {
        async fn place_stop_order(&self, _payload: StopOrderPayload) -> helios_exchange::Result<PlaceOrderResponse> {
            let remaining = self.place_stop_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.place_stop_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(HeliosError::TransientExchange("simulated".into()));
            }
            let id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
            Ok(PlaceOrderResponse { data: PlaceOrderData { order_id: id, price: None } })
        }

        async fn place_exit_order(&self, _payload: ExitOrderPayload) -> helios_exchange::Result<PlaceOrderResponse> {
            if self.place_exit_should_fail {
                return Err(HeliosError::PermanentExchange("simulated".into()));
            }
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

    fn rate_budget() -> Arc<RateBudgetManager> {
        Arc::new(RateBudgetManager::new(
            crate::rate_budget::RateBudgetConfig::new(100.0, 100.0, 100.0, 100.0, 0.0),
            EventBus::default(),
        ))
    }

    fn intent() -> StopOrderIntent {
        StopOrderIntent {
            client_oid: "stop:BTC-USD:1:sl:1".to_string(),
            position_side: helios_exchange::Side::Buy,
            symbol: "BTC-USD".to_string(),
            stop_price: dec!(49985),
            size: dec!(0.1),
        }
    }

    #[tokio::test]
    async fn happy_path_places_and_confirms() {
        let adapter = Arc::new(FakeAdapter {
            place_stop_failures: AtomicUsize::new(0),
            place_exit_should_fail: false,
            next_order_id: AtomicI64::new(1),
        });
        let coordinator = StopReplaceCoordinator::new(
            "BTC-USD",
            adapter,
            rate_budget(),
            EventBus::default(),
            RetryConfig::default(),
        );

        let outcome = coordinator
            .replace_stop_order(intent(), Side::Long, dec!(0.1))
            .await
            .unwrap();
        assert!(outcome.success);
        assert!(outcome.order_id.is_some());
        assert_eq!(coordinator.current_order_id(), outcome.order_id);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let adapter = Arc::new(FakeAdapter {
            place_stop_failures: AtomicUsize::new(2),
            place_exit_should_fail: false,
            next_order_id: AtomicI64::new(1),
        });
        let coordinator = StopReplaceCoordinator::new(
            "BTC-USD",
            adapter,
            rate_budget(),
            EventBus::default(),
            RetryConfig { max_retries: 5, base_delay: Duration::from_millis(1), max_delay: Duration::from_millis(5) },
        );

        let outcome = coordinator
            .replace_stop_order(intent(), Side::Long, dec!(0.1))
            .await
            .unwrap();
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn escalates_to_emergency_close_after_exhausting_retries() {
        let adapter = Arc::new(FakeAdapter {
            place_stop_failures: AtomicUsize::new(100),
            place_exit_should_fail: false,
            next_order_id: AtomicI64::new(1),
        });
        let coordinator = StopReplaceCoordinator::new(
            "BTC-USD",
            adapter,
            rate_budget(),
            EventBus::default(),
            RetryConfig { max_retries: 2, base_delay: Duration::from_millis(1), max_delay: Duration::from_millis(2) },
        );

        let outcome = coordinator
            .replace_stop_order(intent(), Side::Long, dec!(0.1))
            .await
            .unwrap();
        assert!(outcome.success);
        assert!(outcome.order_id.is_none());
        assert_eq!(outcome.final_state, CoordinatorState::Idle);
    }

    #[tokio::test]
    async fn emergency_close_failure_ends_in_critical_unprotected() {
        let adapter = Arc::new(FakeAdapter {
            place_stop_failures: AtomicUsize::new(100),
            place_exit_should_fail: true,
            next_order_id: AtomicI64::new(1),
        });
        let coordinator = StopReplaceCoordinator::new(
            "BTC-USD",
            adapter,
            rate_budget(),
            EventBus::default(),
            RetryConfig { max_retries: 1, base_delay: Duration::from_millis(1), max_delay: Duration::from_millis(2) },
        );

        let result = coordinator.replace_stop_order(intent(), Side::Long, dec!(0.1)).await;
        assert!(matches!(result, Err(CoordinatorError::CriticalUnprotected(_))));
    }
}
