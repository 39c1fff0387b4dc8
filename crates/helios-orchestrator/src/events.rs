/*
[INPUT]:  State transitions from C3/C7/C9/C10/C11
[OUTPUT]: Typed observable events broadcast to any number of subscribers
[POS]:    Cross-cutting - every stateful component holds an EventBus handle
[UPDATE]: When a new observable event is added to the system
*/

use rust_decimal::Decimal;
use tokio::sync::broadcast;

use crate::optimizer::TelemetrySnapshot;
use crate::rate_budget::MetricsSnapshot;

#[derive(Debug, Clone, PartialEq)]
pub enum HeliosEvent {
    OptimizerStarted,
    OptimizerStopped,
    VariantPositionOpened { variant_id: String, symbol: String },
    VariantPositionClosed { variant_id: String, symbol: String, net_pnl: Decimal },
    VariantError { variant_id: String, reason: String },
    VariantCircuitBreakerOpened { variant_id: String },
    VariantCircuitBreakerClosed { variant_id: String },
    VariantPromotionEligible { variant_id: String, score: Decimal },
    TelemetryMetrics(TelemetrySnapshot),
    RateBackoff { duration_ms: u64, count: u64, until_ms: i64 },
    RateRecovery { after_backoff_ms: u64, total_hits: u64 },
    RateReconnect { total: u64 },
    RateHighLag { lag_ms: u64, threshold_ms: u64 },
    RateHighJitter { mean_ms: f64, stddev_ms: f64, threshold_ms: f64 },
    RateMetrics(MetricsSnapshot),
    StopReplaced { symbol: String, order_id: i64, price: Decimal },
    StopEmergency { symbol: String, reason: String },
    StopCritical { symbol: String },
    ReconcilerDrift { symbol: String, score: u64 },
}

/// `broadcast` fans one event out to every live subscriber; a slow or
/// absent subscriber never blocks emission (the transport is an interface
/// this crate injects, so fire-and-forget is the correct default).
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<HeliosEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HeliosEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: HeliosEvent) {
        // No subscribers is not an error: events are observational.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.emit(HeliosEvent::OptimizerStarted);
        assert_eq!(rx.recv().await.unwrap(), HeliosEvent::OptimizerStarted);
    }

    #[test]
    fn emit_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.emit(HeliosEvent::OptimizerStopped);
    }
}
