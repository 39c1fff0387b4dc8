/*
[INPUT]:  Outbound order/position/stop-order operations needed by the orchestrator
[OUTPUT]: A venue-agnostic async trait plus the wire payload types it exchanges
[POS]:    Adapter boundary - the orchestrator depends only on this trait
[UPDATE]: When the orchestrator needs a new exchange operation
*/

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    ExitOrderPayload, GetPositionsResponse, OpenStopOrdersResponse, PlaceOrderResponse,
    StopOrderPayload,
};

/// Everything the orchestrator needs from a perpetual-futures venue.
///
/// Concrete wiring (HTTP signing, websockets, auth) lives outside this crate;
/// here we only fix the shape of the boundary so C3/C7/C8/C9 can be built and
/// tested against a fake without depending on a live venue.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn place_stop_order(&self, payload: StopOrderPayload) -> Result<PlaceOrderResponse>;

    async fn place_exit_order(&self, payload: ExitOrderPayload) -> Result<PlaceOrderResponse>;

    /// Must return `Ok` (not an error) if the order is already not alive.
    async fn cancel_stop_order(&self, symbol: &str, order_id: i64) -> Result<()>;

    async fn get_all_positions(&self) -> Result<GetPositionsResponse>;

    async fn get_open_stop_orders(&self, symbol: &str) -> Result<OpenStopOrdersResponse>;
}
