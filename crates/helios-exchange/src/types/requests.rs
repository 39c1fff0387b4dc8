/*
[INPUT]:  API schema definitions and serde requirements
[OUTPUT]: Typed Rust request structs with serialization support
[POS]:    Data layer - type definitions for API communication
[UPDATE]: When API schema changes or new types added
*/

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::enums::{Chain, MarginMode, OrderStatus, OrderType, Side, TimeInForce};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrderRequest {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    #[serde(with = "rust_decimal::serde::str")]
    pub qty: Decimal,
    pub time_in_force: TimeInForce,
    pub reduce_only: bool,
    #[serde(with = "rust_decimal::serde::str_option")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cl_ord_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub margin_mode: Option<MarginMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leverage: Option<u32>,
    #[serde(with = "rust_decimal::serde::str_option")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tp_price: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::str_option")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sl_price: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelOrderRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cl_ord_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLeverageRequest {
    pub symbol: String,
    pub leverage: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOrdersRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_type: Option<OrderType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPositionsRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSigninRequest {
    pub chain: Chain,
    pub address: String,
    #[serde(rename = "requestId")]
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthLoginRequest {
    pub chain: Chain,
    pub signature: String,
    #[serde(rename = "signedData")]
    pub signed_data: String,
    #[serde(rename = "expiresSeconds")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_seconds: Option<u64>,
}

/// Direction of a stop trigger relative to mark price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopDirection {
    Up,
    Down,
}

/// Canonical stop order wire payload (see spec External Interfaces).
/// All numeric fields are pre-coerced to strings by `sanitize` before this
/// struct is built, so serialization here is a straight passthrough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopOrderPayload {
    pub client_oid: String,
    pub side: Side,
    pub symbol: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub stop: StopDirection,
    pub stop_price: String,
    pub stop_price_type: String,
    pub size: String,
    pub reduce_only: bool,
}

/// Canonical reduce-only market exit wire payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitOrderPayload {
    pub client_oid: String,
    pub side: Side,
    pub symbol: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub size: String,
    pub reduce_only: bool,
}
