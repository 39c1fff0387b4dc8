/*
[INPUT]:  Stop/exit order payload fields before they reach the exchange adapter
[OUTPUT]: Validated, sanitized wire payloads or a ValidationError
[POS]:    Pure validation layer - consumed by C7/C8
[UPDATE]: When the wire payload shape changes
*/

use helios_exchange::{ExitOrderPayload, Side, StopDirection, StopOrderPayload};
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("validation failed: field={field} reason={reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// The side opposite a position of the given side (stops/exits are
/// always reduce-only on the opposite side of the position they protect).
fn opposite(position_side: Side) -> Side {
    match position_side {
        Side::Buy => Side::Sell,
        Side::Sell => Side::Buy,
    }
}

/// clientOid must match `stop:<symbol>:<positionId>:<kind>:<revision>`.
fn validate_stop_client_oid(client_oid: &str, symbol: &str) -> Result<(), ValidationError> {
    if client_oid.is_empty() {
        return Err(ValidationError::new("clientOid", "empty"));
    }
    let parts: Vec<&str> = client_oid.split(':').collect();
    if parts.len() != 5 || parts[0] != "stop" || parts[1] != symbol {
        return Err(ValidationError::new(
            "clientOid",
            format!("must match stop:{symbol}:<positionId>:<kind>:<revision>, got {client_oid}"),
        ));
    }
    if parts[3] != "sl" && parts[3] != "tp" {
        return Err(ValidationError::new(
            "clientOid",
            format!("kind must be sl or tp, got {}", parts[3]),
        ));
    }
    if parts[4].parse::<u64>().is_err() {
        return Err(ValidationError::new(
            "clientOid",
            format!("revision must be numeric, got {}", parts[4]),
        ));
    }
    Ok(())
}

/// Which wire payload `sanitize` is coercing numeric fields for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKind {
    Stop,
    Exit,
}

/// Coerces validated `Decimal` fields into the string form the exchange
/// wire format expects. Pure: no validation, just the numeric-to-string
/// mapping, so it can be exercised and trusted independently of either
/// validator. `stop_price` is only meaningful for `OrderKind::Stop`.
fn sanitize(size: Decimal, stop_price: Decimal, kind: OrderKind) -> (String, String) {
    match kind {
        OrderKind::Stop => (size.to_string(), stop_price.to_string()),
        OrderKind::Exit => (size.to_string(), String::new()),
    }
}

pub struct StopOrderIntent {
    pub client_oid: String,
    pub position_side: Side,
    pub symbol: String,
    pub stop_price: Decimal,
    pub size: Decimal,
}

pub fn validate_stop_order(intent: &StopOrderIntent) -> Result<StopOrderPayload, ValidationError> {
    validate_stop_client_oid(&intent.client_oid, &intent.symbol)?;

    if intent.stop_price <= Decimal::ZERO {
        return Err(ValidationError::new("stopPrice", "must be > 0"));
    }
    if intent.size <= Decimal::ZERO {
        return Err(ValidationError::new("size", "must be > 0"));
    }

    let side = opposite(intent.position_side);
    let stop = match intent.position_side {
        Side::Buy => StopDirection::Down,
        Side::Sell => StopDirection::Up,
    };
    let (size, stop_price) = sanitize(intent.size, intent.stop_price, OrderKind::Stop);

    Ok(StopOrderPayload {
        client_oid: intent.client_oid.clone(),
        side,
        symbol: intent.symbol.clone(),
        order_type: "market".to_string(),
        stop,
        stop_price,
        stop_price_type: "MP".to_string(),
        size,
        reduce_only: true,
    })
}

pub struct ExitOrderIntent {
    pub client_oid: String,
    pub position_side: Side,
    pub symbol: String,
    pub size: Decimal,
}

pub fn validate_exit_order(intent: &ExitOrderIntent) -> Result<ExitOrderPayload, ValidationError> {
    if intent.client_oid.is_empty() {
        return Err(ValidationError::new("clientOid", "empty"));
    }
    if intent.size <= Decimal::ZERO {
        return Err(ValidationError::new("size", "must be > 0"));
    }

    let (size, _) = sanitize(intent.size, Decimal::ZERO, OrderKind::Exit);

    Ok(ExitOrderPayload {
        client_oid: intent.client_oid.clone(),
        side: opposite(intent.position_side),
        symbol: intent.symbol.clone(),
        order_type: "market".to_string(),
        size,
        reduce_only: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_stop_intent() -> StopOrderIntent {
        StopOrderIntent {
            client_oid: "stop:BTC-USD:42:sl:1".to_string(),
            position_side: Side::Buy,
            symbol: "BTC-USD".to_string(),
            stop_price: Decimal::new(49985, 0),
            size: Decimal::new(1, 1),
        }
    }

    #[test]
    fn valid_stop_order_produces_expected_payload() {
        let payload = validate_stop_order(&valid_stop_intent()).unwrap();
        assert_eq!(payload.side, Side::Sell);
        assert_eq!(payload.stop, StopDirection::Down);
        assert!(payload.reduce_only);
        assert_eq!(payload.stop_price_type, "MP");
    }

    #[test]
    fn rejects_malformed_client_oid() {
        let mut intent = valid_stop_intent();
        intent.client_oid = "bogus".to_string();
        assert!(validate_stop_order(&intent).is_err());
    }

    #[test]
    fn rejects_non_positive_stop_price() {
        let mut intent = valid_stop_intent();
        intent.stop_price = Decimal::ZERO;
        let err = validate_stop_order(&intent).unwrap_err();
        assert_eq!(err.field, "stopPrice");
    }

    #[test]
    fn short_position_stop_is_buy_up() {
        let mut intent = valid_stop_intent();
        intent.position_side = Side::Sell;
        let payload = validate_stop_order(&intent).unwrap();
        assert_eq!(payload.side, Side::Buy);
        assert_eq!(payload.stop, StopDirection::Up);
    }

    #[test]
    fn valid_exit_order_is_reduce_only_opposite_side() {
        let intent = ExitOrderIntent {
            client_oid: "emergency_BTC-USD_1700000000000".to_string(),
            position_side: Side::Buy,
            symbol: "BTC-USD".to_string(),
            size: Decimal::new(5, 1),
        };
        let payload = validate_exit_order(&intent).unwrap();
        assert_eq!(payload.side, Side::Sell);
        assert!(payload.reduce_only);
    }

    #[test]
    fn rejects_empty_exit_client_oid() {
        let intent = ExitOrderIntent {
            client_oid: String::new(),
            position_side: Side::Buy,
            symbol: "BTC-USD".to_string(),
            size: Decimal::ONE,
        };
        assert!(validate_exit_order(&intent).is_err());
    }

    #[test]
    fn sanitize_coerces_stop_order_fields_to_wire_strings() {
        let (size, stop_price) = sanitize(Decimal::new(1, 1), Decimal::new(49985, 0), OrderKind::Stop);
        assert_eq!(size, "0.1");
        assert_eq!(stop_price, "49985");
    }

    #[test]
    fn sanitize_leaves_stop_price_empty_for_exit_orders() {
        let (size, stop_price) = sanitize(Decimal::new(5, 1), Decimal::ZERO, OrderKind::Exit);
        assert_eq!(size, "0.5");
        assert_eq!(stop_price, "");
    }
}
