/*
[INPUT]:  Side, entry/exit/mark prices, fee rates, leverage, tick/lot sizes
[OUTPUT]: Fixed-precision PnL/ROI/stop-price arithmetic
[POS]:    Pure math layer - depended on by C5, C6, C8
[UPDATE]: When adding a new pricing/PnL formula
*/

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Long,
    Short,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidInputError {
    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: String },
    #[error("{field} must be finite")]
    NotFinite { field: &'static str },
}

fn require_positive(field: &'static str, value: Decimal) -> Result<(), InvalidInputError> {
    if value.is_sign_negative() || value.is_zero() {
        return Err(InvalidInputError::NotPositive {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// `side==Long ? exit-entry : entry-exit`
pub fn price_diff(side: Side, entry: Decimal, exit: Decimal) -> Decimal {
    match side {
        Side::Long => exit - entry,
        Side::Short => entry - exit,
    }
}

pub fn unrealized_pnl(diff: Decimal, size: Decimal, multiplier: Decimal) -> Decimal {
    diff * size * multiplier
}

pub fn net_pnl(
    gross: Decimal,
    notional: Decimal,
    fee_in: Decimal,
    fee_out: Decimal,
    funding: Decimal,
) -> Decimal {
    gross - notional * (fee_in + fee_out) - funding
}

pub fn leveraged_roi_percent(net_pnl: Decimal, margin: Decimal) -> Result<Decimal, InvalidInputError> {
    require_positive("margin", margin)?;
    Ok(net_pnl / margin * Decimal::ONE_HUNDRED)
}

/// Price move that realizes exactly `-slRoiPercent` at the given leverage,
/// signed by side: for Long the stop sits below entry, for Short above.
pub fn calc_stop_loss_price(
    side: Side,
    entry: Decimal,
    sl_roi_percent: Decimal,
    leverage: Decimal,
) -> Result<Decimal, InvalidInputError> {
    require_positive("entry", entry)?;
    require_positive("slRoiPercent", sl_roi_percent)?;
    require_positive("leverage", leverage)?;
    let price_move = entry * sl_roi_percent / leverage / Decimal::ONE_HUNDRED;
    Ok(match side {
        Side::Long => entry - price_move,
        Side::Short => entry + price_move,
    })
}

/// Symmetric to `calc_stop_loss_price`: the take-profit side is favorable.
pub fn calc_take_profit_price(
    side: Side,
    entry: Decimal,
    tp_roi_percent: Decimal,
    leverage: Decimal,
) -> Result<Decimal, InvalidInputError> {
    require_positive("entry", entry)?;
    require_positive("tpRoiPercent", tp_roi_percent)?;
    require_positive("leverage", leverage)?;
    let price_move = entry * tp_roi_percent / leverage / Decimal::ONE_HUNDRED;
    Ok(match side {
        Side::Long => entry + price_move,
        Side::Short => entry - price_move,
    })
}

/// ROI % threshold that covers both entry and exit fees plus a safety buffer.
pub fn fee_adjusted_break_even(
    fee_in: Decimal,
    fee_out: Decimal,
    leverage: Decimal,
    buffer_percent: Decimal,
) -> Decimal {
    (fee_in + fee_out) * leverage * Decimal::ONE_HUNDRED + buffer_percent
}

/// Half-away-from-zero rounding to the nearest multiple of `tick`.
pub fn round_to_tick_size(price: Decimal, tick: Decimal) -> Result<Decimal, InvalidInputError> {
    require_positive("tick", tick)?;
    let quotient = price / tick;
    let rounded = quotient.round_dp_with_strategy(
        0,
        rust_decimal::RoundingStrategy::MidpointAwayFromZero,
    );
    Ok(rounded * tick)
}

/// Floor to the nearest multiple of `lot`.
pub fn round_to_lot_size(size: Decimal, lot: Decimal) -> Result<Decimal, InvalidInputError> {
    require_positive("lot", lot)?;
    let quotient = (size / lot).floor();
    Ok(quotient * lot)
}
