/*
[INPUT]:  Side, entry price, current stop/ROI state, trailing config
[OUTPUT]: Next protective stop price, with a monotonic-movement guarantee
[POS]:    Pure policy layer - consumed by C8/C10
[UPDATE]: When adding a new trailing mode (atr, dynamic)
*/

use rust_decimal::Decimal;
use thiserror::Error;

use crate::decimal::{
    calc_stop_loss_price, fee_adjusted_break_even, InvalidInputError, Side,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrailingError {
    #[error("unsupported trailing mode {0:?}, only staircase is implemented")]
    UnsupportedMode(String),
    #[error(transparent)]
    Invalid(#[from] InvalidInputError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailingMode {
    Staircase,
}

impl TrailingMode {
    pub fn parse(raw: &str) -> Result<Self, TrailingError> {
        match raw {
            "staircase" => Ok(Self::Staircase),
            other => Err(TrailingError::UnsupportedMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TrailingConfig {
    pub break_even_buffer: Decimal,
    pub trailing_step_percent: Decimal,
    pub trailing_move_percent: Decimal,
    pub mode: TrailingMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailingReason {
    NoChange,
    BreakEven,
    TrailingStep,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrailingResult {
    pub new_stop: Decimal,
    pub new_last_step: i64,
    pub reason: TrailingReason,
    pub break_even_armed: bool,
}

/// Does `candidate` tighten `current` for the given side?
fn tightens(side: Side, current: Decimal, candidate: Decimal) -> bool {
    match side {
        Side::Long => candidate > current,
        Side::Short => candidate < current,
    }
}

#[allow(clippy::too_many_arguments)]
pub fn next_stop(
    side: Side,
    entry_price: Decimal,
    current_stop: Decimal,
    current_roi: Decimal,
    last_roi_step: i64,
    leverage: Decimal,
    fee_in: Decimal,
    fee_out: Decimal,
    config: &TrailingConfig,
    break_even_armed: bool,
) -> Result<TrailingResult, TrailingError> {
    let break_even_roi = fee_adjusted_break_even(fee_in, fee_out, leverage, config.break_even_buffer);

    if !break_even_armed {
        if current_roi >= break_even_roi {
            let buffer_frac = config.break_even_buffer / leverage / Decimal::ONE_HUNDRED;
            let candidate = match side {
                Side::Long => entry_price * (Decimal::ONE + buffer_frac),
                Side::Short => entry_price * (Decimal::ONE - buffer_frac),
            };
            if tightens(side, current_stop, candidate) {
                return Ok(TrailingResult {
                    new_stop: candidate,
                    new_last_step: last_roi_step,
                    reason: TrailingReason::BreakEven,
                    break_even_armed: true,
                });
            }
        }
        return Ok(TrailingResult {
            new_stop: current_stop,
            new_last_step: last_roi_step,
            reason: TrailingReason::NoChange,
            break_even_armed,
        });
    }

    match config.mode {
        TrailingMode::Staircase => {
            let progress = current_roi - break_even_roi;
            let step = (progress / config.trailing_step_percent).floor();
            let step_i64: i64 = step.try_into().unwrap_or(i64::MIN);

            if step_i64 > last_roi_step {
                // priceMoveFromROI(currentROI,leverage): invert leveragedRoiPercent.
                let price_move_full = entry_price * current_roi / leverage / Decimal::ONE_HUNDRED;
                let retained = Decimal::ONE - config.trailing_move_percent / Decimal::ONE_HUNDRED;
                let price_move = price_move_full * retained;
                let candidate = match side {
                    Side::Long => entry_price + price_move,
                    Side::Short => entry_price - price_move,
                };
                if tightens(side, current_stop, candidate) {
                    return Ok(TrailingResult {
                        new_stop: candidate,
                        new_last_step: step_i64,
                        reason: TrailingReason::TrailingStep,
                        break_even_armed,
                    });
                }
                return Ok(TrailingResult {
                    new_stop: current_stop,
                    new_last_step: step_i64,
                    reason: TrailingReason::NoChange,
                    break_even_armed,
                });
            }

            Ok(TrailingResult {
                new_stop: current_stop,
                new_last_step: last_roi_step,
                reason: TrailingReason::NoChange,
                break_even_armed,
            })
        }
    }
}

pub fn calculate_initial_stop(
    side: Side,
    entry: Decimal,
    sl_roi_percent: Decimal,
    leverage: Decimal,
) -> Result<Decimal, InvalidInputError> {
    calc_stop_loss_price(side, entry, sl_roi_percent, leverage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn cfg() -> TrailingConfig {
        TrailingConfig {
            break_even_buffer: dec!(0.1),
            trailing_step_percent: dec!(0.15),
            trailing_move_percent: dec!(5),
            mode: TrailingMode::Staircase,
        }
    }

    #[test]
    fn arms_break_even_at_threshold_inclusive() {
        let break_even_roi = fee_adjusted_break_even(dec!(0.0006), dec!(0.0006), dec!(10), dec!(0.1));
        let result = next_stop(
            Side::Long,
            dec!(50000),
            dec!(49500),
            break_even_roi,
            0,
            dec!(10),
            dec!(0.0006),
            dec!(0.0006),
            &cfg(),
            false,
        )
        .unwrap();
        assert_eq!(result.reason, TrailingReason::BreakEven);
        assert!(result.break_even_armed);
        assert!(result.new_stop > dec!(49500));
    }

    #[test]
    fn does_not_arm_break_even_below_threshold() {
        let break_even_roi = fee_adjusted_break_even(dec!(0.0006), dec!(0.0006), dec!(10), dec!(0.1));
        let result = next_stop(
            Side::Long,
            dec!(50000),
            dec!(49500),
            break_even_roi - dec!(0.01),
            0,
            dec!(10),
            dec!(0.0006),
            dec!(0.0006),
            &cfg(),
            false,
        )
        .unwrap();
        assert_eq!(result.reason, TrailingReason::NoChange);
        assert!(!result.break_even_armed);
    }

    #[test]
    fn monotonic_invariant_rejects_loosening_long_stop() {
        let result = next_stop(
            Side::Long,
            dec!(50000),
            dec!(50200),
            dec!(5),
            3,
            dec!(10),
            dec!(0.0006),
            dec!(0.0006),
            &cfg(),
            true,
        )
        .unwrap();
        // Whatever staircase computes, it must never be below the current stop.
        assert!(result.new_stop >= dec!(50200));
    }

    #[test]
    fn staircase_step_uses_floor_and_is_exclusive_at_boundary() {
        let break_even_roi = fee_adjusted_break_even(dec!(0.0006), dec!(0.0006), dec!(10), dec!(0.1));
        // progress exactly equal to one step boundary should NOT advance past
        // last_roi_step (floor(1.0) == 1, not > 1).
        let roi_at_boundary = break_even_roi + cfg().trailing_step_percent;
        let result = next_stop(
            Side::Long,
            dec!(50000),
            dec!(50100),
            roi_at_boundary,
            1,
            dec!(10),
            dec!(0.0006),
            dec!(0.0006),
            &cfg(),
            true,
        )
        .unwrap();
        assert_eq!(result.reason, TrailingReason::NoChange);
    }

    #[test]
    fn staircase_advances_past_next_step() {
        let break_even_roi = fee_adjusted_break_even(dec!(0.0006), dec!(0.0006), dec!(10), dec!(0.1));
        let roi = break_even_roi + cfg().trailing_step_percent * dec!(2.5);
        let result = next_stop(
            Side::Long,
            dec!(50000),
            dec!(49990),
            roi,
            0,
            dec!(10),
            dec!(0.0006),
            dec!(0.0006),
            &cfg(),
            true,
        )
        .unwrap();
        assert_eq!(result.reason, TrailingReason::TrailingStep);
        assert_eq!(result.new_last_step, 2);
    }

    #[test]
    fn rejects_unsupported_mode() {
        assert!(TrailingMode::parse("atr").is_err());
        assert!(TrailingMode::parse("dynamic").is_err());
        assert!(TrailingMode::parse("staircase").is_ok());
    }

    #[test]
    fn calculate_initial_stop_delegates_to_decimal_math() {
        let stop = calculate_initial_stop(Side::Long, dec!(50010), dec!(0.5), dec!(10)).unwrap();
        assert_eq!(stop, dec!(49984.995));
    }
}
