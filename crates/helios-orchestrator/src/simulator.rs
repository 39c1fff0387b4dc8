/*
[INPUT]:  Account balance, sizing %, leverage, side, mid price, fill model, fees
[OUTPUT]: Deterministic (given seeded rng) paper entry/mark/exit states
[POS]:    Pure simulation layer - consumed by C10 (Variant)
[UPDATE]: When adding a new fill model or fee schedule
*/

use rand::Rng;
use rust_decimal::Decimal;

use crate::decimal::{price_diff, InvalidInputError, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillModel {
    Taker,
    ProbabilisticLimit,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntryState {
    pub margin: Decimal,
    pub notional: Decimal,
    pub entry_fill_price: Decimal,
    pub size: Decimal,
    pub entry_fee: Decimal,
    pub entry_fee_rate: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkState {
    pub unrealized_gross: Decimal,
    pub unrealized_net: Decimal,
    pub unrealized_roi: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitState {
    pub exit_fill_price: Decimal,
    pub exit_fee: Decimal,
    pub gross_realized: Decimal,
    pub net_realized: Decimal,
    pub realized_roi: Decimal,
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

/// `slippagePercent` is already in percent (e.g. 0.02 means 0.02%), matching
/// the code-meaning spec.md's open question resolves this to.
fn slippage_factor(slippage_percent: Decimal) -> Decimal {
    slippage_percent / Decimal::ONE_HUNDRED
}

#[allow(clippy::too_many_arguments)]
pub fn simulate_entry(
    account_balance: Decimal,
    position_size_percent: Decimal,
    leverage: Decimal,
    side: Side,
    mid_price: Decimal,
    fill_model: FillModel,
    limit_price: Option<Decimal>,
    maker_fee: Decimal,
    taker_fee: Decimal,
    slippage_percent: Decimal,
    fill_probability: Decimal,
    multiplier: Decimal,
    rng: &mut impl Rng,
) -> Result<EntryState, InvalidInputError> {
    require_positive("accountBalance", account_balance)?;
    if position_size_percent <= Decimal::ZERO || position_size_percent > Decimal::ONE_HUNDRED {
        return Err(InvalidInputError::NotPositive {
            field: "positionSizePercent",
            value: position_size_percent.to_string(),
        });
    }
    if leverage < Decimal::ONE || leverage > Decimal::ONE_HUNDRED {
        return Err(InvalidInputError::NotPositive {
            field: "leverage",
            value: leverage.to_string(),
        });
    }
    require_positive("midPrice", mid_price)?;

    let margin = account_balance * position_size_percent / Decimal::ONE_HUNDRED;
    let notional = margin * leverage;
    let slip = slippage_factor(slippage_percent);

    let (entry_fill_price, fee_rate) = match fill_model {
        FillModel::Taker => (taker_fill_price(side, mid_price, slip), taker_fee),
        FillModel::ProbabilisticLimit => {
            if rng.gen_bool(fill_probability.try_into().unwrap_or(0.0)) {
                let price = limit_price.unwrap_or(mid_price);
                (price, maker_fee)
            } else {
                (taker_fill_price(side, mid_price, slip), taker_fee)
            }
        }
    };

    let size = notional / (entry_fill_price * multiplier);
    let entry_fee = notional * fee_rate;

    Ok(EntryState {
        margin,
        notional,
        entry_fill_price,
        size,
        entry_fee,
        entry_fee_rate: fee_rate,
    })
}

fn taker_fill_price(side: Side, mid_price: Decimal, slip: Decimal) -> Decimal {
    match side {
        Side::Long => mid_price * (Decimal::ONE + slip),
        Side::Short => mid_price * (Decimal::ONE - slip),
    }
}

pub fn mark_to_market(
    side: Side,
    entry: &EntryState,
    current_price: Decimal,
    multiplier: Decimal,
    funding: Decimal,
) -> MarkState {
    let gross = price_diff(side, entry.entry_fill_price, current_price) * entry.size * multiplier;
    let net = gross - entry.entry_fee - funding;
    let roi = if entry.margin.is_zero() {
        Decimal::ZERO
    } else {
        net / entry.margin * Decimal::ONE_HUNDRED
    };
    MarkState {
        unrealized_gross: gross,
        unrealized_net: net,
        unrealized_roi: roi,
    }
}

pub fn simulate_exit(
    side: Side,
    entry: &EntryState,
    target_exit_price: Decimal,
    taker_fee: Decimal,
    slippage_percent: Decimal,
    multiplier: Decimal,
    funding: Decimal,
) -> ExitState {
    let slip = slippage_factor(slippage_percent);
    // Adverse slippage: long receives less, short pays more.
    let exit_fill_price = match side {
        Side::Long => target_exit_price * (Decimal::ONE - slip),
        Side::Short => target_exit_price * (Decimal::ONE + slip),
    };

    let exit_fee = entry.notional * taker_fee;
    let gross_realized = price_diff(side, entry.entry_fill_price, exit_fill_price) * entry.size * multiplier;
    let net_realized = gross_realized - (entry.entry_fee + exit_fee) - funding;
    let realized_roi = if entry.margin.is_zero() {
        Decimal::ZERO
    } else {
        net_realized / entry.margin * Decimal::ONE_HUNDRED
    };

    ExitState {
        exit_fill_price,
        exit_fee,
        gross_realized,
        net_realized,
        realized_roi,
    }
}

/// The exit price at which `netRealized == 0`, accounting for both fees and
/// both slippages.
pub fn calculate_break_even(
    side: Side,
    entry: &EntryState,
    taker_fee: Decimal,
    slippage_percent: Decimal,
    multiplier: Decimal,
) -> Decimal {
    let slip = slippage_factor(slippage_percent);
    // net = priceDiff*size*mult - entryFee - notional*takerFee - 0 == 0
    // => priceDiff = (entryFee + notional*takerFee) / (size*mult)
    let exit_fee = entry.notional * taker_fee;
    let required_diff = (entry.entry_fee + exit_fee) / (entry.size * multiplier);
    let pre_slippage_exit = match side {
        Side::Long => entry.entry_fill_price + required_diff,
        Side::Short => entry.entry_fill_price - required_diff,
    };
    // Invert the adverse-slippage transform applied in simulate_exit.
    match side {
        Side::Long => pre_slippage_exit / (Decimal::ONE - slip),
        Side::Short => pre_slippage_exit / (Decimal::ONE + slip),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rust_decimal_macros::dec;

    fn seeded_rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn scenario_entry_and_immediate_mark() {
        let mut rng = seeded_rng();
        let entry = simulate_entry(
            dec!(100),
            dec!(100),
            dec!(10),
            Side::Long,
            dec!(50000),
            FillModel::Taker,
            None,
            dec!(0.0002),
            dec!(0.0006),
            dec!(0.02),
            dec!(1.0),
            dec!(1),
            &mut rng,
        )
        .unwrap();

        assert_eq!(entry.entry_fill_price, dec!(50010));
        assert!((entry.size - dec!(0.019996)).abs() < dec!(0.0001));

        let mark = mark_to_market(Side::Long, &entry, dec!(50000), dec!(1), Decimal::ZERO);
        assert!(mark.unrealized_roi < Decimal::ZERO);
    }

    #[test]
    fn round_trip_no_move_is_pure_fee_loss() {
        let mut rng = seeded_rng();
        let entry = simulate_entry(
            dec!(100),
            dec!(100),
            dec!(10),
            Side::Long,
            dec!(50000),
            FillModel::Taker,
            None,
            dec!(0.0002),
            dec!(0.0006),
            dec!(0),
            dec!(1.0),
            dec!(1),
            &mut rng,
        )
        .unwrap();

        let exit = simulate_exit(
            Side::Long,
            &entry,
            entry.entry_fill_price,
            dec!(0.0006),
            dec!(0),
            dec!(1),
            Decimal::ZERO,
        );

        let expected_loss = -(entry.entry_fee + exit.exit_fee);
        assert!((exit.net_realized - expected_loss).abs() < dec!(0.0000001));
    }

    #[test]
    fn calculate_break_even_yields_zero_net_on_exit() {
        let mut rng = seeded_rng();
        let entry = simulate_entry(
            dec!(100),
            dec!(100),
            dec!(10),
            Side::Long,
            dec!(50000),
            FillModel::Taker,
            None,
            dec!(0.0002),
            dec!(0.0006),
            dec!(0),
            dec!(1.0),
            dec!(1),
            &mut rng,
        )
        .unwrap();

        let be_price = calculate_break_even(Side::Long, &entry, dec!(0.0006), dec!(0), dec!(1));
        let exit = simulate_exit(Side::Long, &entry, be_price, dec!(0.0006), dec!(0), dec!(1), Decimal::ZERO);
        assert!(exit.net_realized.abs() < dec!(0.000001));
    }

    #[test]
    fn rejects_invalid_inputs() {
        let mut rng = seeded_rng();
        assert!(simulate_entry(
            Decimal::ZERO,
            dec!(100),
            dec!(10),
            Side::Long,
            dec!(50000),
            FillModel::Taker,
            None,
            dec!(0.0002),
            dec!(0.0006),
            dec!(0),
            dec!(1.0),
            dec!(1),
            &mut rng,
        )
        .is_err());

        assert!(simulate_entry(
            dec!(100),
            dec!(150),
            dec!(10),
            Side::Long,
            dec!(50000),
            FillModel::Taker,
            None,
            dec!(0.0002),
            dec!(0.0006),
            dec!(0),
            dec!(1.0),
            dec!(1),
            &mut rng,
        )
        .is_err());
    }
}
