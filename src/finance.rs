use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::fmt;

use crate::connector::{PositionSide, PositionSnapshot};

/// Raised when a calculation needs a leg that is not open. A one-sided
/// book is a normal state, so callers are expected to check presence and
/// treat this as "no signal", not as a failure of the cycle.
#[derive(Debug, PartialEq, Eq)]
pub enum FinanceError {
    MissingPosition,
    MissingLeg(PositionSide),
}

impl fmt::Display for FinanceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FinanceError::MissingPosition => write!(f, "position is not open"),
            FinanceError::MissingLeg(side) => {
                write!(f, "no {} leg open for this pair", side.label())
            }
        }
    }
}

impl std::error::Error for FinanceError {}

/// Unrealized PnL of one leg as a percentage of its notional value.
pub fn pnl_percent(position: Option<&PositionSnapshot>) -> Result<f64, FinanceError> {
    let position = position.ok_or(FinanceError::MissingPosition)?;
    if position.notional.is_zero() {
        return Ok(0.0);
    }
    let ratio = position.unrealized_pnl / position.notional * dec!(100);
    Ok(ratio.to_f64().unwrap_or(0.0))
}

/// Combined PnL of a hedged pair as a percentage of the smaller leg's
/// notional. Undefined for a one-sided book.
pub fn overall_pnl_percent(
    long: Option<&PositionSnapshot>,
    short: Option<&PositionSnapshot>,
) -> Result<f64, FinanceError> {
    let long = long.ok_or(FinanceError::MissingLeg(PositionSide::Long))?;
    let short = short.ok_or(FinanceError::MissingLeg(PositionSide::Short))?;
    let base = long.notional.min(short.notional);
    if base.is_zero() {
        return Ok(0.0);
    }
    let ratio = (long.unrealized_pnl + short.unrealized_pnl) / base * dec!(100);
    Ok(ratio.to_f64().unwrap_or(0.0))
}

/// Signed long/short notional imbalance for one pair, in percent of the
/// larger leg. Positive means long-heavy.
pub fn long_short_delta_percent(positions: &[PositionSnapshot], pair: &str) -> f64 {
    let (long_notional, short_notional) = side_notionals(positions, pair);
    let denominator = long_notional.max(short_notional);
    if denominator.is_zero() {
        return 0.0;
    }
    ((long_notional - short_notional) / denominator * dec!(100))
        .to_f64()
        .unwrap_or(0.0)
}

/// Unsigned notional difference between the two legs, used for hedge and
/// balance sizing.
pub fn long_short_delta_value(positions: &[PositionSnapshot], pair: &str) -> Decimal {
    let (long_notional, short_notional) = side_notionals(positions, pair);
    (long_notional - short_notional).abs()
}

/// First snapshot matching pair and side, if any. Exchanges report at most
/// one position per (pair, side) in hedged mode, so "first" is "the" leg.
pub fn leg<'a>(
    positions: &'a [PositionSnapshot],
    pair: &str,
    side: PositionSide,
) -> Option<&'a PositionSnapshot> {
    positions.iter().find(|p| p.pair == pair && p.side == side)
}

fn side_notionals(positions: &[PositionSnapshot], pair: &str) -> (Decimal, Decimal) {
    let mut long_notional = Decimal::ZERO;
    let mut short_notional = Decimal::ZERO;
    for position in positions.iter().filter(|p| p.pair == pair) {
        match position.side {
            PositionSide::Long => long_notional += position.notional,
            PositionSide::Short => short_notional += position.notional,
        }
    }
    (long_notional, short_notional)
}
