//! Fixed-fractional position sizing and tick grid rounding.

use crate::config::TickConfig;
use crate::error::{OrbError, OrbResult};
use crate::utils::{floor_units, round_to_tick};
use rust_decimal::Decimal;

/// Whole-unit quantity risking `capital * risk_fraction` between entry and stop.
///
/// Returns 0 when the stop distance or the floored quantity is not positive.
pub fn size_qty(entry: Decimal, stop: Decimal, risk_fraction: Decimal, capital: Decimal) -> u64 {
    let risk_per_share = (entry - stop).abs();
    if risk_per_share <= Decimal::ZERO {
        return 0;
    }
    floor_units(capital * risk_fraction / risk_per_share)
}

/// Sizes positions from the account risk budget.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    total_capital: Decimal,
    risk_fraction: Decimal,
}

impl PositionSizer {
    pub fn new(total_capital: Decimal, risk_fraction: Decimal) -> Self {
        Self {
            total_capital,
            risk_fraction,
        }
    }

    /// Capital at risk per trade.
    pub fn risk_budget(&self) -> Decimal {
        self.total_capital * self.risk_fraction
    }

    /// Quantity for a trade, or `ZeroSizing` when nothing can be bought.
    pub fn size(&self, symbol: &str, entry: Decimal, stop: Decimal) -> OrbResult<u64> {
        let qty = size_qty(entry, stop, self.risk_fraction, self.total_capital);
        if qty == 0 {
            return Err(OrbError::ZeroSizing {
                symbol: symbol.to_string(),
                reason: format!(
                    "budget {} over risk/share {}",
                    self.risk_budget(),
                    (entry - stop).abs()
                ),
            });
        }
        Ok(qty)
    }
}

/// Two-band tick grid: one tick below the price threshold, another at or above it.
#[derive(Debug, Clone)]
pub struct TickRounder {
    price_threshold: Decimal,
    small_tick: Decimal,
    large_tick: Decimal,
}

impl TickRounder {
    pub fn new(price_threshold: Decimal, small_tick: Decimal, large_tick: Decimal) -> Self {
        Self {
            price_threshold,
            small_tick,
            large_tick,
        }
    }

    /// Single tick size for every price.
    pub fn uniform(tick: Decimal) -> Self {
        Self::new(Decimal::MAX, tick, tick)
    }

    pub fn tick_for(&self, price: Decimal) -> Decimal {
        if price < self.price_threshold {
            self.small_tick
        } else {
            self.large_tick
        }
    }

    /// Snap a price to the nearest tick of its band.
    ///
    /// Rounding is repeated when the result crosses into the other band, so
    /// the output always sits on the grid of its own band and rounding it
    /// again is a no-op.
    pub fn round(&self, price: Decimal) -> Decimal {
        let first = round_to_tick(price, self.tick_for(price));
        let tick = self.tick_for(first);
        if tick == self.tick_for(price) {
            return first;
        }
        let second = round_to_tick(first, tick);
        if self.tick_for(second) == tick {
            second
        } else {
            // Bands disagree; settle on the coarser grid.
            round_to_tick(first, self.large_tick.max(self.small_tick))
        }
    }
}

impl From<&TickConfig> for TickRounder {
    fn from(config: &TickConfig) -> Self {
        Self::new(config.price_threshold, config.small_tick, config.large_tick)
    }
}
