//! Entry, stop and target derivation from the opening range.

use crate::config::LevelsConfig;
use crate::error::{OrbError, OrbResult};
use crate::market::Side;
use crate::strategy::opening_range::OpeningRangeStats;
use rust_decimal::Decimal;
use serde::Serialize;

/// Levels for one side of the breakout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SideLevels {
    pub entry: Decimal,
    pub stop: Decimal,
    pub target: Decimal,
    pub risk_per_share: Decimal,
}

impl SideLevels {
    /// LONG needs stop < entry < target, SHORT needs target < entry < stop.
    pub fn is_ordered(&self, side: Side) -> bool {
        match side {
            Side::Long => self.stop < self.entry && self.entry < self.target,
            Side::Short => self.target < self.entry && self.entry < self.stop,
        }
    }
}

/// Candidate levels for both sides.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EntryLevels {
    pub long: SideLevels,
    pub short: SideLevels,
}

impl EntryLevels {
    /// Levels of `side` if its ordering invariant holds.
    pub fn side(&self, symbol: &str, side: Side) -> OrbResult<SideLevels> {
        let levels = match side {
            Side::Long => self.long,
            Side::Short => self.short,
        };

        if levels.is_ordered(side) {
            Ok(levels)
        } else {
            Err(OrbError::InvalidLevels {
                symbol: symbol.to_string(),
                side: side.to_string(),
                reason: format!(
                    "entry={} stop={} target={}",
                    levels.entry, levels.stop, levels.target
                ),
            })
        }
    }
}

/// Derives volatility-adjusted levels.
#[derive(Debug, Clone)]
pub struct LevelDeriver {
    config: LevelsConfig,
    target_multiplier: Decimal,
}

impl LevelDeriver {
    pub fn new(config: LevelsConfig, target_multiplier: Decimal) -> Self {
        Self {
            config,
            target_multiplier,
        }
    }

    /// Entry buffer: tighter when the opening bar range is wide.
    pub fn entry_buffer(&self, stats: &OpeningRangeStats) -> Decimal {
        let mult = if stats.volatility > self.config.high_vol_threshold {
            self.config.high_vol_entry_atr_mult
        } else {
            self.config.low_vol_entry_atr_mult
        };
        stats.atr * mult
    }

    pub fn stop_buffer(&self, stats: &OpeningRangeStats) -> Decimal {
        (stats.atr * self.config.stop_atr_mult).max(stats.range * self.config.stop_range_mult)
    }

    /// Compute both sides. Ordering is checked later by [`EntryLevels::side`].
    pub fn derive(&self, stats: &OpeningRangeStats) -> EntryLevels {
        let entry_buffer = self.entry_buffer(stats);
        let stop_buffer = self.stop_buffer(stats);
        let r = self.target_multiplier;

        let long_entry = stats.high + entry_buffer;
        let long_stop = stats.low - stop_buffer;
        let long_risk = long_entry - long_stop;

        let short_entry = stats.low - entry_buffer;
        let short_stop = stats.high + stop_buffer;
        let short_risk = short_stop - short_entry;

        EntryLevels {
            long: SideLevels {
                entry: long_entry,
                stop: long_stop,
                target: long_entry + long_risk * r,
                risk_per_share: long_risk,
            },
            short: SideLevels {
                entry: short_entry,
                stop: short_stop,
                target: short_entry - short_risk * r,
                risk_per_share: short_risk,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn stats(high: Decimal, low: Decimal, atr: Decimal, volatility: Decimal) -> OpeningRangeStats {
        OpeningRangeStats {
            symbol: "TEST".into(),
            session_date: NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(),
            high,
            low,
            range: high - low,
            atr,
            volatility,
        }
    }

    fn deriver(r: Decimal) -> LevelDeriver {
        LevelDeriver::new(LevelsConfig::default(), r)
    }

    #[test]
    fn test_golden_long_levels() {
        let s = stats(dec!(100), dec!(98), dec!(1.0), dec!(0.01));
        let levels = deriver(dec!(10)).derive(&s);

        // 1% > 0.5% so entry buffer = 1.0 * 0.05
        assert_eq!(levels.long.entry, dec!(100.05));
        // stop buffer = max(0.3, 0.4)
        assert_eq!(levels.long.stop, dec!(97.6));
        assert_eq!(levels.long.risk_per_share, dec!(2.45));
        assert_eq!(levels.long.target, dec!(124.55));
        assert!(levels.side("TEST", Side::Long).is_ok());
    }

    #[test]
    fn test_golden_short_levels() {
        let s = stats(dec!(100), dec!(98), dec!(1.0), dec!(0.01));
        let levels = deriver(dec!(10)).derive(&s);

        assert_eq!(levels.short.entry, dec!(97.95));
        assert_eq!(levels.short.stop, dec!(100.4));
        assert_eq!(levels.short.risk_per_share, dec!(2.45));
        assert_eq!(levels.short.target, dec!(73.45));
        assert!(levels.side("TEST", Side::Short).is_ok());
    }

    #[test]
    fn test_calm_regime_uses_wider_entry_buffer() {
        let s = stats(dec!(100), dec!(98), dec!(1.0), dec!(0.004));
        let levels = deriver(dec!(10)).derive(&s);
        assert_eq!(levels.long.entry, dec!(100.08));
        assert_eq!(levels.short.entry, dec!(97.92));
    }

    #[test]
    fn test_degenerate_levels_rejected() {
        // zero ATR and zero range: entry == stop on both sides
        let s = stats(dec!(100), dec!(100), Decimal::ZERO, Decimal::ZERO);
        let levels = deriver(dec!(10)).derive(&s);

        let err = levels.side("FLAT", Side::Long).unwrap_err();
        assert!(matches!(err, OrbError::InvalidLevels { ref side, .. } if side == "LONG"));
        assert!(levels.side("FLAT", Side::Short).is_err());
    }

    #[test]
    fn test_ordering_holds_whenever_side_is_offered() {
        let cases = [
            (dec!(100), dec!(98), dec!(1), dec!(0.01)),
            (dec!(2510), dec!(2490.5), dec!(7.2), dec!(0.003)),
            (dec!(55.3), dec!(55.1), dec!(0.05), dec!(0.0009)),
            (dec!(10), dec!(9), Decimal::ZERO, dec!(0.1)),
        ];
        for (high, low, atr, vol) in cases {
            let levels = deriver(dec!(2)).derive(&stats(high, low, atr, vol));
            if let Ok(l) = levels.side("X", Side::Long) {
                assert!(l.stop < l.entry && l.entry < l.target);
            }
            if let Ok(s) = levels.side("X", Side::Short) {
                assert!(s.target < s.entry && s.entry < s.stop);
            }
        }
    }
}
