//! Progressive profit lock table.

use crate::config::LockConfig;
use crate::error::{OrbError, OrbResult};
use rust_decimal::Decimal;

/// One rung: once profit reaches `threshold`, protect `locked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockLevel {
    pub threshold: Decimal,
    pub locked: Decimal,
}

/// Ordered profit-threshold -> locked-profit mapping. Thresholds strictly increase.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressiveLockTable {
    levels: Vec<LockLevel>,
}

impl ProgressiveLockTable {
    /// Build from explicit rungs.
    pub fn new(levels: Vec<LockLevel>) -> OrbResult<Self> {
        for pair in levels.windows(2) {
            if pair[1].threshold <= pair[0].threshold {
                return Err(OrbError::InvalidConfig(format!(
                    "lock thresholds must strictly increase ({} then {})",
                    pair[0].threshold, pair[1].threshold
                )));
            }
        }
        if let Some(bad) = levels
            .iter()
            .find(|l| l.locked < Decimal::ZERO || l.locked > l.threshold)
        {
            return Err(OrbError::InvalidConfig(format!(
                "locked profit {} outside [0, {}]",
                bad.locked, bad.threshold
            )));
        }
        Ok(Self { levels })
    }

    /// Evenly spaced thresholds `first..=last` by `step`, each locking
    /// `max(0, threshold - offset)`.
    pub fn from_range(first: Decimal, last: Decimal, step: Decimal, offset: Decimal) -> OrbResult<Self> {
        if step <= Decimal::ZERO {
            return Err(OrbError::InvalidConfig(format!(
                "lock threshold step must be positive, got {}",
                step
            )));
        }

        let mut levels = Vec::new();
        let mut threshold = first;
        while threshold <= last {
            levels.push(LockLevel {
                threshold,
                locked: (threshold - offset).max(Decimal::ZERO),
            });
            threshold += step;
        }
        Self::new(levels)
    }

    pub fn levels(&self) -> &[LockLevel] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Rungs reached at `profit`, in increasing threshold order.
    pub fn reached(&self, profit: Decimal) -> impl Iterator<Item = &LockLevel> + '_ {
        self.levels
            .iter()
            .take_while(move |l| l.threshold <= profit)
    }

    /// Highest locked fraction reached at `profit`.
    pub fn locked_for(&self, profit: Decimal) -> Option<Decimal> {
        self.reached(profit).map(|l| l.locked).max()
    }
}

impl TryFrom<&LockConfig> for ProgressiveLockTable {
    type Error = OrbError;

    fn try_from(config: &LockConfig) -> OrbResult<Self> {
        Self::from_range(
            config.first_threshold,
            config.last_threshold,
            config.threshold_step,
            config.lock_offset,
        )
    }
}
