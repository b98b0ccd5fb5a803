//! Candidate scoring and top-N selection across the universe.

use crate::config::SelectionConfig;
use crate::market::Bar;
use crate::utils::safe_div;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info};

/// Transient score of one instrument for one selection cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateScore {
    pub symbol: String,
    pub momentum: Decimal,
    pub volatility: Decimal,
    pub volume_score: Decimal,
    pub composite: Decimal,
}

/// Ranks instruments by opening momentum, range and volume.
#[derive(Debug, Clone)]
pub struct SymbolSelector {
    config: SelectionConfig,
}

impl SymbolSelector {
    pub fn new(config: SelectionConfig) -> Self {
        Self { config }
    }

    pub fn top_n(&self) -> usize {
        self.config.top_n
    }

    /// Weighted composite of the three components.
    pub fn composite(&self, momentum: Decimal, volatility: Decimal, volume_score: Decimal) -> Decimal {
        momentum * self.config.momentum_weight
            + volatility * self.config.volatility_weight
            + volume_score * self.config.volume_weight
    }

    /// Score one instrument from its opening-window bars.
    ///
    /// `None` when the window is empty or opens at zero.
    pub fn score(&self, symbol: &str, opening: &[Bar]) -> Option<CandidateScore> {
        let first = opening.first()?;
        let last = opening.last()?;
        if first.open <= Decimal::ZERO {
            return None;
        }

        let max_high = opening.iter().map(|b| b.high).max()?;
        let min_low = opening.iter().map(|b| b.low).min()?;
        let volume: Decimal = opening.iter().map(|b| b.volume).sum();

        let momentum = (last.close - first.open) / first.open;
        let volatility = (max_high - min_low) / first.open;
        let volume_score =
            safe_div(volume, self.config.min_volume_threshold).min(self.config.volume_score_cap);

        Some(CandidateScore {
            symbol: symbol.to_string(),
            momentum,
            volatility,
            volume_score,
            composite: self.composite(momentum, volatility, volume_score),
        })
    }

    /// Score the universe, highest composite first, ties by symbol.
    ///
    /// Instruments without opening data are left out rather than scored as zero.
    pub fn rank(&self, universe: &[(String, Vec<Bar>)]) -> Vec<CandidateScore> {
        let mut excluded = 0usize;
        let mut scores: Vec<CandidateScore> = universe
            .iter()
            .filter_map(|(symbol, opening)| {
                let score = self.score(symbol, opening);
                if score.is_none() {
                    debug!(%symbol, "No opening data, excluded from ranking");
                    excluded += 1;
                }
                score
            })
            .collect();

        sort_scores(&mut scores);

        info!(
            scanned = universe.len(),
            scored = scores.len(),
            excluded,
            "Universe ranked"
        );
        scores
    }

    /// Top-N of [`rank`](Self::rank).
    pub fn select(&self, universe: &[(String, Vec<Bar>)]) -> Vec<CandidateScore> {
        let mut ranked = self.rank(universe);
        ranked.truncate(self.config.top_n);

        let picked: Vec<&str> = ranked.iter().map(|s| s.symbol.as_str()).collect();
        info!(?picked, "Top symbols selected");
        ranked
    }
}

/// Composite descending, symbol ascending.
pub fn sort_scores(scores: &mut [CandidateScore]) {
    scores.sort_by(|a, b| {
        b.composite
            .cmp(&a.composite)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
}
