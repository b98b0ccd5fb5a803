//! Opening range breakout core.
//!
//! Pure computations over already-fetched data:
//! - Opening range and ATR per instrument
//! - Entry, stop and target levels for both sides
//! - Fixed-fractional sizing and tick rounding
//! - Candidate ranking and the index direction filter
//! - The trade lifecycle state machine with its progressive lock table

mod direction;
mod levels;
mod lifecycle;
mod lock_table;
mod opening_range;
mod selector;
mod sizing;

pub use direction::{side_order, MarketDirection};
pub use levels::{EntryLevels, LevelDeriver, SideLevels};
pub use lifecycle::{
    ActiveTrade, Evaluation, ExitReason, OrderIntent, PendingExit, TradeEvent, TradeLifecycleManager,
    TradeState,
};
pub use lock_table::{LockLevel, ProgressiveLockTable};
pub use opening_range::{compute_atr, AtrIndicator, OpeningRangeCalculator, OpeningRangeStats, OpeningWindow};
pub use selector::{sort_scores, CandidateScore, SymbolSelector};
pub use sizing::{size_qty, PositionSizer, TickRounder};
