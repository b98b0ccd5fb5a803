//! Shared utilities.

pub mod decimal;

pub use decimal::{apply_buffer, floor_units, round_to_tick, safe_div, to_percent};
