//! # ORB Engine
//!
//! Intraday opening-range-breakout trading engine for brokers reachable
//! through the OpenAlgo REST API.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `error`: Error kinds shared by the core and the orchestrator
//! - `market`: Market data and order collaborators (OpenAlgo, in-memory mocks)
//! - `strategy`: Opening range, levels, sizing, selection and trade lifecycle
//! - `session`: Trade book, order execution, health alerts and job scheduling
//! - `persistence`: SQLite trade journal
//! - `utils`: Shared utilities and decimal arithmetic

pub mod config;
pub mod error;
pub mod market;
pub mod persistence;
pub mod session;
pub mod strategy;
pub mod utils;

pub use config::Config;
pub use error::{OrbError, OrbResult};
