//! Barplay Core: bar-by-bar replay of historical price data.
//!
//! This crate contains everything below the operator surface:
//! - Format detection and normalization of delimited bar files
//! - The columnar bar store contract and its Polars adapter
//! - Session registry with best-effort persistence
//! - Replay state machine, autoplay player and query facade
//! - `ReplayDesk`, which wires them together

pub mod annotations;
pub mod config;
pub mod data;
pub mod desk;
pub mod domain;
pub mod persist;
pub mod query;
pub mod replay;
pub mod session;
pub mod store;

pub use config::ReplayConfig;
pub use desk::{BarFrame, DeskError, ImportOutcome, ReplayDesk};
