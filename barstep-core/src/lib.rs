//! barstep core — a synchronized bar-stepping backtest engine.
//!
//! This crate contains:
//! - Line buffers with relative-offset reads and minimum periods
//! - A computation graph of indicator nodes, recomputed once per step
//! - Data feeds and a clock synchronizer with resampling and replaying
//! - A broker that accepts, matches and settles orders against an account
//! - The engine loop that drives strategies and analyzers

pub mod analyzer;
pub mod broker;
pub mod domain;
pub mod engine;
pub mod feed;
pub mod graph;
pub mod indicators;
pub mod line;
