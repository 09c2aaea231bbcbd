//! Limitkit - in-process rate measurement and rate control
//!
//! This crate provides a sliding-window frequency aggregator, a token bucket
//! limiter and a debounce map. Every instance guards its state with a single
//! lock and reconciles elapsed time lazily on each call, so no background
//! threads are involved.

pub mod config;
pub mod error;
pub mod limit;
