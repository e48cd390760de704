//! finfetch library
//!
//! Resilient fetch orchestration for financial records: an adaptive-TTL
//! cache in front of an ordered provider chain, single-flight resolution
//! per key and per-provider rate limits. The binary is a thin CLI over
//! [`app::App`]; integration tests use the modules directly.

pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod data;
pub mod limiter;
pub mod logging;
pub mod orchestrator;
pub mod providers;
pub mod refresh;
pub mod single_flight;
pub mod warmer;
