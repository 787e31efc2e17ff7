//! YieldGuard: Stellar yield aggregation data core.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod risk;
pub mod adapters;
pub mod engine;
pub mod api;
