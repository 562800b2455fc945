//! Updater for the L2 gas price oracle.
//!
//! Keeps the on-chain token ratio (L1 native token priced in L2 native token)
//! and the operator fee parameters close to market and chain conditions.

pub mod aggregator;
pub mod cex;
pub mod config;
pub mod counter;
pub mod dex;
pub mod errors;
pub mod fee;
pub mod metrics;
pub mod models;
pub mod oracle;
pub mod utils;

#[cfg(test)]
mod testing;
