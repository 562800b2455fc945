//! Shared data structures used throughout the application.

use ethers::types::U256;

/// A single price observation for one asset from one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct PricePoint {
    pub asset: String,
    /// USD price; `0.0` means the source was unavailable.
    pub value: f64,
    pub source: String,
}

/// Published state of the token ratio aggregator.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TokenRatioState {
    /// Ratio accepted by the previous cycle.
    pub last_ratio: f64,
    /// Ratio accepted by the most recent cycle.
    pub latest_ratio: f64,
    pub last_asset_a_price: f64,
    pub last_asset_b_price: f64,
}

/// Outcome of fetching one block inside a scan.
#[derive(Debug, Clone)]
pub struct BlockScanResult {
    pub block_number: u64,
    pub tx_count: u64,
    pub error: Option<String>,
}

/// Aggregate of one block-scanning cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    pub total_tx_count: u64,
    pub blocks_in_window: u64,
    pub blocks_processed: u64,
    pub blocks_failed: u64,
}

impl ScanOutcome {
    /// Extrapolated transaction count for the whole window, or `None` when
    /// more than 10% of the window failed and the sample is not trusted.
    pub fn estimate(&self) -> Option<u64> {
        if self.blocks_processed == 0 || self.blocks_failed * 10 > self.blocks_in_window {
            return None;
        }
        if self.blocks_processed >= self.blocks_in_window {
            return Some(self.total_tx_count);
        }
        let scaled = self.total_tx_count as u128 * self.blocks_in_window as u128
            / self.blocks_processed as u128;
        Some(scaled.min(u64::MAX as u128) as u64)
    }
}

/// Which on-chain parameter a decision refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OracleParameter {
    TokenRatio,
    OperatorFeeConstant,
    OperatorFeeScalar,
}

impl std::fmt::Display for OracleParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OracleParameter::TokenRatio => "token_ratio",
            OracleParameter::OperatorFeeConstant => "operator_fee_constant",
            OracleParameter::OperatorFeeScalar => "operator_fee_scalar",
        };
        f.write_str(name)
    }
}

/// Whether a freshly computed value should replace the on-chain one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeUpdateDecision {
    pub parameter: OracleParameter,
    pub current: U256,
    pub proposed: U256,
    pub significant: bool,
}
