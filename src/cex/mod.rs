//! CEX REST price sources.
//!
//! Responsibilities:
//! • Fetch the last traded price of a symbol from a centralized exchange.
//! • Surface transport and payload errors to the aggregator, which treats
//!   them as an unavailable source.

pub mod binance;
pub mod bybit;

pub use binance::BinanceTicker;
pub use bybit::BybitTicker;

use crate::errors::Result;
use std::time::Duration;

/// Per-request timeout for CEX quotes.
pub const CEX_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared HTTP client for all CEX sources.
pub fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(CEX_REQUEST_TIMEOUT)
        .build()?)
}
