//! Miscellaneous helper utilities.

use crate::errors::{OracleError, Result};
use crate::metrics::MetricsSink;
use ethers::providers::{Http, Middleware, Provider};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, fmt};

/// Initialize `tracing` subscriber with env-based filter.
///
/// `RUST_LOG` wins when set; otherwise `default_level` is used.
pub fn init_logging(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Run `op` up to `max_attempts` times, sleeping `delay` between failures.
///
/// Returns `ConnectionExhausted` carrying the last error once attempts run out.
pub async fn retry_bounded<T, E, F, Fut>(max_attempts: u32, delay: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt >= max_attempts => {
                return Err(OracleError::ConnectionExhausted {
                    attempts: attempt,
                    last_error: e.to_string(),
                });
            }
            Err(e) => {
                tracing::debug!(attempt, error = %e, "[INIT] connection attempt failed");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Block until the RPC answers `eth_chainId`, bounded by `max_attempts`.
pub async fn ensure_connection(
    provider: &Provider<Http>,
    max_attempts: u32,
    delay: Duration,
) -> Result<u64> {
    let chain_id = retry_bounded(max_attempts, delay, || provider.get_chainid()).await?;
    Ok(chain_id.as_u64())
}

/// Spawns a background task that periodically fetches the L1 EIP-1559 base
/// fee and reports it through the metrics sink. Caller decides the interval.
pub fn spawn_l1_base_fee_watcher(
    provider: Arc<Provider<Http>>,
    metrics: Arc<dyn MetricsSink>,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            match provider.get_block(ethers::types::BlockNumber::Latest).await {
                Ok(Some(block)) => {
                    if let Some(base_fee) = block.base_fee_per_gas {
                        metrics.set_l1_base_fee(base_fee.low_u64());
                    }
                }
                Ok(None) => tracing::debug!("[L1] latest block not available"),
                Err(e) => tracing::warn!(error = %e, "[L1] failed to fetch base fee"),
            }
        }
    })
}

/// Relative-difference gate used before any on-chain write.
///
/// `true` when `1 - min/max` reaches `factor`. Two zeros are never significant.
pub fn is_difference_significant(a: u64, b: u64, factor: f64) -> bool {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    if hi == 0 {
        return false;
    }
    factor <= 1.0 - (lo as f64 / hi as f64)
}
